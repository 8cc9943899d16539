use std::net::Ipv4Addr;

use crate::models::IpRange;

/// 前缀长度转点分掩码；超出 0..=32 返回 None
pub fn prefix_to_netmask(prefix: u8) -> Option<Ipv4Addr> {
    match prefix {
        0 => Some(Ipv4Addr::UNSPECIFIED),
        1..=32 => Some(Ipv4Addr::from(u32::MAX << (32 - u32::from(prefix)))),
        _ => None,
    }
}

/// 解析一行 CIDR，如 `10.0.0.0/12`
///
/// 地址原样保留，只换算掩码。格式错误时返回 None。
pub fn parse_cidr(line: &str) -> Option<IpRange> {
    let (addr, prefix) = line.trim().split_once('/')?;
    let network: Ipv4Addr = addr.trim().parse().ok()?;
    let prefix: u8 = prefix.trim().parse().ok()?;
    Some(IpRange {
        network,
        netmask: prefix_to_netmask(prefix)?,
    })
}

/// 解析整份 IP 列表，丢弃空行、注释和格式错误的行
pub fn parse_ip_list(text: &str) -> Vec<IpRange> {
    let mut discarded = 0usize;
    let ranges: Vec<IpRange> = text
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .filter_map(|line| {
            let range = parse_cidr(line);
            if range.is_none() {
                discarded += 1;
            }
            range
        })
        .collect();

    if discarded > 0 {
        log::debug!("Discarded {} malformed CIDR line(s)", discarded);
    }
    ranges
}

/// 解析域名列表：丢弃空行，其余原样保留
pub fn parse_domain_list(text: &str) -> Vec<String> {
    text.lines()
        .filter(|line| !line.trim().is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cidr_netmasks() {
        let range = parse_cidr("192.168.1.0/24").unwrap();
        assert_eq!(range.network, Ipv4Addr::new(192, 168, 1, 0));
        assert_eq!(range.netmask, Ipv4Addr::new(255, 255, 255, 0));

        let range = parse_cidr("10.0.0.0/12").unwrap();
        assert_eq!(range.netmask, Ipv4Addr::new(255, 240, 0, 0));

        assert_eq!(
            parse_cidr("0.0.0.0/0").unwrap().netmask,
            Ipv4Addr::new(0, 0, 0, 0)
        );
        assert_eq!(
            parse_cidr("8.8.8.8/32").unwrap().netmask,
            Ipv4Addr::new(255, 255, 255, 255)
        );
    }

    #[test]
    fn test_malformed_cidr_discarded() {
        assert!(parse_cidr("10.0.0.0/33").is_none());
        assert!(parse_cidr("10.0.0.0/abc").is_none());
        assert!(parse_cidr("10.0.0/8").is_none());
        assert!(parse_cidr("10.0.0.0").is_none());
        assert!(parse_cidr("").is_none());
    }

    #[test]
    fn test_parse_ip_list() {
        let text = "# china ip\n1.0.1.0/24\n\n  1.0.2.0/23  \n10.0.0.0/33\nbogus\n";
        let ranges = parse_ip_list(text);
        assert_eq!(ranges.len(), 2);
        assert_eq!(ranges[1].netmask, Ipv4Addr::new(255, 255, 254, 0));
    }

    #[test]
    fn test_parse_domain_list_keeps_lines_verbatim() {
        let text = "baidu.com\n\n   \n*.qq.com\n# not a comment here\n";
        assert_eq!(
            parse_domain_list(text),
            vec!["baidu.com", "*.qq.com", "# not a comment here"]
        );
    }
}
