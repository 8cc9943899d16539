use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::Ipv4Addr;

/// Geo 数据集种类
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum GeoKind {
    /// CIDR 列表，用于按解析后的 IP 直连
    Ip,
    /// 域名列表，用于按主机名直连
    Domain,
}

impl GeoKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            GeoKind::Ip => "ip",
            GeoKind::Domain => "domain",
        }
    }

    /// 缓存文件名
    pub fn cache_file_name(&self) -> &'static str {
        match self {
            GeoKind::Ip => "geo_ip.json",
            GeoKind::Domain => "geo_site.json",
        }
    }
}

impl fmt::Display for GeoKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 网段：网络地址 + 点分掩码
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IpRange {
    pub network: Ipv4Addr,
    pub netmask: Ipv4Addr,
}

impl IpRange {
    pub fn contains(&self, addr: Ipv4Addr) -> bool {
        let mask = u32::from(self.netmask);
        u32::from(addr) & mask == u32::from(self.network) & mask
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum GeoEntries {
    Ip(Vec<IpRange>),
    Domain(Vec<String>),
}

/// 已缓存的 Geo 数据集
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeoDataset {
    /// 上次成功刷新的时间（毫秒时间戳）
    #[serde(default)]
    pub last_update: Option<i64>,

    pub entries: GeoEntries,
}

impl GeoDataset {
    pub fn empty(kind: GeoKind) -> Self {
        let entries = match kind {
            GeoKind::Ip => GeoEntries::Ip(vec![]),
            GeoKind::Domain => GeoEntries::Domain(vec![]),
        };
        Self {
            last_update: None,
            entries,
        }
    }

    pub fn kind(&self) -> GeoKind {
        match self.entries {
            GeoEntries::Ip(_) => GeoKind::Ip,
            GeoEntries::Domain(_) => GeoKind::Domain,
        }
    }

    pub fn len(&self) -> usize {
        match &self.entries {
            GeoEntries::Ip(ranges) => ranges.len(),
            GeoEntries::Domain(domains) => domains.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn ip_ranges(&self) -> &[IpRange] {
        match &self.entries {
            GeoEntries::Ip(ranges) => ranges,
            GeoEntries::Domain(_) => &[],
        }
    }

    pub fn domains(&self) -> &[String] {
        match &self.entries {
            GeoEntries::Domain(domains) => domains,
            GeoEntries::Ip(_) => &[],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ip_range_contains() {
        let range = IpRange {
            network: Ipv4Addr::new(1, 0, 1, 0),
            netmask: Ipv4Addr::new(255, 255, 255, 0),
        };
        assert!(range.contains(Ipv4Addr::new(1, 0, 1, 200)));
        assert!(!range.contains(Ipv4Addr::new(1, 0, 2, 1)));
    }

    #[test]
    fn test_empty_dataset_keeps_kind() {
        let ip = GeoDataset::empty(GeoKind::Ip);
        assert_eq!(ip.kind(), GeoKind::Ip);
        assert!(ip.is_empty());
        assert!(ip.domains().is_empty());

        let json = serde_json::to_value(GeoDataset::empty(GeoKind::Domain)).unwrap();
        assert_eq!(json, serde_json::json!({ "lastUpdate": null, "entries": { "domain": [] } }));
    }
}
