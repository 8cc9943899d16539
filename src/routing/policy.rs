use regex::Regex;
use std::collections::HashSet;
use std::net::Ipv4Addr;

use crate::models::{BypassRule, EndpointConfig, GeoDataset, IpRange, RuleTarget};

/// 始终直连的私有/回环网段
pub const PRIVATE_RANGES: [(Ipv4Addr, Ipv4Addr); 4] = [
    (Ipv4Addr::new(10, 0, 0, 0), Ipv4Addr::new(255, 0, 0, 0)),
    (Ipv4Addr::new(172, 16, 0, 0), Ipv4Addr::new(255, 240, 0, 0)),
    (Ipv4Addr::new(192, 168, 0, 0), Ipv4Addr::new(255, 255, 0, 0)),
    (Ipv4Addr::new(127, 0, 0, 0), Ipv4Addr::new(255, 0, 0, 0)),
];

/// 路由决策
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route {
    Direct,
    Proxy { endpoint_id: String, port: u16 },
}

impl Route {
    /// 端点存在且有动态转发端口时走代理，否则直连
    fn via(endpoint: Option<&EndpointConfig>) -> Self {
        match endpoint.and_then(|e| e.dynamic_forward_port().map(|port| (e, port))) {
            Some((endpoint, port)) => Route::Proxy {
                endpoint_id: endpoint.id.clone(),
                port,
            },
            None => Route::Direct,
        }
    }
}

/// 主机名模式
///
/// 含 `*` 或 `?` 时按 shell 通配符匹配整个主机名，否则匹配该域名本身及其子域名。
#[derive(Debug, Clone)]
pub enum HostPattern {
    Domain(String),
    Wildcard { glob: String, regex: Regex },
}

impl HostPattern {
    pub fn parse(pattern: &str) -> Option<Self> {
        let pattern = pattern.trim().to_lowercase();
        if pattern.is_empty() {
            return None;
        }

        if pattern.contains(|c: char| c == '*' || c == '?') {
            let mut source = String::with_capacity(pattern.len() + 8);
            source.push('^');
            for c in pattern.chars() {
                match c {
                    '*' => source.push_str(".*"),
                    '?' => source.push('.'),
                    c => source.push_str(&regex::escape(c.encode_utf8(&mut [0u8; 4]))),
                }
            }
            source.push('$');
            let regex = Regex::new(&source).ok()?;
            Some(HostPattern::Wildcard {
                glob: pattern,
                regex,
            })
        } else {
            Some(HostPattern::Domain(
                pattern.trim_start_matches('.').to_string(),
            ))
        }
    }

    /// `host` 须已转为小写
    pub fn matches(&self, host: &str) -> bool {
        match self {
            HostPattern::Domain(domain) => is_same_or_subdomain(host, domain),
            HostPattern::Wildcard { regex, .. } => regex.is_match(host),
        }
    }
}

fn is_same_or_subdomain(host: &str, domain: &str) -> bool {
    host == domain
        || (host.len() > domain.len()
            && host.ends_with(domain)
            && host.as_bytes()[host.len() - domain.len() - 1] == b'.')
}

/// 大量域名的集合匹配（Geo 域名列表）
#[derive(Debug, Clone, Default)]
pub struct DomainSet {
    domains: HashSet<String>,
    wildcards: Vec<HostPattern>,
}

impl DomainSet {
    pub fn from_patterns<'a>(patterns: impl IntoIterator<Item = &'a str>) -> Self {
        let mut set = Self::default();
        for pattern in patterns.into_iter().filter_map(HostPattern::parse) {
            match pattern {
                HostPattern::Domain(domain) => {
                    set.domains.insert(domain);
                }
                wildcard => set.wildcards.push(wildcard),
            }
        }
        set
    }

    pub fn is_empty(&self) -> bool {
        self.domains.is_empty() && self.wildcards.is_empty()
    }

    /// 按主机名逐级向上查找
    pub fn matches(&self, host: &str) -> bool {
        let mut suffix = host;
        loop {
            if self.domains.contains(suffix) {
                return true;
            }
            match suffix.split_once('.') {
                Some((_, parent)) => suffix = parent,
                None => break,
            }
        }
        self.wildcards.iter().any(|w| w.matches(host))
    }

    /// 排序后的域名，用于确定性输出
    pub fn sorted_domains(&self) -> Vec<&str> {
        let mut domains: Vec<&str> = self.domains.iter().map(String::as_str).collect();
        domains.sort_unstable();
        domains
    }

    pub fn wildcards(&self) -> &[HostPattern] {
        &self.wildcards
    }
}

#[derive(Debug, Clone)]
pub struct PolicyRule {
    pub pattern: HostPattern,
    pub route: Route,
}

/// 构建路由策略所需的输入
#[derive(Debug, Clone, Copy, Default)]
pub struct PolicyInputs<'a> {
    pub active: Option<&'a EndpointConfig>,
    pub endpoints: &'a [EndpointConfig],
    pub rules: &'a [BypassRule],
    pub local_tlds: &'a [String],
    /// 已启用时传入
    pub geo_domains: Option<&'a GeoDataset>,
    pub geo_ips: Option<&'a GeoDataset>,
}

/// 路由策略：按固定优先级依次判断
///
/// 1. 本地地址直连  2. 用户规则  3. Geo 域名直连  4. Geo IP 直连  5. 默认端点
#[derive(Debug, Clone)]
pub struct RoutingPolicy {
    pub local_tlds: Vec<String>,
    pub rules: Vec<PolicyRule>,
    pub geo_domains: DomainSet,
    pub geo_ranges: Vec<IpRange>,
    pub default_route: Route,
}

impl RoutingPolicy {
    pub fn build(inputs: &PolicyInputs<'_>) -> Self {
        let mut local_tlds = vec!["local".to_string()];
        for tld in inputs.local_tlds {
            let tld = tld.trim().trim_start_matches('.').to_lowercase();
            if !tld.is_empty() && !local_tlds.contains(&tld) {
                local_tlds.push(tld);
            }
        }

        let rules = inputs
            .rules
            .iter()
            .filter_map(|rule| {
                let Some(pattern) = HostPattern::parse(&rule.pattern) else {
                    log::warn!("Skipping bypass rule with empty pattern");
                    return None;
                };
                let route = match &rule.target {
                    RuleTarget::Direct => Route::Direct,
                    RuleTarget::Endpoint(id) => {
                        let route = Route::via(inputs.endpoints.iter().find(|e| &e.id == id));
                        if route == Route::Direct {
                            log::debug!(
                                "Rule '{}' targets '{}' which has no dynamic port, routing direct",
                                rule.pattern,
                                id
                            );
                        }
                        route
                    }
                };
                Some(PolicyRule { pattern, route })
            })
            .collect();

        let geo_domains = inputs
            .geo_domains
            .map(|d| DomainSet::from_patterns(d.domains().iter().map(String::as_str)))
            .unwrap_or_default();
        let geo_ranges = inputs
            .geo_ips
            .map(|d| d.ip_ranges().to_vec())
            .unwrap_or_default();

        Self {
            local_tlds,
            rules,
            geo_domains,
            geo_ranges,
            default_route: Route::via(inputs.active),
        }
    }

    /// 判定主机的路由；`resolved` 为主机解析出的 IPv4 地址
    pub fn decide(&self, host: &str, resolved: Option<Ipv4Addr>) -> Route {
        let host = host.trim().trim_end_matches('.').to_lowercase();
        let addr = host.parse::<Ipv4Addr>().ok().or(resolved);

        if self.is_local_host(&host) || addr.is_some_and(is_private_addr) {
            return Route::Direct;
        }

        if let Some(rule) = self.rules.iter().find(|r| r.pattern.matches(&host)) {
            return rule.route.clone();
        }

        if self.geo_domains.matches(&host) {
            return Route::Direct;
        }

        if let Some(addr) = addr {
            if self.geo_ranges.iter().any(|r| r.contains(addr)) {
                return Route::Direct;
            }
        }

        self.default_route.clone()
    }

    fn is_local_host(&self, host: &str) -> bool {
        !host.contains('.')
            || host == "localhost"
            || self
                .local_tlds
                .iter()
                .any(|tld| host.strip_suffix(tld.as_str()).is_some_and(|rest| rest.ends_with('.')))
    }
}

pub fn is_private_addr(addr: Ipv4Addr) -> bool {
    PRIVATE_RANGES.iter().any(|(net, mask)| {
        IpRange {
            network: *net,
            netmask: *mask,
        }
        .contains(addr)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{
        EndpointKind, ForwardKind, GeoEntries, PortForward, SshParams,
    };

    fn ssh_endpoint(id: &str, dynamic: Option<u16>) -> EndpointConfig {
        EndpointConfig {
            id: id.to_string(),
            name: id.to_string(),
            kind: EndpointKind::Ssh(SshParams {
                host: format!("{}.example.net", id),
                user: "root".to_string(),
                ..Default::default()
            }),
            port_forwards: dynamic
                .map(|port| {
                    vec![PortForward {
                        kind: ForwardKind::Dynamic,
                        local_port: port,
                        remote_host: None,
                        remote_port: None,
                    }]
                })
                .unwrap_or_default(),
            enabled: true,
            dynamic_port: None,
        }
    }

    fn rule(pattern: &str, target: RuleTarget) -> BypassRule {
        BypassRule {
            pattern: pattern.to_string(),
            target,
        }
    }

    fn proxy(id: &str, port: u16) -> Route {
        Route::Proxy {
            endpoint_id: id.to_string(),
            port,
        }
    }

    #[test]
    fn test_host_pattern_semantics() {
        let domain = HostPattern::parse("Example.com").unwrap();
        assert!(domain.matches("example.com"));
        assert!(domain.matches("www.example.com"));
        assert!(!domain.matches("notexample.com"));

        let wildcard = HostPattern::parse("*.example.com").unwrap();
        assert!(wildcard.matches("a.example.com"));
        assert!(!wildcard.matches("example.com"));

        let single = HostPattern::parse("api?.example.com").unwrap();
        assert!(single.matches("api1.example.com"));
        assert!(!single.matches("api12.example.com"));

        assert!(HostPattern::parse("   ").is_none());
    }

    #[test]
    fn test_ssh_dynamic_port_end_to_end() {
        let home = ssh_endpoint("home", Some(1080));
        let endpoints = vec![home.clone()];
        let policy = RoutingPolicy::build(&PolicyInputs {
            active: Some(&home),
            endpoints: &endpoints,
            ..Default::default()
        });

        assert_eq!(policy.decide("printer.local", None), Route::Direct);
        assert_eq!(policy.decide("10.1.2.3", None), Route::Direct);
        assert_eq!(policy.decide("intranet", None), Route::Direct);
        assert_eq!(
            policy.decide("db.corp", Some(Ipv4Addr::new(192, 168, 3, 4))),
            Route::Direct
        );
        assert_eq!(policy.decide("www.google.com", None), proxy("home", 1080));
    }

    #[test]
    fn test_rule_precedes_geo_domain() {
        let home = ssh_endpoint("home", Some(1080));
        let endpoints = vec![home.clone()];
        let rules = vec![
            rule("baidu.com", RuleTarget::Endpoint("home".to_string())),
            rule("*.example.org", RuleTarget::Direct),
        ];
        let geo = GeoDataset {
            last_update: Some(1),
            entries: GeoEntries::Domain(vec!["baidu.com".to_string(), "qq.com".to_string()]),
        };
        let policy = RoutingPolicy::build(&PolicyInputs {
            active: Some(&home),
            endpoints: &endpoints,
            rules: &rules,
            geo_domains: Some(&geo),
            ..Default::default()
        });

        assert_eq!(policy.decide("map.baidu.com", None), proxy("home", 1080));
        assert_eq!(policy.decide("im.qq.com", None), Route::Direct);
        assert_eq!(policy.decide("cdn.example.org", None), Route::Direct);
        assert_eq!(policy.decide("example.org", None), proxy("home", 1080));
    }

    #[test]
    fn test_rule_targets_without_port_fall_back_to_direct() {
        let home = ssh_endpoint("home", Some(1080));
        let portless = ssh_endpoint("portless", None);
        let endpoints = vec![home.clone(), portless];
        let rules = vec![
            rule("a.com", RuleTarget::Endpoint("portless".to_string())),
            rule("b.com", RuleTarget::Endpoint("missing".to_string())),
        ];
        let policy = RoutingPolicy::build(&PolicyInputs {
            active: Some(&home),
            endpoints: &endpoints,
            rules: &rules,
            ..Default::default()
        });

        assert_eq!(policy.decide("a.com", None), Route::Direct);
        assert_eq!(policy.decide("b.com", None), Route::Direct);
    }

    #[test]
    fn test_geo_ip_and_no_active_endpoint() {
        let geo = GeoDataset {
            last_update: Some(1),
            entries: GeoEntries::Ip(vec![IpRange {
                network: Ipv4Addr::new(1, 0, 1, 0),
                netmask: Ipv4Addr::new(255, 255, 255, 0),
            }]),
        };
        let home = ssh_endpoint("home", Some(1080));
        let policy = RoutingPolicy::build(&PolicyInputs {
            active: Some(&home),
            geo_ips: Some(&geo),
            ..Default::default()
        });
        assert_eq!(
            policy.decide("cn.example", Some(Ipv4Addr::new(1, 0, 1, 9))),
            Route::Direct
        );
        assert_eq!(
            policy.decide("us.example", Some(Ipv4Addr::new(8, 8, 8, 8))),
            proxy("home", 1080)
        );

        let inactive = RoutingPolicy::build(&PolicyInputs::default());
        assert_eq!(inactive.decide("www.google.com", None), Route::Direct);
    }

    #[test]
    fn test_custom_local_tlds() {
        let home = ssh_endpoint("home", Some(1080));
        let tlds = vec![".LAN".to_string(), "home.arpa".to_string()];
        let policy = RoutingPolicy::build(&PolicyInputs {
            active: Some(&home),
            local_tlds: &tlds,
            ..Default::default()
        });
        assert_eq!(policy.decide("nas.lan", None), Route::Direct);
        assert_eq!(policy.decide("router.home.arpa", None), Route::Direct);
        assert_eq!(policy.decide("plan.com", None), proxy("home", 1080));
    }
}
