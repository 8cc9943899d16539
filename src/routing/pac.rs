//! 将路由策略序列化为 PAC 脚本
//!
//! 输出只依赖策略内容：规则保持声明顺序，Geo 域名按字典序排列。

use std::fmt::Write;

use super::policy::{HostPattern, Route, RoutingPolicy, PRIVATE_RANGES};

pub const PAC_CONTENT_TYPE: &str = "application/x-ns-proxy-autoconfig";

/// 决策对应的 PAC 返回值
pub fn pac_directive(route: &Route) -> String {
    match route {
        Route::Direct => "DIRECT".to_string(),
        Route::Proxy { port, .. } => format!("SOCKS5 127.0.0.1:{}", port),
    }
}

fn js_str(s: &str) -> String {
    // JSON 字符串字面量同样是合法的 JS 字符串字面量
    serde_json::to_string(s).unwrap_or_else(|_| "\"\"".to_string())
}

fn pattern_entry(pattern: &HostPattern) -> (&'static str, &str) {
    match pattern {
        HostPattern::Domain(domain) => ("d", domain.as_str()),
        HostPattern::Wildcard { glob, .. } => ("w", glob.as_str()),
    }
}

const PAC_FUNCTIONS: &str = r#"function matchDomain(host, domain) {
  if (host === domain) return true;
  var n = host.length - domain.length;
  return n > 0 && host.charAt(n - 1) === "." && host.substring(n) === domain;
}

function matchPattern(host, entry) {
  return entry[0] === "w" ? shExpMatch(host, entry[1]) : matchDomain(host, entry[1]);
}

function ipToInt(ip) {
  var p = ip.split(".");
  return ((parseInt(p[0], 10) << 24) | (parseInt(p[1], 10) << 16) | (parseInt(p[2], 10) << 8) | parseInt(p[3], 10)) >>> 0;
}

function inRanges(ip, ranges) {
  var n = ipToInt(ip);
  for (var i = 0; i < ranges.length; i++) {
    if (((n & ranges[i][1]) >>> 0) === ranges[i][0]) return true;
  }
  return false;
}

function inGeoDomains(host) {
  var s = host;
  while (true) {
    if (Object.prototype.hasOwnProperty.call(GEO_DOMAINS, s)) return true;
    var dot = s.indexOf(".");
    if (dot < 0) break;
    s = s.substring(dot + 1);
  }
  for (var i = 0; i < GEO_DOMAIN_GLOBS.length; i++) {
    if (shExpMatch(host, GEO_DOMAIN_GLOBS[i])) return true;
  }
  return false;
}

function FindProxyForURL(url, host) {
  host = host.toLowerCase();
  if (host.charAt(host.length - 1) === ".") host = host.substring(0, host.length - 1);

  if (isPlainHostName(host) || host === "localhost") return "DIRECT";
  for (var t = 0; t < LOCAL_TLDS.length; t++) {
    if (dnsDomainIs(host, "." + LOCAL_TLDS[t])) return "DIRECT";
  }

  var ip = /^\d+\.\d+\.\d+\.\d+$/.test(host) ? host : dnsResolve(host);
  if (ip && inRanges(ip, PRIVATE_RANGES)) return "DIRECT";

  for (var r = 0; r < RULES.length; r++) {
    if (matchPattern(host, RULES[r])) return RULES[r][2];
  }

  if (inGeoDomains(host)) return "DIRECT";
  if (ip && GEO_RANGES.length > 0 && inRanges(ip, GEO_RANGES)) return "DIRECT";

  return DEFAULT_ROUTE;
}
"#;

/// 渲染 PAC 脚本
pub fn render_pac(policy: &RoutingPolicy) -> String {
    let mut out = String::new();
    out.push_str("// Generated by Holocron. Do not edit.\n\n");

    let tlds: Vec<String> = policy.local_tlds.iter().map(|t| js_str(t)).collect();
    let _ = writeln!(out, "var LOCAL_TLDS = [{}];", tlds.join(", "));

    let private: Vec<String> = PRIVATE_RANGES
        .iter()
        .map(|(net, mask)| {
            let mask = u32::from(*mask);
            format!("[{}, {}]", u32::from(*net) & mask, mask)
        })
        .collect();
    let _ = writeln!(out, "var PRIVATE_RANGES = [{}];", private.join(", "));

    out.push_str("var RULES = [");
    for rule in &policy.rules {
        let (kind, pattern) = pattern_entry(&rule.pattern);
        let _ = write!(
            out,
            "\n  [{}, {}, {}],",
            js_str(kind),
            js_str(pattern),
            js_str(&pac_directive(&rule.route))
        );
    }
    out.push_str(if policy.rules.is_empty() { "];\n" } else { "\n];\n" });

    out.push_str("var GEO_DOMAINS = {");
    let domains = policy.geo_domains.sorted_domains();
    for (i, domain) in domains.iter().enumerate() {
        if i > 0 {
            out.push(',');
        }
        let _ = write!(out, "\n  {}: 1", js_str(domain));
    }
    out.push_str(if domains.is_empty() { "};\n" } else { "\n};\n" });

    let globs: Vec<String> = policy
        .geo_domains
        .wildcards()
        .iter()
        .map(|p| js_str(pattern_entry(p).1))
        .collect();
    let _ = writeln!(out, "var GEO_DOMAIN_GLOBS = [{}];", globs.join(", "));

    out.push_str("var GEO_RANGES = [");
    for (i, range) in policy.geo_ranges.iter().enumerate() {
        if i > 0 {
            out.push(',');
        }
        let mask = u32::from(range.netmask);
        let _ = write!(out, "\n  [{}, {}]", u32::from(range.network) & mask, mask);
    }
    out.push_str(if policy.geo_ranges.is_empty() { "];\n" } else { "\n];\n" });

    let _ = writeln!(
        out,
        "var DEFAULT_ROUTE = {};\n",
        js_str(&pac_directive(&policy.default_route))
    );

    out.push_str(PAC_FUNCTIONS);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{
        BypassRule, EndpointConfig, EndpointKind, GeoDataset, GeoEntries, IpRange, RuleTarget,
        SshParams,
    };
    use crate::routing::PolicyInputs;
    use std::net::Ipv4Addr;

    fn home() -> EndpointConfig {
        EndpointConfig {
            id: "home".to_string(),
            name: "Home".to_string(),
            kind: EndpointKind::Ssh(SshParams {
                host: "example.com".to_string(),
                user: "root".to_string(),
                ..Default::default()
            }),
            port_forwards: vec![],
            enabled: true,
            dynamic_port: Some(1080),
        }
    }

    #[test]
    fn test_pac_routes_to_active_socks_port() {
        let home = home();
        let endpoints = vec![home.clone()];
        let policy = RoutingPolicy::build(&PolicyInputs {
            active: Some(&home),
            endpoints: &endpoints,
            ..Default::default()
        });
        let pac = render_pac(&policy);

        assert!(pac.contains("function FindProxyForURL(url, host)"));
        assert!(pac.contains(r#"var DEFAULT_ROUTE = "SOCKS5 127.0.0.1:1080";"#));
        assert!(pac.contains(r#"var LOCAL_TLDS = ["local"];"#));
        assert!(pac.contains("[167772160, 4278190080]"));
        assert!(pac.contains("var RULES = [];"));
    }

    #[test]
    fn test_pac_without_active_endpoint_is_direct() {
        let policy = RoutingPolicy::build(&PolicyInputs::default());
        let pac = render_pac(&policy);
        assert!(pac.contains(r#"var DEFAULT_ROUTE = "DIRECT";"#));
        assert!(!pac.contains("SOCKS5"));
    }

    #[test]
    fn test_pac_rules_and_geo_are_deterministic() {
        let home = home();
        let endpoints = vec![home.clone()];
        let rules = vec![
            BypassRule {
                pattern: "*.Example.org".to_string(),
                target: RuleTarget::Direct,
            },
            BypassRule {
                pattern: "github.com".to_string(),
                target: RuleTarget::Endpoint("home".to_string()),
            },
        ];
        let geo_a = GeoDataset {
            last_update: Some(1),
            entries: GeoEntries::Domain(vec!["qq.com".to_string(), "baidu.com".to_string()]),
        };
        let geo_b = GeoDataset {
            last_update: Some(2),
            entries: GeoEntries::Domain(vec!["baidu.com".to_string(), "qq.com".to_string()]),
        };
        let geo_ip = GeoDataset {
            last_update: Some(1),
            entries: GeoEntries::Ip(vec![IpRange {
                network: Ipv4Addr::new(1, 0, 1, 0),
                netmask: Ipv4Addr::new(255, 255, 255, 0),
            }]),
        };

        let render = |geo: &GeoDataset| {
            render_pac(&RoutingPolicy::build(&PolicyInputs {
                active: Some(&home),
                endpoints: &endpoints,
                rules: &rules,
                geo_domains: Some(geo),
                geo_ips: Some(&geo_ip),
                ..Default::default()
            }))
        };

        let pac = render(&geo_a);
        assert_eq!(pac, render(&geo_b));

        let direct_rule = pac.find(r#"["w", "*.example.org", "DIRECT"]"#).unwrap();
        let proxy_rule = pac
            .find(r#"["d", "github.com", "SOCKS5 127.0.0.1:1080"]"#)
            .unwrap();
        assert!(direct_rule < proxy_rule);
        assert!(pac.find("\"baidu.com\": 1").unwrap() < pac.find("\"qq.com\": 1").unwrap());
        assert!(pac.contains("[16777472, 4294967040]"));
    }
}
