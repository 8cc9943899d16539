use serde::{Deserialize, Serialize};

use super::{BypassRule, LatencyHistory};

/// 应用设置（settings.json）
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppSettings {
    #[serde(default = "default_ping_host")]
    pub ping_host: String,

    #[serde(default = "default_health_check_url")]
    pub health_check_url: String,

    #[serde(default = "default_auto_reconnect")]
    pub auto_reconnect: bool,

    #[serde(default)]
    pub bypass_rules: Vec<BypassRule>,

    #[serde(default)]
    pub geo: GeoSettings,

    /// 额外视为局域网的顶级域（`local` 始终直连）
    #[serde(default)]
    pub local_tlds: Vec<String>,

    #[serde(default = "default_helper_path")]
    pub helper_path: String,

    #[serde(default = "default_control_port")]
    pub control_port: u16,

    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
}

fn default_ping_host() -> String {
    "youtube.com".to_string()
}
fn default_health_check_url() -> String {
    "https://gemini.google.com/app".to_string()
}
fn default_auto_reconnect() -> bool {
    true
}
fn default_helper_path() -> String {
    crate::utils::get_helper_binary_name().to_string()
}
fn default_control_port() -> u16 {
    33212
}
fn default_poll_interval_secs() -> u64 {
    60
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            ping_host: default_ping_host(),
            health_check_url: default_health_check_url(),
            auto_reconnect: default_auto_reconnect(),
            bypass_rules: vec![],
            geo: GeoSettings::default(),
            local_tlds: vec![],
            helper_path: default_helper_path(),
            control_port: default_control_port(),
            poll_interval_secs: default_poll_interval_secs(),
        }
    }
}

/// GeoIP / GeoSite 分流设置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeoSettings {
    #[serde(default)]
    pub ip_bypass: bool,

    #[serde(default)]
    pub domain_bypass: bool,

    #[serde(default = "default_ip_source")]
    pub ip_source_url: String,

    #[serde(default = "default_domain_source")]
    pub domain_source_url: String,

    /// 将 GitHub 源改写为 jsDelivr CDN
    #[serde(default)]
    pub use_cdn_mirror: bool,
}

fn default_ip_source() -> String {
    "https://raw.githubusercontent.com/17mon/china_ip_list/master/china_ip_list.txt".to_string()
}
fn default_domain_source() -> String {
    "https://raw.githubusercontent.com/Loyalsoldier/v2ray-rules-dat/release/china-list.txt"
        .to_string()
}

impl Default for GeoSettings {
    fn default() -> Self {
        Self {
            ip_bypass: false,
            domain_bypass: false,
            ip_source_url: default_ip_source(),
            domain_source_url: default_domain_source(),
            use_cdn_mirror: false,
        }
    }
}

/// 系统代理设置快照
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "camelCase")]
pub enum ProxySettings {
    Direct,
    Socks { host: String, port: u16 },
    AutoConfig { url: String },
}

/// 由守护进程自行维护的本地状态（state.json）
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocalState {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active_config_id: Option<String>,

    #[serde(default)]
    pub proxy_managed: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_proxy: Option<ProxySettings>,

    #[serde(default)]
    pub latency_history: LatencyHistory,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_settings_defaults_from_empty_json() {
        let settings: AppSettings = serde_json::from_str("{}").unwrap();
        assert_eq!(settings.ping_host, "youtube.com");
        assert_eq!(settings.health_check_url, "https://gemini.google.com/app");
        assert!(settings.auto_reconnect);
        assert!(!settings.geo.ip_bypass);
        assert_eq!(settings.control_port, 33212);
        assert_eq!(settings.poll_interval_secs, 60);
    }

    #[test]
    fn test_proxy_settings_tagging() {
        let json = serde_json::to_string(&ProxySettings::Socks {
            host: "127.0.0.1".to_string(),
            port: 1080,
        })
        .unwrap();
        assert_eq!(json, r#"{"mode":"socks","host":"127.0.0.1","port":1080}"#);

        let parsed: ProxySettings =
            serde_json::from_str(r#"{"mode":"autoConfig","url":"http://127.0.0.1/proxy.pac"}"#)
                .unwrap();
        assert_eq!(
            parsed,
            ProxySettings::AutoConfig {
                url: "http://127.0.0.1/proxy.pac".to_string()
            }
        );
    }
}
