use anyhow::{anyhow, Result};
use base64::{engine::general_purpose::STANDARD, engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use serde::{Deserialize, Serialize};

/// URI 导入时默认的本地 SOCKS 端口
pub const DEFAULT_SOCKS_PORT: u16 = 1080;

/// 隧道端点配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EndpointConfig {
    pub id: String,
    pub name: String,

    #[serde(flatten)]
    pub kind: EndpointKind,

    #[serde(default)]
    pub port_forwards: Vec<PortForward>,

    /// 是否参与自动故障切换
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dynamic_port: Option<u16>,
}

fn default_enabled() -> bool {
    true
}

/// 协议类型及其参数
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum EndpointKind {
    Ssh(SshParams),
    #[serde(rename = "openvpn")]
    OpenVpn(OpenVpnParams),
    Vless(VlessParams),
    #[serde(rename = "ss")]
    Shadowsocks(ShadowsocksParams),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SshParams {
    pub host: String,
    #[serde(default)]
    pub user: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote_command: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OpenVpnParams {
    /// .ovpn 配置文件内容
    pub profile: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VlessParams {
    pub host: String,
    pub port: u16,
    pub uuid: String,
    #[serde(default)]
    pub tls: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sni: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alpn: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShadowsocksParams {
    pub host: String,
    pub port: u16,
    pub cipher: String,
    pub password: String,
}

/// 端口转发规则
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PortForward {
    pub kind: ForwardKind,
    pub local_port: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote_host: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote_port: Option<u16>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ForwardKind {
    Local,
    Remote,
    Dynamic,
}

impl EndpointKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EndpointKind::Ssh(_) => "ssh",
            EndpointKind::OpenVpn(_) => "openvpn",
            EndpointKind::Vless(_) => "vless",
            EndpointKind::Shadowsocks(_) => "ss",
        }
    }
}

impl EndpointConfig {
    /// 推导稳定标识，用于向本地助手进程定位隧道
    ///
    /// 主机为空时返回 None，这类端点在故障切换中会被跳过
    pub fn stable_identifier(&self) -> Option<String> {
        let id = match &self.kind {
            EndpointKind::Ssh(p) => {
                let host = p.host.trim();
                if host.is_empty() {
                    return None;
                }
                if p.user.trim().is_empty() {
                    host.to_string()
                } else {
                    format!("{}@{}", p.user.trim(), host)
                }
            }
            EndpointKind::OpenVpn(p) => openvpn_remote_host(&p.profile)?,
            EndpointKind::Vless(p) => {
                if p.host.trim().is_empty() {
                    return None;
                }
                format!("{}@{}:{}", p.uuid, p.host.trim(), p.port)
            }
            EndpointKind::Shadowsocks(p) => {
                if p.host.trim().is_empty() {
                    return None;
                }
                format!("{}:{}", p.host.trim(), p.port)
            }
        };
        Some(id)
    }

    /// 推导动态转发（本地 SOCKS）端口
    pub fn dynamic_forward_port(&self) -> Option<u16> {
        self.port_forwards
            .iter()
            .find(|f| f.kind == ForwardKind::Dynamic)
            .map(|f| f.local_port)
            .or(self.dynamic_port)
    }

    /// 从分享链接创建端点（支持 vless:// 与 ss://）
    pub fn from_uri(uri: &str) -> Result<Self> {
        let uri = uri.trim();
        let (kind, remarks) = if let Some(rest) = uri.strip_prefix("vless://") {
            parse_vless(rest)?
        } else if let Some(rest) = uri.strip_prefix("ss://") {
            parse_shadowsocks(rest)?
        } else {
            return Err(anyhow!("Unsupported URI scheme: {}", uri));
        };

        let name = if remarks.is_empty() {
            format!("{} endpoint", kind.as_str())
        } else {
            remarks
        };

        Ok(Self {
            id: uuid::Uuid::new_v4().to_string(),
            name,
            kind,
            port_forwards: vec![],
            enabled: true,
            dynamic_port: Some(DEFAULT_SOCKS_PORT),
        })
    }
}

/// 取 OpenVPN 配置中第一条 remote 指令的主机
fn openvpn_remote_host(profile: &str) -> Option<String> {
    profile.lines().find_map(|line| {
        let mut parts = line.split_whitespace();
        match (parts.next(), parts.next()) {
            (Some("remote"), Some(host)) => Some(host.to_string()),
            _ => None,
        }
    })
}

/// 拆分 `#remarks` 片段
fn split_fragment(s: &str) -> (&str, String) {
    match s.split_once('#') {
        Some((body, frag)) => {
            let remarks = urlencoding::decode(frag)
                .map(|c| c.into_owned())
                .unwrap_or_else(|_| frag.to_string());
            (body, remarks)
        }
        None => (s, String::new()),
    }
}

fn split_host_port(s: &str) -> Result<(String, u16)> {
    let (host, port) = s
        .rsplit_once(':')
        .ok_or_else(|| anyhow!("Missing port in '{}'", s))?;
    let port: u16 = port
        .parse()
        .map_err(|_| anyhow!("Invalid port in '{}'", s))?;
    let host = host.trim_start_matches('[').trim_end_matches(']');
    if host.is_empty() {
        return Err(anyhow!("Missing host in '{}'", s));
    }
    Ok((host.to_string(), port))
}

/// vless://uuid@host:port?tls=1&peer=..&alpn=..#remarks
fn parse_vless(rest: &str) -> Result<(EndpointKind, String)> {
    let (body, remarks) = split_fragment(rest);
    let (authority, query) = body.split_once('?').unwrap_or((body, ""));
    let (uuid, host_port) = authority
        .split_once('@')
        .ok_or_else(|| anyhow!("VLESS URI is missing the uuid"))?;
    let (host, port) = split_host_port(host_port.trim_end_matches('/'))?;

    let mut params = VlessParams {
        host,
        port,
        uuid: uuid.to_string(),
        ..Default::default()
    };

    for pair in query.split('&').filter(|p| !p.is_empty()) {
        let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
        let value = urlencoding::decode(value)
            .map(|v| v.into_owned())
            .unwrap_or_else(|_| value.to_string());
        match key {
            "tls" => params.tls = value == "1" || value == "true",
            "security" => params.tls = params.tls || value == "tls",
            "peer" | "sni" => params.sni = Some(value),
            "alpn" => params.alpn = Some(value),
            _ => {}
        }
    }

    Ok((EndpointKind::Vless(params), remarks))
}

/// ss://BASE64(method:password@host:port)#remarks
///
/// 同时兼容 SIP002 形式 ss://BASE64(method:password)@host:port
fn parse_shadowsocks(rest: &str) -> Result<(EndpointKind, String)> {
    let (body, remarks) = split_fragment(rest);
    let body = body.split('?').next().unwrap_or(body).trim_end_matches('/');

    let decoded = match body.rsplit_once('@') {
        Some((user_info, host_port)) if !user_info.contains(':') => {
            format!("{}@{}", decode_base64(user_info)?, host_port)
        }
        Some(_) => body.to_string(),
        None => decode_base64(body)?,
    };

    let (method_password, host_port) = decoded
        .rsplit_once('@')
        .ok_or_else(|| anyhow!("Shadowsocks URI is missing the server"))?;
    let (cipher, password) = method_password
        .split_once(':')
        .ok_or_else(|| anyhow!("Shadowsocks URI is missing the password"))?;
    let (host, port) = split_host_port(host_port)?;

    Ok((
        EndpointKind::Shadowsocks(ShadowsocksParams {
            host,
            port,
            cipher: cipher.to_string(),
            password: password.to_string(),
        }),
        remarks,
    ))
}

fn decode_base64(s: &str) -> Result<String> {
    let bytes = STANDARD
        .decode(s)
        .or_else(|_| URL_SAFE_NO_PAD.decode(s.trim_end_matches('=')))
        .map_err(|e| anyhow!("Invalid base64 payload: {}", e))?;
    String::from_utf8(bytes).map_err(|e| anyhow!("Invalid UTF-8 payload: {}", e))
}

/// 用户分流规则的目标
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuleTarget {
    Direct,
    Endpoint(String),
}

impl Serialize for RuleTarget {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            RuleTarget::Direct => serializer.serialize_str("DIRECT"),
            RuleTarget::Endpoint(id) => serializer.serialize_str(id),
        }
    }
}

impl<'de> Deserialize<'de> for RuleTarget {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        if s.eq_ignore_ascii_case("direct") {
            Ok(RuleTarget::Direct)
        } else {
            Ok(RuleTarget::Endpoint(s))
        }
    }
}

/// 用户分流规则，按声明顺序匹配，先匹配者生效
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BypassRule {
    pub pattern: String,
    pub target: RuleTarget,
}
