use anyhow::{anyhow, Result};
use std::process::Command;

use crate::models::ProxySettings;

/// 系统代理的读取与设置
pub trait ProxyBackend: Send + Sync {
    /// 读取当前设置（用于接管前保存快照）
    fn snapshot(&self) -> Result<ProxySettings>;

    fn apply(&self, settings: &ProxySettings) -> Result<()>;

    /// 恢复快照；没有快照时关闭代理
    fn restore(&self, original: Option<&ProxySettings>) -> Result<()> {
        self.apply(original.unwrap_or(&ProxySettings::Direct))
    }
}

/// 操作系统代理设置
pub struct SystemProxy;

fn run(program: &str, args: &[&str]) -> Result<String> {
    let output = Command::new(program).args(args).output()?;
    if !output.status.success() {
        return Err(anyhow!(
            "{} {} failed: {}",
            program,
            args.first().copied().unwrap_or_default(),
            String::from_utf8_lossy(&output.stderr).trim()
        ));
    }
    Ok(String::from_utf8_lossy(&output.stdout).to_string())
}

/// 解析 `networksetup -get*` 输出中的 `Key: Value` 行
#[cfg_attr(not(target_os = "macos"), allow(dead_code))]
fn networksetup_field<'a>(output: &'a str, key: &str) -> Option<&'a str> {
    output.lines().find_map(|line| {
        let (k, v) = line.split_once(':')?;
        (k.trim() == key).then(|| v.trim())
    })
}

/// 去掉 gsettings 输出中的引号
#[cfg_attr(not(target_os = "linux"), allow(dead_code))]
fn gsettings_value(output: &str) -> String {
    output.trim().trim_matches('\'').to_string()
}

/// 解析 `reg query` 输出中的值
#[cfg_attr(not(target_os = "windows"), allow(dead_code))]
fn reg_value<'a>(output: &'a str, name: &str) -> Option<&'a str> {
    output.lines().find_map(|line| {
        let mut parts = line.split_whitespace();
        if parts.next()? != name {
            return None;
        }
        parts.next()?;
        let rest = line.splitn(2, "REG_").nth(1)?;
        rest.split_once(char::is_whitespace).map(|(_, v)| v.trim())
    })
}

/// Windows ProxyServer 取值，如 `socks=127.0.0.1:1080`
#[cfg_attr(not(target_os = "windows"), allow(dead_code))]
fn parse_socks_server(value: &str) -> Option<(String, u16)> {
    let server = value
        .split(';')
        .find_map(|part| part.trim().strip_prefix("socks="))?;
    let (host, port) = server.rsplit_once(':')?;
    Some((host.to_string(), port.parse().ok()?))
}

#[cfg(target_os = "macos")]
impl SystemProxy {
    /// 获取网络服务列表
    fn get_network_services() -> Result<Vec<String>> {
        let output = run("networksetup", &["-listallnetworkservices"])?;
        let services: Vec<String> = output
            .lines()
            .skip(1) // 跳过第一行（标题）
            .filter(|s| !s.starts_with('*')) // 跳过禁用的服务
            .map(|s| s.to_string())
            .collect();
        Ok(services)
    }

    fn snapshot_impl() -> Result<ProxySettings> {
        let services = Self::get_network_services()?;
        let Some(service) = services.first() else {
            return Ok(ProxySettings::Direct);
        };

        let auto = run("networksetup", &["-getautoproxyurl", service])?;
        if networksetup_field(&auto, "Enabled") == Some("Yes") {
            if let Some(url) = networksetup_field(&auto, "URL").filter(|u| *u != "(null)") {
                return Ok(ProxySettings::AutoConfig {
                    url: url.to_string(),
                });
            }
        }

        let socks = run("networksetup", &["-getsocksfirewallproxy", service])?;
        if networksetup_field(&socks, "Enabled") == Some("Yes") {
            let host = networksetup_field(&socks, "Server").unwrap_or_default();
            let port = networksetup_field(&socks, "Port").and_then(|p| p.parse().ok());
            if let (false, Some(port)) = (host.is_empty(), port) {
                return Ok(ProxySettings::Socks {
                    host: host.to_string(),
                    port,
                });
            }
        }

        Ok(ProxySettings::Direct)
    }

    fn apply_impl(settings: &ProxySettings) -> Result<()> {
        for service in Self::get_network_services()? {
            let service = service.as_str();
            match settings {
                ProxySettings::Direct => {
                    run("networksetup", &["-setautoproxystate", service, "off"])?;
                    run("networksetup", &["-setsocksfirewallproxystate", service, "off"])?;
                }
                ProxySettings::Socks { host, port } => {
                    run("networksetup", &["-setautoproxystate", service, "off"])?;
                    run(
                        "networksetup",
                        &["-setsocksfirewallproxy", service, host, &port.to_string()],
                    )?;
                    run("networksetup", &["-setsocksfirewallproxystate", service, "on"])?;
                }
                ProxySettings::AutoConfig { url } => {
                    run("networksetup", &["-setsocksfirewallproxystate", service, "off"])?;
                    run("networksetup", &["-setautoproxyurl", service, url])?;
                    run("networksetup", &["-setautoproxystate", service, "on"])?;
                }
            }
        }
        Ok(())
    }
}

#[cfg(target_os = "linux")]
impl SystemProxy {
    fn gsettings_get(schema: &str, key: &str) -> Result<String> {
        Ok(gsettings_value(&run("gsettings", &["get", schema, key])?))
    }

    fn gsettings_set(schema: &str, key: &str, value: &str) -> Result<()> {
        run("gsettings", &["set", schema, key, value]).map(|_| ())
    }

    fn snapshot_impl() -> Result<ProxySettings> {
        match Self::gsettings_get("org.gnome.system.proxy", "mode")?.as_str() {
            "auto" => Ok(ProxySettings::AutoConfig {
                url: Self::gsettings_get("org.gnome.system.proxy", "autoconfig-url")?,
            }),
            "manual" => {
                let host = Self::gsettings_get("org.gnome.system.proxy.socks", "host")?;
                let port = Self::gsettings_get("org.gnome.system.proxy.socks", "port")?
                    .parse()
                    .unwrap_or(0);
                if host.is_empty() || port == 0 {
                    // 仅配置了 HTTP 代理时无法完整还原，按直连处理
                    log::warn!("Manual proxy without SOCKS settings, snapshot as direct");
                    Ok(ProxySettings::Direct)
                } else {
                    Ok(ProxySettings::Socks { host, port })
                }
            }
            _ => Ok(ProxySettings::Direct),
        }
    }

    fn apply_impl(settings: &ProxySettings) -> Result<()> {
        match settings {
            ProxySettings::Direct => {
                Self::gsettings_set("org.gnome.system.proxy", "mode", "none")?;
            }
            ProxySettings::Socks { host, port } => {
                Self::gsettings_set("org.gnome.system.proxy.socks", "host", host)?;
                Self::gsettings_set("org.gnome.system.proxy.socks", "port", &port.to_string())?;
                Self::gsettings_set("org.gnome.system.proxy", "mode", "manual")?;
            }
            ProxySettings::AutoConfig { url } => {
                Self::gsettings_set("org.gnome.system.proxy", "autoconfig-url", url)?;
                Self::gsettings_set("org.gnome.system.proxy", "mode", "auto")?;
            }
        }
        Ok(())
    }
}

#[cfg(target_os = "windows")]
impl SystemProxy {
    const INTERNET_SETTINGS: &'static str =
        r"HKCU\Software\Microsoft\Windows\CurrentVersion\Internet Settings";

    fn reg_query(name: &str) -> Option<String> {
        let output = run("reg", &["query", Self::INTERNET_SETTINGS, "/v", name]).ok()?;
        reg_value(&output, name).map(str::to_string)
    }

    fn reg_add(name: &str, kind: &str, data: &str) -> Result<()> {
        run(
            "reg",
            &["add", Self::INTERNET_SETTINGS, "/v", name, "/t", kind, "/d", data, "/f"],
        )
        .map(|_| ())
    }

    fn reg_delete(name: &str) {
        // 值不存在时 reg delete 返回失败，忽略
        let _ = run("reg", &["delete", Self::INTERNET_SETTINGS, "/v", name, "/f"]);
    }

    fn snapshot_impl() -> Result<ProxySettings> {
        if let Some(url) = Self::reg_query("AutoConfigURL").filter(|u| !u.is_empty()) {
            return Ok(ProxySettings::AutoConfig { url });
        }
        if Self::reg_query("ProxyEnable").as_deref() == Some("0x1") {
            if let Some((host, port)) = Self::reg_query("ProxyServer")
                .as_deref()
                .and_then(parse_socks_server)
            {
                return Ok(ProxySettings::Socks { host, port });
            }
        }
        Ok(ProxySettings::Direct)
    }

    fn apply_impl(settings: &ProxySettings) -> Result<()> {
        match settings {
            ProxySettings::Direct => {
                Self::reg_delete("AutoConfigURL");
                Self::reg_add("ProxyEnable", "REG_DWORD", "0")?;
            }
            ProxySettings::Socks { host, port } => {
                Self::reg_delete("AutoConfigURL");
                Self::reg_add("ProxyServer", "REG_SZ", &format!("socks={}:{}", host, port))?;
                Self::reg_add("ProxyEnable", "REG_DWORD", "1")?;
            }
            ProxySettings::AutoConfig { url } => {
                Self::reg_add("ProxyEnable", "REG_DWORD", "0")?;
                Self::reg_add("AutoConfigURL", "REG_SZ", url)?;
            }
        }
        Ok(())
    }
}

#[cfg(not(any(target_os = "macos", target_os = "linux", target_os = "windows")))]
impl SystemProxy {
    fn snapshot_impl() -> Result<ProxySettings> {
        Ok(ProxySettings::Direct)
    }

    fn apply_impl(_settings: &ProxySettings) -> Result<()> {
        Err(anyhow!("System proxy is not supported on this platform"))
    }
}

impl ProxyBackend for SystemProxy {
    fn snapshot(&self) -> Result<ProxySettings> {
        Self::snapshot_impl()
    }

    fn apply(&self, settings: &ProxySettings) -> Result<()> {
        Self::apply_impl(settings)?;
        match settings {
            ProxySettings::Direct => log::info!("System proxy cleared"),
            ProxySettings::Socks { host, port } => {
                log::info!("System SOCKS proxy set to {}:{}", host, port)
            }
            ProxySettings::AutoConfig { url } => log::info!("System proxy auto-config set to {}", url),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_networksetup_field() {
        let output = "Enabled: Yes\nServer: 127.0.0.1\nPort: 1080\nAuthenticated Proxy Enabled: 0\n";
        assert_eq!(networksetup_field(output, "Enabled"), Some("Yes"));
        assert_eq!(networksetup_field(output, "Port"), Some("1080"));
        assert_eq!(networksetup_field(output, "Missing"), None);

        let auto = "URL: http://127.0.0.1:33212/proxy.pac\nEnabled: No\n";
        assert_eq!(
            networksetup_field(auto, "URL"),
            Some("http://127.0.0.1:33212/proxy.pac")
        );
    }

    #[test]
    fn test_gsettings_value_strips_quotes() {
        assert_eq!(gsettings_value("'auto'\n"), "auto");
        assert_eq!(gsettings_value("1080\n"), "1080");
    }

    #[test]
    fn test_reg_value_and_socks_server() {
        let output = "\r\nHKEY_CURRENT_USER\\Software\\Microsoft\\Windows\\CurrentVersion\\Internet Settings\r\n    ProxyServer    REG_SZ    socks=127.0.0.1:1080\r\n\r\n";
        let value = reg_value(output, "ProxyServer").unwrap();
        assert_eq!(value, "socks=127.0.0.1:1080");
        assert_eq!(
            parse_socks_server(value),
            Some(("127.0.0.1".to_string(), 1080))
        );
        assert_eq!(parse_socks_server("http=127.0.0.1:8080"), None);
    }
}
