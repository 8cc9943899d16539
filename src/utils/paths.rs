use anyhow::Result;
use std::path::PathBuf;

const APP_DIR_NAME: &str = "Holocron";

/// 按环境变量或系统目录解析应用目录
fn resolve_dir(env_key: &str, base: Option<PathBuf>, kind: &str) -> Result<PathBuf> {
    let path = match std::env::var_os(env_key) {
        Some(dir) if !dir.is_empty() => PathBuf::from(dir),
        _ => base
            .ok_or_else(|| anyhow::anyhow!("Cannot find {} directory", kind))?
            .join(APP_DIR_NAME),
    };

    std::fs::create_dir_all(&path)?;
    Ok(path)
}

/// 获取应用数据目录（缓存、运行状态）
pub fn get_app_data_dir() -> Result<PathBuf> {
    resolve_dir("HOLOCRON_DATA_DIR", dirs::data_dir(), "data")
}

/// 获取应用配置目录（用户设置、端点列表）
pub fn get_app_config_dir() -> Result<PathBuf> {
    resolve_dir("HOLOCRON_CONFIG_DIR", dirs::config_dir(), "config")
}

/// 获取应用设置文件路径
pub fn get_app_settings_path() -> Result<PathBuf> {
    Ok(get_app_config_dir()?.join("settings.json"))
}

/// 获取端点列表文件路径
pub fn get_endpoints_path() -> Result<PathBuf> {
    Ok(get_app_config_dir()?.join("endpoints.yaml"))
}

/// 获取运行状态文件路径
pub fn get_state_path() -> Result<PathBuf> {
    Ok(get_app_data_dir()?.join("state.json"))
}

/// 默认的本地助手可执行文件名（在 PATH 中查找）
#[cfg(target_os = "windows")]
pub fn get_helper_binary_name() -> &'static str {
    "holocron-native-host.exe"
}

#[cfg(not(target_os = "windows"))]
pub fn get_helper_binary_name() -> &'static str {
    "holocron-native-host"
}
