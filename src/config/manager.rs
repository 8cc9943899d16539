use anyhow::Result;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use super::store::ConfigStore;
use crate::models::{AppSettings, EndpointConfig, GeoDataset, GeoKind, LocalState};
use crate::utils::{
    get_app_data_dir, get_app_settings_path, get_endpoints_path, get_state_path, write_atomic,
};

/// 基于文件的配置管理器
pub struct ConfigManager {
    endpoints_path: PathBuf,
    app_settings_path: PathBuf,
    state_path: PathBuf,
    data_dir: PathBuf,
    /// 串行化 state.json 的读-改-写
    state_lock: Mutex<()>,
    geo_lock: Mutex<()>,
}

impl ConfigManager {
    /// 使用默认应用目录创建配置管理器
    pub fn new() -> Result<Self> {
        Ok(Self {
            endpoints_path: get_endpoints_path()?,
            app_settings_path: get_app_settings_path()?,
            state_path: get_state_path()?,
            data_dir: get_app_data_dir()?,
            state_lock: Mutex::new(()),
            geo_lock: Mutex::new(()),
        })
    }

    /// 使用指定目录创建配置管理器
    pub fn with_dirs(config_dir: impl AsRef<Path>, data_dir: impl AsRef<Path>) -> Self {
        let config_dir = config_dir.as_ref();
        let data_dir = data_dir.as_ref();
        Self {
            endpoints_path: config_dir.join("endpoints.yaml"),
            app_settings_path: config_dir.join("settings.json"),
            state_path: data_dir.join("state.json"),
            data_dir: data_dir.to_path_buf(),
            state_lock: Mutex::new(()),
            geo_lock: Mutex::new(()),
        }
    }

    pub fn endpoints_path(&self) -> &PathBuf {
        &self.endpoints_path
    }

    fn geo_path(&self, kind: GeoKind) -> PathBuf {
        self.data_dir.join(kind.cache_file_name())
    }

    fn read_state_file(&self) -> Result<LocalState> {
        if !self.state_path.exists() {
            return Ok(LocalState::default());
        }

        let content = fs::read_to_string(&self.state_path)?;
        let mut state: LocalState = serde_json::from_str(&content)?;
        state.latency_history.truncate_to_capacity();
        Ok(state)
    }

    fn write_state_file(&self, state: &LocalState) -> Result<()> {
        let json = serde_json::to_vec_pretty(state)?;
        write_atomic(&self.state_path, &json)
    }

    /// 导入一个新端点（追加到列表末尾）
    pub fn add_endpoint(&self, endpoint: EndpointConfig) -> Result<()> {
        let mut endpoints = self.load_endpoints()?;
        if endpoints.iter().any(|e| e.id == endpoint.id) {
            return Err(anyhow::anyhow!("Endpoint '{}' already exists", endpoint.id));
        }
        log::info!("Adding endpoint '{}' ({})", endpoint.name, endpoint.kind.as_str());
        endpoints.push(endpoint);
        self.save_endpoints(&endpoints)
    }
}

fn lock_error<T>(_: std::sync::PoisonError<T>) -> anyhow::Error {
    anyhow::anyhow!("config lock poisoned")
}

impl ConfigStore for ConfigManager {
    fn load_endpoints(&self) -> Result<Vec<EndpointConfig>> {
        if !self.endpoints_path.exists() {
            log::debug!("Endpoint list not found at {:?}, starting empty", self.endpoints_path);
            return Ok(vec![]);
        }

        let content = fs::read_to_string(&self.endpoints_path)?;
        if content.trim().is_empty() {
            return Ok(vec![]);
        }
        let endpoints: Vec<EndpointConfig> = serde_yaml::from_str(&content)?;
        Ok(endpoints)
    }

    fn save_endpoints(&self, endpoints: &[EndpointConfig]) -> Result<()> {
        let yaml = serde_yaml::to_string(endpoints)?;
        write_atomic(&self.endpoints_path, yaml.as_bytes())?;
        log::info!("Endpoints saved to: {:?}", self.endpoints_path);
        Ok(())
    }

    fn load_settings(&self) -> Result<AppSettings> {
        if !self.app_settings_path.exists() {
            log::info!("App settings not found, using defaults");
            return Ok(AppSettings::default());
        }

        let content = fs::read_to_string(&self.app_settings_path)?;
        let settings: AppSettings = serde_json::from_str(&content)?;
        Ok(settings)
    }

    fn save_settings(&self, settings: &AppSettings) -> Result<()> {
        let json = serde_json::to_vec_pretty(settings)?;
        write_atomic(&self.app_settings_path, &json)?;
        log::info!("App settings saved to: {:?}", self.app_settings_path);
        Ok(())
    }

    fn load_state(&self) -> Result<LocalState> {
        let _guard = self.state_lock.lock().map_err(lock_error)?;
        self.read_state_file()
    }

    fn update_state(&self, update: &mut dyn FnMut(&mut LocalState)) -> Result<()> {
        let _guard = self.state_lock.lock().map_err(lock_error)?;
        let mut state = self.read_state_file()?;
        update(&mut state);
        self.write_state_file(&state)
    }

    fn load_geo(&self, kind: GeoKind) -> Result<GeoDataset> {
        let _guard = self.geo_lock.lock().map_err(lock_error)?;
        let path = self.geo_path(kind);
        if !path.exists() {
            return Ok(GeoDataset::empty(kind));
        }

        let content = fs::read_to_string(&path)?;
        let dataset: GeoDataset = serde_json::from_str(&content)?;
        if dataset.kind() != kind {
            log::warn!("Geo cache {:?} holds {} data, ignoring", path, dataset.kind());
            return Ok(GeoDataset::empty(kind));
        }
        Ok(dataset)
    }

    fn save_geo(&self, dataset: &GeoDataset) -> Result<()> {
        let _guard = self.geo_lock.lock().map_err(lock_error)?;
        let path = self.geo_path(dataset.kind());
        let json = serde_json::to_vec(dataset)?;
        write_atomic(&path, &json)?;
        log::info!("Geo {} cache saved ({} entries)", dataset.kind(), dataset.len());
        Ok(())
    }
}
