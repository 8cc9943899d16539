use anyhow::Result;
use std::collections::HashMap;
use std::sync::Mutex;

use crate::models::{
    AppSettings, EndpointConfig, GeoDataset, GeoKind, LatencyHistory, LatencySample, LocalState,
    ProxySettings,
};

/// 编排器读写的持久化边界
///
/// 所有方法都是同步的短操作，调用方不得跨 await 持有其返回的引用。
pub trait ConfigStore: Send + Sync {
    fn load_endpoints(&self) -> Result<Vec<EndpointConfig>>;

    fn save_endpoints(&self, endpoints: &[EndpointConfig]) -> Result<()>;

    fn load_settings(&self) -> Result<AppSettings>;

    fn save_settings(&self, settings: &AppSettings) -> Result<()>;

    fn load_state(&self) -> Result<LocalState>;

    /// 读-改-写本地状态
    fn update_state(&self, update: &mut dyn FnMut(&mut LocalState)) -> Result<()>;

    fn load_geo(&self, kind: GeoKind) -> Result<GeoDataset>;

    fn save_geo(&self, dataset: &GeoDataset) -> Result<()>;

    fn active_config_id(&self) -> Result<Option<String>> {
        Ok(self.load_state()?.active_config_id)
    }

    fn set_active_config_id(&self, id: Option<&str>) -> Result<()> {
        let id = id.map(str::to_string);
        self.update_state(&mut |state| state.active_config_id = id.clone())
    }

    /// 按 id 查找端点
    fn find_endpoint(&self, id: &str) -> Result<Option<EndpointConfig>> {
        Ok(self.load_endpoints()?.into_iter().find(|e| e.id == id))
    }

    fn push_latency_sample(&self, sample: LatencySample) -> Result<()> {
        self.update_state(&mut |state| state.latency_history.push(sample))
    }

    fn latency_history(&self) -> Result<LatencyHistory> {
        Ok(self.load_state()?.latency_history)
    }

    /// 记录已接管系统代理及接管前的设置
    fn mark_proxy_managed(&self, original: Option<ProxySettings>) -> Result<()> {
        self.update_state(&mut |state| {
            // 重复接管时保留最早的快照
            if !state.proxy_managed {
                state.original_proxy = original.clone();
            }
            state.proxy_managed = true;
        })
    }

    /// 取消接管，返回接管前的设置
    fn take_proxy_managed(&self) -> Result<Option<ProxySettings>> {
        let mut original = None;
        self.update_state(&mut |state| {
            original = state.original_proxy.take();
            state.proxy_managed = false;
        })?;
        Ok(original)
    }
}

/// 内存实现，用于测试和一次性命令
#[derive(Default)]
pub struct MemoryStore {
    endpoints: Mutex<Vec<EndpointConfig>>,
    settings: Mutex<AppSettings>,
    state: Mutex<LocalState>,
    geo: Mutex<HashMap<GeoKind, GeoDataset>>,
}

impl MemoryStore {
    pub fn new(endpoints: Vec<EndpointConfig>, settings: AppSettings) -> Self {
        Self {
            endpoints: Mutex::new(endpoints),
            settings: Mutex::new(settings),
            ..Default::default()
        }
    }
}

fn poisoned<T>(_: std::sync::PoisonError<T>) -> anyhow::Error {
    anyhow::anyhow!("store lock poisoned")
}

impl ConfigStore for MemoryStore {
    fn load_endpoints(&self) -> Result<Vec<EndpointConfig>> {
        Ok(self.endpoints.lock().map_err(poisoned)?.clone())
    }

    fn save_endpoints(&self, endpoints: &[EndpointConfig]) -> Result<()> {
        *self.endpoints.lock().map_err(poisoned)? = endpoints.to_vec();
        Ok(())
    }

    fn load_settings(&self) -> Result<AppSettings> {
        Ok(self.settings.lock().map_err(poisoned)?.clone())
    }

    fn save_settings(&self, settings: &AppSettings) -> Result<()> {
        *self.settings.lock().map_err(poisoned)? = settings.clone();
        Ok(())
    }

    fn load_state(&self) -> Result<LocalState> {
        Ok(self.state.lock().map_err(poisoned)?.clone())
    }

    fn update_state(&self, update: &mut dyn FnMut(&mut LocalState)) -> Result<()> {
        let mut state = self.state.lock().map_err(poisoned)?;
        update(&mut state);
        Ok(())
    }

    fn load_geo(&self, kind: GeoKind) -> Result<GeoDataset> {
        Ok(self
            .geo
            .lock()
            .map_err(poisoned)?
            .get(&kind)
            .cloned()
            .unwrap_or_else(|| GeoDataset::empty(kind)))
    }

    fn save_geo(&self, dataset: &GeoDataset) -> Result<()> {
        self.geo
            .lock()
            .map_err(poisoned)?
            .insert(dataset.kind(), dataset.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_proxy_managed_keeps_first_snapshot() {
        let store = MemoryStore::default();
        let socks = ProxySettings::Socks {
            host: "10.0.0.2".to_string(),
            port: 3128,
        };

        store.mark_proxy_managed(Some(socks.clone())).unwrap();
        store.mark_proxy_managed(Some(ProxySettings::Direct)).unwrap();
        assert!(store.load_state().unwrap().proxy_managed);

        assert_eq!(store.take_proxy_managed().unwrap(), Some(socks));
        let state = store.load_state().unwrap();
        assert!(!state.proxy_managed);
        assert!(state.original_proxy.is_none());
    }

    #[test]
    fn test_active_id_round_trip() {
        let store = MemoryStore::default();
        assert_eq!(store.active_config_id().unwrap(), None);
        store.set_active_config_id(Some("home")).unwrap();
        assert_eq!(store.active_config_id().unwrap().as_deref(), Some("home"));
        store.set_active_config_id(None).unwrap();
        assert_eq!(store.active_config_id().unwrap(), None);
    }

    #[test]
    fn test_missing_geo_is_empty_of_requested_kind() {
        let store = MemoryStore::default();
        let dataset = store.load_geo(GeoKind::Domain).unwrap();
        assert_eq!(dataset.kind(), GeoKind::Domain);
        assert!(dataset.last_update.is_none());
    }
}
