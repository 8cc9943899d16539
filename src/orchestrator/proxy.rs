use std::sync::Arc;

use crate::config::ConfigStore;
use crate::error::{OrchestratorError, Result};
use crate::models::ProxySettings;
use crate::system::ProxyBackend;

/// 系统代理接管：保存原设置、指向 PAC、断开时还原
pub struct ProxyController {
    backend: Arc<dyn ProxyBackend>,
    store: Arc<dyn ConfigStore>,
}

impl ProxyController {
    pub fn new(backend: Arc<dyn ProxyBackend>, store: Arc<dyn ConfigStore>) -> Self {
        Self { backend, store }
    }

    pub fn is_managed(&self) -> Result<bool> {
        Ok(self.store.load_state()?.proxy_managed)
    }

    /// 接管系统代理；已接管时只更新设置，保留最初的快照
    pub fn take_over(&self, settings: &ProxySettings) -> Result<()> {
        let original = if self.is_managed()? {
            None
        } else {
            Some(
                self.backend
                    .snapshot()
                    .map_err(|e| OrchestratorError::Proxy(e.to_string()))?,
            )
        };

        self.backend
            .apply(settings)
            .map_err(|e| OrchestratorError::Proxy(e.to_string()))?;
        // 设置成功后再记录接管状态
        self.store.mark_proxy_managed(original)?;
        Ok(())
    }

    /// 还原接管前的设置（无快照时关闭代理）
    pub fn release(&self) -> Result<()> {
        let original = self.store.load_state()?.original_proxy;
        self.backend
            .restore(original.as_ref())
            .map_err(|e| OrchestratorError::Proxy(e.to_string()))?;
        self.store.take_proxy_managed()?;
        log::info!("System proxy restored to original settings");
        Ok(())
    }

    /// 仅在已接管时还原；返回是否执行了还原
    pub fn release_if_managed(&self) -> bool {
        match self.is_managed() {
            Ok(true) => match self.release() {
                Ok(()) => true,
                Err(e) => {
                    log::error!("Failed to restore system proxy: {}", e);
                    false
                }
            },
            Ok(false) => false,
            Err(e) => {
                log::warn!("Failed to read proxy state: {}", e);
                false
            }
        }
    }
}
