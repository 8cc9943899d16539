use anyhow::{anyhow, Result};
use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use std::sync::Arc;
use std::time::Duration;

use super::cidr::{parse_domain_list, parse_ip_list};
use crate::config::ConfigStore;
use crate::error::OrchestratorError;
use crate::models::{GeoDataset, GeoEntries, GeoKind};
use crate::utils::resolve_source_url;

/// 两次自动刷新之间的最短间隔（24 小时）
pub const GEO_REFRESH_COOLDOWN_MS: i64 = 24 * 60 * 60 * 1000;

const FETCH_TIMEOUT: Duration = Duration::from_secs(30);

/// Geo 列表的下载来源
pub trait GeoSource: Send + Sync {
    fn fetch(&self, url: &str) -> BoxFuture<'_, Result<String>>;
}

/// 通过 HTTP 下载列表
pub struct HttpGeoSource {
    client: reqwest::Client,
}

impl HttpGeoSource {
    pub fn new() -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(FETCH_TIMEOUT)
            .user_agent(concat!("Holocron/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { client })
    }

    async fn download(&self, url: String) -> Result<String> {
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| anyhow!("Failed to fetch {}: {}", url, e))?;

        if !response.status().is_success() {
            return Err(anyhow!("Failed to fetch {}: HTTP {}", url, response.status()));
        }

        response
            .text()
            .await
            .map_err(|e| anyhow!("Failed to read response: {}", e))
    }
}

impl GeoSource for HttpGeoSource {
    fn fetch(&self, url: &str) -> BoxFuture<'_, Result<String>> {
        self.download(url.to_string()).boxed()
    }
}

/// 一次刷新的结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshOutcome {
    /// 冷却期内，未下载
    Fresh,
    Updated { entries: usize },
}

/// Geo 数据集更新器
pub struct GeoUpdater {
    store: Arc<dyn ConfigStore>,
    source: Arc<dyn GeoSource>,
}

impl GeoUpdater {
    pub fn new(store: Arc<dyn ConfigStore>, source: Arc<dyn GeoSource>) -> Self {
        Self { store, source }
    }

    pub async fn refresh(
        &self,
        kind: GeoKind,
        force: bool,
    ) -> Result<RefreshOutcome, OrchestratorError> {
        self.refresh_at(kind, force, chrono::Utc::now().timestamp_millis())
            .await
    }

    /// 以给定时间（毫秒时间戳）刷新；失败时缓存与时间戳保持不变
    pub async fn refresh_at(
        &self,
        kind: GeoKind,
        force: bool,
        now_ms: i64,
    ) -> Result<RefreshOutcome, OrchestratorError> {
        let cached = self.store.load_geo(kind)?;
        if !force {
            if let Some(last_update) = cached.last_update {
                if now_ms - last_update < GEO_REFRESH_COOLDOWN_MS {
                    log::debug!("Geo {} data is fresh, skipping refresh", kind);
                    return Ok(RefreshOutcome::Fresh);
                }
            }
        }

        let settings = self.store.load_settings()?;
        let source_url = match kind {
            GeoKind::Ip => &settings.geo.ip_source_url,
            GeoKind::Domain => &settings.geo.domain_source_url,
        };
        let url = resolve_source_url(source_url, settings.geo.use_cdn_mirror);
        log::info!("Refreshing geo {} data from {}", kind, url);

        let body = self
            .source
            .fetch(&url)
            .await
            .map_err(|e| OrchestratorError::RefreshFailed(e.to_string()))?;

        let entries = match kind {
            GeoKind::Ip => GeoEntries::Ip(parse_ip_list(&body)),
            GeoKind::Domain => GeoEntries::Domain(parse_domain_list(&body)),
        };
        let dataset = GeoDataset {
            last_update: Some(now_ms),
            entries,
        };
        let count = dataset.len();
        self.store
            .save_geo(&dataset)
            .map_err(|e| OrchestratorError::RefreshFailed(e.to_string()))?;

        log::info!("Geo {} data updated: {} entries", kind, count);
        Ok(RefreshOutcome::Updated { entries: count })
    }

    /// 刷新所有已启用的数据集；失败只记录日志
    pub async fn refresh_enabled(&self, force: bool) {
        let settings = match self.store.load_settings() {
            Ok(settings) => settings,
            Err(e) => {
                log::warn!("Failed to load settings for geo refresh: {}", e);
                return;
            }
        };

        let kinds = [
            (GeoKind::Ip, settings.geo.ip_bypass),
            (GeoKind::Domain, settings.geo.domain_bypass),
        ];
        for (kind, enabled) in kinds {
            if !enabled {
                continue;
            }
            if let Err(e) = self.refresh(kind, force).await {
                log::warn!("Geo {} refresh failed, keeping cached data: {}", kind, e);
            }
        }
    }
}
