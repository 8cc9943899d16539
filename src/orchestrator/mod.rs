//! 隧道编排器：定时健康检查、故障切换、系统代理与路由脚本

mod broadcast;
mod proxy;
mod reconciler;
mod reconnect;
mod summary;
#[cfg(test)]
pub(crate) mod testing;
mod trigger;

pub use broadcast::*;
pub use proxy::*;
pub use reconciler::*;
pub use reconnect::*;
pub use summary::*;
pub use trigger::*;

use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast as tokio_broadcast, Mutex};

use crate::config::ConfigStore;
use crate::error::{OrchestratorError, Result};
use crate::geo::{GeoSource, GeoUpdater, RefreshOutcome};
use crate::models::{ConnectionStatus, GeoKind, LatencyHistory, ProxySettings};
use crate::native::{NativeHost, NativeRequest};
use crate::routing::{render_pac, PolicyInputs, RoutingPolicy};
use crate::system::ProxyBackend;

/// 检查 Geo 数据是否过期的间隔（实际下载受 24 小时冷却限制）
const GEO_CHECK_INTERVAL: Duration = Duration::from_secs(60 * 60);

/// 单个 Geo 数据集的刷新结果
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GeoRefreshReport {
    pub kind: GeoKind,
    pub updated: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entries: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// 编排器：持有所有组件并驱动事件循环
pub struct Orchestrator {
    store: Arc<dyn ConfigStore>,
    host: Arc<dyn NativeHost>,
    broadcaster: Arc<StatusBroadcaster>,
    proxy: Arc<ProxyController>,
    reconciler: Arc<StatusReconciler>,
    coordinator: Arc<ReconnectCoordinator>,
    geo: Arc<GeoUpdater>,
    triggers: TriggerSender,
    trigger_rx: Mutex<Option<TriggerReceiver>>,
}

impl Orchestrator {
    pub fn new(
        store: Arc<dyn ConfigStore>,
        host: Arc<dyn NativeHost>,
        proxy_backend: Arc<dyn ProxyBackend>,
        geo_source: Arc<dyn GeoSource>,
    ) -> Arc<Self> {
        let (triggers, trigger_rx) = trigger_channel();
        let broadcaster = Arc::new(StatusBroadcaster::new());
        let proxy = Arc::new(ProxyController::new(proxy_backend, store.clone()));
        let reconciler = Arc::new(StatusReconciler::new(
            host.clone(),
            store.clone(),
            proxy.clone(),
            broadcaster.clone(),
            triggers.clone(),
        ));
        let coordinator = Arc::new(ReconnectCoordinator::new(
            host.clone(),
            store.clone(),
            triggers.clone(),
        ));
        let geo = Arc::new(GeoUpdater::new(store.clone(), geo_source));

        Arc::new(Self {
            store,
            host,
            broadcaster,
            proxy,
            reconciler,
            coordinator,
            geo,
            triggers,
            trigger_rx: Mutex::new(Some(trigger_rx)),
        })
    }

    /// 运行事件循环直到 `shutdown` 完成
    pub async fn run(self: Arc<Self>, shutdown: impl Future<Output = ()>) -> Result<()> {
        let mut trigger_rx = self
            .trigger_rx
            .lock()
            .await
            .take()
            .ok_or_else(|| anyhow::anyhow!("Orchestrator is already running"))?;

        self.recover_proxy();

        let poll_secs = self.store.load_settings()?.poll_interval_secs.max(1);
        log::info!("Orchestrator started, polling every {}s", poll_secs);
        let mut poll = tokio::time::interval(Duration::from_secs(poll_secs));
        let mut geo_check = tokio::time::interval(GEO_CHECK_INTERVAL);
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                _ = poll.tick() => self.dispatch(Trigger::Poll { delay: Duration::ZERO }),
                _ = geo_check.tick() => {
                    let geo = self.geo.clone();
                    tokio::spawn(async move { geo.refresh_enabled(false).await });
                }
                Some(trigger) = trigger_rx.recv() => self.dispatch(trigger),
            }
        }

        log::info!("Orchestrator stopped");
        Ok(())
    }

    /// 上次运行遗留的代理接管：先还原一次
    fn recover_proxy(&self) {
        if self.proxy.release_if_managed() {
            log::info!("Restored system proxy left over from a previous run");
        }
    }

    /// 在独立任务中执行触发请求，重叠的请求由各自的防护合并
    fn dispatch(self: &Arc<Self>, trigger: Trigger) {
        let this = self.clone();
        tokio::spawn(async move {
            match trigger {
                Trigger::Poll { delay } => {
                    tokio::time::sleep(delay).await;
                    this.reconciler.tick().await;
                }
                Trigger::Reconnect { delay } => {
                    tokio::time::sleep(delay).await;
                    match this.coordinator.reconnect().await {
                        Ok(ReconnectOutcome::Connected { endpoint_id }) => {
                            log::info!("Reconnected via '{}'", endpoint_id);
                        }
                        Ok(ReconnectOutcome::Throttled) => {}
                        Err(e) => log::error!("Automatic reconnect failed: {}", e),
                    }
                }
            }
        });
    }

    /// 立即返回最近状态，并另外触发一次检查
    pub fn status(&self) -> ConnectionStatus {
        send_trigger(&self.triggers, Trigger::Poll { delay: Duration::ZERO });
        self.broadcaster.latest()
    }

    /// 立即执行一次检查
    pub async fn refresh(&self) -> TickOutcome {
        self.reconciler.tick().await
    }

    pub fn summary(&self) -> StatusSummary {
        self.broadcaster.summary()
    }

    pub fn subscribe(&self) -> tokio_broadcast::Receiver<StatusMessage> {
        self.broadcaster.subscribe()
    }

    /// 启动指定端点；未指定时按顺序故障切换
    pub async fn start_tunnel(&self, id: Option<&str>) -> Result<String> {
        match id {
            Some(id) => {
                self.coordinator.start_endpoint(id).await?;
                Ok(format!("Endpoint '{}' started", id))
            }
            None => match self.coordinator.reconnect().await? {
                ReconnectOutcome::Connected { endpoint_id } => {
                    Ok(format!("Connected via '{}'", endpoint_id))
                }
                ReconnectOutcome::Throttled => {
                    Ok("Reconnect attempted recently, try again shortly".to_string())
                }
            },
        }
    }

    pub async fn stop_tunnel(&self) -> Result<()> {
        self.coordinator.stop_active().await
    }

    /// 将系统代理指向本地 PAC 脚本
    pub fn set_proxy(&self) -> Result<String> {
        let status = self.broadcaster.latest();
        if !status.connected {
            return Err(OrchestratorError::NotConnected);
        }
        if status.socks_port.is_none() {
            return Err(OrchestratorError::NoSocksPort);
        }

        let settings = self.store.load_settings()?;
        let url = format!("http://127.0.0.1:{}/proxy.pac", settings.control_port);
        self.proxy
            .take_over(&ProxySettings::AutoConfig { url: url.clone() })?;
        log::info!("System proxy now uses {}", url);
        Ok(url)
    }

    /// 还原系统代理
    pub fn clear_proxy(&self) -> Result<()> {
        self.proxy.release()
    }

    /// 仅在代理由本进程接管时还原，返回是否执行了还原
    pub fn release_proxy_if_managed(&self) -> bool {
        self.proxy.release_if_managed()
    }

    /// 由当前存储内容构建路由策略
    pub fn routing_policy(&self) -> Result<RoutingPolicy> {
        let settings = self.store.load_settings()?;
        let endpoints = self.store.load_endpoints()?;
        let active_id = self.store.active_config_id()?;
        let active = active_id
            .as_deref()
            .and_then(|id| endpoints.iter().find(|e| e.id == id));

        let geo_domains = if settings.geo.domain_bypass {
            Some(self.store.load_geo(GeoKind::Domain)?)
        } else {
            None
        };
        let geo_ips = if settings.geo.ip_bypass {
            Some(self.store.load_geo(GeoKind::Ip)?)
        } else {
            None
        };

        Ok(RoutingPolicy::build(&PolicyInputs {
            active,
            endpoints: &endpoints,
            rules: &settings.bypass_rules,
            local_tlds: &settings.local_tlds,
            geo_domains: geo_domains.as_ref(),
            geo_ips: geo_ips.as_ref(),
        }))
    }

    pub fn pac_script(&self) -> Result<String> {
        Ok(render_pac(&self.routing_policy()?))
    }

    pub fn latency_history(&self) -> Result<LatencyHistory> {
        Ok(self.store.latency_history()?)
    }

    /// 用任意标识测试连接（不改变状态）
    pub async fn test_connection(
        &self,
        identifier: &str,
        ping_host: &str,
        health_check_url: &str,
    ) -> Result<String> {
        if identifier.trim().is_empty() {
            return Err(OrchestratorError::EndpointInvalid(
                "endpoint identifier cannot be empty".to_string(),
            ));
        }
        if ping_host.trim().is_empty() {
            return Err(OrchestratorError::EndpointInvalid(
                "ping host cannot be empty".to_string(),
            ));
        }

        let response = self
            .host
            .call(NativeRequest::get_status(identifier, ping_host, health_check_url))
            .await?;
        if response.connected {
            Ok(format!(
                "Success! IP: {}, Country: {}",
                response.ip.as_deref().unwrap_or("unknown"),
                response.country.as_deref().unwrap_or("unknown")
            ))
        } else {
            Ok("Host connected, but reports tunnel is down.".to_string())
        }
    }

    /// 读取助手进程日志
    pub async fn helper_logs(&self) -> Result<Vec<String>> {
        let response = self.host.call(NativeRequest::get_logs()).await?;
        Ok(response.logs.unwrap_or_default())
    }

    pub async fn clear_helper_logs(&self) -> Result<()> {
        self.host.call(NativeRequest::clear_logs()).await?;
        Ok(())
    }

    /// 刷新已启用的 Geo 数据集；失败只记录在报告里
    pub async fn refresh_geo(&self, force: bool) -> Result<Vec<GeoRefreshReport>> {
        let settings = self.store.load_settings()?;
        let mut reports = vec![];
        let kinds = [
            (GeoKind::Ip, settings.geo.ip_bypass),
            (GeoKind::Domain, settings.geo.domain_bypass),
        ];
        for (kind, enabled) in kinds {
            if !enabled {
                continue;
            }
            let report = match self.geo.refresh(kind, force).await {
                Ok(RefreshOutcome::Fresh) => GeoRefreshReport {
                    kind,
                    updated: false,
                    entries: None,
                    error: None,
                },
                Ok(RefreshOutcome::Updated { entries }) => GeoRefreshReport {
                    kind,
                    updated: true,
                    entries: Some(entries),
                    error: None,
                },
                Err(e) => {
                    log::warn!("Geo {} refresh failed, keeping cached data: {}", kind, e);
                    GeoRefreshReport {
                        kind,
                        updated: false,
                        entries: None,
                        error: Some(e.to_string()),
                    }
                }
            };
            reports.push(report);
        }
        Ok(reports)
    }
}
