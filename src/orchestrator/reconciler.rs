use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use super::broadcast::StatusBroadcaster;
use super::proxy::ProxyController;
use super::trigger::{send_trigger, Trigger, TriggerSender, RECONNECT_SETTLE_DELAY};
use crate::config::ConfigStore;
use crate::models::{AppSettings, ConnectionStatus};
use crate::native::{NativeHost, NativeRequest};

#[derive(Debug, Clone, PartialEq)]
pub enum TickOutcome {
    /// 已有检查在进行
    Skipped,
    Completed(ConnectionStatus),
}

/// 一次检查的结果
struct Observation {
    status: ConnectionStatus,
    /// 助手进程明确报告隧道已断开（而非通道故障）
    tunnel_dropped: bool,
}

impl Observation {
    fn idle(status: ConnectionStatus) -> Self {
        Self {
            status,
            tunnel_dropped: false,
        }
    }
}

/// 离开作用域时清除进行中标记
struct InFlight<'a>(&'a AtomicBool);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// 周期性健康检查与状态迁移处理
pub struct StatusReconciler {
    host: Arc<dyn NativeHost>,
    store: Arc<dyn ConfigStore>,
    proxy: Arc<ProxyController>,
    broadcaster: Arc<StatusBroadcaster>,
    triggers: TriggerSender,
    in_flight: AtomicBool,
}

impl StatusReconciler {
    pub fn new(
        host: Arc<dyn NativeHost>,
        store: Arc<dyn ConfigStore>,
        proxy: Arc<ProxyController>,
        broadcaster: Arc<StatusBroadcaster>,
        triggers: TriggerSender,
    ) -> Self {
        Self {
            host,
            store,
            proxy,
            broadcaster,
            triggers,
            in_flight: AtomicBool::new(false),
        }
    }

    pub fn is_polling(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }

    pub async fn tick(&self) -> TickOutcome {
        if self
            .in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            log::debug!("Status check already in progress, skipping");
            return TickOutcome::Skipped;
        }
        let _in_flight = InFlight(&self.in_flight);

        let settings = self.store.load_settings().unwrap_or_else(|e| {
            log::warn!("Failed to load settings, using defaults: {}", e);
            AppSettings::default()
        });
        let was_connected = self.broadcaster.latest().connected;

        let Observation {
            mut status,
            tunnel_dropped,
        } = self.observe(&settings).await;

        if was_connected && !status.connected {
            log::info!("Tunnel disconnected");
            if self.proxy.release_if_managed() {
                status.proxy_cleared = true;
            }
            if tunnel_dropped && settings.auto_reconnect {
                send_trigger(
                    &self.triggers,
                    Trigger::Reconnect {
                        delay: RECONNECT_SETTLE_DELAY,
                    },
                );
            }
        }

        self.broadcaster.publish(status.clone());
        TickOutcome::Completed(status)
    }

    async fn observe(&self, settings: &AppSettings) -> Observation {
        let active_id = match self.store.active_config_id() {
            Ok(Some(id)) => id,
            Ok(None) => {
                log::debug!("No active endpoint configured");
                return Observation::idle(ConnectionStatus::disconnected());
            }
            Err(e) => {
                log::error!("Failed to read active endpoint: {}", e);
                return Observation::idle(ConnectionStatus::disconnected_with(e.to_string()));
            }
        };

        let identifier = match self.store.find_endpoint(&active_id) {
            Ok(Some(endpoint)) => endpoint.stable_identifier(),
            Ok(None) => None,
            Err(e) => {
                log::error!("Failed to load endpoints: {}", e);
                return Observation::idle(ConnectionStatus::disconnected_with(e.to_string()));
            }
        };
        let Some(identifier) = identifier else {
            log::warn!("Active endpoint '{}' is missing or has no identifier", active_id);
            return Observation::idle(ConnectionStatus::disconnected_with(format!(
                "Endpoint '{}' unavailable",
                active_id
            )));
        };

        let request =
            NativeRequest::get_status(&identifier, &settings.ping_host, &settings.health_check_url);
        match self.host.call(request).await {
            Ok(response) if response.connected => {
                let status = ConnectionStatus::from_response(response, &active_id);
                if let Some(sample) = status.latency_sample() {
                    if let Err(e) = self.store.push_latency_sample(sample) {
                        log::warn!("Failed to record latency sample: {}", e);
                    }
                }
                Observation::idle(status)
            }
            Ok(response) => {
                log::info!("Native host reports tunnel '{}' is down", active_id);
                if let Err(e) = self.store.set_active_config_id(None) {
                    log::warn!("Failed to clear active endpoint: {}", e);
                }
                let mut status = ConnectionStatus::disconnected();
                if let Some(web_status) = response.web_check_status {
                    status.web_check_status = web_status;
                }
                Observation {
                    status,
                    tunnel_dropped: true,
                }
            }
            Err(e) => {
                log::error!("Error during status update for '{}': {}", identifier, e);
                Observation::idle(ConnectionStatus::disconnected_with(e.to_string()))
            }
        }
    }
}
