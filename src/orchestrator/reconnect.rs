use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use super::trigger::{send_trigger, Trigger, TriggerSender, POST_CONNECT_CHECK_DELAY};
use crate::config::ConfigStore;
use crate::error::{OrchestratorError, Result};
use crate::models::EndpointConfig;
use crate::native::{NativeHost, NativeRequest};

/// 两次自动重连之间的最短间隔
pub const RECONNECT_COOLDOWN: Duration = Duration::from_secs(10);

/// 非阻塞冷却：窗口内的再次尝试直接放弃
#[derive(Debug, Clone)]
pub struct Cooldown {
    last_attempt: Option<Instant>,
    window: Duration,
}

impl Cooldown {
    pub fn new(window: Duration) -> Self {
        Self {
            last_attempt: None,
            window,
        }
    }

    /// 窗口外时记录本次尝试并返回 true
    pub fn try_acquire(&mut self, now: Instant) -> bool {
        if let Some(last) = self.last_attempt {
            if now.saturating_duration_since(last) < self.window {
                return false;
            }
        }
        self.last_attempt = Some(now);
        true
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconnectOutcome {
    /// 冷却期内，未尝试
    Throttled,
    Connected { endpoint_id: String },
}

/// 故障切换：按存储顺序尝试已启用的端点
pub struct ReconnectCoordinator {
    host: Arc<dyn NativeHost>,
    store: Arc<dyn ConfigStore>,
    cooldown: Mutex<Cooldown>,
    triggers: TriggerSender,
}

impl ReconnectCoordinator {
    pub fn new(
        host: Arc<dyn NativeHost>,
        store: Arc<dyn ConfigStore>,
        triggers: TriggerSender,
    ) -> Self {
        Self {
            host,
            store,
            cooldown: Mutex::new(Cooldown::new(RECONNECT_COOLDOWN)),
            triggers,
        }
    }

    pub async fn reconnect(&self) -> Result<ReconnectOutcome> {
        self.reconnect_at(Instant::now()).await
    }

    pub async fn reconnect_at(&self, now: Instant) -> Result<ReconnectOutcome> {
        let acquired = self
            .cooldown
            .lock()
            .map_err(|_| anyhow::anyhow!("cooldown lock poisoned"))?
            .try_acquire(now);
        if !acquired {
            log::debug!("Reconnect attempted within cooldown, skipping");
            return Ok(ReconnectOutcome::Throttled);
        }

        let candidates: Vec<EndpointConfig> = self
            .store
            .load_endpoints()?
            .into_iter()
            .filter(|e| e.enabled)
            .collect();
        log::info!("Attempting failover across {} enabled endpoint(s)", candidates.len());

        let mut attempted = 0;
        let mut last_error = None;
        for endpoint in &candidates {
            let Some(identifier) = endpoint.stable_identifier() else {
                log::warn!("Skipping endpoint '{}': no usable identifier", endpoint.id);
                last_error = Some(OrchestratorError::EndpointInvalid(endpoint.id.clone()).to_string());
                continue;
            };

            attempted += 1;
            match self.start(endpoint, &identifier).await {
                Ok(()) => {
                    log::info!("Failover connected via '{}' ({})", endpoint.name, identifier);
                    self.store.set_active_config_id(Some(&endpoint.id))?;
                    send_trigger(
                        &self.triggers,
                        Trigger::Poll {
                            delay: POST_CONNECT_CHECK_DELAY,
                        },
                    );
                    return Ok(ReconnectOutcome::Connected {
                        endpoint_id: endpoint.id.clone(),
                    });
                }
                Err(e) => {
                    log::warn!("Endpoint '{}' failed to start: {}", endpoint.id, e);
                    last_error = Some(e.to_string());
                }
            }
        }

        Err(OrchestratorError::AllEndpointsFailed {
            attempted,
            last_error: last_error.unwrap_or_else(|| "no enabled endpoints".to_string()),
        })
    }

    /// 手动启动指定端点（不受冷却限制）
    pub async fn start_endpoint(&self, id: &str) -> Result<()> {
        let endpoint = self
            .store
            .find_endpoint(id)?
            .ok_or_else(|| OrchestratorError::EndpointNotFound(id.to_string()))?;
        let identifier = endpoint
            .stable_identifier()
            .ok_or_else(|| OrchestratorError::EndpointInvalid(id.to_string()))?;

        self.start(&endpoint, &identifier).await?;
        log::info!("Endpoint '{}' started", id);
        self.store.set_active_config_id(Some(id))?;
        send_trigger(
            &self.triggers,
            Trigger::Poll {
                delay: POST_CONNECT_CHECK_DELAY,
            },
        );
        Ok(())
    }

    /// 停止当前活动端点
    pub async fn stop_active(&self) -> Result<()> {
        let active_id = self
            .store
            .active_config_id()?
            .ok_or(OrchestratorError::NotConnected)?;
        let endpoint = self
            .store
            .find_endpoint(&active_id)?
            .ok_or_else(|| OrchestratorError::EndpointNotFound(active_id.clone()))?;
        let identifier = endpoint
            .stable_identifier()
            .ok_or_else(|| OrchestratorError::EndpointInvalid(active_id.clone()))?;

        let response = self.host.call(NativeRequest::stop_tunnel(&identifier)).await?;
        if response.success == Some(false) {
            log::warn!(
                "Native host reported stop failure for '{}': {}",
                active_id,
                response.message.as_deref().unwrap_or("unknown error")
            );
        }

        self.store.set_active_config_id(None)?;
        log::info!("Endpoint '{}' stopped", active_id);
        send_trigger(&self.triggers, Trigger::Poll { delay: Duration::ZERO });
        Ok(())
    }

    async fn start(&self, endpoint: &EndpointConfig, identifier: &str) -> Result<()> {
        let response = self
            .host
            .call(NativeRequest::start_tunnel(identifier, endpoint))
            .await?;
        if response.tunnel_started() {
            if response.already_running == Some(true) {
                log::info!("Tunnel for '{}' was already running", endpoint.id);
            }
            Ok(())
        } else {
            Err(OrchestratorError::StartFailed {
                endpoint: endpoint.id.clone(),
                reason: response
                    .message
                    .unwrap_or_else(|| "native host reported failure".to_string()),
            })
        }
    }
}
