use serde::Serialize;
use tokio::sync::{broadcast, watch};

use super::summary::StatusSummary;
use crate::models::ConnectionStatus;

const EVENT_CAPACITY: usize = 32;

/// 推送给观察者的状态消息
#[derive(Debug, Clone, Serialize)]
pub struct StatusMessage {
    pub command: &'static str,
    pub status: ConnectionStatus,
}

impl StatusMessage {
    pub fn status_updated(status: ConnectionStatus) -> Self {
        Self {
            command: "statusUpdated",
            status,
        }
    }
}

/// 保存最新状态并广播给所有订阅者
pub struct StatusBroadcaster {
    latest: watch::Sender<ConnectionStatus>,
    summary: watch::Sender<StatusSummary>,
    events: broadcast::Sender<StatusMessage>,
}

impl Default for StatusBroadcaster {
    fn default() -> Self {
        Self::new()
    }
}

impl StatusBroadcaster {
    pub fn new() -> Self {
        let initial = ConnectionStatus::default();
        let (summary, _) = watch::channel(StatusSummary::from_status(&initial));
        let (latest, _) = watch::channel(initial);
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            latest,
            summary,
            events,
        }
    }

    /// 发布新状态；没有订阅者不算错误
    pub fn publish(&self, status: ConnectionStatus) {
        let summary = StatusSummary::from_status(&status);
        log::debug!("Status: {}", summary.title);
        self.summary.send_replace(summary);
        self.latest.send_replace(status.clone());
        if self.events.send(StatusMessage::status_updated(status)).is_err() {
            log::trace!("No status observers");
        }
    }

    /// 最近一次状态（不阻塞）
    pub fn latest(&self) -> ConnectionStatus {
        self.latest.borrow().clone()
    }

    pub fn summary(&self) -> StatusSummary {
        self.summary.borrow().clone()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StatusMessage> {
        self.events.subscribe()
    }

    pub fn watch(&self) -> watch::Receiver<ConnectionStatus> {
        self.latest.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orchestrator::HealthLevel;

    #[tokio::test]
    async fn test_publish_without_observers_is_fine() {
        let broadcaster = StatusBroadcaster::new();
        broadcaster.publish(ConnectionStatus {
            connected: true,
            tcp_ping_ms: Some(40),
            ..Default::default()
        });
        assert!(broadcaster.latest().connected);
        assert_eq!(broadcaster.summary().level, HealthLevel::Good);
    }

    #[tokio::test]
    async fn test_subscriber_receives_status_updated() {
        let broadcaster = StatusBroadcaster::new();
        let mut rx = broadcaster.subscribe();
        broadcaster.publish(ConnectionStatus::disconnected_with("boom"));

        let message = rx.recv().await.unwrap();
        assert_eq!(message.command, "statusUpdated");
        assert_eq!(message.status.web_check_status, "boom");

        let json = serde_json::to_value(&message).unwrap();
        assert_eq!(json["command"], "statusUpdated");
        assert_eq!(json["status"]["connected"], false);
    }
}
