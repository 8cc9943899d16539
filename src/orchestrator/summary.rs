use serde::Serialize;

use crate::models::ConnectionStatus;

/// 延迟不高于此值时为满环绿色
const MIN_PING_MS: f64 = 100.0;
/// 延迟不低于此值时为 10% 红色
const MAX_PING_MS: f64 = 1000.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum HealthLevel {
    /// 断开，或网页检测失败
    Bad,
    /// 已连接但 TCP 探测失败
    Warn,
    Good,
}

/// 状态指示：级别 + 按延迟分级的圆环比例和色相
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusSummary {
    pub level: HealthLevel,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ping_ms: Option<i64>,
    /// 圆环比例，1.0 到 0.1
    pub ring: f64,
    /// HSL 色相，120（绿）到 0（红）
    pub hue: f64,
    pub title: String,
}

impl StatusSummary {
    pub fn from_status(status: &ConnectionStatus) -> Self {
        let web_failed = status.web_check_status.contains("Failed");
        if !status.connected || web_failed {
            let title = if status.connected {
                format!("Connected, web check: {}", status.web_check_status)
            } else if status.web_check_status.is_empty() {
                "Disconnected".to_string()
            } else {
                format!("Disconnected: {}", status.web_check_status)
            };
            return Self {
                level: HealthLevel::Bad,
                ping_ms: status.tcp_ping_ms,
                ring: 0.0,
                hue: 0.0,
                title,
            };
        }

        match status.tcp_ping_ms {
            Some(ping) if ping >= 0 => {
                let (ring, hue) = grade_latency(ping);
                Self {
                    level: HealthLevel::Good,
                    ping_ms: Some(ping),
                    ring,
                    hue,
                    title: format!("Connected, {} ms", ping),
                }
            }
            _ => Self {
                level: HealthLevel::Warn,
                ping_ms: status.tcp_ping_ms,
                ring: 1.0,
                hue: 60.0,
                title: "Connected, ping failed".to_string(),
            },
        }
    }
}

/// 延迟到 (圆环比例, 色相)
pub fn grade_latency(ping_ms: i64) -> (f64, f64) {
    let ping = ping_ms as f64;
    let progress = if ping > MIN_PING_MS {
        (ping.min(MAX_PING_MS) - MIN_PING_MS) / (MAX_PING_MS - MIN_PING_MS)
    } else {
        0.0
    };
    (1.0 - progress * 0.9, 120.0 - progress * 120.0)
}
