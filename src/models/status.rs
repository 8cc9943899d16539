use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

use crate::native::NativeResponse;

/// 延迟历史最多保留的样本数
pub const MAX_LATENCY_SAMPLES: usize = 200;

/// 当前隧道连接状态
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionStatus {
    pub connected: bool,

    pub active_config_id: Option<String>,

    /// -1 表示检测失败，None 表示未检测
    #[serde(skip_serializing_if = "Option::is_none")]
    pub web_check_latency_ms: Option<i64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub tcp_ping_ms: Option<i64>,

    #[serde(default)]
    pub web_check_status: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub socks_port: Option<u16>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub ip: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub country: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub web_check_error: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub tcp_ping_error: Option<String>,

    /// 仅在发生自动清除代理的那一轮为 true
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub proxy_cleared: bool,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub checked_at: Option<i64>,
}

impl ConnectionStatus {
    /// 断开状态
    pub fn disconnected() -> Self {
        Self {
            checked_at: Some(chrono::Utc::now().timestamp_millis()),
            ..Default::default()
        }
    }

    /// 断开状态，附带诊断说明
    pub fn disconnected_with(reason: impl Into<String>) -> Self {
        Self {
            web_check_status: reason.into(),
            ..Self::disconnected()
        }
    }

    /// 由助手进程的响应构造已连接状态
    pub fn from_response(response: NativeResponse, active_id: &str) -> Self {
        Self {
            connected: response.connected,
            active_config_id: Some(active_id.to_string()),
            web_check_latency_ms: response.web_check_latency_ms,
            tcp_ping_ms: response.tcp_ping_ms,
            web_check_status: response.web_check_status.unwrap_or_default(),
            socks_port: response.socks_port,
            ip: response.ip,
            country: response.country,
            web_check_error: response.web_check_error,
            tcp_ping_error: response.tcp_ping_error,
            proxy_cleared: false,
            checked_at: Some(chrono::Utc::now().timestamp_millis()),
        }
    }

    /// 两项延迟都有效时生成历史样本
    pub fn latency_sample(&self) -> Option<LatencySample> {
        match (self.web_check_latency_ms, self.tcp_ping_ms) {
            (Some(web), Some(tcp)) if web >= 0 && tcp >= 0 => Some(LatencySample {
                timestamp: self
                    .checked_at
                    .unwrap_or_else(|| chrono::Utc::now().timestamp_millis()),
                web_latency_ms: web,
                tcp_latency_ms: tcp,
            }),
            _ => None,
        }
    }
}

/// 延迟历史样本
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LatencySample {
    pub timestamp: i64,
    pub web_latency_ms: i64,
    pub tcp_latency_ms: i64,
}

/// 固定容量的延迟历史（环形缓冲，旧样本先出）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LatencyHistory {
    samples: VecDeque<LatencySample>,
}

impl Default for LatencyHistory {
    fn default() -> Self {
        Self {
            samples: VecDeque::with_capacity(MAX_LATENCY_SAMPLES),
        }
    }
}

impl LatencyHistory {
    pub fn push(&mut self, sample: LatencySample) {
        while self.samples.len() >= MAX_LATENCY_SAMPLES {
            self.samples.pop_front();
        }
        self.samples.push_back(sample);
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &LatencySample> {
        self.samples.iter()
    }

    /// 反序列化后可能超出容量（手动编辑过的文件），按容量裁剪
    pub fn truncate_to_capacity(&mut self) {
        while self.samples.len() > MAX_LATENCY_SAMPLES {
            self.samples.pop_front();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(ts: i64) -> LatencySample {
        LatencySample {
            timestamp: ts,
            web_latency_ms: 120,
            tcp_latency_ms: 40,
        }
    }

    #[test]
    fn test_history_drops_oldest_past_capacity() {
        let mut history = LatencyHistory::default();
        for ts in 0..MAX_LATENCY_SAMPLES as i64 {
            history.push(sample(ts));
        }
        assert_eq!(history.len(), MAX_LATENCY_SAMPLES);
        assert_eq!(history.iter().next().unwrap().timestamp, 0);

        history.push(sample(1_000));
        assert_eq!(history.len(), MAX_LATENCY_SAMPLES);
        assert_eq!(history.iter().next().unwrap().timestamp, 1);
        assert_eq!(history.iter().last().unwrap().timestamp, 1_000);
    }

    #[test]
    fn test_latency_sample_requires_both_readings() {
        let mut status = ConnectionStatus {
            connected: true,
            web_check_latency_ms: Some(250),
            tcp_ping_ms: Some(-1),
            checked_at: Some(42),
            ..Default::default()
        };
        assert!(status.latency_sample().is_none());

        status.tcp_ping_ms = None;
        assert!(status.latency_sample().is_none());

        status.tcp_ping_ms = Some(30);
        let sample = status.latency_sample().unwrap();
        assert_eq!(sample.timestamp, 42);
        assert_eq!(sample.web_latency_ms, 250);
        assert_eq!(sample.tcp_latency_ms, 30);
    }

    #[test]
    fn test_status_json_shape() {
        let status = ConnectionStatus {
            connected: true,
            active_config_id: Some("home".to_string()),
            web_check_latency_ms: Some(-1),
            socks_port: Some(1080),
            ..Default::default()
        };
        let json = serde_json::to_value(&status).unwrap();
        assert_eq!(json["activeConfigId"], "home");
        assert_eq!(json["webCheckLatencyMs"], -1);
        assert_eq!(json["socksPort"], 1080);
        assert!(json.get("tcpPingMs").is_none());
        assert!(json.get("proxyCleared").is_none());
    }
}
