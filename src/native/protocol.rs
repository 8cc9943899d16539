//! 本地助手进程消息格式
//!
//! 每条消息为 4 字节本机字节序长度前缀 + UTF-8 JSON。

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::models::EndpointConfig;

/// 单条消息上限（1 MiB）
pub const MAX_MESSAGE_SIZE: usize = 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum NativeOp {
    GetStatus,
    StartTunnel,
    StopTunnel,
    GetLogs,
    ClearLogs,
}

/// 发往助手进程的请求
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NativeRequest {
    pub op: NativeOp,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub endpoint_identifier: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub ping_host: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub health_check_url: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub config: Option<EndpointConfig>,
}

impl NativeRequest {
    fn bare(op: NativeOp) -> Self {
        Self {
            op,
            endpoint_identifier: None,
            ping_host: None,
            health_check_url: None,
            config: None,
        }
    }

    pub fn get_status(identifier: &str, ping_host: &str, health_check_url: &str) -> Self {
        Self {
            endpoint_identifier: Some(identifier.to_string()),
            ping_host: Some(ping_host.to_string()),
            health_check_url: Some(health_check_url.to_string()),
            ..Self::bare(NativeOp::GetStatus)
        }
    }

    pub fn start_tunnel(identifier: &str, config: &EndpointConfig) -> Self {
        Self {
            endpoint_identifier: Some(identifier.to_string()),
            config: Some(config.clone()),
            ..Self::bare(NativeOp::StartTunnel)
        }
    }

    pub fn stop_tunnel(identifier: &str) -> Self {
        Self {
            endpoint_identifier: Some(identifier.to_string()),
            ..Self::bare(NativeOp::StopTunnel)
        }
    }

    pub fn get_logs() -> Self {
        Self::bare(NativeOp::GetLogs)
    }

    pub fn clear_logs() -> Self {
        Self::bare(NativeOp::ClearLogs)
    }
}

/// 助手进程的响应
///
/// 延迟字段：-1 表示检测失败，缺省表示未检测，两者必须区分
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NativeResponse {
    #[serde(default)]
    pub connected: bool,

    #[serde(rename = "activeConfigId", default, skip_serializing_if = "Option::is_none")]
    pub active_config_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub web_check_latency_ms: Option<i64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tcp_ping_ms: Option<i64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub web_check_status: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub socks_port: Option<u16>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub success: Option<bool>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub already_running: Option<bool>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub country: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub web_check_error: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tcp_ping_error: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub logs: Option<Vec<String>>,
}

impl NativeResponse {
    /// 启动请求是否成功（已在运行也视为成功）
    pub fn tunnel_started(&self) -> bool {
        self.success == Some(true) || self.already_running == Some(true)
    }
}

#[derive(Debug, Error)]
pub enum FrameError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("message of {0} bytes exceeds the size limit")]
    TooLarge(usize),

    #[error("stream ended inside a message")]
    Truncated,

    #[error("malformed message: {0}")]
    Json(#[from] serde_json::Error),
}

/// 写入一条消息
pub async fn write_message<W, T>(writer: &mut W, message: &T) -> Result<(), FrameError>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let body = serde_json::to_vec(message)?;
    if body.len() > MAX_MESSAGE_SIZE {
        return Err(FrameError::TooLarge(body.len()));
    }
    writer.write_all(&(body.len() as u32).to_ne_bytes()).await?;
    writer.write_all(&body).await?;
    writer.flush().await?;
    Ok(())
}

/// 读取一条消息；在任何字节到达前遇到 EOF 时返回 None
pub async fn read_message<R, T>(reader: &mut R) -> Result<Option<T>, FrameError>
where
    R: AsyncRead + Unpin,
    T: DeserializeOwned,
{
    let mut header = [0u8; 4];
    let mut filled = 0;
    while filled < header.len() {
        let n = reader.read(&mut header[filled..]).await?;
        if n == 0 {
            return if filled == 0 {
                Ok(None)
            } else {
                Err(FrameError::Truncated)
            };
        }
        filled += n;
    }

    let len = u32::from_ne_bytes(header) as usize;
    if len > MAX_MESSAGE_SIZE {
        return Err(FrameError::TooLarge(len));
    }

    let mut body = vec![0u8; len];
    reader.read_exact(&mut body).await.map_err(|e| {
        if e.kind() == std::io::ErrorKind::UnexpectedEof {
            FrameError::Truncated
        } else {
            FrameError::Io(e)
        }
    })?;

    Ok(Some(serde_json::from_slice(&body)?))
}
