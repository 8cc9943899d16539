//! 编排器错误类型

use thiserror::Error;

/// 本地助手进程通道错误
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChannelError {
    /// 无法启动助手进程（不存在或配置错误）
    #[error("Failed to connect to native host: {0}")]
    HostUnavailable(String),

    /// 助手进程未返回任何消息即关闭通道
    #[error("Connection closed by native host without a response")]
    NoResponse,

    /// 通道在报告错误后关闭
    #[error("Native host disconnected: {0}")]
    HostDisconnected(String),
}

#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error(transparent)]
    Channel(#[from] ChannelError),

    #[error("Endpoint '{0}' has no usable identifier")]
    EndpointInvalid(String),

    #[error("Endpoint '{0}' not found")]
    EndpointNotFound(String),

    #[error("All {attempted} endpoint(s) failed, last error: {last_error}")]
    AllEndpointsFailed { attempted: usize, last_error: String },

    #[error("Failed to start endpoint '{endpoint}': {reason}")]
    StartFailed { endpoint: String, reason: String },

    #[error("Geo refresh failed: {0}")]
    RefreshFailed(String),

    #[error("Tunnel is not connected")]
    NotConnected,

    #[error("Active endpoint has no SOCKS port")]
    NoSocksPort,

    #[error("System proxy error: {0}")]
    Proxy(String),

    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

pub type Result<T, E = OrchestratorError> = std::result::Result<T, E>;
