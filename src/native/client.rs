use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use std::io::ErrorKind;
use std::path::PathBuf;
use std::process::Stdio;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::process::Command;
use tokio::time::{timeout, Duration};

use super::protocol::{read_message, write_message, FrameError, NativeRequest, NativeResponse};
use crate::error::ChannelError;

/// 单次调用的外层超时；正常的超时由助手进程自行处理
const CALL_GUARD_TIMEOUT: Duration = Duration::from_secs(60);

/// 本地助手进程的请求/响应通道
pub trait NativeHost: Send + Sync {
    fn call(&self, request: NativeRequest) -> BoxFuture<'_, Result<NativeResponse, ChannelError>>;
}

/// 每次调用启动一个助手进程，发送一条请求，读取第一条响应后关闭
pub struct NativeChannelClient {
    helper_path: PathBuf,
    args: Vec<String>,
    guard_timeout: Duration,
}

impl NativeChannelClient {
    pub fn new(helper_path: impl Into<PathBuf>) -> Self {
        Self {
            helper_path: helper_path.into(),
            args: vec![],
            guard_timeout: CALL_GUARD_TIMEOUT,
        }
    }

    /// 附加启动参数
    pub fn with_args(mut self, args: Vec<String>) -> Self {
        self.args = args;
        self
    }

    pub fn with_guard_timeout(mut self, guard_timeout: Duration) -> Self {
        self.guard_timeout = guard_timeout;
        self
    }

    async fn exchange(&self, request: NativeRequest) -> Result<NativeResponse, ChannelError> {
        let mut child = Command::new(&self.helper_path)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                ChannelError::HostUnavailable(format!("{}: {}", self.helper_path.display(), e))
            })?;

        let (mut stdin, mut stdout) = match (child.stdin.take(), child.stdout.take()) {
            (Some(stdin), Some(stdout)) => (stdin, stdout),
            _ => {
                let _ = child.start_kill();
                return Err(ChannelError::HostUnavailable(
                    "native host stdio was not captured".to_string(),
                ));
            }
        };

        log::debug!("Native host spawned (PID: {:?}), op={:?}", child.id(), request.op);

        let outcome = timeout(
            self.guard_timeout,
            exchange_over(&mut stdout, &mut stdin, &request),
        )
        .await;
        drop(stdin);

        match outcome {
            Ok(Ok(Some(response))) => {
                // 收到第一条消息即视为权威响应，由调用方关闭通道
                let _ = child.start_kill();
                let _ = child.wait().await;
                Ok(response)
            }
            Ok(Ok(None)) => match child.wait().await {
                Ok(status) if !status.success() => Err(ChannelError::HostDisconnected(format!(
                    "native host exited with {}",
                    status
                ))),
                Ok(_) => Err(ChannelError::NoResponse),
                Err(e) => Err(ChannelError::HostDisconnected(e.to_string())),
            },
            Ok(Err(e)) => {
                let _ = child.start_kill();
                let _ = child.wait().await;
                Err(ChannelError::HostDisconnected(e.to_string()))
            }
            Err(_) => {
                let _ = child.start_kill();
                let _ = child.wait().await;
                Err(ChannelError::HostDisconnected(format!(
                    "timed out after {}s",
                    self.guard_timeout.as_secs()
                )))
            }
        }
    }
}

impl NativeHost for NativeChannelClient {
    fn call(&self, request: NativeRequest) -> BoxFuture<'_, Result<NativeResponse, ChannelError>> {
        self.exchange(request).boxed()
    }
}

/// 在任意双工流上完成一次请求/响应
pub async fn exchange_over<R, W>(
    reader: &mut R,
    writer: &mut W,
    request: &NativeRequest,
) -> Result<Option<NativeResponse>, FrameError>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    match write_message(writer, request).await {
        Ok(()) => {}
        // 对端已退出：继续读取，由读取结果与退出码决定错误类型
        Err(FrameError::Io(e)) if e.kind() == ErrorKind::BrokenPipe => {
            log::debug!("Native host closed its input before the request was sent: {}", e);
        }
        Err(e) => return Err(e),
    }
    read_message(reader).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::native::protocol::NativeOp;
    use tokio::io::duplex;

    #[tokio::test]
    async fn test_missing_helper_is_unavailable() {
        let client = NativeChannelClient::new("/nonexistent/holocron-native-host");
        let err = client
            .call(NativeRequest::get_status("root@example.com", "youtube.com", "https://example.com"))
            .await
            .unwrap_err();
        assert!(matches!(err, ChannelError::HostUnavailable(_)));
    }

    fn status_request() -> NativeRequest {
        NativeRequest::get_status("root@example.com", "youtube.com", "https://example.com")
    }

    #[tokio::test]
    async fn test_peer_gone_before_request_is_no_message() {
        let (mut ours, theirs) = duplex(64);
        drop(theirs);

        let (mut reader, mut writer) = tokio::io::split(&mut ours);
        let outcome = exchange_over(&mut reader, &mut writer, &status_request())
            .await
            .unwrap();
        assert!(outcome.is_none());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_helper_exiting_cleanly_without_reply_is_no_response() {
        let client = NativeChannelClient::new("/bin/true");
        // 退出与写入的先后顺序不定，多跑几次
        for _ in 0..20 {
            let err = client.call(status_request()).await.unwrap_err();
            assert!(matches!(err, ChannelError::NoResponse), "{err:?}");
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_helper_failing_without_reply_is_disconnected() {
        let client = NativeChannelClient::new("/bin/sh")
            .with_args(vec!["-c".to_string(), "exit 3".to_string()]);
        for _ in 0..5 {
            let err = client.call(status_request()).await.unwrap_err();
            match err {
                ChannelError::HostDisconnected(reason) => {
                    assert!(reason.contains("exited"), "{reason}");
                }
                other => panic!("unexpected error: {other:?}"),
            }
        }
    }

    #[tokio::test]
    async fn test_exchange_over_takes_first_message() {
        let (mut ours, theirs) = duplex(4096);
        let (mut their_reader, mut their_writer) = tokio::io::split(theirs);

        let helper = tokio::spawn(async move {
            let request: serde_json::Value = read_message(&mut their_reader).await.unwrap().unwrap();
            assert_eq!(request["op"], "stopTunnel");
            write_message(&mut their_writer, &serde_json::json!({ "success": true, "message": "stopped" }))
                .await
                .unwrap();
            write_message(&mut their_writer, &serde_json::json!({ "success": false }))
                .await
                .unwrap();
        });

        let (mut reader, mut writer) = tokio::io::split(&mut ours);
        let request = NativeRequest::stop_tunnel("root@example.com");
        assert_eq!(request.op, NativeOp::StopTunnel);
        let response = exchange_over(&mut reader, &mut writer, &request)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(response.success, Some(true));
        assert_eq!(response.message.as_deref(), Some("stopped"));
        helper.await.unwrap();
    }
}
