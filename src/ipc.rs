//! 本地控制接口（仅监听回环地址）

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use std::sync::Arc;
use warp::http::StatusCode;
use warp::reply::Response;
use warp::{Filter, Reply};

use crate::error::OrchestratorError;
use crate::orchestrator::{Orchestrator, TickOutcome};
use crate::routing::PAC_CONTENT_TYPE;

/// 动作类请求的响应
#[derive(Debug, Serialize)]
pub struct ServiceResponse {
    pub success: bool,
    pub message: String,
}

impl ServiceResponse {
    fn ok(message: impl Into<String>) -> Response {
        warp::reply::json(&Self {
            success: true,
            message: message.into(),
        })
        .into_response()
    }

    fn failed(error: &OrchestratorError) -> Response {
        warp::reply::json(&Self {
            success: false,
            message: error.to_string(),
        })
        .into_response()
    }

    fn from_result(result: Result<String, OrchestratorError>) -> Response {
        match result {
            Ok(message) => Self::ok(message),
            Err(e) => {
                log::warn!("Control request failed: {}", e);
                Self::failed(&e)
            }
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct StartTunnelRequest {
    #[serde(default)]
    pub id: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestConnectionRequest {
    #[serde(default)]
    pub endpoint_identifier: String,
    #[serde(default)]
    pub ping_host: String,
    #[serde(default)]
    pub health_check_url: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct GeoRefreshRequest {
    #[serde(default)]
    pub force: bool,
}

#[derive(Debug, Serialize)]
struct LogsResponse {
    success: bool,
    logs: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    message: Option<String>,
}

/// 请求体为空：没有 Content-Length（或为 0）且未分块传输
pub fn body_is_empty(content_length: Option<u64>, transfer_encoding: Option<&str>) -> bool {
    content_length.unwrap_or(0) == 0 && transfer_encoding.is_none()
}

/// 可省略的 JSON 请求体：空体取默认值，非空但无法解析时拒绝（400）
fn optional_json<T>() -> impl Filter<Extract = (T,), Error = warp::Rejection> + Clone
where
    T: DeserializeOwned + Default + Send + 'static,
{
    let empty = warp::header::optional::<u64>("content-length")
        .and(warp::header::optional::<String>("transfer-encoding"))
        .and_then(|length: Option<u64>, encoding: Option<String>| async move {
            if body_is_empty(length, encoding.as_deref()) {
                Ok(())
            } else {
                Err(warp::reject())
            }
        })
        .untuple_one();

    empty.map(T::default).or(warp::body::json::<T>()).unify()
}

fn with_orchestrator(
    orchestrator: Arc<Orchestrator>,
) -> impl Filter<Extract = (Arc<Orchestrator>,), Error = Infallible> + Clone {
    warp::any().map(move || orchestrator.clone())
}

/// 构建控制接口路由
pub fn build_routes(
    orchestrator: Arc<Orchestrator>,
) -> impl Filter<Extract = (impl Reply,), Error = warp::Rejection> + Clone {
    let with = || with_orchestrator(orchestrator.clone());

    // 立即返回最近状态，并另外触发一次检查
    let status = warp::path!("status")
        .and(warp::get())
        .and(with())
        .map(|o: Arc<Orchestrator>| warp::reply::json(&o.status()).into_response());

    let refresh = warp::path!("refresh")
        .and(warp::post())
        .and(with())
        .and_then(|o: Arc<Orchestrator>| async move {
            let reply = match o.refresh().await {
                TickOutcome::Completed(status) => warp::reply::json(&status).into_response(),
                TickOutcome::Skipped => ServiceResponse::ok("Status check already in progress"),
            };
            Ok::<_, warp::Rejection>(reply)
        });

    let summary = warp::path!("summary")
        .and(warp::get())
        .and(with())
        .map(|o: Arc<Orchestrator>| warp::reply::json(&o.summary()).into_response());

    let start = warp::path!("tunnel" / "start")
        .and(warp::post())
        // 未指定 id（或省略请求体）时按顺序故障切换，受冷却限制
        .and(optional_json::<StartTunnelRequest>())
        .and(with())
        .and_then(|request: StartTunnelRequest, o: Arc<Orchestrator>| async move {
            Ok::<_, warp::Rejection>(ServiceResponse::from_result(
                o.start_tunnel(request.id.as_deref()).await,
            ))
        });

    let stop = warp::path!("tunnel" / "stop")
        .and(warp::post())
        .and(with())
        .and_then(|o: Arc<Orchestrator>| async move {
            let result = o.stop_tunnel().await.map(|_| "Tunnel stopped".to_string());
            Ok::<_, warp::Rejection>(ServiceResponse::from_result(result))
        });

    let set_proxy = warp::path!("proxy" / "set")
        .and(warp::post())
        .and(with())
        .map(|o: Arc<Orchestrator>| {
            ServiceResponse::from_result(
                o.set_proxy()
                    .map(|url| format!("System proxy set to {}", url)),
            )
        });

    let clear_proxy = warp::path!("proxy" / "clear")
        .and(warp::post())
        .and(with())
        .map(|o: Arc<Orchestrator>| {
            ServiceResponse::from_result(
                o.clear_proxy()
                    .map(|_| "System proxy restored".to_string()),
            )
        });

    let pac = warp::path!("proxy.pac")
        .and(warp::get())
        .and(with())
        .map(|o: Arc<Orchestrator>| match o.pac_script() {
            Ok(script) => {
                warp::reply::with_header(script, "content-type", PAC_CONTENT_TYPE).into_response()
            }
            Err(e) => {
                log::error!("Failed to build routing script: {}", e);
                warp::reply::with_status(e.to_string(), StatusCode::INTERNAL_SERVER_ERROR)
                    .into_response()
            }
        });

    let history = warp::path!("history")
        .and(warp::get())
        .and(with())
        .map(|o: Arc<Orchestrator>| match o.latency_history() {
            Ok(history) => warp::reply::json(&history).into_response(),
            Err(e) => ServiceResponse::failed(&e),
        });

    let logs = warp::path!("logs")
        .and(warp::get())
        .and(with())
        .and_then(|o: Arc<Orchestrator>| async move {
            let response = match o.helper_logs().await {
                Ok(logs) => LogsResponse {
                    success: true,
                    logs,
                    message: None,
                },
                Err(e) => LogsResponse {
                    success: false,
                    logs: vec![],
                    message: Some(e.to_string()),
                },
            };
            Ok::<_, warp::Rejection>(warp::reply::json(&response).into_response())
        });

    let clear_logs = warp::path!("logs")
        .and(warp::delete())
        .and(with())
        .and_then(|o: Arc<Orchestrator>| async move {
            let result = o
                .clear_helper_logs()
                .await
                .map(|_| "Logs cleared".to_string());
            Ok::<_, warp::Rejection>(ServiceResponse::from_result(result))
        });

    let test = warp::path!("test")
        .and(warp::post())
        .and(warp::body::json())
        .and(with())
        .and_then(|req: TestConnectionRequest, o: Arc<Orchestrator>| async move {
            let result = o
                .test_connection(&req.endpoint_identifier, &req.ping_host, &req.health_check_url)
                .await;
            Ok::<_, warp::Rejection>(ServiceResponse::from_result(result))
        });

    let geo_refresh = warp::path!("geo" / "refresh")
        .and(warp::post())
        .and(optional_json::<GeoRefreshRequest>())
        .and(with())
        .and_then(|request: GeoRefreshRequest, o: Arc<Orchestrator>| async move {
            let reply = match o.refresh_geo(request.force).await {
                Ok(reports) => warp::reply::json(&reports).into_response(),
                Err(e) => ServiceResponse::failed(&e),
            };
            Ok::<_, warp::Rejection>(reply)
        });

    status
        .or(refresh)
        .unify()
        .or(summary)
        .unify()
        .or(start)
        .unify()
        .or(stop)
        .unify()
        .or(set_proxy)
        .unify()
        .or(clear_proxy)
        .unify()
        .or(pac)
        .unify()
        .or(history)
        .unify()
        .or(logs)
        .unify()
        .or(clear_logs)
        .unify()
        .or(test)
        .unify()
        .or(geo_refresh)
        .unify()
        .with(warp::log("holocron::ipc"))
}

/// 启动控制接口，运行直到进程退出
pub async fn start_control_server(
    orchestrator: Arc<Orchestrator>,
    port: u16,
) -> anyhow::Result<()> {
    use std::net::{SocketAddr, TcpListener};

    let socket_addr = SocketAddr::from(([127, 0, 0, 1], port));

    // 先确认端口可用，warp 绑定失败时会直接 panic
    match TcpListener::bind(socket_addr) {
        Ok(listener) => drop(listener),
        Err(e) => {
            log::error!("Failed to bind to port {}: {}", port, e);
            return Err(anyhow::anyhow!("Port {} unavailable: {}", port, e));
        }
    }

    let routes = build_routes(orchestrator);
    log::info!("Control API listening on http://{}", socket_addr);
    warp::serve(routes).run(socket_addr).await;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_bodies_default_missing_fields() {
        let request: StartTunnelRequest = serde_json::from_str("{}").unwrap();
        assert!(request.id.is_none());
        let request: GeoRefreshRequest = serde_json::from_str("{}").unwrap();
        assert!(!request.force);

        let request: StartTunnelRequest = serde_json::from_str(r#"{"id":"home"}"#).unwrap();
        assert_eq!(request.id.as_deref(), Some("home"));
        let request: GeoRefreshRequest = serde_json::from_str(r#"{"force":true}"#).unwrap();
        assert!(request.force);
    }

    #[test]
    fn test_body_presence() {
        assert!(body_is_empty(None, None));
        assert!(body_is_empty(Some(0), None));
        assert!(!body_is_empty(Some(12), None));
        assert!(!body_is_empty(None, Some("chunked")));
    }

    #[test]
    fn test_malformed_start_body_is_not_a_default() {
        assert!(serde_json::from_str::<StartTunnelRequest>("{oops").is_err());
        assert!(serde_json::from_str::<StartTunnelRequest>(r#"{"id": 7}"#).is_err());
    }

    #[test]
    fn test_test_request_field_names() {
        let request: TestConnectionRequest = serde_json::from_str(
            r#"{"endpointIdentifier":"root@example.com","pingHost":"youtube.com","healthCheckUrl":"https://example.com"}"#,
        )
        .unwrap();
        assert_eq!(request.endpoint_identifier, "root@example.com");
        assert_eq!(request.ping_host, "youtube.com");
        assert_eq!(request.health_check_url, "https://example.com");
    }

    #[test]
    fn test_service_response_shape() {
        let json = serde_json::to_value(ServiceResponse {
            success: false,
            message: OrchestratorError::NotConnected.to_string(),
        })
        .unwrap();
        assert_eq!(json, serde_json::json!({ "success": false, "message": "Tunnel is not connected" }));
    }
}
