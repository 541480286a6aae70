use std::{net::SocketAddr, sync::Arc};

use anyhow::{Context, Result};
use axum::{
    body::Bytes,
    extract::Extension,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use gastown_dispatch::TaskDispatcher;
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;

use crate::{
    auth::SignatureVerifier,
    config::ServerConfig,
    error_envelope,
    protocol::{INVALID_REQUEST, PARSE_ERROR},
    McpServer, SERVICE_NAME,
};

#[derive(Clone)]
struct HttpState {
    inner: Arc<HttpStateInner>,
}

struct HttpStateInner {
    server: Arc<McpServer>,
    dispatcher: Arc<TaskDispatcher>,
    verifier: Option<SignatureVerifier>,
}

impl HttpState {
    fn ensure_signed(&self, headers: &HeaderMap, body: &[u8]) -> Result<(), ApiError> {
        match &self.inner.verifier {
            Some(verifier) if !verifier.validate(headers, body) => Err(ApiError::InvalidSignature),
            _ => Ok(()),
        }
    }
}

#[derive(Debug)]
enum ApiError {
    InvalidSignature,
    Parse(serde_json::Error),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::InvalidSignature => {
                tracing::warn!("rejected MCP request with invalid signature");
                (
                    StatusCode::UNAUTHORIZED,
                    Json(error_envelope(INVALID_REQUEST, "Invalid signature")),
                )
                    .into_response()
            }
            ApiError::Parse(err) => (
                StatusCode::BAD_REQUEST,
                Json(error_envelope(PARSE_ERROR, format!("Parse error: {err}"))),
            )
                .into_response(),
        }
    }
}

/// Router with `POST /mcp` and `GET /health`.
pub fn router(
    server: Arc<McpServer>,
    dispatcher: Arc<TaskDispatcher>,
    config: &ServerConfig,
) -> Router {
    let verifier = config
        .instance_token
        .clone()
        .map(|token| SignatureVerifier::new(token, config.timestamp_freshness));

    let state = HttpState {
        inner: Arc::new(HttpStateInner {
            server,
            dispatcher,
            verifier,
        }),
    };

    Router::new()
        .route("/mcp", post(handle_message))
        .route("/health", get(health))
        .layer(Extension(state))
        .layer(TraceLayer::new_for_http())
}

pub async fn run_http_transport(
    server: Arc<McpServer>,
    dispatcher: Arc<TaskDispatcher>,
    config: &ServerConfig,
) -> Result<()> {
    let host = &config.host;
    let port = config.port;
    let addr: SocketAddr = format!("{host}:{port}")
        .parse()
        .with_context(|| format!("Invalid bind address {host}:{port}"))?;

    let app = router(server, dispatcher, config);

    tracing::info!("Gastown MCP server listening on {addr}");

    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind MCP HTTP server to {addr}"))?;

    axum::serve(listener, app.into_make_service())
        .await
        .context("HTTP transport encountered an unrecoverable error")?;

    Ok(())
}

async fn handle_message(
    Extension(state): Extension<HttpState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, ApiError> {
    state.ensure_signed(&headers, &body)?;

    let payload: Value = serde_json::from_slice(&body).map_err(ApiError::Parse)?;

    Ok(match state.inner.server.handle_jsonrpc(payload).await {
        Some(value) => (StatusCode::OK, Json(value)).into_response(),
        None => StatusCode::ACCEPTED.into_response(),
    })
}

async fn health(Extension(state): Extension<HttpState>) -> impl IntoResponse {
    let dispatcher = &state.inner.dispatcher;
    let status = dispatcher.status().await;

    Json(json!({
        "status": "ok",
        "service": SERVICE_NAME,
        "gt_root": dispatcher.config().gt_root.display().to_string(),
        "active_tasks": status.active_tasks,
        "execution_mode": status.execution_mode,
        "mayor_session": if status.session_alive {
            "running"
        } else {
            "stopped"
        },
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{auth::sign, ServerInfo};
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use gastown_dispatch::testing::{has_args, ScriptedRunner};
    use gastown_dispatch::{CommandOutput, DispatchConfig, TaskStore};
    use std::time::{Duration, SystemTime, UNIX_EPOCH};
    use tower::ServiceExt;

    const TOKEN: &str = "instance-secret";

    fn app(token: Option<&str>) -> Router {
        let runner = ScriptedRunner::new(|spec| {
            if has_args(spec, &["mayor", "status"]) {
                Ok(CommandOutput::ok("Mayor is not running"))
            } else {
                Ok(CommandOutput::ok("Fixed in commit abc123"))
            }
        });
        let dispatcher = Arc::new(TaskDispatcher::new(
            DispatchConfig {
                gt_root: "/srv/gt".into(),
                ..DispatchConfig::default()
            },
            runner,
            Arc::new(TaskStore::new()),
        ));
        let config = ServerConfig {
            instance_token: token.map(str::to_string),
            timestamp_freshness: Duration::from_secs(300),
            ..ServerConfig::default()
        };
        let server = Arc::new(McpServer::for_dispatcher(
            Arc::clone(&dispatcher),
            ServerInfo::from(&config),
        ));
        router(server, dispatcher, &config)
    }

    fn now() -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock")
            .as_secs()
    }

    fn post(body: &str, signature: Option<(String, u64)>) -> Request<Body> {
        let mut builder = Request::builder()
            .method("POST")
            .uri("/mcp")
            .header("content-type", "application/json");
        if let Some((sig, ts)) = signature {
            builder = builder
                .header("X-Gastown-Signature", sig)
                .header("X-Gastown-Timestamp", ts.to_string());
        }
        builder.body(Body::from(body.to_string())).expect("request")
    }

    async fn json_body(response: Response) -> Value {
        let bytes = to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("body");
        serde_json::from_slice(&bytes).expect("json")
    }

    #[tokio::test]
    async fn unsigned_mode_serves_tools_list() {
        let body = r#"{"jsonrpc":"2.0","id":1,"method":"tools/list"}"#;
        let response = app(None).oneshot(post(body, None)).await.expect("call");
        assert_eq!(response.status(), StatusCode::OK);

        let value = json_body(response).await;
        assert_eq!(value["result"]["tools"][0]["name"], "mayor_task");
    }

    #[tokio::test]
    async fn signed_request_is_accepted() {
        let body = r#"{"jsonrpc":"2.0","id":2,"method":"initialize"}"#;
        let ts = now();
        let signature = sign(TOKEN, ts, body.as_bytes());

        let response = app(Some(TOKEN))
            .oneshot(post(body, Some((signature, ts))))
            .await
            .expect("call");
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(json_body(response).await["result"]["serverInfo"]["name"], "gastown-mcp");
    }

    #[tokio::test]
    async fn bad_signature_is_unauthorized() {
        let body = r#"{"jsonrpc":"2.0","id":3,"method":"tools/list"}"#;
        let ts = now();
        let signature = sign("wrong-secret", ts, body.as_bytes());

        let response = app(Some(TOKEN))
            .oneshot(post(body, Some((signature, ts))))
            .await
            .expect("call");
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let value = json_body(response).await;
        assert_eq!(value["error"]["code"], -32600);
        assert_eq!(value["error"]["message"], "Invalid signature");
        assert!(value["id"].is_null());

        let missing = app(Some(TOKEN)).oneshot(post(body, None)).await.expect("call");
        assert_eq!(missing.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn malformed_body_is_parse_error() {
        let response = app(None)
            .oneshot(post("{not json", None))
            .await
            .expect("call");
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let value = json_body(response).await;
        assert_eq!(value["error"]["code"], -32700);
        assert!(value["error"]["message"]
            .as_str()
            .expect("message")
            .starts_with("Parse error"));
    }

    #[tokio::test]
    async fn notification_is_accepted_without_body() {
        let body = r#"{"jsonrpc":"2.0","method":"notifications/initialized"}"#;
        let response = app(None).oneshot(post(body, None)).await.expect("call");
        assert_eq!(response.status(), StatusCode::ACCEPTED);
    }

    #[tokio::test]
    async fn tools_call_runs_one_shot_task() {
        let body = r#"{"jsonrpc":"2.0","id":9,"method":"tools/call","params":{"name":"mayor_task","arguments":{"task":"fix bug"}}}"#;
        let response = app(None).oneshot(post(body, None)).await.expect("call");
        assert_eq!(response.status(), StatusCode::OK);

        let value = json_body(response).await;
        assert_eq!(value["result"]["isError"], false);
        let text = value["result"]["content"][0]["text"].as_str().expect("text");
        let outcome: Value = serde_json::from_str(text).expect("outcome");
        assert_eq!(outcome["status"], "completed");
        assert_eq!(outcome["response"], "Fixed in commit abc123");
    }

    #[tokio::test]
    async fn health_reports_dispatcher_state() {
        let request = Request::builder()
            .uri("/health")
            .body(Body::empty())
            .expect("request");
        let response = app(Some(TOKEN)).oneshot(request).await.expect("call");
        assert_eq!(response.status(), StatusCode::OK);

        let value = json_body(response).await;
        assert_eq!(value["status"], "ok");
        assert_eq!(value["service"], "gastown-mcp");
        assert_eq!(value["gt_root"], "/srv/gt");
        assert_eq!(value["active_tasks"], 0);
        assert_eq!(value["execution_mode"], "oneshot");
        assert_eq!(value["mayor_session"], "stopped");
    }
}
