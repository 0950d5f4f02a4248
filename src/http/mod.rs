//! HTTP/SSE transport.
//!
//! | Route                    | Handler                        |
//! |--------------------------|--------------------------------|
//! | `GET /sse`               | [`sse::sse_connect`]           |
//! | `POST /messages`         | [`sse::post_message`]          |
//! | `POST /upload-prg`       | [`upload::upload_prg`]         |
//! | `GET /health`            | [`health::health`]             |
//!
//! MCP traffic goes through `/sse` + `/messages`: responses are delivered on
//! the session's event stream, the POST only acknowledges receipt.

pub mod health;
pub mod sse;
pub mod upload;

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio::sync::{mpsc, Mutex};
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::client::Device;
use crate::connection::ConnectionState;
use crate::error::Error;
use crate::mcp::McpHandler;

/// Open SSE sessions, keyed by session id. The sender feeds the session's
/// worker.
pub type Sessions = Arc<Mutex<HashMap<String, mpsc::Sender<Value>>>>;

/// Shared state for all HTTP handlers.
#[derive(Clone)]
pub struct AppState {
    pub mcp: McpHandler,
    pub device: Arc<dyn Device>,
    pub connection: Arc<ConnectionState>,
    pub sessions: Sessions,
}

impl AppState {
    /// Build state around a handler; the device and connection are the ones
    /// the handler's tools use.
    pub fn new(mcp: McpHandler) -> Self {
        let ctx = mcp.registry().context().clone();
        Self {
            mcp,
            device: ctx.device,
            connection: ctx.connection,
            sessions: Arc::new(Mutex::new(HashMap::new())),
        }
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/sse", get(sse::sse_connect))
        .route("/messages", post(sse::post_message))
        .route("/upload-prg", post(upload::upload_prg))
        .route("/health", get(health::health))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Plain `{"error": message}` response.
pub(crate) fn plain_error(status: StatusCode, message: impl Into<String>) -> Response {
    (status, Json(json!({ "error": message.into() }))).into_response()
}

/// HTTP status for a bridge error raised outside an MCP session.
pub(crate) fn error_status(error: &Error) -> StatusCode {
    match error {
        Error::Validation(_) | Error::Payload(_) | Error::NotConfigured | Error::UnknownTool(_) => {
            StatusCode::BAD_REQUEST
        }
        Error::Connection(_) | Error::Device { .. } => StatusCode::BAD_GATEWAY,
        Error::Registry(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

pub(crate) fn error_response(error: &Error) -> Response {
    (error_status(error), Json(error.to_json())).into_response()
}

/// Bind `addr` and serve until SIGINT/SIGTERM.
pub async fn serve(state: AppState, addr: SocketAddr) -> std::io::Result<()> {
    let listener = TcpListener::bind(addr).await?;
    info!(addr = %listener.local_addr()?, "HTTP/SSE server ready");
    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    info!("Shutting down...");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => info!("Received SIGINT"),
                    _ = sigterm.recv() => info!("Received SIGTERM"),
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "failed to register SIGTERM handler");
                ctrl_c.await.ok();
                info!("Received SIGINT");
            }
        }
    }
    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
        info!("Received SIGINT");
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::tools::tests::{registry, RecordingDevice};
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use tower::ServiceExt;

    pub(crate) fn test_state() -> (AppState, Arc<RecordingDevice>) {
        let (registry, device) = registry();
        (AppState::new(McpHandler::new(Arc::new(registry))), device)
    }

    pub(crate) async fn body_json(response: Response) -> Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn health_reports_connection() {
        let (state, _) = test_state();
        let response = router(state)
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["status"], "ok");
        assert_eq!(body["connection"]["host"], "c64.local");
        assert_eq!(body["sessions"], 0);
    }

    #[test]
    fn error_statuses() {
        assert_eq!(error_status(&Error::invalid("x")), StatusCode::BAD_REQUEST);
        assert_eq!(error_status(&Error::NotConfigured), StatusCode::BAD_REQUEST);
        assert_eq!(
            error_status(&Error::Connection("refused".into())),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            error_status(&Error::Device {
                status: 500,
                message: "no".into()
            }),
            StatusCode::BAD_GATEWAY
        );
    }
}
