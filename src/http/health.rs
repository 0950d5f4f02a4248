//! Unauthenticated health-check endpoint.

use axum::extract::State;
use axum::Json;
use serde_json::{json, Value};

use super::AppState;
use crate::mcp::{SERVER_NAME, SERVER_VERSION};

/// `GET /health`: liveness check with the current device target.
pub async fn health(State(state): State<AppState>) -> Json<Value> {
    let connection = state.connection.get().await.map(|c| {
        json!({
            "host": c.host,
            "port": c.port,
            "base_url": c.base_url(),
        })
    });
    let sessions = state.sessions.lock().await.len();

    Json(json!({
        "status": "ok",
        "service": SERVER_NAME,
        "version": SERVER_VERSION,
        "connection": connection,
        "sessions": sessions,
    }))
}
