//! MCP over Server-Sent Events.
//!
//! `GET /sse` opens a session. The first event is `endpoint`, whose data is
//! the URL the client must POST its JSON-RPC messages to. Every response is
//! then pushed as a `message` event on the same stream.
//!
//! Each session owns one worker task fed by an mpsc channel, so a session's
//! messages are handled one at a time in arrival order while sessions run
//! independently. Dropping the stream removes the session; the worker exits
//! once its inbound sender is gone.

use std::convert::Infallible;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use axum::body::Bytes;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::Json;
use futures::stream::{self, Stream, StreamExt};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::mpsc;

use super::{plain_error, AppState, Sessions};
use crate::mcp::McpHandler;

/// Maximum concurrent SSE sessions before rejecting with 429.
const MAX_SESSIONS: usize = 64;
const KEEP_ALIVE: Duration = Duration::from_secs(15);
/// Per-session queue depth, both directions.
const CHANNEL_CAPACITY: usize = 32;

#[derive(Debug, Deserialize)]
pub struct SessionQuery {
    pub session_id: Option<String>,
}

/// `GET /sse`: open an MCP session.
pub async fn sse_connect(
    State(state): State<AppState>,
    Query(query): Query<SessionQuery>,
) -> Response {
    let id = match query.session_id.filter(|s| !s.trim().is_empty()) {
        Some(id) if !valid_session_id(&id) => {
            return plain_error(
                StatusCode::BAD_REQUEST,
                "session_id may only contain letters, digits, '-' and '_'",
            );
        }
        Some(id) => id,
        None => uuid::Uuid::new_v4().to_string(),
    };

    let (in_tx, in_rx) = mpsc::channel::<Value>(CHANNEL_CAPACITY);
    let (out_tx, out_rx) = mpsc::channel::<Value>(CHANNEL_CAPACITY);
    {
        let mut sessions = state.sessions.lock().await;
        if sessions.len() >= MAX_SESSIONS {
            return plain_error(StatusCode::TOO_MANY_REQUESTS, "Too many SSE sessions");
        }
        if sessions.contains_key(&id) {
            return plain_error(StatusCode::CONFLICT, format!("session {id} is already open"));
        }
        sessions.insert(id.clone(), in_tx);
    }
    tracing::info!(session = %id, "SSE session opened");

    tokio::spawn(session_worker(state.mcp.clone(), in_rx, out_tx));

    let endpoint = Event::default()
        .event("endpoint")
        .data(format!("/messages?session_id={id}"));
    let messages = stream::unfold(out_rx, |mut rx| async move {
        let response = rx.recv().await?;
        let data = serde_json::to_string(&response).unwrap_or_default();
        Some((Ok(Event::default().event("message").data(data)), rx))
    });
    let events = stream::once(async move { Ok::<_, Infallible>(endpoint) }).chain(messages);

    let stream = SessionStream {
        inner: Box::pin(events),
        id,
        sessions: state.sessions.clone(),
    };

    Sse::new(stream)
        .keep_alive(KeepAlive::default().interval(KEEP_ALIVE))
        .into_response()
}

/// Client-chosen ids end up verbatim in the `endpoint` event and its URL.
fn valid_session_id(id: &str) -> bool {
    id.len() <= 128
        && id
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_')
}

async fn session_worker(
    mcp: McpHandler,
    mut inbound: mpsc::Receiver<Value>,
    outbound: mpsc::Sender<Value>,
) {
    while let Some(message) = inbound.recv().await {
        if let Some(response) = mcp.handle(message).await {
            if outbound.send(response).await.is_err() {
                break;
            }
        }
    }
}

/// `POST /messages?session_id=<id>`: queue one JSON-RPC message.
pub async fn post_message(
    State(state): State<AppState>,
    Query(query): Query<SessionQuery>,
    body: Bytes,
) -> Response {
    let Some(id) = query.session_id.filter(|s| !s.is_empty()) else {
        return plain_error(StatusCode::BAD_REQUEST, "Missing session_id");
    };
    let Some(sender) = state.sessions.lock().await.get(&id).cloned() else {
        return plain_error(StatusCode::NOT_FOUND, format!("Unknown session {id}"));
    };

    let message: Value = match serde_json::from_slice(&body) {
        Ok(v) => v,
        Err(e) => return plain_error(StatusCode::BAD_REQUEST, format!("Invalid JSON: {e}")),
    };
    if !message.is_object() || message.get("jsonrpc").is_none() {
        return plain_error(
            StatusCode::BAD_REQUEST,
            "Expected a JSON-RPC 2.0 message object",
        );
    }

    if sender.send(message).await.is_err() {
        return plain_error(StatusCode::NOT_FOUND, format!("Session {id} is closed"));
    }
    (StatusCode::ACCEPTED, Json(json!({ "status": "accepted" }))).into_response()
}

/// Wrapper that removes the session when the SSE stream is dropped.
struct SessionStream<S> {
    inner: Pin<Box<S>>,
    id: String,
    sessions: Sessions,
}

impl<S: Stream<Item = Result<Event, Infallible>>> Stream for SessionStream<S> {
    type Item = Result<Event, Infallible>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.inner.as_mut().poll_next(cx)
    }
}

impl<S> Drop for SessionStream<S> {
    fn drop(&mut self) {
        let id = std::mem::take(&mut self.id);
        let sessions = self.sessions.clone();
        tracing::info!(session = %id, "SSE session closed");
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            handle.spawn(async move {
                sessions.lock().await.remove(&id);
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::router;
    use crate::http::tests::{body_json, test_state};
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    async fn post(app: &axum::Router, uri: &str, body: &str) -> Response {
        app.clone()
            .oneshot(
                Request::post(uri)
                    .header("content-type", "application/json")
                    .body(Body::from(body.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap()
    }

    async fn next_chunk(stream: &mut axum::body::BodyDataStream) -> String {
        let chunk = tokio::time::timeout(Duration::from_secs(5), stream.next())
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        String::from_utf8(chunk.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn message_status_codes() {
        let (state, _) = test_state();
        let (tx, _rx) = mpsc::channel(4);
        state.sessions.lock().await.insert("known".into(), tx);
        let app = router(state);

        let ping = r#"{"jsonrpc":"2.0","id":1,"method":"ping"}"#;
        assert_eq!(post(&app, "/messages", ping).await.status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            post(&app, "/messages?session_id=nope", ping).await.status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            post(&app, "/messages?session_id=known", "{oops").await.status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            post(&app, "/messages?session_id=known", r#"{"id":1}"#).await.status(),
            StatusCode::BAD_REQUEST
        );

        let accepted = post(&app, "/messages?session_id=known", ping).await;
        assert_eq!(accepted.status(), StatusCode::ACCEPTED);
        assert_eq!(body_json(accepted).await, json!({ "status": "accepted" }));
    }

    #[tokio::test]
    async fn session_round_trip_and_cleanup() {
        let (state, _) = test_state();
        let sessions = state.sessions.clone();
        let app = router(state);

        let response = app
            .clone()
            .oneshot(Request::get("/sse?session_id=s1").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let mut events = response.into_body().into_data_stream();

        let first = next_chunk(&mut events).await;
        assert!(first.contains("event: endpoint"), "{first}");
        assert!(first.contains("data: /messages?session_id=s1"), "{first}");

        let sent = post(
            &app,
            "/messages?session_id=s1",
            r#"{"jsonrpc":"2.0","id":9,"method":"tools/call","params":{"name":"ultimate_get_connection"}}"#,
        )
        .await;
        assert_eq!(sent.status(), StatusCode::ACCEPTED);

        let second = next_chunk(&mut events).await;
        assert!(second.contains("event: message"), "{second}");
        assert!(second.contains(r#""id":9"#), "{second}");

        drop(events);
        for _ in 0..50 {
            if sessions.lock().await.is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(sessions.lock().await.is_empty());
    }

    #[tokio::test]
    async fn client_session_id_must_be_url_safe() {
        let (state, _) = test_state();
        let sessions = state.sessions.clone();
        let app = router(state);
        for uri in ["/sse?session_id=a%0Db", "/sse?session_id=a%26b", "/sse?session_id=a%20b"] {
            let response = app
                .clone()
                .oneshot(Request::get(uri).body(Body::empty()).unwrap())
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::BAD_REQUEST, "{uri}");
        }
        assert!(sessions.lock().await.is_empty());

        assert!(valid_session_id("client-7_A"));
        assert!(valid_session_id(&uuid::Uuid::new_v4().to_string()));
    }

    #[tokio::test]
    async fn session_limit() {
        let (state, _) = test_state();
        {
            let mut sessions = state.sessions.lock().await;
            for i in 0..MAX_SESSIONS {
                let (tx, _rx) = mpsc::channel(1);
                sessions.insert(format!("s{i}"), tx);
            }
        }
        let response = router(state)
            .oneshot(Request::get("/sse").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    }
}
