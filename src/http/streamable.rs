//! Streamable-HTTP transport.
//!
//! Every JSON-RPC message is a `POST /mcp`. `initialize` opens a session whose
//! id is returned in the `Mcp-Session-Id` header; later messages must carry
//! it. Responses come back as plain `application/json`.

use axum::{
    body::Bytes,
    extract::State,
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info};
use uuid::Uuid;

use super::{HttpState, SESSION_HEADER};
use crate::config::HttpTimeouts;
use crate::mcp::protocol::{error_codes, methods, JsonRpcMessage, JsonRpcResponse, RequestId};
use crate::metrics::Metrics;

fn session_header(headers: &HeaderMap) -> Option<&str> {
    headers.get(SESSION_HEADER).and_then(|v| v.to_str().ok())
}

/// Handle one POSTed JSON-RPC message.
pub async fn message(State(state): State<HttpState>, headers: HeaderMap, body: Bytes) -> Response {
    let msg: JsonRpcMessage = match serde_json::from_slice(&body) {
        Ok(msg) => msg,
        Err(e) => {
            let error = JsonRpcResponse::failure(
                RequestId::Number(0),
                error_codes::PARSE_ERROR,
                format!("Parse error: {}", e),
            );
            return (StatusCode::BAD_REQUEST, Json(error)).into_response();
        }
    };

    let is_initialize =
        matches!(&msg, JsonRpcMessage::Request(req) if req.method == methods::INITIALIZE);

    let session_id = if is_initialize {
        Uuid::new_v4().to_string()
    } else {
        match session_header(&headers) {
            None => {
                return (StatusCode::BAD_REQUEST, "missing Mcp-Session-Id header").into_response()
            }
            Some(id) => match state.http_sessions.get_mut(id) {
                Some(mut last_active) => {
                    *last_active = Instant::now();
                    id.to_string()
                }
                None => return (StatusCode::NOT_FOUND, "session not found").into_response(),
            },
        }
    };

    match state.server.handle_session_message(&session_id, msg).await {
        Some(response) => {
            if is_initialize && response.error.is_none() {
                state.http_sessions.insert(session_id.clone(), Instant::now());
                state.server.metrics().session_opened();
                info!(session = %session_id, "Streamable HTTP session opened");
            }
            ([(SESSION_HEADER, session_id)], Json(response)).into_response()
        }
        None => (StatusCode::ACCEPTED, [(SESSION_HEADER, session_id)]).into_response(),
    }
}

/// `DELETE /mcp` ends a session.
pub async fn terminate(State(state): State<HttpState>, headers: HeaderMap) -> Response {
    let Some(id) = session_header(&headers) else {
        return (StatusCode::BAD_REQUEST, "missing Mcp-Session-Id header").into_response();
    };

    if state.http_sessions.remove(id).is_some() {
        state.server.metrics().session_closed();
        info!(session = %id, "Streamable HTTP session terminated");
        StatusCode::NO_CONTENT.into_response()
    } else {
        debug!(session = %id, "Termination of unknown session");
        (StatusCode::NOT_FOUND, "session not found").into_response()
    }
}

/// Drop sessions unused for longer than `idle`, returning how many went.
pub(super) fn evict_idle_sessions(
    sessions: &DashMap<String, Instant>,
    metrics: &Metrics,
    idle: Duration,
) -> usize {
    let now = Instant::now();
    let mut evicted = 0;
    sessions.retain(|id, last_active| {
        if now.duration_since(*last_active) < idle {
            return true;
        }
        debug!(session = %id, "Evicting idle streamable HTTP session");
        metrics.session_closed();
        evicted += 1;
        false
    });
    evicted
}

/// Periodically evict idle sessions. Stops once the router holding the
/// session map is dropped.
pub(super) fn spawn_session_sweeper(state: &HttpState, timeouts: &HttpTimeouts) {
    let sessions = Arc::downgrade(&state.http_sessions);
    let metrics = state.server.metrics();
    let idle = timeouts.session_idle;
    let period = timeouts.session_sweep;

    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        interval.tick().await;
        loop {
            interval.tick().await;
            let Some(sessions) = sessions.upgrade() else {
                break;
            };
            let evicted = evict_idle_sessions(&sessions, &metrics, idle);
            if evicted > 0 {
                info!(evicted, "Evicted idle streamable HTTP sessions");
            }
        }
    });
}

/// The server never initiates messages, so there is no stream to open.
pub async fn reject_stream() -> Response {
    (
        StatusCode::METHOD_NOT_ALLOWED,
        [(header::ALLOW, "POST, DELETE")],
    )
        .into_response()
}
