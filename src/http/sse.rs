//! SSE transport.
//!
//! `GET /sse` opens a stream whose first event names the per-session POST
//! endpoint. Messages POSTed there are answered with `202 Accepted`; their
//! responses travel back on the stream as `message` events.

use axum::{
    body::Bytes,
    extract::{Query, State},
    http::StatusCode,
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
};
use dashmap::DashMap;
use futures::stream::{self, Stream, StreamExt};
use serde::Deserialize;
use std::convert::Infallible;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, error, info};
use uuid::Uuid;

use super::{HttpState, SSE_PATH};
use crate::mcp::protocol::JsonRpcMessage;
use crate::metrics::Metrics;

/// Buffered responses per SSE session.
const CHANNEL_CAPACITY: usize = 64;

/// Query string of the POST endpoint.
#[derive(Debug, Deserialize)]
pub struct SessionQuery {
    pub sessionid: String,
}

/// Removes the session when the event stream is dropped.
struct SessionGuard {
    id: String,
    sessions: Arc<DashMap<String, mpsc::Sender<JsonRpcMessage>>>,
    metrics: Arc<Metrics>,
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        self.sessions.remove(&self.id);
        self.metrics.session_closed();
        info!(session = %self.id, "SSE session closed");
    }
}

/// Open an SSE session.
pub async fn connect(
    State(state): State<HttpState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let session_id = Uuid::new_v4().to_string();
    let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);

    state.sse_sessions.insert(session_id.clone(), tx);
    let metrics = state.server.metrics();
    metrics.session_opened();
    info!(session = %session_id, "SSE session opened");

    let endpoint = Event::default()
        .event("endpoint")
        .data(format!("{}?sessionid={}", SSE_PATH, session_id));

    let guard = SessionGuard {
        id: session_id,
        sessions: state.sse_sessions.clone(),
        metrics,
    };

    let messages = ReceiverStream::new(rx).map(move |msg| {
        let _session = &guard;
        Ok(message_event(&msg))
    });

    let stream = stream::once(async move { Ok(endpoint) }).chain(messages);
    Sse::new(stream).keep_alive(KeepAlive::default())
}

fn message_event(msg: &JsonRpcMessage) -> Event {
    match serde_json::to_string(msg) {
        Ok(data) => Event::default().event("message").data(data),
        Err(e) => {
            error!("Error serializing SSE message: {}", e);
            Event::default().comment("serialization error")
        }
    }
}

/// Accept a client message for an open SSE session.
pub async fn message(
    State(state): State<HttpState>,
    Query(query): Query<SessionQuery>,
    body: Bytes,
) -> Response {
    let Some(tx) = state
        .sse_sessions
        .get(&query.sessionid)
        .map(|entry| entry.value().clone())
    else {
        return (StatusCode::NOT_FOUND, "session not found").into_response();
    };

    let msg: JsonRpcMessage = match serde_json::from_slice(&body) {
        Ok(msg) => msg,
        Err(e) => {
            return (
                StatusCode::BAD_REQUEST,
                format!("invalid JSON-RPC message: {}", e),
            )
                .into_response()
        }
    };

    let server = state.server.clone();
    let session = query.sessionid;
    tokio::spawn(async move {
        if let Some(response) = server.handle_session_message(&session, msg).await {
            if tx.send(JsonRpcMessage::Response(response)).await.is_err() {
                debug!("SSE session closed before the response was delivered");
            }
        }
    });

    StatusCode::ACCEPTED.into_response()
}
