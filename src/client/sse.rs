//! SSE client transport and a small incremental event-stream decoder.

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use reqwest::{StatusCode, Url};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::transport::{dispatch, ClientTransport, PendingRequests};
use crate::error::{Error, Result};
use crate::mcp::protocol::{JsonRpcMessage, JsonRpcNotification, JsonRpcRequest, JsonRpcResponse};

/// One decoded server-sent event.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SseEvent {
    pub event: Option<String>,
    pub data: String,
    pub id: Option<String>,
}

/// Incremental `text/event-stream` decoder.
///
/// Bytes may arrive split anywhere; complete events are returned as soon as
/// their terminating blank line has been seen.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: Vec<u8>,
    event: Option<String>,
    data: Vec<String>,
    id: Option<String>,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk, returning every event it completes.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<SseEvent> {
        self.buffer.extend_from_slice(chunk);

        let mut events = Vec::new();
        while let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let raw: Vec<u8> = self.buffer.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&raw);
            if let Some(event) = self.process_line(line.trim_end_matches(['\n', '\r'])) {
                events.push(event);
            }
        }
        events
    }

    /// Flush whatever is buffered once the stream has ended.
    pub fn finish(&mut self) -> Option<SseEvent> {
        if !self.buffer.is_empty() {
            let raw = std::mem::take(&mut self.buffer);
            let line = String::from_utf8_lossy(&raw).into_owned();
            self.process_line(line.trim_end_matches('\r'));
        }
        self.dispatch()
    }

    fn process_line(&mut self, line: &str) -> Option<SseEvent> {
        if line.is_empty() {
            return self.dispatch();
        }
        // Comment, used for keep-alives.
        if line.starts_with(':') {
            return None;
        }

        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };

        match field {
            "event" => self.event = Some(value.to_string()),
            "data" => self.data.push(value.to_string()),
            "id" => self.id = Some(value.to_string()),
            _ => {}
        }
        None
    }

    fn dispatch(&mut self) -> Option<SseEvent> {
        let event = self.event.take();
        let id = self.id.take();
        if self.data.is_empty() {
            return None;
        }
        Some(SseEvent {
            event,
            data: std::mem::take(&mut self.data).join("\n"),
            id,
        })
    }
}

/// Deliver a `message` event to whoever is waiting for it.
fn handle_event(event: SseEvent, pending: &PendingRequests) {
    match event.event.as_deref() {
        None | Some("message") => match serde_json::from_str::<JsonRpcMessage>(&event.data) {
            Ok(msg) => dispatch(msg, pending),
            Err(e) => warn!("Malformed SSE message: {} ({})", event.data, e),
        },
        Some(other) => debug!("Ignoring SSE event {}", other),
    }
}

/// Map an HTTP status from the server to a transport error.
pub(crate) fn check_status(status: StatusCode, context: &str) -> Result<()> {
    match status {
        StatusCode::UNAUTHORIZED => Err(Error::Unauthorized),
        StatusCode::NOT_FOUND => Err(Error::SessionNotFound(context.to_string())),
        s if s.is_success() => Ok(()),
        s => Err(Error::Transport(format!("{} failed with HTTP {}", context, s))),
    }
}

/// MCP over SSE: events stream down a long-lived GET, messages go up as POSTs.
pub struct SseClientTransport {
    http: reqwest::Client,
    endpoint: Url,
    session_id: String,
    pending: PendingRequests,
    reader: JoinHandle<()>,
}

impl SseClientTransport {
    /// Open the event stream at `url` and wait for the server to name its
    /// message endpoint.
    pub async fn connect(url: &str) -> Result<Self> {
        let base = Url::parse(url)
            .map_err(|e| Error::Config(format!("invalid server URL {}: {}", url, e)))?;
        let http = reqwest::Client::builder().build()?;

        let response = http
            .get(base.clone())
            .header(ACCEPT, "text/event-stream")
            .send()
            .await?;
        check_status(response.status(), "SSE connect")?;

        let pending = PendingRequests::default();
        let mut stream = Box::pin(response.bytes_stream());
        let mut decoder = SseDecoder::new();

        let mut endpoint = None;
        while endpoint.is_none() {
            let chunk = stream.next().await.ok_or_else(|| {
                Error::Transport("SSE stream closed before the endpoint event".to_string())
            })??;
            for event in decoder.push(&chunk) {
                if endpoint.is_none() && event.event.as_deref() == Some("endpoint") {
                    endpoint = Some(event.data);
                } else {
                    handle_event(event, &pending);
                }
            }
        }
        let endpoint = endpoint.unwrap_or_default();

        let endpoint = base
            .join(&endpoint)
            .map_err(|e| Error::McpProtocol(format!("bad endpoint {}: {}", endpoint, e)))?;
        let session_id = endpoint
            .query_pairs()
            .find(|(key, _)| key == "sessionid")
            .map(|(_, value)| value.into_owned())
            .unwrap_or_default();
        info!("SSE session {} established at {}", session_id, endpoint);

        let reader = {
            let pending = pending.clone();
            tokio::spawn(async move {
                while let Some(chunk) = stream.next().await {
                    match chunk {
                        Ok(bytes) => {
                            for event in decoder.push(&bytes) {
                                handle_event(event, &pending);
                            }
                        }
                        Err(e) => {
                            warn!("SSE stream error: {}", e);
                            break;
                        }
                    }
                }
                if let Some(event) = decoder.finish() {
                    handle_event(event, &pending);
                }
                debug!("SSE stream closed");
                pending.clear();
            })
        };

        Ok(Self {
            http,
            endpoint,
            session_id,
            pending,
            reader,
        })
    }

    async fn post(&self, msg: &JsonRpcMessage) -> Result<()> {
        let response = self
            .http
            .post(self.endpoint.clone())
            .header(CONTENT_TYPE, "application/json")
            .json(msg)
            .send()
            .await?;
        check_status(response.status(), &self.session_id)
    }
}

#[async_trait]
impl ClientTransport for SseClientTransport {
    async fn request(&self, request: JsonRpcRequest) -> Result<JsonRpcResponse> {
        let id = request.id.clone();
        let rx = self.pending.register(id.clone());
        if let Err(e) = self.post(&JsonRpcMessage::Request(request)).await {
            self.pending.forget(&id);
            return Err(e);
        }
        self.pending.wait(id, rx).await
    }

    async fn notify(&self, notification: JsonRpcNotification) -> Result<()> {
        self.post(&JsonRpcMessage::Notification(notification)).await
    }

    fn session_id(&self) -> Option<String> {
        Some(self.session_id.clone())
    }

    async fn close(&self) -> Result<()> {
        // Dropping the stream ends the session on the server.
        self.reader.abort();
        Ok(())
    }
}

impl Drop for SseClientTransport {
    fn drop(&mut self) {
        self.reader.abort();
    }
}
