//! Streamable-HTTP client transport.

use async_trait::async_trait;
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use reqwest::{StatusCode, Url};
use std::sync::OnceLock;
use tracing::debug;

use super::sse::{check_status, SseDecoder};
use super::transport::ClientTransport;
use crate::error::{Error, Result};
use crate::http::SESSION_HEADER;
use crate::mcp::protocol::{JsonRpcMessage, JsonRpcNotification, JsonRpcRequest, JsonRpcResponse};

/// One POST per message; the session id arrives with the `initialize` reply.
pub struct StreamableHttpClientTransport {
    http: reqwest::Client,
    endpoint: Url,
    session_id: OnceLock<String>,
}

impl StreamableHttpClientTransport {
    pub fn new(url: &str) -> Result<Self> {
        let endpoint = Url::parse(url)
            .map_err(|e| Error::Config(format!("invalid server URL {}: {}", url, e)))?;
        Ok(Self {
            http: reqwest::Client::builder().build()?,
            endpoint,
            session_id: OnceLock::new(),
        })
    }

    async fn post(&self, msg: &JsonRpcMessage) -> Result<reqwest::Response> {
        let mut request = self
            .http
            .post(self.endpoint.clone())
            .header(ACCEPT, "application/json, text/event-stream")
            .header(CONTENT_TYPE, "application/json")
            .json(msg);

        if let Some(id) = self.session_id.get() {
            request = request.header(SESSION_HEADER, id);
        }

        let response = request.send().await?;
        check_status(response.status(), "streamable HTTP request")?;

        if let Some(id) = response
            .headers()
            .get(SESSION_HEADER)
            .and_then(|v| v.to_str().ok())
        {
            if self.session_id.set(id.to_string()).is_ok() {
                debug!("Streamable HTTP session {}", id);
            }
        }

        Ok(response)
    }
}

#[async_trait]
impl ClientTransport for StreamableHttpClientTransport {
    async fn request(&self, request: JsonRpcRequest) -> Result<JsonRpcResponse> {
        let id = request.id.clone();
        let response = self.post(&JsonRpcMessage::Request(request)).await?;

        if response.status() == StatusCode::ACCEPTED {
            return Err(Error::McpProtocol(
                "server accepted a request without responding".to_string(),
            ));
        }

        let is_event_stream = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|ct| ct.starts_with("text/event-stream"))
            .unwrap_or(false);

        if !is_event_stream {
            return Ok(response.json::<JsonRpcResponse>().await?);
        }

        let body = response.bytes().await?;
        let mut decoder = SseDecoder::new();
        let mut events = decoder.push(&body);
        events.extend(decoder.finish());

        events
            .into_iter()
            .filter_map(|event| serde_json::from_str::<JsonRpcMessage>(&event.data).ok())
            .find_map(|msg| match msg {
                JsonRpcMessage::Response(resp) if resp.id == id => Some(resp),
                _ => None,
            })
            .ok_or_else(|| Error::McpProtocol("event stream carried no response".to_string()))
    }

    async fn notify(&self, notification: JsonRpcNotification) -> Result<()> {
        self.post(&JsonRpcMessage::Notification(notification)).await?;
        Ok(())
    }

    fn session_id(&self) -> Option<String> {
        self.session_id.get().cloned()
    }

    async fn close(&self) -> Result<()> {
        let Some(id) = self.session_id.get() else {
            return Ok(());
        };

        let response = self
            .http
            .delete(self.endpoint.clone())
            .header(SESSION_HEADER, id)
            .send()
            .await?;

        // Servers may refuse explicit termination; the session then expires on its own.
        match response.status() {
            StatusCode::METHOD_NOT_ALLOWED | StatusCode::NOT_FOUND => Ok(()),
            status => check_status(status, "session termination"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_invalid_url() {
        assert!(matches!(
            StreamableHttpClientTransport::new("not a url"),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn test_session_starts_unset() {
        let transport = StreamableHttpClientTransport::new("http://localhost:8080/mcp").unwrap();
        assert!(transport.session_id().is_none());
    }
}
