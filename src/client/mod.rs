//! Companion MCP client.
//!
//! Connects to an MCP server over any of the three transports, performs the
//! initialize handshake and runs one [`Action`].

pub mod actions;
pub mod config;
pub mod sse;
pub mod streamable;
pub mod transport;

use serde::de::DeserializeOwned;
use serde_json::{json, Map, Value};
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use tracing::{debug, info};

use crate::config::Transport;
use crate::error::Result;
use crate::mcp::protocol::*;

pub use self::config::{Action, ClientArgs, ClientConfig};
use self::sse::SseClientTransport;
use self::streamable::StreamableHttpClientTransport;
pub use self::transport::{ChildProcessTransport, ClientTransport};

/// Name the client reports in `initialize`.
pub const CLIENT_NAME: &str = "yardstick-client";

/// An initialized MCP client session.
pub struct McpClient {
    transport: Box<dyn ClientTransport>,
    next_id: AtomicI64,
    closed: AtomicBool,
    server_info: Option<InitializeResult>,
}

impl McpClient {
    /// Connect using `config` and complete the initialize handshake.
    pub async fn connect(config: &ClientConfig) -> Result<Self> {
        let transport: Box<dyn ClientTransport> = match config.transport {
            Transport::Stdio => Box::new(
                ChildProcessTransport::spawn(config.command.as_deref(), &config.command_args)
                    .await?,
            ),
            Transport::Sse => Box::new(SseClientTransport::connect(&config.url()).await?),
            Transport::StreamableHttp => {
                Box::new(StreamableHttpClientTransport::new(&config.url())?)
            }
        };

        let mut client = Self::with_transport(transport);
        let handshake = client.initialize().await.map(|_| ());
        if let Err(e) = handshake {
            let _ = client.close().await;
            return Err(e);
        }
        Ok(client)
    }

    /// Wrap an already connected transport without initializing it.
    pub fn with_transport(transport: Box<dyn ClientTransport>) -> Self {
        Self {
            transport,
            next_id: AtomicI64::new(1),
            closed: AtomicBool::new(false),
            server_info: None,
        }
    }

    /// Run the initialize handshake.
    pub async fn initialize(&mut self) -> Result<&InitializeResult> {
        let params = json!({
            "protocolVersion": MCP_VERSION,
            "capabilities": {},
            "clientInfo": { "name": CLIENT_NAME, "version": crate::VERSION },
        });
        let result: InitializeResult = self.call(methods::INITIALIZE, Some(params)).await?;
        info!(
            "Connected to {} v{} (protocol {})",
            result.server_info.name, result.server_info.version, result.protocol_version
        );

        self.transport
            .notify(JsonRpcNotification::new(methods::INITIALIZED, None))
            .await?;

        Ok(self.server_info.insert(result))
    }

    /// Result of the handshake, once it has completed.
    pub fn server_info(&self) -> Option<&InitializeResult> {
        self.server_info.as_ref()
    }

    /// Session id assigned by the server; empty for stdio.
    pub fn session_id(&self) -> String {
        self.transport.session_id().unwrap_or_default()
    }

    pub async fn ping(&self) -> Result<()> {
        let _: Value = self.call(methods::PING, Some(json!({}))).await?;
        Ok(())
    }

    /// List every tool, following pagination cursors.
    pub async fn list_tools(&self) -> Result<Vec<Tool>> {
        let mut tools = Vec::new();
        let mut cursor = None;
        loop {
            let params = serde_json::to_value(PaginatedParams { cursor })?;
            let page: ListToolsResult = self.call(methods::TOOLS_LIST, Some(params)).await?;
            tools.extend(page.tools);
            match page.next_cursor {
                Some(next) => cursor = Some(next),
                None => return Ok(tools),
            }
        }
    }

    /// List every resource, following pagination cursors.
    pub async fn list_resources(&self) -> Result<Vec<Resource>> {
        let mut resources = Vec::new();
        let mut cursor = None;
        loop {
            let params = serde_json::to_value(PaginatedParams { cursor })?;
            let page: ListResourcesResult =
                self.call(methods::RESOURCES_LIST, Some(params)).await?;
            resources.extend(page.resources);
            match page.next_cursor {
                Some(next) => cursor = Some(next),
                None => return Ok(resources),
            }
        }
    }

    /// Call a tool, returning the raw result object.
    pub async fn call_tool(&self, name: &str, arguments: Map<String, Value>) -> Result<Value> {
        self.call_tool_with_meta(name, arguments, None).await
    }

    /// Call a tool with request metadata under `_meta`.
    pub async fn call_tool_with_meta(
        &self,
        name: &str,
        arguments: Map<String, Value>,
        meta: Option<Meta>,
    ) -> Result<Value> {
        let params = CallToolParams {
            name: name.to_string(),
            arguments: Some(arguments),
            meta,
        };
        self.call(methods::TOOLS_CALL, Some(serde_json::to_value(params)?))
            .await
    }

    async fn call<T: DeserializeOwned>(&self, method: &str, params: Option<Value>) -> Result<T> {
        let id = RequestId::Number(self.next_id.fetch_add(1, Ordering::Relaxed));
        debug!("-> {} ({:?})", method, id);
        let response = self
            .transport
            .request(JsonRpcRequest::new(id, method, params))
            .await?;
        response.into_result()
    }

    /// Close the session. Later calls are no-ops.
    pub async fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.transport.close().await
    }
}
