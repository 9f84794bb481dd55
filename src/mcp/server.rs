//! MCP server implementation.

use dashmap::DashMap;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::sync::Arc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::{Error, Result};
use crate::mcp::handler::{ToolContext, ToolRegistry};
use crate::mcp::protocol::*;
use crate::mcp::transport::Transport;
use crate::metrics::{Metrics, Timer};
use crate::VERSION;

/// Session scope used by the stdio transport, which serves a single peer.
pub const STDIO_SESSION: &str = "";

/// In-flight request key. Request ids are only unique within one session.
type RequestKey = (String, RequestId);

/// MCP server.
///
/// Holds no per-session protocol state; every transport shares one instance.
pub struct McpServer {
    tools: Arc<ToolRegistry>,
    info: Implementation,
    metrics: Arc<Metrics>,
    /// In-flight requests, cancellable via `notifications/cancelled` from the same session.
    active_requests: DashMap<RequestKey, CancellationToken>,
}

impl McpServer {
    /// Create a new MCP server.
    pub fn new(tools: ToolRegistry, name: impl Into<String>) -> Self {
        Self::with_metrics(tools, name, Metrics::new())
    }

    /// Create a new MCP server reporting into `metrics`.
    pub fn with_metrics(tools: ToolRegistry, name: impl Into<String>, metrics: Arc<Metrics>) -> Self {
        Self {
            tools: Arc::new(tools),
            info: Implementation {
                name: name.into(),
                version: VERSION.to_string(),
            },
            metrics,
            active_requests: DashMap::new(),
        }
    }

    pub fn info(&self) -> &Implementation {
        &self.info
    }

    pub fn metrics(&self) -> Arc<Metrics> {
        self.metrics.clone()
    }

    /// Number of requests currently being processed.
    pub fn in_flight(&self) -> usize {
        self.active_requests.len()
    }

    /// Run the server with the given transport until the peer disconnects.
    pub async fn run<T: Transport>(self: Arc<Self>, mut transport: T) -> Result<()> {
        info!("Starting MCP server: {} v{}", self.info.name, self.info.version);

        let (mut incoming, outgoing) = transport.start().await?;
        let mut tasks = JoinSet::new();

        while let Some(msg) = incoming.recv().await {
            match msg {
                JsonRpcMessage::Request(req) => {
                    let server = self.clone();
                    let outgoing = outgoing.clone();
                    tasks.spawn(async move {
                        let Some(response) = server.handle_request(req).await else {
                            return;
                        };
                        if outgoing.send(JsonRpcMessage::Response(response)).await.is_err() {
                            error!("Failed to send response");
                        }
                    });
                }
                JsonRpcMessage::Notification(notif) => {
                    self.handle_notification(STDIO_SESSION, notif).await;
                }
                JsonRpcMessage::Response(_) => {
                    warn!("Received unexpected response");
                }
            }
        }

        while tasks.join_next().await.is_some() {}
        drop(outgoing);

        transport.stop().await?;
        info!("MCP server stopped");
        Ok(())
    }

    /// Handle any inbound message from the stdio peer.
    pub async fn handle_message(&self, msg: JsonRpcMessage) -> Option<JsonRpcResponse> {
        self.handle_session_message(STDIO_SESSION, msg).await
    }

    /// Handle any inbound message from `session`, returning the response owed
    /// to the peer, if any.
    pub async fn handle_session_message(
        &self,
        session: &str,
        msg: JsonRpcMessage,
    ) -> Option<JsonRpcResponse> {
        match msg {
            JsonRpcMessage::Request(req) => self.handle_session_request(session, req).await,
            JsonRpcMessage::Notification(notif) => {
                self.handle_notification(session, notif).await;
                None
            }
            JsonRpcMessage::Response(resp) => {
                warn!("Received unexpected response (id: {:?})", resp.id);
                None
            }
        }
    }

    /// Handle a JSON-RPC request from the stdio peer.
    pub async fn handle_request(&self, req: JsonRpcRequest) -> Option<JsonRpcResponse> {
        self.handle_session_request(STDIO_SESSION, req).await
    }

    /// Handle a JSON-RPC request. A request cancelled by the peer gets no response.
    pub async fn handle_session_request(
        &self,
        session: &str,
        req: JsonRpcRequest,
    ) -> Option<JsonRpcResponse> {
        debug!("Handling request: {} (id: {:?})", req.method, req.id);
        self.metrics.inc_requests();

        let key = (session.to_string(), req.id.clone());
        let cancel = CancellationToken::new();
        self.active_requests.insert(key.clone(), cancel.clone());

        let result = tokio::select! {
            result = self.dispatch(&req, cancel.clone()) => result,
            _ = cancel.cancelled() => Err(Error::Cancelled),
        };

        self.active_requests.remove(&key);

        match result {
            Ok(value) => Some(JsonRpcResponse::success(req.id, value)),
            Err(Error::Cancelled) => {
                debug!("Request {} (id: {:?}) cancelled, not responding", req.method, req.id);
                None
            }
            Err(e) => {
                self.metrics.inc_failed();
                debug!("Request {} failed: {}", req.method, e);
                Some(JsonRpcResponse::failure(req.id, e.code(), e.to_string()))
            }
        }
    }

    async fn dispatch(&self, req: &JsonRpcRequest, cancel: CancellationToken) -> Result<Value> {
        match req.method.as_str() {
            methods::INITIALIZE => self.handle_initialize(req.params.clone()),
            methods::PING => Ok(serde_json::json!({})),
            methods::TOOLS_LIST => self.handle_list_tools(),
            methods::TOOLS_CALL => self.handle_call_tool(req.params.clone(), cancel).await,
            methods::RESOURCES_LIST => self.handle_list_resources(),
            _ => Err(Error::MethodNotFound(req.method.clone())),
        }
    }

    /// Handle a notification.
    async fn handle_notification(&self, session: &str, notif: JsonRpcNotification) {
        debug!("Handling notification: {}", notif.method);

        match notif.method.as_str() {
            methods::INITIALIZED => {
                info!("Client initialized");
            }
            methods::CANCELLED => {
                let Some(params) = notif.params else {
                    return;
                };
                match serde_json::from_value::<CancelledParams>(params) {
                    Ok(cancel) => {
                        let key = (session.to_string(), cancel.request_id.clone());
                        if let Some((_, token)) = self.active_requests.remove(&key) {
                            info!("Cancelling request: {:?}", cancel.request_id);
                            token.cancel();
                        } else {
                            debug!("Cancellation for unknown request: {:?}", cancel.request_id);
                        }
                    }
                    Err(e) => warn!("Malformed cancellation notification: {}", e),
                }
            }
            _ => {
                debug!("Unknown notification: {}", notif.method);
            }
        }
    }

    /// Handle initialize request.
    fn handle_initialize(&self, params: Option<Value>) -> Result<Value> {
        let params: InitializeParams = parse_params(params)?;
        info!(
            "Client connected: {} v{} (protocol {})",
            params.client_info.name, params.client_info.version, params.protocol_version
        );

        let protocol_version = if SUPPORTED_PROTOCOL_VERSIONS.contains(&params.protocol_version.as_str()) {
            params.protocol_version
        } else {
            MCP_VERSION.to_string()
        };

        let result = InitializeResult {
            protocol_version,
            capabilities: ServerCapabilities {
                tools: Some(ToolsCapability {
                    list_changed: false,
                }),
                resources: Some(ResourcesCapability::default()),
            },
            server_info: self.info.clone(),
            instructions: None,
        };

        Ok(serde_json::to_value(result)?)
    }

    /// Handle list tools request.
    fn handle_list_tools(&self) -> Result<Value> {
        let result = ListToolsResult {
            tools: self.tools.list_tools(),
            next_cursor: None,
        };
        Ok(serde_json::to_value(result)?)
    }

    /// The server publishes no resources.
    fn handle_list_resources(&self) -> Result<Value> {
        Ok(serde_json::to_value(ListResourcesResult::default())?)
    }

    /// Handle call tool request.
    async fn handle_call_tool(&self, params: Option<Value>, cancel: CancellationToken) -> Result<Value> {
        let params: CallToolParams = parse_params(params)?;

        let handler = self
            .tools
            .get_tool(&params.name)
            .ok_or_else(|| Error::ToolNotFound(params.name.clone()))?;

        self.metrics.inc_tool_calls();
        let timer = Timer::start();
        let ctx = ToolContext {
            meta: params.meta,
            cancel,
        };
        let result = handler
            .execute(ctx, params.arguments.unwrap_or_default())
            .await?;

        if result.is_error {
            self.metrics.inc_invalid_inputs();
        }
        debug!(
            tool = %params.name,
            is_error = result.is_error,
            elapsed_ms = timer.elapsed_ms(),
            "Tool call finished"
        );

        Ok(serde_json::to_value(result)?)
    }
}

/// Decode request params, treating absent params as an invalid request.
fn parse_params<T: DeserializeOwned>(params: Option<Value>) -> Result<T> {
    params
        .ok_or_else(|| Error::InvalidToolArguments("Missing params".to_string()))
        .and_then(|v| serde_json::from_value(v).map_err(|e| Error::InvalidToolArguments(e.to_string())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mcp::transport::StreamTransport;
    use crate::tools;
    use serde_json::json;
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

    fn echo_server() -> McpServer {
        let mut registry = ToolRegistry::new();
        tools::register_all_tools(&mut registry);
        McpServer::new(registry, "echo-server")
    }

    fn request(id: i64, method: &str, params: Value) -> JsonRpcRequest {
        JsonRpcRequest::new(RequestId::Number(id), method, Some(params))
    }

    impl McpServer {
        async fn respond(&self, req: JsonRpcRequest) -> JsonRpcResponse {
            self.handle_request(req).await.expect("response")
        }
    }

    /// Finishes after a delay unless its call is cancelled first.
    struct SlowTool;

    #[async_trait::async_trait]
    impl crate::mcp::handler::ToolHandler for SlowTool {
        fn definition(&self) -> Tool {
            Tool {
                name: "slow".to_string(),
                description: "Sleeps before answering".to_string(),
                input_schema: json!({ "type": "object" }),
                output_schema: None,
            }
        }

        async fn execute(
            &self,
            _ctx: ToolContext,
            _arguments: serde_json::Map<String, Value>,
        ) -> Result<CallToolResult> {
            tokio::time::sleep(std::time::Duration::from_millis(300)).await;
            Ok(crate::mcp::handler::structured_result(json!({ "done": true })))
        }
    }

    fn slow_server() -> Arc<McpServer> {
        let mut registry = ToolRegistry::new();
        registry.register(SlowTool);
        Arc::new(McpServer::new(registry, "slow-server"))
    }

    fn slow_call(id: i64) -> JsonRpcMessage {
        JsonRpcMessage::Request(request(id, "tools/call", json!({ "name": "slow", "arguments": {} })))
    }

    fn cancel(id: i64) -> JsonRpcMessage {
        JsonRpcMessage::Notification(JsonRpcNotification::new(
            methods::CANCELLED,
            Some(json!({ "requestId": id, "reason": "test" })),
        ))
    }

    async fn wait_in_flight(server: &McpServer, expected: usize) {
        for _ in 0..100 {
            if server.in_flight() == expected {
                return;
            }
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }
        panic!("expected {} in-flight requests, got {}", expected, server.in_flight());
    }

    #[tokio::test]
    async fn test_initialize() {
        let server = echo_server();
        let response = server
            .respond(request(
                1,
                "initialize",
                json!({
                    "protocolVersion": "2024-11-05",
                    "capabilities": {},
                    "clientInfo": { "name": "test-client", "version": "1.0.0" }
                }),
            ))
            .await;

        let result: InitializeResult = response.into_result().unwrap();
        assert_eq!(result.protocol_version, "2024-11-05");
        assert_eq!(result.server_info.name, "echo-server");
        assert!(result.capabilities.tools.is_some());
    }

    #[tokio::test]
    async fn test_initialize_negotiates_unknown_version() {
        let server = echo_server();
        let response = server
            .respond(request(
                1,
                "initialize",
                json!({
                    "protocolVersion": "1999-01-01",
                    "clientInfo": { "name": "old", "version": "0.1" }
                }),
            ))
            .await;

        let result: InitializeResult = response.into_result().unwrap();
        assert_eq!(result.protocol_version, MCP_VERSION);
    }

    #[tokio::test]
    async fn test_list_tools_and_resources() {
        let server = echo_server();

        let tools: ListToolsResult = server
            .respond(request(2, "tools/list", json!({})))
            .await
            .into_result()
            .unwrap();
        assert_eq!(tools.tools.len(), 1);
        assert_eq!(tools.tools[0].name, "echo");

        let resources: ListResourcesResult = server
            .respond(request(3, "resources/list", json!({})))
            .await
            .into_result()
            .unwrap();
        assert!(resources.resources.is_empty());
    }

    #[tokio::test]
    async fn test_call_echo_with_metadata() {
        let server = echo_server();
        let response = server
            .respond(request(
                4,
                "tools/call",
                json!({
                    "name": "echo",
                    "arguments": { "input": "test123" },
                    "_meta": { "progressToken": "task123" }
                }),
            ))
            .await;

        let value: Value = response.into_result().unwrap();
        assert_eq!(value["structuredContent"], json!({"output": "test123"}));
        assert_eq!(value["_meta"], json!({"progressToken": "task123"}));
        assert_eq!(value["isError"], json!(false));
    }

    #[tokio::test]
    async fn test_call_echo_invalid_input_is_not_protocol_error() {
        let server = echo_server();
        let response = server
            .respond(request(
                5,
                "tools/call",
                json!({ "name": "echo", "arguments": { "input": "test@123" } }),
            ))
            .await;

        assert!(response.error.is_none());
        let value = response.result.unwrap();
        assert_eq!(value["isError"], json!(true));
        assert_eq!(value["content"][0]["text"], json!("input must be alphanumeric only"));
        assert!(value.get("_meta").is_none());
        assert_eq!(server.metrics().snapshot().invalid_inputs, 1);
    }

    #[tokio::test]
    async fn test_protocol_errors() {
        let server = echo_server();

        let unknown_tool = server
            .respond(request(6, "tools/call", json!({ "name": "nope", "arguments": {} })))
            .await;
        assert_eq!(unknown_tool.error.unwrap().code, error_codes::INVALID_PARAMS);

        let missing_input = server
            .respond(request(7, "tools/call", json!({ "name": "echo", "arguments": {} })))
            .await;
        assert_eq!(missing_input.error.unwrap().code, error_codes::INVALID_PARAMS);

        let unknown_method = server
            .respond(request(8, "prompts/list", json!({})))
            .await;
        assert_eq!(unknown_method.error.unwrap().code, error_codes::METHOD_NOT_FOUND);

        assert_eq!(server.metrics().snapshot().requests_failed, 3);
        assert_eq!(server.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_notifications_produce_no_response() {
        let server = echo_server();
        let initialized = JsonRpcMessage::Notification(JsonRpcNotification::new(methods::INITIALIZED, None));
        assert!(server.handle_message(initialized).await.is_none());

        let cancel_unknown = JsonRpcMessage::Notification(JsonRpcNotification::new(
            methods::CANCELLED,
            Some(json!({ "requestId": 99, "reason": "test" })),
        ));
        assert!(server.handle_message(cancel_unknown).await.is_none());
    }

    #[tokio::test]
    async fn test_run_over_stream_transport() {
        let (peer, local) = tokio::io::duplex(8192);
        let (read_half, write_half) = tokio::io::split(local);
        let server = Arc::new(echo_server());
        let run = tokio::spawn(server.run(StreamTransport::new(read_half, write_half)));

        let (peer_read, mut peer_write) = tokio::io::split(peer);
        let mut lines = BufReader::new(peer_read).lines();

        peer_write
            .write_all(b"{\"jsonrpc\":\"2.0\",\"id\":1,\"method\":\"tools/call\",\"params\":{\"name\":\"echo\",\"arguments\":{\"input\":\"abc123\"}}}\n")
            .await
            .unwrap();

        let line = lines.next_line().await.unwrap().unwrap();
        let response: JsonRpcResponse = serde_json::from_str(&line).unwrap();
        assert_eq!(response.id, RequestId::Number(1));
        assert_eq!(response.result.unwrap()["structuredContent"]["output"], json!("abc123"));

        peer_write.shutdown().await.unwrap();
        drop(peer_write);
        run.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_cancelled_request_gets_no_response() {
        let server = slow_server();
        let call = {
            let server = server.clone();
            tokio::spawn(async move { server.handle_session_message("a", slow_call(2)).await })
        };
        wait_in_flight(&server, 1).await;

        assert!(server.handle_session_message("a", cancel(2)).await.is_none());
        assert!(call.await.unwrap().is_none());
        assert_eq!(server.in_flight(), 0);
        assert_eq!(server.metrics().snapshot().requests_failed, 0);
    }

    #[tokio::test]
    async fn test_same_request_id_in_two_sessions() {
        let server = slow_server();
        let spawn_call = |session: &'static str| {
            let server = server.clone();
            tokio::spawn(async move { server.handle_session_message(session, slow_call(2)).await })
        };
        let first = spawn_call("a");
        let second = spawn_call("b");
        wait_in_flight(&server, 2).await;

        // Cancelling id 2 in session "b" leaves session "a" alone.
        server.handle_session_message("b", cancel(2)).await;

        let response = first.await.unwrap().expect("session a still answered");
        assert_eq!(response.id, RequestId::Number(2));
        assert_eq!(response.result.unwrap()["structuredContent"]["done"], json!(true));
        assert!(second.await.unwrap().is_none());
    }
}
