//! Tool handler trait and registry.

use async_trait::async_trait;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::error::Result;
use crate::mcp::protocol::{CallToolResult, ContentBlock, Meta, Tool};

/// Per-call context handed to a tool.
#[derive(Debug, Clone, Default)]
pub struct ToolContext {
    /// Metadata from the request's `_meta` field, if any.
    pub meta: Option<Meta>,
    /// Cancelled when the peer sends `notifications/cancelled` for this call.
    pub cancel: CancellationToken,
}

impl ToolContext {
    pub fn with_meta(meta: Option<Meta>) -> Self {
        Self {
            meta,
            cancel: CancellationToken::new(),
        }
    }
}

/// Handler for MCP tool calls.
#[async_trait]
pub trait ToolHandler: Send + Sync {
    /// Get the tool definition.
    fn definition(&self) -> Tool;

    /// Execute the tool with the given arguments.
    ///
    /// Argument problems the tool can report to the caller should come back
    /// as an error-flagged [`CallToolResult`], not as `Err`.
    async fn execute(&self, ctx: ToolContext, arguments: Map<String, Value>)
        -> Result<CallToolResult>;
}

/// Registry of tool handlers, keyed by tool name.
#[derive(Default)]
pub struct ToolRegistry {
    tools: BTreeMap<String, Arc<dyn ToolHandler>>,
}

impl ToolRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool handler.
    pub fn register<T: ToolHandler + 'static>(&mut self, handler: T) {
        let tool = handler.definition();
        self.tools.insert(tool.name, Arc::new(handler));
    }

    /// Get all registered tools.
    pub fn list_tools(&self) -> Vec<Tool> {
        self.tools.values().map(|h| h.definition()).collect()
    }

    /// Get a tool by name.
    pub fn get_tool(&self, name: &str) -> Option<Arc<dyn ToolHandler>> {
        self.tools.get(name).cloned()
    }

    /// Check if a tool exists.
    pub fn has_tool(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    /// Get the number of registered tools.
    pub fn tool_count(&self) -> usize {
        self.tools.len()
    }
}

/// Helper to create a text content block.
pub fn text_content(text: impl Into<String>) -> ContentBlock {
    ContentBlock::Text { text: text.into() }
}

/// Helper to create a successful result carrying structured output.
///
/// The text content is the serialized form of `structured`.
pub fn structured_result(structured: Value) -> CallToolResult {
    CallToolResult {
        content: vec![text_content(structured.to_string())],
        structured_content: Some(structured),
        is_error: false,
        meta: None,
    }
}

/// Helper to create an error tool result.
pub fn error_result(text: impl Into<String>) -> CallToolResult {
    CallToolResult {
        content: vec![text_content(text)],
        structured_content: None,
        is_error: true,
        meta: None,
    }
}
