//! The deterministic `echo` tool.

use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::sync::LazyLock;
use tracing::info;

use crate::error::{Error, Result};
use crate::mcp::handler::{error_result, structured_result, ToolContext, ToolHandler};
use crate::mcp::protocol::{CallToolResult, Meta, Tool};

/// Tool name as advertised in `tools/list`.
pub const ECHO_TOOL_NAME: &str = "echo";

/// Pattern every echo input must match.
pub const ALPHANUMERIC_PATTERN: &str = "^[a-zA-Z0-9]+$";

/// Text returned for input that fails validation.
pub const INVALID_INPUT_MESSAGE: &str = "input must be alphanumeric only";

static ALPHANUMERIC: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(ALPHANUMERIC_PATTERN).expect("alphanumeric pattern is valid"));

/// Arguments of the echo tool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EchoRequest {
    pub input: String,
}

/// Structured output of the echo tool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EchoResponse {
    pub output: String,
}

/// True iff `input` is non-empty and made of ASCII letters and digits only.
pub fn validate_alphanumeric(input: &str) -> bool {
    ALPHANUMERIC.is_match(input)
}

/// Run the echo logic for one request.
///
/// Invalid input yields an error-flagged result with no structured payload.
/// Non-empty `meta` is copied onto the result; absent or empty `meta` leaves
/// the result's `_meta` unset.
pub fn echo(request: &EchoRequest, meta: Option<Meta>) -> CallToolResult {
    if !validate_alphanumeric(&request.input) {
        return error_result(INVALID_INPUT_MESSAGE);
    }

    let response = EchoResponse {
        output: request.input.clone(),
    };
    let mut result = structured_result(json!({ "output": response.output }));

    if let Some(meta) = meta.filter(|m| !m.is_empty()) {
        info!(metadata = %serde_json::Value::Object(meta.clone()), "Echo request carried metadata");
        result.meta = Some(meta);
    }

    result
}

/// Echo tool handler.
#[derive(Debug, Default)]
pub struct EchoTool;

impl EchoTool {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl ToolHandler for EchoTool {
    fn definition(&self) -> Tool {
        Tool {
            name: ECHO_TOOL_NAME.to_string(),
            description: "Echo back an alphanumeric string for deterministic testing".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "input": {
                        "type": "string",
                        "pattern": ALPHANUMERIC_PATTERN,
                        "description": "Alphanumeric string to echo back"
                    }
                },
                "required": ["input"]
            }),
            output_schema: Some(json!({
                "type": "object",
                "properties": {
                    "output": { "type": "string" }
                },
                "required": ["output"]
            })),
        }
    }

    async fn execute(&self, ctx: ToolContext, arguments: Map<String, Value>) -> Result<CallToolResult> {
        let request: EchoRequest = serde_json::from_value(Value::Object(arguments))
            .map_err(|e| Error::InvalidToolArguments(e.to_string()))?;
        Ok(echo(&request, ctx.meta))
    }
}
