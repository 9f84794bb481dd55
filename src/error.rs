//! Error types for the Yardstick MCP server and client.

use thiserror::Error;

use crate::mcp::protocol::error_codes;

/// Result type alias for Yardstick operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for Yardstick.
#[derive(Error, Debug)]
pub enum Error {
    // ===== MCP Errors =====
    #[error("MCP protocol error: {0}")]
    McpProtocol(String),

    #[error("Method not found: {0}")]
    MethodNotFound(String),

    #[error("Tool not found: {0}")]
    ToolNotFound(String),

    #[error("Invalid tool arguments: {0}")]
    InvalidToolArguments(String),

    /// A JSON-RPC error returned by the remote peer.
    #[error("JSON-RPC error {code}: {message}")]
    Remote { code: i32, message: String },

    // ===== Transport Errors =====
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("unsupported transport type: {0} (supported transports: stdio, sse, streamable-http)")]
    UnsupportedTransport(String),

    #[error("Session not found: {0}")]
    SessionNotFound(String),

    #[error("unauthorized")]
    Unauthorized,

    // ===== I/O Errors =====
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    // ===== HTTP Errors =====
    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    // ===== Internal Errors =====
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Timeout: operation timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("Cancelled: operation was cancelled")]
    Cancelled,
}

impl Error {
    /// Create a remote JSON-RPC error.
    pub fn remote(code: i32, message: impl Into<String>) -> Self {
        Self::Remote {
            code,
            message: message.into(),
        }
    }

    /// JSON-RPC error code used when this error is reported to a peer.
    pub fn code(&self) -> i32 {
        match self {
            Self::MethodNotFound(_) => error_codes::METHOD_NOT_FOUND,
            Self::ToolNotFound(_) | Self::InvalidToolArguments(_) => error_codes::INVALID_PARAMS,
            Self::Json(_) => error_codes::PARSE_ERROR,
            Self::Remote { code, .. } => *code,
            _ => error_codes::INTERNAL_ERROR,
        }
    }
}
