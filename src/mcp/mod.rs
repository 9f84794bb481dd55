//! Model Context Protocol (MCP) implementation.
//!
//! A hand-rolled JSON-RPC layer covering the MCP subset the echo server and
//! its client speak.
//!
//! # Architecture
//!
//! - `protocol` - Core MCP types and message definitions
//! - `server` - MCP server implementation
//! - `transport` - Newline-delimited framing over stdio or child pipes
//! - `handler` - Tool handler trait and registry

pub mod handler;
pub mod protocol;
pub mod server;
pub mod transport;

pub use handler::{ToolContext, ToolHandler, ToolRegistry};
pub use protocol::*;
pub use server::McpServer;
pub use transport::{StdioTransport, StreamTransport, Transport};
