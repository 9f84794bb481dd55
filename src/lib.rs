//! Yardstick - deterministic MCP echo server and companion client.
//!
//! The server exposes a single `echo` tool over stdio, SSE or streamable
//! HTTP and is meant as a fixed point for exercising MCP clients, proxies
//! and gateways. The client drives any MCP server over the same transports.
//!
//! # Architecture
//!
//! 1. **MCP Layer** (`mcp`) - Protocol types, server dispatch, stdio framing
//! 2. **Tools Layer** (`tools`) - The `echo` tool and its validator
//! 3. **HTTP Layer** (`http`) - SSE and streamable-HTTP endpoints behind an optional auth gate
//! 4. **Client** (`client`) - Connector, client transports and actions

pub mod client;
pub mod config;
pub mod error;
pub mod http;
pub mod mcp;
pub mod metrics;
pub mod tools;

pub use error::{Error, Result};

/// Crate version, reported in `serverInfo` and `clientInfo`.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Name the server reports in `initialize`.
pub const SERVER_NAME: &str = "echo-server";
