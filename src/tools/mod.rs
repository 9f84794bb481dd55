//! MCP tool implementations.
//!
//! The server exposes a single tool, `echo`.

pub mod echo;

use crate::mcp::handler::ToolRegistry;

/// Register all tools with the registry.
pub fn register_all_tools(registry: &mut ToolRegistry) {
    registry.register(echo::EchoTool::new());
}
