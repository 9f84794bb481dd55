//! Client actions and their console output.

use serde_json::Value;
use std::fmt::Write as _;
use tracing::debug;

use super::config::Action;
use super::McpClient;
use crate::error::Result;
use crate::mcp::protocol::{Resource, Tool};

/// Run `action` against a connected client, returning the text to print.
pub async fn run(client: &McpClient, action: &Action) -> Result<String> {
    match action {
        Action::Info => server_info(client).await,
        Action::ListTools => Ok(format_tools(&client.list_tools().await?)),
        Action::ListResources => Ok(format_resources(&client.list_resources().await?)),
        Action::CallTool { tool, arguments } => {
            let result = client.call_tool(tool, arguments.clone()).await?;
            let content = result.get("content").unwrap_or(&Value::Null);
            Ok(format!("{}\n", serde_json::to_string(content)?))
        }
    }
}

/// Ping, then report what the server offers. The counts are best effort.
async fn server_info(client: &McpClient) -> Result<String> {
    client.ping().await?;

    let mut out = String::new();
    let _ = writeln!(out, "Server Info:");
    let _ = writeln!(out, "  Session ID: {}", client.session_id());
    let _ = writeln!(out, "  Connection: Active");

    match client.list_tools().await {
        Ok(tools) => {
            let _ = writeln!(out, "  Tools Available: {}", tools.len());
        }
        Err(e) => debug!("Tool listing failed: {}", e),
    }
    match client.list_resources().await {
        Ok(resources) => {
            let _ = writeln!(out, "  Resources Available: {}", resources.len());
        }
        Err(e) => debug!("Resource listing failed: {}", e),
    }

    Ok(out)
}

pub fn format_tools(tools: &[Tool]) -> String {
    let mut out = format!("Available tools ({}):\n", tools.len());
    for tool in tools {
        let _ = writeln!(out, "  - {}: {}", tool.name, tool.description);
    }
    out
}

pub fn format_resources(resources: &[Resource]) -> String {
    let mut out = format!("Available resources ({}):\n", resources.len());
    for resource in resources {
        let _ = writeln!(
            out,
            "  - {} ({}): {}",
            resource.name,
            resource.uri,
            resource.description.as_deref().unwrap_or_default()
        );
    }
    out
}
