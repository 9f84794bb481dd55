//! Yardstick echo server.
//!
//! Serves the deterministic `echo` tool over stdio, SSE or streamable HTTP.

use clap::Parser;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use yardstick::config::{normalize_flags, Args, Config, Transport};
use yardstick::error::{Error, Result};
use yardstick::mcp::handler::ToolRegistry;
use yardstick::mcp::server::McpServer;
use yardstick::mcp::transport::StdioTransport;
use yardstick::{http, tools, SERVER_NAME, VERSION};

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse_from(normalize_flags(std::env::args_os())).with_env();

    // stdout carries the stdio protocol, so logs always go to stderr.
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .finish();

    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to set tracing subscriber: {}", e);
    }

    let config = match Config::try_from(args) {
        Ok(config) => config,
        Err(Error::UnsupportedTransport(name)) => {
            eprintln!("Unknown transport type: {}", name);
            eprintln!("Supported transports: stdio, sse, streamable-http");
            return ExitCode::FAILURE;
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            return ExitCode::FAILURE;
        }
    };

    match run(config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("Server error: {}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(config: Config) -> Result<()> {
    info!("Yardstick echo server v{}", VERSION);
    info!("Transport: {}", config.transport);

    let mut registry = ToolRegistry::new();
    tools::register_all_tools(&mut registry);
    info!("Registered {} MCP tools", registry.tool_count());

    let server = Arc::new(McpServer::new(registry, SERVER_NAME));

    match config.transport {
        Transport::Stdio => {
            info!("Starting stdio transport...");
            server.run(StdioTransport::stdio()).await
        }
        Transport::Sse | Transport::StreamableHttp => {
            info!("Starting {} transport on port {}...", config.transport, config.port);
            http::start_server(&config, server).await
        }
    }
}
