//! Yardstick MCP client.
//!
//! Connects to an MCP server, runs one action and prints its result.

use clap::Parser;
use std::process::ExitCode;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use yardstick::client::{actions, ClientArgs, ClientConfig, McpClient};
use yardstick::config::normalize_flags;
use yardstick::error::{Error, Result};

#[tokio::main]
async fn main() -> ExitCode {
    let args = ClientArgs::parse_from(normalize_flags(std::env::args_os())).with_env();

    let subscriber = FmtSubscriber::builder()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .finish();

    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to set tracing subscriber: {}", e);
    }

    match run(args).await {
        Ok(output) => {
            print!("{}", output);
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(args: ClientArgs) -> Result<String> {
    let config = ClientConfig::try_from(args)?;
    let timeout = config.timeout;

    let session = async {
        let client = McpClient::connect(&config).await?;
        let output = actions::run(&client, &config.action).await;
        let closed = client.close().await;
        let output = output?;
        closed?;
        Ok::<_, Error>(output)
    };

    tokio::time::timeout(timeout, session)
        .await
        .map_err(|_| Error::Timeout(timeout))?
}
