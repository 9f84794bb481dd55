//! Configuration for the companion client.

use clap::Parser;
use serde_json::{Map, Value};
use std::time::Duration;

use crate::config::Transport;
use crate::error::{Error, Result};

/// Command-line arguments for the client.
///
/// Environment variables override flags; see [`ClientArgs::with_env`].
#[derive(Parser, Debug, Clone)]
#[command(name = "yardstick-client")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "MCP client for exercising the echo server over any transport")]
pub struct ClientArgs {
    /// Transport type: stdio, sse, or streamable-http [env: TRANSPORT]
    #[arg(long, default_value = "stdio")]
    pub transport: String,

    /// Server address for HTTP-based transports [env: ADDRESS]
    #[arg(long, default_value = "localhost")]
    pub address: String,

    /// Server port for HTTP-based transports [env: PORT]
    #[arg(long, default_value = "8080")]
    pub port: u16,

    /// Command to run for stdio transport [env: COMMAND]
    #[arg(long)]
    pub command: Option<String>,

    /// Timeout bounding connect and the action, e.g. 30s, 1m, 500ms
    #[arg(long, default_value = "30s", value_parser = parse_duration)]
    pub timeout: Duration,

    /// Action to perform: info, list-tools, list-resources, call-tool
    #[arg(long, default_value = "info")]
    pub action: String,

    /// Tool name to call (for call-tool action)
    #[arg(long)]
    pub tool: Option<String>,

    /// Tool arguments as JSON (for call-tool action)
    #[arg(long, default_value = "{}")]
    pub args: String,

    /// Arguments passed to the stdio server command
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    pub command_args: Vec<String>,
}

impl ClientArgs {
    /// Apply overrides from the process environment.
    pub fn with_env(self) -> Self {
        self.apply_env(|key| std::env::var(key).ok())
    }

    /// Apply overrides from `lookup`. A set variable wins over the flag; a
    /// non-numeric `PORT` is ignored.
    pub fn apply_env<F>(mut self, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(transport) = lookup("TRANSPORT") {
            self.transport = transport;
        }
        if let Some(address) = lookup("ADDRESS") {
            self.address = address;
        }
        if let Some(port) = lookup("PORT").and_then(|p| p.trim().parse().ok()) {
            self.port = port;
        }
        if let Some(command) = lookup("COMMAND") {
            self.command = Some(command);
        }
        self
    }
}

/// What the client does once connected.
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    Info,
    ListTools,
    ListResources,
    CallTool {
        tool: String,
        arguments: Map<String, Value>,
    },
}

impl Action {
    /// Resolve the action and, for `call-tool`, validate its inputs before
    /// any connection is made.
    pub fn parse(action: &str, tool: Option<&str>, args: &str) -> Result<Self> {
        match action {
            "info" => Ok(Action::Info),
            "list-tools" => Ok(Action::ListTools),
            "list-resources" => Ok(Action::ListResources),
            "call-tool" => {
                let tool = tool
                    .filter(|t| !t.is_empty())
                    .ok_or_else(|| {
                        Error::Config("Tool name is required for call-tool action".to_string())
                    })?
                    .to_string();

                let arguments = match serde_json::from_str::<Value>(args) {
                    Ok(Value::Object(map)) => map,
                    Ok(_) => {
                        return Err(Error::Config(
                            "Failed to parse tool arguments: expected a JSON object".to_string(),
                        ))
                    }
                    Err(e) => {
                        return Err(Error::Config(format!(
                            "Failed to parse tool arguments: {}",
                            e
                        )))
                    }
                };

                Ok(Action::CallTool { tool, arguments })
            }
            other => Err(Error::Config(format!("Unknown action: {}", other))),
        }
    }
}

/// Resolved client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub transport: Transport,
    pub address: String,
    pub port: u16,
    pub command: Option<String>,
    pub command_args: Vec<String>,
    pub timeout: Duration,
    pub action: Action,
}

impl ClientConfig {
    /// URL of the server endpoint for HTTP transports.
    pub fn url(&self) -> String {
        let path = match self.transport {
            Transport::Sse => crate::http::SSE_PATH,
            _ => crate::http::MCP_PATH,
        };
        format!("http://{}:{}{}", self.address, self.port, path)
    }
}

impl TryFrom<ClientArgs> for ClientConfig {
    type Error = Error;

    fn try_from(args: ClientArgs) -> Result<Self> {
        let transport = args.transport.parse()?;
        let action = Action::parse(&args.action, args.tool.as_deref(), &args.args)?;

        Ok(Self {
            transport,
            address: args.address,
            port: args.port,
            command: args.command.filter(|c| !c.is_empty()),
            command_args: args.command_args,
            timeout: args.timeout,
            action,
        })
    }
}

/// Parse a duration such as `30s`, `1m30s`, `500ms` or `2h`.
pub fn parse_duration(s: &str) -> std::result::Result<Duration, String> {
    let input = s.trim();
    if input.is_empty() {
        return Err("empty duration".to_string());
    }

    let mut total = Duration::ZERO;
    let mut rest = input;
    while !rest.is_empty() {
        let digits = rest
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .ok_or_else(|| format!("missing unit in duration {:?}", input))?;
        if digits == 0 {
            return Err(format!("invalid duration {:?}", input));
        }
        let value: f64 = rest[..digits]
            .parse()
            .map_err(|_| format!("invalid number in duration {:?}", input))?;

        let unit_len = rest[digits..]
            .find(|c: char| c.is_ascii_digit() || c == '.')
            .unwrap_or(rest.len() - digits);
        let unit = &rest[digits..digits + unit_len];

        let seconds = match unit {
            "ns" => value / 1e9,
            "us" | "µs" => value / 1e6,
            "ms" => value / 1e3,
            "s" => value,
            "m" => value * 60.0,
            "h" => value * 3600.0,
            other => return Err(format!("unknown unit {:?} in duration {:?}", other, input)),
        };
        let part = Duration::try_from_secs_f64(seconds)
            .map_err(|e| format!("duration {:?} out of range: {}", input, e))?;
        total = total
            .checked_add(part)
            .ok_or_else(|| format!("duration {:?} out of range", input))?;
        rest = &rest[digits + unit_len..];
    }

    Ok(total)
}
