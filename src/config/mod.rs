//! Configuration management for the echo server.

use clap::Parser;
use serde::{Deserialize, Serialize};
use std::ffi::OsString;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::error::{Error, Result};

/// Command-line arguments for the echo server.
///
/// Environment variables override flags; see [`Args::with_env`].
#[derive(Parser, Debug, Clone)]
#[command(name = "yardstick-server")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Deterministic MCP echo server for conformance testing")]
pub struct Args {
    /// Transport type: stdio, sse, or streamable-http [env: MCP_TRANSPORT, TRANSPORT]
    #[arg(long)]
    pub transport: Option<String>,

    /// Port number for HTTP-based transports [env: PORT]
    #[arg(long, default_value = "8080")]
    pub port: u16,

    /// Header that must be present on HTTP requests, empty disables auth [env: AUTH_HEADER]
    #[arg(long, default_value = "")]
    pub auth_header: String,

    /// Expected value of the auth header [env: AUTH_VALUE]
    #[arg(long, default_value = "")]
    pub auth_value: String,
}

impl Args {
    /// Apply overrides from the process environment.
    pub fn with_env(self) -> Self {
        self.apply_env(|key| std::env::var(key).ok())
    }

    /// Apply overrides from `lookup`. A set variable wins over the flag;
    /// `MCP_TRANSPORT` wins over `TRANSPORT`. A non-numeric `PORT` is ignored.
    pub fn apply_env<F>(mut self, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(transport) = lookup("MCP_TRANSPORT").or_else(|| lookup("TRANSPORT")) {
            self.transport = Some(transport);
        }
        if let Some(port) = lookup("PORT").and_then(|p| p.trim().parse().ok()) {
            self.port = port;
        }
        if let Some(header) = lookup("AUTH_HEADER") {
            self.auth_header = header;
        }
        if let Some(value) = lookup("AUTH_VALUE") {
            self.auth_value = value;
        }
        self
    }
}

/// Transport mode.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Transport {
    #[default]
    Stdio,
    Sse,
    StreamableHttp,
}

impl Transport {
    pub fn as_str(&self) -> &'static str {
        match self {
            Transport::Stdio => "stdio",
            Transport::Sse => "sse",
            Transport::StreamableHttp => "streamable-http",
        }
    }
}

impl fmt::Display for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Transport {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "stdio" => Ok(Transport::Stdio),
            "sse" => Ok(Transport::Sse),
            "streamable-http" => Ok(Transport::StreamableHttp),
            other => Err(Error::UnsupportedTransport(other.to_string())),
        }
    }
}

/// HTTP server timeouts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HttpTimeouts {
    /// Upper bound on receiving a request body
    pub read: Duration,
    /// Upper bound on a handler producing its response
    pub write: Duration,
    /// How long a keep-alive connection may wait for the next request header
    pub idle: Duration,
    /// Streamable-HTTP sessions unused for this long are evicted
    pub session_idle: Duration,
    /// How often idle sessions are swept
    pub session_sweep: Duration,
}

impl Default for HttpTimeouts {
    fn default() -> Self {
        Self {
            read: Duration::from_secs(30),
            write: Duration::from_secs(30),
            idle: Duration::from_secs(60),
            session_idle: Duration::from_secs(1800),
            session_sweep: Duration::from_secs(300),
        }
    }
}

/// Server configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Transport mode
    pub transport: Transport,
    /// HTTP port
    pub port: u16,
    /// Auth header name; empty disables the gate
    pub auth_header: String,
    /// Expected auth header value
    pub auth_value: String,
    /// HTTP timeouts
    pub timeouts: HttpTimeouts,
}

impl TryFrom<Args> for Config {
    type Error = Error;

    fn try_from(args: Args) -> Result<Self> {
        let transport = match args.transport {
            Some(name) => name.parse()?,
            None => Transport::default(),
        };

        Ok(Self {
            transport,
            port: args.port,
            auth_header: args.auth_header,
            auth_value: args.auth_value,
            timeouts: HttpTimeouts::default(),
        })
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            transport: Transport::Stdio,
            port: 8080,
            auth_header: String::new(),
            auth_value: String::new(),
            timeouts: HttpTimeouts::default(),
        }
    }
}

/// Boolean flags that never take a value.
const SWITCHES: &[&str] = &["help", "version", "h", "V"];

/// Rewrite Go-style single-dash long flags (`-transport sse`) into the
/// `--transport sse` form clap expects.
///
/// Everything after the first positional argument is passed through
/// untouched behind a `--` separator, so subprocess arguments such as
/// `-v` are never mistaken for flags.
pub fn normalize_flags<I, T>(args: I) -> Vec<OsString>
where
    I: IntoIterator<Item = T>,
    T: Into<OsString>,
{
    let mut iter = args.into_iter().map(Into::into);
    let mut out: Vec<OsString> = iter.next().into_iter().collect();

    while let Some(arg) = iter.next() {
        let Some(text) = arg.to_str().map(str::to_owned) else {
            out.push("--".into());
            out.push(arg);
            break;
        };

        if text == "--" {
            out.push(arg);
            break;
        }

        let Some(flag) = text.strip_prefix("--").or_else(|| text.strip_prefix('-')) else {
            out.push("--".into());
            out.push(arg);
            break;
        };
        if flag.is_empty() {
            out.push(arg);
            continue;
        }

        let name = flag.split('=').next().unwrap_or_default();
        let rewritten = if name.len() == 1 && !flag.contains('=') {
            format!("-{}", flag)
        } else {
            format!("--{}", flag)
        };
        out.push(rewritten.into());

        if !flag.contains('=') && !SWITCHES.contains(&name) {
            if let Some(value) = iter.next() {
                out.push(value);
            }
        }
    }

    out.extend(iter);
    out
}
