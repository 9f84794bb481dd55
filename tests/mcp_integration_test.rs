//! MCP Server Integration Tests
//!
//! These tests spawn the server and client binaries and talk JSON-RPC over
//! stdio, the way a real MCP host would.

#![allow(deprecated)] // Allow deprecated cargo_bin for now

use assert_cmd::cargo::{cargo_bin, CommandCargoExt};
use assert_cmd::Command as AssertCommand;
use predicates::prelude::*;
use serde_json::{json, Value};
use std::io::{BufRead, BufReader, Write};
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};

/// MCP Test Client that communicates with the server via stdio
struct McpTestClient {
    child: Child,
    stdin: Option<ChildStdin>,
    stdout: BufReader<ChildStdout>,
    request_id: i64,
}

impl McpTestClient {
    /// Spawn a new MCP server and connect to it
    fn spawn() -> Result<Self, Box<dyn std::error::Error>> {
        let mut child = Command::cargo_bin("yardstick-server")?
            .arg("--transport")
            .arg("stdio")
            .env_remove("MCP_TRANSPORT")
            .env_remove("TRANSPORT")
            .env("RUST_LOG", "warn")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()?;

        let stdin = child.stdin.take().expect("Failed to get stdin");
        let stdout = BufReader::new(child.stdout.take().expect("Failed to get stdout"));

        Ok(Self {
            child,
            stdin: Some(stdin),
            stdout,
            request_id: 0,
        })
    }

    fn send(&mut self, message: &Value) -> Result<(), Box<dyn std::error::Error>> {
        let stdin = self.stdin.as_mut().ok_or("stdin closed")?;
        writeln!(stdin, "{}", serde_json::to_string(message)?)?;
        stdin.flush()?;
        Ok(())
    }

    fn read_message(&mut self) -> Result<Value, Box<dyn std::error::Error>> {
        let mut line = String::new();
        self.stdout.read_line(&mut line)?;
        Ok(serde_json::from_str(&line)?)
    }

    /// Send a JSON-RPC request and get the response
    fn request(&mut self, method: &str, params: Value) -> Result<Value, Box<dyn std::error::Error>> {
        self.request_id += 1;
        let request = json!({
            "jsonrpc": "2.0",
            "id": self.request_id,
            "method": method,
            "params": params
        });
        self.send(&request)?;
        self.read_message()
    }

    fn notify(&mut self, method: &str) -> Result<(), Box<dyn std::error::Error>> {
        self.send(&json!({ "jsonrpc": "2.0", "method": method }))
    }

    fn initialize(&mut self) -> Result<Value, Box<dyn std::error::Error>> {
        let response = self.request(
            "initialize",
            json!({
                "protocolVersion": "2024-11-05",
                "capabilities": {},
                "clientInfo": { "name": "test-client", "version": "1.0.0" }
            }),
        )?;
        self.notify("notifications/initialized")?;
        Ok(response)
    }

    fn call_tool(&mut self, params: Value) -> Result<Value, Box<dyn std::error::Error>> {
        self.request("tools/call", params)
    }

    /// Close stdin and wait for the server to exit.
    fn shutdown(mut self) -> std::process::ExitStatus {
        drop(self.stdin.take());
        self.child.wait().expect("server did not exit")
    }
}

impl Drop for McpTestClient {
    fn drop(&mut self) {
        let _ = self.child.kill();
    }
}

fn server_path() -> String {
    cargo_bin("yardstick-server").display().to_string()
}

fn client_command() -> AssertCommand {
    let mut cmd = AssertCommand::cargo_bin("yardstick-client").unwrap();
    cmd.env_remove("TRANSPORT")
        .env_remove("MCP_TRANSPORT")
        .env_remove("COMMAND")
        .env_remove("ADDRESS")
        .env_remove("PORT");
    cmd
}

// ============================================================================
// Server binary
// ============================================================================

#[test]
fn test_binary_help() {
    AssertCommand::cargo_bin("yardstick-server")
        .unwrap()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("MCP echo server"));
}

#[test]
fn test_binary_version() {
    AssertCommand::cargo_bin("yardstick-server")
        .unwrap()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("yardstick-server"));
}

#[test]
fn test_unknown_transport_exits_with_error() {
    AssertCommand::cargo_bin("yardstick-server")
        .unwrap()
        .args(["-transport", "carrier-pigeon"])
        .env_remove("MCP_TRANSPORT")
        .env_remove("TRANSPORT")
        .assert()
        .code(1)
        .stderr(predicate::str::contains("Unknown transport type: carrier-pigeon"))
        .stderr(predicate::str::contains(
            "Supported transports: stdio, sse, streamable-http",
        ));
}

#[test]
fn test_env_transport_is_validated() {
    AssertCommand::cargo_bin("yardstick-server")
        .unwrap()
        .env("MCP_TRANSPORT", "bogus")
        .assert()
        .code(1)
        .stderr(predicate::str::contains("Unknown transport type: bogus"));
}

#[test]
fn test_env_transport_overrides_flag() {
    AssertCommand::cargo_bin("yardstick-server")
        .unwrap()
        .args(["--transport", "stdio"])
        .env("MCP_TRANSPORT", "bogus")
        .assert()
        .code(1)
        .stderr(predicate::str::contains("Unknown transport type: bogus"));
}

#[test]
fn test_mcp_initialize() {
    let mut client = McpTestClient::spawn().expect("Failed to spawn MCP server");

    let response = client.initialize().expect("Failed to initialize");
    let result = &response["result"];
    assert_eq!(result["protocolVersion"], "2024-11-05");
    assert_eq!(result["serverInfo"]["name"], "echo-server");
    assert_eq!(result["serverInfo"]["version"], "1.0.0");
    assert!(result["capabilities"].get("tools").is_some());

    assert!(client.shutdown().success());
}

#[test]
fn test_mcp_list_tools() {
    let mut client = McpTestClient::spawn().expect("Failed to spawn MCP server");
    client.initialize().expect("Failed to initialize");

    let response = client.request("tools/list", json!({})).expect("Failed to list tools");
    let tools = response["result"]["tools"].as_array().expect("tools should be array");
    assert_eq!(tools.len(), 1);
    assert_eq!(tools[0]["name"], "echo");
    assert_eq!(
        tools[0]["inputSchema"]["properties"]["input"]["pattern"],
        "^[a-zA-Z0-9]+$"
    );
}

#[test]
fn test_mcp_echo_roundtrip() {
    let mut client = McpTestClient::spawn().expect("Failed to spawn MCP server");
    client.initialize().expect("Failed to initialize");

    let response = client
        .call_tool(json!({ "name": "echo", "arguments": { "input": "test123" } }))
        .expect("Failed to call echo");
    let result = &response["result"];
    assert_eq!(result["isError"], false);
    assert_eq!(result["structuredContent"], json!({ "output": "test123" }));
    assert_eq!(result["content"][0]["text"], "{\"output\":\"test123\"}");
    assert!(result.get("_meta").is_none());
}

#[test]
fn test_mcp_echo_invalid_input_is_flagged() {
    let mut client = McpTestClient::spawn().expect("Failed to spawn MCP server");
    client.initialize().expect("Failed to initialize");

    for input in ["test@123", "hello world", ""] {
        let response = client
            .call_tool(json!({ "name": "echo", "arguments": { "input": input } }))
            .expect("Failed to call echo");
        assert!(response.get("error").is_none(), "input {:?}", input);
        assert_eq!(response["result"]["isError"], true);
        assert_eq!(
            response["result"]["content"][0]["text"],
            "input must be alphanumeric only"
        );
    }
}

#[test]
fn test_mcp_echo_returns_metadata() {
    let mut client = McpTestClient::spawn().expect("Failed to spawn MCP server");
    client.initialize().expect("Failed to initialize");

    let meta = json!({ "progressToken": "task123", "customKey": "customValue" });
    let response = client
        .call_tool(json!({
            "name": "echo",
            "arguments": { "input": "hello" },
            "_meta": meta
        }))
        .expect("Failed to call echo");
    assert_eq!(response["result"]["_meta"], meta);
    assert_eq!(response["result"]["structuredContent"]["output"], "hello");
}

#[test]
fn test_mcp_protocol_errors() {
    let mut client = McpTestClient::spawn().expect("Failed to spawn MCP server");
    client.initialize().expect("Failed to initialize");

    let response = client
        .call_tool(json!({ "name": "nonexistent_tool", "arguments": {} }))
        .expect("Failed to call tool");
    assert_eq!(response["error"]["code"], -32602);

    let response = client
        .call_tool(json!({ "name": "echo", "arguments": { "input": 42 } }))
        .expect("Failed to call tool");
    assert_eq!(response["error"]["code"], -32602);

    let response = client.request("prompts/list", json!({})).expect("Failed to send");
    assert_eq!(response["error"]["code"], -32601);
}

#[test]
fn test_mcp_list_resources_and_ping() {
    let mut client = McpTestClient::spawn().expect("Failed to spawn MCP server");
    client.initialize().expect("Failed to initialize");

    let response = client.request("resources/list", json!({})).expect("Failed to list");
    assert_eq!(response["result"]["resources"], json!([]));

    let response = client.request("ping", json!({})).expect("Failed to ping");
    assert_eq!(response["result"], json!({}));
}

#[test]
fn test_server_survives_garbage_lines() {
    let mut client = McpTestClient::spawn().expect("Failed to spawn MCP server");
    {
        let stdin = client.stdin.as_mut().unwrap();
        writeln!(stdin, "this is not json").unwrap();
        stdin.flush().unwrap();
    }

    let response = client.initialize().expect("Failed to initialize");
    assert_eq!(response["id"], 1);
    assert!(client.shutdown().success());
}

// ============================================================================
// Client binary against the server binary
// ============================================================================

#[test]
fn test_client_call_tool_over_stdio() {
    client_command()
        .args([
            "-transport",
            "stdio",
            "-command",
            &server_path(),
            "-action",
            "call-tool",
            "-tool",
            "echo",
            "-args",
            r#"{"input":"test123"}"#,
        ])
        .assert()
        .success()
        .stdout("[{\"type\":\"text\",\"text\":\"{\\\"output\\\":\\\"test123\\\"}\"}]\n");
}

#[test]
fn test_client_info_over_stdio() {
    client_command()
        .args(["-command", &server_path(), "-action", "info"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Server Info:"))
        .stdout(predicate::str::contains("  Connection: Active"))
        .stdout(predicate::str::contains("  Tools Available: 1"))
        .stdout(predicate::str::contains("  Resources Available: 0"));
}

#[test]
fn test_client_list_tools_over_stdio() {
    client_command()
        .args(["-command", &server_path(), "-action", "list-tools"])
        .assert()
        .success()
        .stdout(predicate::str::starts_with("Available tools (1):\n  - echo: "));
}

#[test]
fn test_client_requires_command_for_stdio() {
    client_command()
        .args(["-transport", "stdio"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("command is required for stdio transport"));
}

#[test]
fn test_client_rejects_malformed_args_before_connecting() {
    client_command()
        .args([
            "-transport",
            "sse",
            "-port",
            "1",
            "-action",
            "call-tool",
            "-tool",
            "echo",
            "-args",
            "{not json",
        ])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Failed to parse tool arguments"));
}

#[test]
fn test_client_requires_tool_name() {
    client_command()
        .args(["-command", &server_path(), "-action", "call-tool"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Tool name is required for call-tool action"));
}

#[test]
fn test_client_env_transport_overrides_flag() {
    client_command()
        .args(["-transport", "stdio", "-command", &server_path()])
        .env("TRANSPORT", "carrier-pigeon")
        .assert()
        .failure()
        .stderr(predicate::str::contains("unsupported transport type: carrier-pigeon"));
}

#[test]
fn test_client_unknown_transport() {
    client_command()
        .args(["-transport", "carrier-pigeon"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("unsupported transport type: carrier-pigeon"));
}
