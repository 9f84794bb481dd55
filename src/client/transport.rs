//! Client-side transports.

use async_trait::async_trait;
use dashmap::DashMap;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::mcp::protocol::{JsonRpcMessage, JsonRpcNotification, JsonRpcRequest, JsonRpcResponse, RequestId};
use crate::mcp::transport::{StreamTransport, Transport};

/// How long a child gets to exit on its own after its stdin is closed.
const CHILD_EXIT_GRACE: Duration = Duration::from_secs(2);

/// A connection to an MCP server, seen from the client.
#[async_trait]
pub trait ClientTransport: Send + Sync {
    /// Send a request and wait for its response.
    async fn request(&self, request: JsonRpcRequest) -> Result<JsonRpcResponse>;

    /// Send a notification.
    async fn notify(&self, notification: JsonRpcNotification) -> Result<()>;

    /// Session id assigned by the server, if the transport has one.
    fn session_id(&self) -> Option<String>;

    /// Release the connection.
    async fn close(&self) -> Result<()>;
}

/// Requests awaiting a response, keyed by id.
#[derive(Clone, Default)]
pub(crate) struct PendingRequests {
    inner: Arc<DashMap<RequestId, oneshot::Sender<JsonRpcResponse>>>,
}

impl PendingRequests {
    pub(crate) fn register(&self, id: RequestId) -> oneshot::Receiver<JsonRpcResponse> {
        let (tx, rx) = oneshot::channel();
        self.inner.insert(id, tx);
        rx
    }

    /// Hand a response to its waiter. Returns false for unknown ids.
    pub(crate) fn resolve(&self, response: JsonRpcResponse) -> bool {
        match self.inner.remove(&response.id) {
            Some((_, tx)) => tx.send(response).is_ok(),
            None => false,
        }
    }

    pub(crate) fn forget(&self, id: &RequestId) {
        self.inner.remove(id);
    }

    /// Fail every waiter; used when the connection goes away.
    pub(crate) fn clear(&self) {
        self.inner.clear();
    }

    pub(crate) async fn wait(
        &self,
        id: RequestId,
        rx: oneshot::Receiver<JsonRpcResponse>,
    ) -> Result<JsonRpcResponse> {
        match rx.await {
            Ok(response) => Ok(response),
            Err(_) => {
                self.forget(&id);
                Err(Error::Transport(
                    "connection closed before the response arrived".to_string(),
                ))
            }
        }
    }
}

/// Route inbound messages to their waiters until the stream ends.
pub(crate) fn dispatch(message: JsonRpcMessage, pending: &PendingRequests) {
    match message {
        JsonRpcMessage::Response(response) => {
            let id = response.id.clone();
            if !pending.resolve(response) {
                debug!("Dropping response for unknown request {:?}", id);
            }
        }
        JsonRpcMessage::Request(req) => {
            warn!("Ignoring server-initiated request: {}", req.method);
        }
        JsonRpcMessage::Notification(notif) => {
            debug!("Server notification: {}", notif.method);
        }
    }
}

/// Runs the server as a child process and talks to it over its stdio.
pub struct ChildProcessTransport {
    child: Mutex<Child>,
    transport: Mutex<StreamTransport<ChildStdout, ChildStdin>>,
    outgoing: Mutex<Option<mpsc::Sender<JsonRpcMessage>>>,
    pending: PendingRequests,
    dispatcher: JoinHandle<()>,
}

impl ChildProcessTransport {
    /// Spawn `command args...` and start talking JSON-RPC over its pipes.
    pub async fn spawn(command: Option<&str>, args: &[String]) -> Result<Self> {
        let command = command
            .filter(|c| !c.is_empty())
            .ok_or_else(|| Error::Config("command is required for stdio transport".to_string()))?;

        info!("Spawning MCP server: {} {:?}", command, args);
        let mut child = Command::new(command)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| Error::Transport(format!("failed to start {}: {}", command, e)))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| Error::Transport("child stdin unavailable".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| Error::Transport("child stdout unavailable".to_string()))?;

        let mut transport = StreamTransport::new(stdout, stdin);
        let (mut incoming, outgoing) = transport.start().await?;

        let pending = PendingRequests::default();
        let dispatcher = {
            let pending = pending.clone();
            tokio::spawn(async move {
                while let Some(msg) = incoming.recv().await {
                    dispatch(msg, &pending);
                }
                debug!("Child process output closed");
                pending.clear();
            })
        };

        Ok(Self {
            child: Mutex::new(child),
            transport: Mutex::new(transport),
            outgoing: Mutex::new(Some(outgoing)),
            pending,
            dispatcher,
        })
    }

    async fn send(&self, msg: JsonRpcMessage) -> Result<()> {
        let sender = self
            .outgoing
            .lock()
            .await
            .clone()
            .ok_or_else(|| Error::Transport("transport is closed".to_string()))?;
        sender
            .send(msg)
            .await
            .map_err(|_| Error::Transport("child process stopped reading".to_string()))
    }
}

#[async_trait]
impl ClientTransport for ChildProcessTransport {
    async fn request(&self, request: JsonRpcRequest) -> Result<JsonRpcResponse> {
        let id = request.id.clone();
        let rx = self.pending.register(id.clone());
        if let Err(e) = self.send(JsonRpcMessage::Request(request)).await {
            self.pending.forget(&id);
            return Err(e);
        }
        self.pending.wait(id, rx).await
    }

    async fn notify(&self, notification: JsonRpcNotification) -> Result<()> {
        self.send(JsonRpcMessage::Notification(notification)).await
    }

    fn session_id(&self) -> Option<String> {
        None
    }

    async fn close(&self) -> Result<()> {
        // Dropping the last sender lets the writer close the child's stdin.
        self.outgoing.lock().await.take();
        self.transport.lock().await.stop().await?;
        self.dispatcher.abort();

        let mut child = self.child.lock().await;
        let exited = tokio::time::timeout(CHILD_EXIT_GRACE, child.wait()).await;
        match exited {
            Ok(status) => {
                debug!("MCP server exited: {:?}", status?);
            }
            Err(_) => {
                warn!("MCP server did not exit after stdin closed, killing it");
                child.kill().await?;
            }
        }
        Ok(())
    }
}

impl Drop for ChildProcessTransport {
    fn drop(&mut self) {
        self.dispatcher.abort();
    }
}
