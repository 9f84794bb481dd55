//! Newline-delimited JSON-RPC framing over a byte stream.
//!
//! The server uses it over its own stdin/stdout; the client uses the same
//! framing over a child process's pipes.

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader, Stdin, Stdout};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, trace};

use crate::error::{Error, Result};
use crate::mcp::protocol::JsonRpcMessage;

/// Channel capacity for each direction.
const CHANNEL_CAPACITY: usize = 100;

/// Transport trait for MCP communication.
#[async_trait]
pub trait Transport: Send {
    /// Start the transport, returning channels for messages.
    async fn start(
        &mut self,
    ) -> Result<(mpsc::Receiver<JsonRpcMessage>, mpsc::Sender<JsonRpcMessage>)>;

    /// Stop the transport, flushing anything already queued for writing.
    async fn stop(&mut self) -> Result<()>;
}

/// Line-framed transport over any reader/writer pair.
pub struct StreamTransport<R, W> {
    reader: Option<R>,
    writer: Option<W>,
    reader_task: Option<JoinHandle<()>>,
    writer_task: Option<JoinHandle<()>>,
}

/// Stdio transport for MCP.
pub type StdioTransport = StreamTransport<Stdin, Stdout>;

impl StdioTransport {
    /// Transport over the process's own stdin/stdout.
    pub fn stdio() -> Self {
        Self::new(tokio::io::stdin(), tokio::io::stdout())
    }
}

impl<R, W> StreamTransport<R, W>
where
    R: AsyncRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
{
    pub fn new(reader: R, writer: W) -> Self {
        Self {
            reader: Some(reader),
            writer: Some(writer),
            reader_task: None,
            writer_task: None,
        }
    }
}

#[async_trait]
impl<R, W> Transport for StreamTransport<R, W>
where
    R: AsyncRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
{
    async fn start(
        &mut self,
    ) -> Result<(mpsc::Receiver<JsonRpcMessage>, mpsc::Sender<JsonRpcMessage>)> {
        let (reader, mut writer) = match (self.reader.take(), self.writer.take()) {
            (Some(r), Some(w)) => (r, w),
            _ => return Err(Error::Transport("transport already started".to_string())),
        };

        let (incoming_tx, incoming_rx) = mpsc::channel::<JsonRpcMessage>(CHANNEL_CAPACITY);
        let (outgoing_tx, mut outgoing_rx) = mpsc::channel::<JsonRpcMessage>(CHANNEL_CAPACITY);

        self.reader_task = Some(tokio::spawn(async move {
            let mut reader = BufReader::new(reader);
            let mut line = String::new();

            loop {
                line.clear();
                match reader.read_line(&mut line).await {
                    Ok(0) => {
                        debug!("EOF on input stream, stopping transport");
                        break;
                    }
                    Ok(_) => {
                        let trimmed = line.trim();
                        if trimmed.is_empty() {
                            continue;
                        }

                        trace!("Received: {}", trimmed);

                        match serde_json::from_str::<JsonRpcMessage>(trimmed) {
                            Ok(msg) => {
                                if incoming_tx.send(msg).await.is_err() {
                                    break;
                                }
                            }
                            Err(e) => error!("Failed to parse message: {} ({})", trimmed, e),
                        }
                    }
                    Err(e) => {
                        error!("Error reading input stream: {}", e);
                        break;
                    }
                }
            }
        }));

        self.writer_task = Some(tokio::spawn(async move {
            while let Some(msg) = outgoing_rx.recv().await {
                let mut frame = match serde_json::to_vec(&msg) {
                    Ok(bytes) => bytes,
                    Err(e) => {
                        error!("Error serializing message: {}", e);
                        continue;
                    }
                };
                frame.push(b'\n');

                trace!("Sending: {}", String::from_utf8_lossy(&frame).trim_end());
                if let Err(e) = writer.write_all(&frame).await {
                    error!("Error writing frame: {}", e);
                    break;
                }
                if let Err(e) = writer.flush().await {
                    error!("Error flushing output stream: {}", e);
                    break;
                }
            }
            let _ = writer.shutdown().await;
        }));

        Ok((incoming_rx, outgoing_tx))
    }

    async fn stop(&mut self) -> Result<()> {
        if let Some(task) = self.reader_task.take() {
            task.abort();
        }
        // The writer ends once every outgoing sender has been dropped.
        if let Some(task) = self.writer_task.take() {
            if let Err(e) = task.await {
                if !e.is_cancelled() {
                    return Err(Error::Transport(format!("writer task failed: {}", e)));
                }
            }
        }
        Ok(())
    }
}
