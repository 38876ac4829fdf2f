//! Stdio transport for local MCP servers.
//!
//! Spawns a child process and manages async communication over stdin/stdout
//! using newline-delimited JSON-RPC messages.

use super::pending::PendingRequests;
use super::{BoxFuture, McpTransport};
use crate::config::ToolServerConfig;
use crate::error::McpError;
use crate::jsonrpc::{JsonRpcNotification, JsonRpcRequest, JsonRpcResponse};
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;

/// Async stdio transport for communicating with an MCP server process.
pub struct StdioTransport {
    command_line: String,
    next_id: AtomicU64,
    write_tx: Mutex<Option<mpsc::Sender<String>>>,
    pending: PendingRequests,
    reader_handle: JoinHandle<()>,
    writer_handle: JoinHandle<()>,
    child: Mutex<Option<Child>>,
    timeout_ms: u64,
}

impl StdioTransport {
    /// Spawn the configured command and start background reader/writer tasks.
    pub fn spawn(config: &ToolServerConfig) -> Result<Self, McpError> {
        let command_line = config.endpoint();
        let command = config.command.as_deref().unwrap_or_default();

        let mut cmd = Command::new(command);
        cmd.args(&config.args)
            .envs(&config.env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true);

        let mut child = cmd.spawn().map_err(|e| McpError::SpawnFailed {
            name: command.to_string(),
            source: e,
        })?;

        let (Some(stdin), Some(stdout)) = (child.stdin.take(), child.stdout.take()) else {
            return Err(McpError::Protocol(format!(
                "failed to capture stdio of '{command_line}'"
            )));
        };

        let pending = PendingRequests::default();

        // Writer task: drains channel and writes to child stdin
        let (write_tx, mut write_rx) = mpsc::channel::<String>(64);
        let writer_handle = tokio::spawn(async move {
            let mut stdin = stdin;
            while let Some(msg) = write_rx.recv().await {
                if stdin.write_all(msg.as_bytes()).await.is_err()
                    || stdin.write_all(b"\n").await.is_err()
                    || stdin.flush().await.is_err()
                {
                    break;
                }
            }
        });

        // Reader task: reads lines from stdout and routes replies
        let pending_for_reader = pending.clone();
        let endpoint = command_line.clone();
        let reader_handle = tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                pending_for_reader.dispatch(&line, &endpoint).await;
            }
            pending_for_reader.fail_all().await;
        });

        Ok(Self {
            command_line,
            next_id: AtomicU64::new(1),
            write_tx: Mutex::new(Some(write_tx)),
            pending,
            reader_handle,
            writer_handle,
            child: Mutex::new(Some(child)),
            timeout_ms: config.timeout_ms,
        })
    }

    async fn send_line(&self, line: String) -> Result<(), McpError> {
        let tx = self.write_tx.lock().await.clone().ok_or_else(|| McpError::Closed {
            endpoint: self.command_line.clone(),
        })?;
        tx.send(line)
            .await
            .map_err(|_| McpError::Protocol("Writer channel closed".to_string()))
    }
}

impl McpTransport for StdioTransport {
    fn request<'a>(
        &'a self,
        method: &'a str,
        params: Option<serde_json::Value>,
    ) -> BoxFuture<'a, Result<JsonRpcResponse, McpError>> {
        Box::pin(async move {
            let id = self.next_id.fetch_add(1, Ordering::Relaxed);
            let serialized = serde_json::to_string(&JsonRpcRequest::new(id, method, params))?;

            let rx = self.pending.register(id).await;
            if let Err(e) = self.send_line(serialized).await {
                self.pending.forget(id).await;
                return Err(e);
            }
            self.pending
                .wait(id, rx, method, self.timeout_ms, &self.command_line)
                .await
        })
    }

    fn notify<'a>(
        &'a self,
        method: &'a str,
        params: Option<serde_json::Value>,
    ) -> BoxFuture<'a, Result<(), McpError>> {
        Box::pin(async move {
            let serialized = serde_json::to_string(&JsonRpcNotification::new(method, params))?;
            self.send_line(serialized).await
        })
    }

    /// Drop the write channel (EOF on the child's stdin), give the child a
    /// moment to exit, then kill it.
    fn close(&self) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            if self.write_tx.lock().await.take().is_none() {
                return;
            }

            if let Some(mut child) = self.child.lock().await.take() {
                let graceful =
                    tokio::time::timeout(Duration::from_secs(5), child.wait()).await;
                if graceful.is_err() {
                    if let Err(e) = child.kill().await {
                        tracing::warn!(endpoint = %self.command_line, "failed to kill MCP server: {e}");
                    }
                }
            }

            self.reader_handle.abort();
            self.writer_handle.abort();
            self.pending.fail_all().await;
            tracing::info!(endpoint = %self.command_line, "stdio MCP server stopped");
        })
    }

    fn endpoint(&self) -> &str {
        &self.command_line
    }
}

impl Drop for StdioTransport {
    fn drop(&mut self) {
        self.reader_handle.abort();
        self.writer_handle.abort();
    }
}
