//! Correlation of JSON-RPC replies with in-flight requests, for transports
//! whose replies arrive on a separate channel (event stream, stdout).

use crate::error::McpError;
use crate::jsonrpc::JsonRpcResponse;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, oneshot};

#[derive(Clone, Default)]
pub(crate) struct PendingRequests {
    inner: Arc<Mutex<HashMap<u64, oneshot::Sender<JsonRpcResponse>>>>,
}

impl PendingRequests {
    pub(crate) async fn register(&self, id: u64) -> oneshot::Receiver<JsonRpcResponse> {
        let (tx, rx) = oneshot::channel();
        self.inner.lock().await.insert(id, tx);
        rx
    }

    pub(crate) async fn forget(&self, id: u64) {
        self.inner.lock().await.remove(&id);
    }

    /// Drop every waiter; their receivers resolve to "connection closed".
    pub(crate) async fn fail_all(&self) {
        self.inner.lock().await.clear();
    }

    /// Route one raw message to its waiter. Server-initiated messages and
    /// unparseable lines are logged and dropped.
    pub(crate) async fn dispatch(&self, raw: &str, endpoint: &str) {
        let raw = raw.trim();
        if raw.is_empty() {
            return;
        }
        let msg: JsonRpcResponse = match serde_json::from_str(raw) {
            Ok(msg) => msg,
            Err(e) => {
                tracing::warn!(endpoint = %endpoint, "Failed to parse MCP message: {e}: {raw}");
                return;
            }
        };
        if !msg.is_reply() {
            tracing::debug!(endpoint = %endpoint, method = ?msg.method, "ignoring server-initiated message");
            return;
        }
        let Some(id) = msg.id else { return };
        if let Some(tx) = self.inner.lock().await.remove(&id) {
            let _ = tx.send(msg);
        } else {
            tracing::debug!(endpoint = %endpoint, id, "reply for unknown request id");
        }
    }

    /// Wait for the reply to `id`, removing the entry on timeout.
    pub(crate) async fn wait(
        &self,
        id: u64,
        rx: oneshot::Receiver<JsonRpcResponse>,
        method: &str,
        timeout_ms: u64,
        endpoint: &str,
    ) -> Result<JsonRpcResponse, McpError> {
        match tokio::time::timeout(Duration::from_millis(timeout_ms), rx).await {
            Ok(Ok(resp)) => Ok(resp),
            Ok(Err(_)) => Err(McpError::Closed {
                endpoint: endpoint.to_string(),
            }),
            Err(_) => {
                self.forget(id).await;
                Err(McpError::Timeout {
                    name: method.to_string(),
                    timeout_ms,
                })
            }
        }
    }
}
