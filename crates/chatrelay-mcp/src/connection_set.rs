//! Scoped ownership of the tool-server connections opened for one request.

use crate::client::McpClient;
use std::sync::Arc;

/// Live connections opened while building a request's tool registry.
///
/// [`release`](Self::release) closes everything exactly once and may be
/// called any number of times. A set dropped without being released closes
/// its connections on a spawned task, so cancellation by dropping the
/// owning future still drains it.
#[derive(Debug, Default)]
pub struct ConnectionSet {
    connections: Vec<Arc<McpClient>>,
}

impl ConnectionSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, client: Arc<McpClient>) {
        self.connections.push(client);
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<McpClient>> {
        self.connections.iter()
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    /// Close every connection in insertion order. Close failures are logged
    /// by the transports and never surface here.
    pub async fn release(&mut self) {
        let connections = std::mem::take(&mut self.connections);
        if connections.is_empty() {
            return;
        }
        let count = connections.len();
        close_all(connections).await;
        tracing::debug!(count, "connection set released");
    }
}

async fn close_all(connections: Vec<Arc<McpClient>>) {
    for client in connections {
        client.close().await;
    }
}

impl Drop for ConnectionSet {
    fn drop(&mut self) {
        if self.connections.is_empty() {
            return;
        }
        let connections = std::mem::take(&mut self.connections);
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                tracing::debug!(
                    count = connections.len(),
                    "connection set dropped unreleased, closing in background"
                );
                handle.spawn(close_all(connections));
            }
            Err(_) => tracing::warn!(
                count = connections.len(),
                "connection set dropped outside a runtime; connections not closed"
            ),
        }
    }
}
