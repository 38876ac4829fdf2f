//! Transport layer for MCP communication (JSON-RPC).
//!
//! Every wire protocol implements [`McpTransport`]; callers pick one through
//! [`open`] from the closed [`TransportKind`] set and never see the concrete
//! type again.

mod pending;
mod sse;
mod stdio;
mod streamable_http;

pub use sse::SseTransport;
pub use stdio::StdioTransport;
pub use streamable_http::StreamableHttpTransport;

use crate::config::{ToolServerConfig, TransportKind};
use crate::error::McpError;
use crate::jsonrpc::JsonRpcResponse;
use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

/// Boxed future returned by transport methods.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Shared contract of all tool-server transports.
pub trait McpTransport: Send + Sync {
    /// Send a JSON-RPC request and wait for its response.
    fn request<'a>(
        &'a self,
        method: &'a str,
        params: Option<serde_json::Value>,
    ) -> BoxFuture<'a, Result<JsonRpcResponse, McpError>>;

    /// Send a JSON-RPC notification (no response expected).
    fn notify<'a>(
        &'a self,
        method: &'a str,
        params: Option<serde_json::Value>,
    ) -> BoxFuture<'a, Result<(), McpError>>;

    /// Close the connection. Idempotent; failures are logged, never returned.
    fn close(&self) -> BoxFuture<'_, ()>;

    /// Where this transport is connected, for logs and errors.
    fn endpoint(&self) -> &str;
}

/// Open a transport for `config`. HTTP transports are ready to send; the
/// legacy SSE transport has already received its `endpoint` event.
pub async fn open(config: &ToolServerConfig) -> Result<Arc<dyn McpTransport>, McpError> {
    let endpoint = config.endpoint();
    let transport: Arc<dyn McpTransport> = match config.transport {
        TransportKind::Sse => Arc::new(SseTransport::connect(config).await?),
        TransportKind::StreamableHttp => Arc::new(StreamableHttpTransport::new(config)?),
        TransportKind::Stdio => Arc::new(StdioTransport::spawn(config)?),
    };
    tracing::debug!(transport = %config.transport, endpoint = %endpoint, "transport opened");
    Ok(transport)
}

/// Custom headers and bearer token applied to every outbound HTTP request.
#[derive(Debug, Clone, Default)]
pub(crate) struct HeaderInjector {
    headers: BTreeMap<String, String>,
    bearer_token: Option<String>,
}

impl HeaderInjector {
    pub(crate) fn from_config(config: &ToolServerConfig) -> Self {
        Self {
            headers: config.headers.clone(),
            bearer_token: config.bearer_token.clone().filter(|t| !t.is_empty()),
        }
    }

    pub(crate) fn apply(&self, mut req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        for (name, value) in &self.headers {
            req = req.header(name.as_str(), value.as_str());
        }
        if let Some(token) = &self.bearer_token {
            req = req.bearer_auth(token);
        }
        req
    }
}

/// Build the shared HTTP client used by both HTTP transports.
pub(crate) fn http_client(endpoint: &str) -> Result<reqwest::Client, McpError> {
    reqwest::Client::builder()
        .build()
        .map_err(|e| McpError::Connect {
            endpoint: endpoint.to_string(),
            message: format!("failed to build HTTP client: {e}"),
        })
}

pub(crate) fn network_error(endpoint: &str, err: reqwest::Error) -> McpError {
    McpError::Network {
        endpoint: endpoint.to_string(),
        message: err.to_string(),
    }
}
