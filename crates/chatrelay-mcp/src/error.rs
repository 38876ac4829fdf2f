//! Error types for MCP operations.

use thiserror::Error;

/// Errors from tool-server communication.
#[derive(Debug, Error)]
pub enum McpError {
    #[error("Failed to connect to MCP server: {endpoint}: {message}")]
    Connect { endpoint: String, message: String },

    #[error("Failed to spawn MCP server '{name}': {source}")]
    SpawnFailed {
        name: String,
        source: std::io::Error,
    },

    #[error("JSON-RPC error from '{server}' (code {code}): {message}")]
    JsonRpc {
        server: String,
        code: i64,
        message: String,
    },

    #[error("MCP server at {endpoint} returned HTTP {status}: {body}")]
    Http {
        endpoint: String,
        status: u16,
        body: String,
    },

    #[error("Network error talking to {endpoint}: {message}")]
    Network { endpoint: String, message: String },

    #[error("MCP protocol error: {0}")]
    Protocol(String),

    #[error("MCP request '{name}' timed out after {timeout_ms}ms")]
    Timeout { name: String, timeout_ms: u64 },

    #[error("Connection to {endpoint} is closed")]
    Closed { endpoint: String },

    #[error("Invalid configuration for server '{server}': {message}")]
    InvalidConfig { server: String, message: String },

    #[error("Unknown tool '{0}'")]
    UnknownTool(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl McpError {
    /// Wrap this error so that it names the endpoint that failed to connect.
    /// Errors that already name it are returned unchanged.
    pub fn into_connect(self, endpoint: &str) -> Self {
        match self {
            McpError::Connect { .. } => self,
            other => McpError::Connect {
                endpoint: endpoint.to_string(),
                message: other.to_string(),
            },
        }
    }
}
