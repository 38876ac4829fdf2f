//! MCP client that manages one server connection.
//!
//! Handles the MCP protocol handshake (initialize + initialized notification),
//! tool discovery (tools/list), and tool invocation (tools/call) on top of
//! any [`McpTransport`].

use crate::config::ToolServerConfig;
use crate::error::McpError;
use crate::transport::{self, McpTransport};
use serde::Deserialize;
use std::sync::Arc;

/// MCP protocol version we support.
pub const PROTOCOL_VERSION: &str = "2024-11-05";

/// Information about a tool exposed by an MCP server.
#[derive(Debug, Clone, PartialEq)]
pub struct McpToolInfo {
    pub name: String,
    pub description: Option<String>,
    pub input_schema: serde_json::Value,
}

/// Result of calling a tool on an MCP server.
///
/// `content` is kept as raw JSON items (`{type: "text", text}`, images,
/// embedded resources) so it can be echoed to the model unchanged.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct McpToolResult {
    #[serde(default)]
    pub content: Vec<serde_json::Value>,
    #[serde(default, rename = "isError")]
    pub is_error: bool,
}

impl McpToolResult {
    /// Concatenated text of all `text` content items.
    pub fn text(&self) -> String {
        self.content
            .iter()
            .filter(|item| item["type"] == "text")
            .filter_map(|item| item["text"].as_str())
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[derive(Deserialize)]
struct ToolsListResult {
    tools: Vec<ToolEntry>,
    #[serde(default, rename = "nextCursor")]
    next_cursor: Option<String>,
}

#[derive(Deserialize)]
struct ToolEntry {
    name: String,
    #[serde(default)]
    description: Option<String>,
    #[serde(default = "default_schema", rename = "inputSchema")]
    input_schema: serde_json::Value,
}

fn default_schema() -> serde_json::Value {
    serde_json::json!({"type": "object", "properties": {}})
}

/// A live, initialized connection to one tool server.
pub struct McpClient {
    server_id: String,
    transport: Arc<dyn McpTransport>,
}

impl McpClient {
    /// Open the configured transport and perform the handshake. Any failure
    /// closes what was opened and is reported as [`McpError::Connect`]
    /// naming the server's endpoint.
    pub async fn connect(
        server_id: impl Into<String>,
        config: &ToolServerConfig,
    ) -> Result<Self, McpError> {
        let server_id = server_id.into();
        let endpoint = config.endpoint();
        config
            .validate(&server_id)
            .map_err(|e| e.into_connect(&endpoint))?;

        let transport = transport::open(config)
            .await
            .map_err(|e| e.into_connect(&endpoint))?;
        let client = Self::with_transport(server_id, transport);

        if let Err(e) = client.initialize().await {
            client.close().await;
            return Err(e.into_connect(&endpoint));
        }

        tracing::info!(server = %client.server_id, endpoint = %endpoint, "MCP server connected");
        Ok(client)
    }

    /// Wrap an already-open transport without performing the handshake.
    pub fn with_transport(server_id: impl Into<String>, transport: Arc<dyn McpTransport>) -> Self {
        Self {
            server_id: server_id.into(),
            transport,
        }
    }

    /// Run the `initialize` / `notifications/initialized` handshake.
    pub async fn initialize(&self) -> Result<(), McpError> {
        let init_params = serde_json::json!({
            "protocolVersion": PROTOCOL_VERSION,
            "capabilities": {},
            "clientInfo": {
                "name": "chatrelay",
                "version": env!("CARGO_PKG_VERSION")
            }
        });

        let result = self
            .transport
            .request("initialize", Some(init_params))
            .await?
            .into_result(&self.server_id)?;
        if let Some(version) = result.get("protocolVersion").and_then(|v| v.as_str()) {
            tracing::debug!(server = %self.server_id, version, "MCP server negotiated protocol");
        }

        self.transport
            .notify("notifications/initialized", None)
            .await
    }

    /// Fetch the server's tool catalog, following pagination cursors.
    pub async fn list_tools(&self) -> Result<Vec<McpToolInfo>, McpError> {
        let mut tools = Vec::new();
        let mut cursor: Option<String> = None;

        loop {
            let params = cursor
                .as_ref()
                .map(|c| serde_json::json!({ "cursor": c }));
            let result = self
                .transport
                .request("tools/list", params)
                .await?
                .into_result(&self.server_id)?;
            let page: ToolsListResult = serde_json::from_value(result).map_err(|e| {
                McpError::Protocol(format!("Failed to parse tools/list response: {e}"))
            })?;

            tools.extend(page.tools.into_iter().map(|t| McpToolInfo {
                name: t.name,
                description: t.description,
                input_schema: t.input_schema,
            }));

            match page.next_cursor {
                Some(next) if !next.is_empty() && cursor.as_deref() != Some(next.as_str()) => {
                    cursor = Some(next);
                }
                _ => break,
            }
        }

        tracing::debug!(server = %self.server_id, count = tools.len(), "tools listed");
        Ok(tools)
    }

    /// Call a tool on this server.
    pub async fn call_tool(
        &self,
        tool_name: &str,
        arguments: serde_json::Value,
    ) -> Result<McpToolResult, McpError> {
        let params = serde_json::json!({
            "name": tool_name,
            "arguments": arguments,
        });

        let result = self
            .transport
            .request("tools/call", Some(params))
            .await?
            .into_result(&self.server_id)?;

        serde_json::from_value(result)
            .map_err(|e| McpError::Protocol(format!("Failed to parse tools/call result: {e}")))
    }

    /// Close the underlying transport. Idempotent.
    pub async fn close(&self) {
        self.transport.close().await;
    }

    pub fn server_id(&self) -> &str {
        &self.server_id
    }

    pub fn endpoint(&self) -> &str {
        self.transport.endpoint()
    }
}

impl std::fmt::Debug for McpClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("McpClient")
            .field("server_id", &self.server_id)
            .field("endpoint", &self.transport.endpoint())
            .finish()
    }
}
