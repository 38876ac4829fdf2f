//! Tool registry: one merged function-calling catalog across tool servers.

use crate::client::{McpClient, McpToolInfo, McpToolResult};
use crate::config::ToolServerConfig;
use crate::connection_set::ConnectionSet;
use crate::error::McpError;
use crate::transport::BoxFuture;
use chatrelay_types::ToolSpec;
use std::collections::HashMap;
use std::sync::Arc;

/// Opens a connection to one configured server.
///
/// [`DefaultConnector`] goes through the real transports; tests substitute
/// their own to script connection failures.
pub trait Connector: Send + Sync {
    fn connect<'a>(
        &'a self,
        server_id: &'a str,
        config: &'a ToolServerConfig,
    ) -> BoxFuture<'a, Result<McpClient, McpError>>;
}

/// Connects with [`McpClient::connect`].
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultConnector;

impl Connector for DefaultConnector {
    fn connect<'a>(
        &'a self,
        server_id: &'a str,
        config: &'a ToolServerConfig,
    ) -> BoxFuture<'a, Result<McpClient, McpError>> {
        Box::pin(McpClient::connect(server_id, config))
    }
}

/// A tool and the connection that serves it.
#[derive(Debug, Clone)]
pub struct RegisteredTool {
    pub info: McpToolInfo,
    pub client: Arc<McpClient>,
}

/// Tool name → descriptor and owning connection.
///
/// When two servers advertise the same name the later registration wins and
/// a warning names both servers. The overwritten name keeps its original
/// position, so [`catalog`](Self::catalog) order is first-seen order.
#[derive(Debug, Default)]
pub struct ToolRegistry {
    order: Vec<String>,
    tools: HashMap<String, RegisteredTool>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, client: Arc<McpClient>, info: McpToolInfo) {
        let name = info.name.clone();
        match self.tools.get(&name) {
            Some(previous) => tracing::warn!(
                tool = %name,
                previous = previous.client.server_id(),
                replacement = client.server_id(),
                "tool name registered by two servers; the later one wins"
            ),
            None => self.order.push(name.clone()),
        }
        self.tools.insert(name, RegisteredTool { info, client });
    }

    pub fn get(&self, name: &str) -> Option<&RegisteredTool> {
        self.tools.get(name)
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Tool names in catalog order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.order.iter().map(String::as_str)
    }

    /// The `tools` array for a chat-completions request.
    pub fn catalog(&self) -> Vec<ToolSpec> {
        self.order
            .iter()
            .filter_map(|name| self.tools.get(name))
            .map(|tool| {
                ToolSpec::function(
                    &tool.info.name,
                    tool.info.description.as_deref(),
                    tool.info.input_schema.clone(),
                )
            })
            .collect()
    }

    /// Invoke `name` on the server that owns it.
    pub async fn invoke(
        &self,
        name: &str,
        arguments: serde_json::Value,
    ) -> Result<McpToolResult, McpError> {
        let tool = self
            .get(name)
            .ok_or_else(|| McpError::UnknownTool(name.to_string()))?;
        tracing::debug!(tool = name, server = tool.client.server_id(), "invoking tool");
        tool.client.call_tool(name, arguments).await
    }
}

/// Connect to every server in order, then list each one's tools.
///
/// Stops at the first failure. Connections opened before it stay in
/// `connections` for the caller to release.
pub async fn build_registry(
    servers: &[(String, ToolServerConfig)],
    connections: &mut ConnectionSet,
    connector: &dyn Connector,
) -> Result<ToolRegistry, McpError> {
    for (server_id, config) in servers {
        let client = connector
            .connect(server_id, config)
            .await
            .map_err(|e| e.into_connect(&config.endpoint()))?;
        connections.push(Arc::new(client));
    }

    let mut registry = ToolRegistry::new();
    for client in connections.iter() {
        let tools = client
            .list_tools()
            .await
            .map_err(|e| e.into_connect(client.endpoint()))?;
        for tool in tools {
            registry.register(Arc::clone(client), tool);
        }
    }

    tracing::info!(
        servers = connections.len(),
        tools = registry.len(),
        "tool registry built"
    );
    Ok(registry)
}
