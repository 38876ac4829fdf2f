//! MCP (Model Context Protocol) client side of chatrelay.
//!
//! Connects to tool servers over three transports (legacy SSE, streamable
//! HTTP and a local stdio pipe), merges their tool catalogs into one
//! function-calling registry and guarantees that every connection opened
//! for a request is closed again, whichever way the request ends.

pub mod client;
pub mod config;
pub mod connection_set;
pub mod error;
pub mod jsonrpc;
pub mod registry;
pub mod transport;

pub use client::{McpClient, McpToolInfo, McpToolResult};
pub use config::{ReconnectPolicy, ToolServerConfig, TransportKind};
pub use connection_set::ConnectionSet;
pub use error::McpError;
pub use registry::{Connector, DefaultConnector, RegisteredTool, ToolRegistry, build_registry};
pub use transport::McpTransport;
