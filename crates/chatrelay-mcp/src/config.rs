//! Configuration types for tool servers.

use crate::error::McpError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

fn default_timeout() -> u64 {
    30000
}

/// Wire protocol used to reach a tool server.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TransportKind {
    /// Long-lived `GET` event stream plus `POST`s to a server-announced endpoint.
    Sse,
    /// One `POST` per message, JSON or single-event SSE replies.
    #[default]
    StreamableHttp,
    /// Child process speaking newline-delimited JSON-RPC over stdin/stdout.
    Stdio,
}

impl std::fmt::Display for TransportKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            TransportKind::Sse => "sse",
            TransportKind::StreamableHttp => "streamable-http",
            TransportKind::Stdio => "stdio",
        };
        f.write_str(s)
    }
}

/// Bounded reconnection for the streamable-HTTP transport.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectPolicy {
    pub max_retries: u32,
    pub initial_delay_ms: u64,
    pub growth_factor: f64,
    pub max_delay_ms: u64,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            initial_delay_ms: 1000,
            growth_factor: 1.5,
            max_delay_ms: 30000,
        }
    }
}

impl ReconnectPolicy {
    /// Delay before retry number `attempt` (0-based), capped at `max_delay_ms`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = self.growth_factor.max(1.0).powi(attempt as i32);
        let ms = (self.initial_delay_ms as f64 * factor).min(self.max_delay_ms as f64);
        Duration::from_millis(ms as u64)
    }
}

/// Configuration for a single tool server, loaded from a `[servers.<id>]` table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolServerConfig {
    /// Human-readable name (defaults to the table id).
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(rename = "type", default)]
    pub transport: TransportKind,
    /// Endpoint URL for the HTTP transports.
    #[serde(default)]
    pub url: Option<String>,
    /// Command to run for the stdio transport.
    #[serde(default)]
    pub command: Option<String>,
    #[serde(default)]
    pub args: Vec<String>,
    /// Environment variables for the stdio child process.
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    /// Extra headers sent with every HTTP request.
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    #[serde(default)]
    pub bearer_token: Option<String>,
    /// Timeout for each request in milliseconds (default: 30000).
    #[serde(default = "default_timeout")]
    pub timeout_ms: u64,
    #[serde(default)]
    pub reconnect: ReconnectPolicy,
}

impl ToolServerConfig {
    fn with_transport(transport: TransportKind) -> Self {
        Self {
            name: None,
            description: None,
            transport,
            url: None,
            command: None,
            args: Vec::new(),
            env: BTreeMap::new(),
            headers: BTreeMap::new(),
            bearer_token: None,
            timeout_ms: default_timeout(),
            reconnect: ReconnectPolicy::default(),
        }
    }

    pub fn sse(url: impl Into<String>) -> Self {
        Self {
            url: Some(url.into()),
            ..Self::with_transport(TransportKind::Sse)
        }
    }

    pub fn streamable_http(url: impl Into<String>) -> Self {
        Self {
            url: Some(url.into()),
            ..Self::with_transport(TransportKind::StreamableHttp)
        }
    }

    pub fn stdio(command: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            command: Some(command.into()),
            args,
            ..Self::with_transport(TransportKind::Stdio)
        }
    }

    /// Where this server lives, for logs and error messages.
    pub fn endpoint(&self) -> String {
        match self.transport {
            TransportKind::Stdio => {
                let mut parts = vec![self.command.clone().unwrap_or_default()];
                parts.extend(self.args.iter().cloned());
                parts.join(" ")
            }
            _ => self.url.clone().unwrap_or_default(),
        }
    }

    /// Check that the fields required by the transport are present.
    pub fn validate(&self, server: &str) -> Result<(), McpError> {
        let invalid = |message: String| McpError::InvalidConfig {
            server: server.to_string(),
            message,
        };
        match self.transport {
            TransportKind::Sse | TransportKind::StreamableHttp => {
                let raw = self
                    .url
                    .as_deref()
                    .ok_or_else(|| invalid(format!("`url` is required for {}", self.transport)))?;
                url::Url::parse(raw).map_err(|e| invalid(format!("invalid url '{raw}': {e}")))?;
            }
            TransportKind::Stdio => {
                if self.command.as_deref().is_none_or(str::is_empty) {
                    return Err(invalid("`command` is required for stdio".to_string()));
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Deserialize)]
    struct Servers {
        servers: BTreeMap<String, ToolServerConfig>,
    }

    #[test]
    fn parse_http_servers() {
        let toml_str = r#"
[servers.search]
type = "sse"
url = "https://tools.example.com/sse"
headers = { "X-Team" = "blue" }

[servers.weather]
type = "streamable-http"
url = "https://weather.example.com/mcp"
bearer_token = "tok"
timeout_ms = 5000
"#;
        let parsed: Servers = toml::from_str(toml_str).unwrap();
        let search = &parsed.servers["search"];
        assert_eq!(search.transport, TransportKind::Sse);
        assert_eq!(search.headers["X-Team"], "blue");
        assert_eq!(search.timeout_ms, 30000);

        let weather = &parsed.servers["weather"];
        assert_eq!(weather.transport, TransportKind::StreamableHttp);
        assert_eq!(weather.bearer_token.as_deref(), Some("tok"));
        assert_eq!(weather.timeout_ms, 5000);
        assert_eq!(weather.reconnect, ReconnectPolicy::default());
    }

    #[test]
    fn parse_stdio_server() {
        let toml_str = r#"
[servers.fs]
type = "stdio"
command = "npx"
args = ["-y", "@modelcontextprotocol/server-filesystem"]
env = { HOME = "/tmp" }
"#;
        let parsed: Servers = toml::from_str(toml_str).unwrap();
        let fs = &parsed.servers["fs"];
        assert_eq!(fs.transport, TransportKind::Stdio);
        assert_eq!(fs.endpoint(), "npx -y @modelcontextprotocol/server-filesystem");
        assert!(fs.validate("fs").is_ok());
    }

    #[test]
    fn missing_type_defaults_to_streamable_http() {
        let cfg: ToolServerConfig = toml::from_str(r#"url = "http://localhost:1/mcp""#).unwrap();
        assert_eq!(cfg.transport, TransportKind::StreamableHttp);
    }

    #[test]
    fn unknown_transport_is_rejected() {
        let result: Result<ToolServerConfig, _> =
            toml::from_str("type = \"websocket\"\nurl = \"ws://x\"");
        assert!(result.is_err());
    }

    #[test]
    fn validate_requires_url_for_http() {
        let mut cfg = ToolServerConfig::sse("http://localhost/sse");
        assert!(cfg.validate("a").is_ok());
        cfg.url = None;
        assert!(matches!(
            cfg.validate("a"),
            Err(McpError::InvalidConfig { .. })
        ));
        cfg.url = Some("not a url".into());
        assert!(cfg.validate("a").is_err());
    }

    #[test]
    fn reconnect_delays_grow_and_cap() {
        let policy = ReconnectPolicy::default();
        assert_eq!(policy.delay_for(0), Duration::from_millis(1000));
        assert_eq!(policy.delay_for(1), Duration::from_millis(1500));
        assert_eq!(policy.delay_for(2), Duration::from_millis(2250));
        assert_eq!(policy.delay_for(20), Duration::from_millis(30000));
    }
}
