//! Streamable HTTP transport.
//!
//! Every JSON-RPC message is its own `POST`. The server answers with either a
//! JSON body or an event stream carrying the reply, and may assign a session
//! id (`Mcp-Session-Id`) that is replayed on later requests and released with
//! a `DELETE` on close. Failures to connect are retried under the configured
//! [`ReconnectPolicy`]; a request that reached the server is never re-sent.

use super::{BoxFuture, HeaderInjector, McpTransport, http_client};
use crate::config::{ReconnectPolicy, ToolServerConfig};
use crate::error::McpError;
use crate::jsonrpc::{JsonRpcNotification, JsonRpcRequest, JsonRpcResponse};
use chatrelay_types::Utf8Carry;
use chatrelay_types::sse::SseParser;
use futures_util::StreamExt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::RwLock;

const SESSION_HEADER: &str = "mcp-session-id";
const STREAMABLE_ACCEPT: &str = "application/json, text/event-stream";

pub struct StreamableHttpTransport {
    client: reqwest::Client,
    url: String,
    headers: HeaderInjector,
    session_id: RwLock<Option<String>>,
    next_id: AtomicU64,
    reconnect: ReconnectPolicy,
    closed: AtomicBool,
    timeout_ms: u64,
}

impl StreamableHttpTransport {
    pub fn new(config: &ToolServerConfig) -> Result<Self, McpError> {
        let url = config.endpoint();
        url::Url::parse(&url).map_err(|e| McpError::Connect {
            endpoint: url.clone(),
            message: format!("invalid url: {e}"),
        })?;
        Ok(Self {
            client: http_client(&url)?,
            url,
            headers: HeaderInjector::from_config(config),
            session_id: RwLock::new(None),
            next_id: AtomicU64::new(1),
            reconnect: config.reconnect.clone(),
            closed: AtomicBool::new(false),
            timeout_ms: config.timeout_ms,
        })
    }

    /// Session id assigned by the server, if any.
    pub async fn session_id(&self) -> Option<String> {
        self.session_id.read().await.clone()
    }

    fn ensure_open(&self) -> Result<(), McpError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(McpError::Closed {
                endpoint: self.url.clone(),
            });
        }
        Ok(())
    }

    fn transport_error(&self, method: &str, err: reqwest::Error) -> McpError {
        if err.is_timeout() {
            McpError::Timeout {
                name: method.to_string(),
                timeout_ms: self.timeout_ms,
            }
        } else {
            McpError::Network {
                endpoint: self.url.clone(),
                message: err.to_string(),
            }
        }
    }

    async fn build_post(&self) -> reqwest::RequestBuilder {
        let mut req = self
            .headers
            .apply(self.client.post(&self.url))
            .header(reqwest::header::ACCEPT, STREAMABLE_ACCEPT)
            .timeout(Duration::from_millis(self.timeout_ms));
        if let Some(session_id) = self.session_id.read().await.clone() {
            req = req.header(SESSION_HEADER, session_id);
        }
        req
    }

    async fn store_session_id(&self, resp: &reqwest::Response) {
        let Some(session_id) = resp
            .headers()
            .get(SESSION_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|s| !s.is_empty())
        else {
            return;
        };
        let mut slot = self.session_id.write().await;
        if slot.as_deref() != Some(session_id) {
            tracing::debug!(endpoint = %self.url, session_id, "updated MCP session id");
            *slot = Some(session_id.to_string());
        }
    }

    /// POST `body`, retrying connection failures with growing delays.
    async fn post(
        &self,
        method: &str,
        body: &impl serde::Serialize,
    ) -> Result<reqwest::Response, McpError> {
        let mut attempt = 0;
        loop {
            match self.build_post().await.json(body).send().await {
                Ok(resp) => {
                    self.store_session_id(&resp).await;
                    if !resp.status().is_success() {
                        let status = resp.status().as_u16();
                        let body = resp.text().await.unwrap_or_default();
                        return Err(McpError::Http {
                            endpoint: self.url.clone(),
                            status,
                            body,
                        });
                    }
                    return Ok(resp);
                }
                Err(e) if attempt < self.reconnect.max_retries && e.is_connect() => {
                    let delay = self.reconnect.delay_for(attempt);
                    tracing::warn!(
                        endpoint = %self.url,
                        method,
                        attempt = attempt + 1,
                        max_retries = self.reconnect.max_retries,
                        "MCP request failed ({e}), retrying in {}ms",
                        delay.as_millis()
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(self.transport_error(method, e)),
            }
        }
    }

    async fn read_reply(
        &self,
        resp: reqwest::Response,
        id: u64,
        method: &str,
    ) -> Result<JsonRpcResponse, McpError> {
        if is_event_stream(&resp) {
            return self.read_event_stream_reply(resp, id, method).await;
        }

        let body = resp
            .text()
            .await
            .map_err(|e| self.transport_error(method, e))?;
        let reply: JsonRpcResponse = serde_json::from_str(&body).map_err(|e| {
            McpError::Protocol(format!("invalid JSON-RPC response for '{method}': {e}"))
        })?;
        if reply.id.is_some_and(|rid| rid != id) {
            return Err(McpError::Protocol(format!(
                "response id {:?} does not match request id {id} for '{method}'",
                reply.id
            )));
        }
        Ok(reply)
    }

    /// Read events until the reply to `id` arrives; the stream is dropped
    /// as soon as it does.
    async fn read_event_stream_reply(
        &self,
        resp: reqwest::Response,
        id: u64,
        method: &str,
    ) -> Result<JsonRpcResponse, McpError> {
        let mut stream = resp.bytes_stream();
        let mut utf8 = Utf8Carry::new();
        let mut parser = SseParser::new();

        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| self.transport_error(method, e))?;
            let events = parser.feed(&utf8.decode(&chunk));
            if let Some(reply) = find_reply(events, id) {
                return Ok(reply);
            }
        }
        if let Some(reply) = find_reply(parser.finish(), id) {
            return Ok(reply);
        }

        Err(McpError::Protocol(format!(
            "event stream ended without a response for '{method}'"
        )))
    }
}

fn is_event_stream(resp: &reqwest::Response) -> bool {
    resp.headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .and_then(|ct| ct.split(';').next())
        .is_some_and(|base| base.trim().eq_ignore_ascii_case("text/event-stream"))
}

fn find_reply(
    events: impl IntoIterator<Item = chatrelay_types::sse::SseEvent>,
    id: u64,
) -> Option<JsonRpcResponse> {
    events
        .into_iter()
        .filter(|event| event.name() == "message")
        .filter_map(|event| serde_json::from_str::<JsonRpcResponse>(&event.data).ok())
        .find(|msg| msg.is_reply() && msg.id == Some(id))
}

impl McpTransport for StreamableHttpTransport {
    fn request<'a>(
        &'a self,
        method: &'a str,
        params: Option<serde_json::Value>,
    ) -> BoxFuture<'a, Result<JsonRpcResponse, McpError>> {
        Box::pin(async move {
            self.ensure_open()?;
            let id = self.next_id.fetch_add(1, Ordering::Relaxed);
            tracing::debug!(method, id, endpoint = %self.url, "streamable HTTP client -> server");

            let resp = self
                .post(method, &JsonRpcRequest::new(id, method, params))
                .await?;
            self.read_reply(resp, id, method).await
        })
    }

    fn notify<'a>(
        &'a self,
        method: &'a str,
        params: Option<serde_json::Value>,
    ) -> BoxFuture<'a, Result<(), McpError>> {
        Box::pin(async move {
            self.ensure_open()?;
            self.post(method, &JsonRpcNotification::new(method, params))
                .await?;
            Ok(())
        })
    }

    fn close(&self) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            if self.closed.swap(true, Ordering::SeqCst) {
                return;
            }
            let session_id = self.session_id.write().await.take();
            if let Some(session_id) = session_id {
                let req = self
                    .headers
                    .apply(self.client.delete(&self.url))
                    .header(SESSION_HEADER, session_id)
                    .timeout(Duration::from_secs(5));
                match req.send().await {
                    // 405: the server does not support explicit session termination
                    Ok(resp) if resp.status().is_success() || resp.status().as_u16() == 405 => {}
                    Ok(resp) => tracing::warn!(
                        endpoint = %self.url,
                        status = resp.status().as_u16(),
                        "MCP session DELETE was rejected"
                    ),
                    Err(e) => {
                        tracing::warn!(endpoint = %self.url, "failed to close MCP session: {e}")
                    }
                }
            }
            tracing::info!(endpoint = %self.url, "streamable HTTP connection closed");
        })
    }

    fn endpoint(&self) -> &str {
        &self.url
    }
}
