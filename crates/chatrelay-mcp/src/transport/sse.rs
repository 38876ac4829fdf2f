//! Legacy HTTP+SSE transport.
//!
//! A long-lived `GET` opens an event stream; the server's first `endpoint`
//! event names the URL that JSON-RPC messages are `POST`ed to. Replies come
//! back as `message` events on the stream and are matched by request id.

use super::pending::PendingRequests;
use super::{BoxFuture, HeaderInjector, McpTransport, http_client, network_error};
use crate::config::ToolServerConfig;
use crate::error::McpError;
use crate::jsonrpc::{JsonRpcNotification, JsonRpcRequest, JsonRpcResponse};
use chatrelay_types::Utf8Carry;
use chatrelay_types::sse::SseParser;
use futures_util::StreamExt;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use url::Url;

pub struct SseTransport {
    client: reqwest::Client,
    stream_url: String,
    post_url: Url,
    headers: HeaderInjector,
    next_id: AtomicU64,
    pending: PendingRequests,
    reader: Mutex<Option<JoinHandle<()>>>,
    closed: AtomicBool,
    timeout_ms: u64,
}

impl SseTransport {
    /// Open the event stream and wait for the server's `endpoint` event.
    pub async fn connect(config: &ToolServerConfig) -> Result<Self, McpError> {
        let stream_url = config.endpoint();
        let base = Url::parse(&stream_url).map_err(|e| McpError::Connect {
            endpoint: stream_url.clone(),
            message: format!("invalid url: {e}"),
        })?;
        let client = http_client(&stream_url)?;
        let headers = HeaderInjector::from_config(config);
        let timeout = Duration::from_millis(config.timeout_ms);

        let req = headers.apply(
            client
                .get(base.clone())
                .header(reqwest::header::ACCEPT, "text/event-stream"),
        );
        let resp = tokio::time::timeout(timeout, req.send())
            .await
            .map_err(|_| McpError::Timeout {
                name: "connect".to_string(),
                timeout_ms: config.timeout_ms,
            })?
            .map_err(|e| network_error(&stream_url, e))?;

        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let body = resp.text().await.unwrap_or_default();
            return Err(McpError::Http {
                endpoint: stream_url,
                status,
                body,
            });
        }

        let pending = PendingRequests::default();
        let (endpoint_tx, endpoint_rx) = oneshot::channel();
        let reader = tokio::spawn(read_events(
            resp,
            endpoint_tx,
            pending.clone(),
            stream_url.clone(),
        ));

        let announced = match tokio::time::timeout(timeout, endpoint_rx).await {
            Ok(Ok(announced)) => announced,
            Ok(Err(_)) => {
                reader.abort();
                return Err(McpError::Protocol(
                    "event stream ended before the endpoint event".to_string(),
                ));
            }
            Err(_) => {
                reader.abort();
                return Err(McpError::Timeout {
                    name: "endpoint event".to_string(),
                    timeout_ms: config.timeout_ms,
                });
            }
        };

        let post_url = match resolve_endpoint(&base, &announced) {
            Ok(url) => url,
            Err(e) => {
                reader.abort();
                return Err(e);
            }
        };
        tracing::debug!(stream = %stream_url, post = %post_url, "SSE endpoint announced");

        Ok(Self {
            client,
            stream_url,
            post_url,
            headers,
            next_id: AtomicU64::new(1),
            pending,
            reader: Mutex::new(Some(reader)),
            closed: AtomicBool::new(false),
            timeout_ms: config.timeout_ms,
        })
    }

    fn ensure_open(&self) -> Result<(), McpError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(McpError::Closed {
                endpoint: self.stream_url.clone(),
            });
        }
        Ok(())
    }

    async fn post(&self, body: &impl serde::Serialize) -> Result<(), McpError> {
        let req = self
            .headers
            .apply(self.client.post(self.post_url.clone()))
            .timeout(Duration::from_millis(self.timeout_ms))
            .json(body);
        let resp = req
            .send()
            .await
            .map_err(|e| network_error(&self.stream_url, e))?;

        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let body = resp.text().await.unwrap_or_default();
            return Err(McpError::Http {
                endpoint: self.post_url.to_string(),
                status,
                body,
            });
        }
        Ok(())
    }

    fn abort_reader(&self) {
        let handle = self.reader.lock().ok().and_then(|mut slot| slot.take());
        if let Some(handle) = handle {
            handle.abort();
        }
    }
}

/// Resolve the announced endpoint against the stream URL. The result must
/// stay on the same origin.
fn resolve_endpoint(base: &Url, announced: &str) -> Result<Url, McpError> {
    let url = base.join(announced).map_err(|e| {
        McpError::Protocol(format!("invalid endpoint '{announced}' from server: {e}"))
    })?;
    if url.origin() != base.origin() {
        return Err(McpError::Protocol(format!(
            "endpoint origin does not match connection origin: {url}"
        )));
    }
    Ok(url)
}

async fn read_events(
    resp: reqwest::Response,
    endpoint_tx: oneshot::Sender<String>,
    pending: PendingRequests,
    stream_url: String,
) {
    let mut endpoint_tx = Some(endpoint_tx);
    let mut stream = resp.bytes_stream();
    let mut utf8 = Utf8Carry::new();
    let mut parser = SseParser::new();

    while let Some(chunk) = stream.next().await {
        let chunk: bytes::Bytes = match chunk {
            Ok(chunk) => chunk,
            Err(e) => {
                tracing::warn!(endpoint = %stream_url, "SSE stream error: {e}");
                break;
            }
        };
        for event in parser.feed(&utf8.decode(&chunk)) {
            match event.name() {
                "endpoint" => {
                    if let Some(tx) = endpoint_tx.take() {
                        let _ = tx.send(event.data.trim().to_string());
                    }
                }
                "message" => pending.dispatch(&event.data, &stream_url).await,
                other => tracing::debug!(endpoint = %stream_url, event = other, "ignoring SSE event"),
            }
        }
    }

    tracing::debug!(endpoint = %stream_url, "SSE stream ended");
    pending.fail_all().await;
}

impl McpTransport for SseTransport {
    fn request<'a>(
        &'a self,
        method: &'a str,
        params: Option<serde_json::Value>,
    ) -> BoxFuture<'a, Result<JsonRpcResponse, McpError>> {
        Box::pin(async move {
            self.ensure_open()?;
            let id = self.next_id.fetch_add(1, Ordering::Relaxed);
            let request = JsonRpcRequest::new(id, method, params);
            tracing::debug!(method, id, endpoint = %self.stream_url, "SSE client -> server");

            let rx = self.pending.register(id).await;
            if let Err(e) = self.post(&request).await {
                self.pending.forget(id).await;
                return Err(e);
            }
            self.pending
                .wait(id, rx, method, self.timeout_ms, &self.stream_url)
                .await
        })
    }

    fn notify<'a>(
        &'a self,
        method: &'a str,
        params: Option<serde_json::Value>,
    ) -> BoxFuture<'a, Result<(), McpError>> {
        Box::pin(async move {
            self.ensure_open()?;
            self.post(&JsonRpcNotification::new(method, params)).await
        })
    }

    fn close(&self) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            if self.closed.swap(true, Ordering::SeqCst) {
                return;
            }
            self.abort_reader();
            self.pending.fail_all().await;
            tracing::info!(endpoint = %self.stream_url, "SSE connection closed");
        })
    }

    fn endpoint(&self) -> &str {
        &self.stream_url
    }
}

impl Drop for SseTransport {
    fn drop(&mut self) {
        self.abort_reader();
    }
}
