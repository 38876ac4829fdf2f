//! HTTP relay: the tool-calling chat route plus plain and reasoning
//! completion relays.

mod error;
mod relay;
mod tools;

use anyhow::{Context, Result};
use axum::body::Body;
use axum::routing::{get, post};
use axum::{Json, Router};
use bytes::Bytes;
use chatrelay_config::RelayConfig;
use chatrelay_core::RelayError;
use chatrelay_mcp::{Connector, DefaultConnector};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Shared by every request. Holds no per-request state.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<RelayConfig>,
    pub connector: Arc<dyn Connector>,
}

impl AppState {
    pub fn new(config: RelayConfig) -> Self {
        Self {
            config: Arc::new(config),
            connector: Arc::new(DefaultConnector),
        }
    }

    #[cfg(test)]
    pub fn with_connector(mut self, connector: Arc<dyn Connector>) -> Self {
        self.connector = connector;
        self
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/chat/tools", post(tools::chat_with_tools))
        .route("/api/chat/reasoning", post(relay::reasoning))
        .route("/api/chat/openrouter", post(relay::openrouter))
        .with_state(state)
}

/// Bind the configured address and serve until Ctrl-C.
pub async fn serve(config: RelayConfig) -> Result<()> {
    let listen = config.listen.clone();
    let listener = tokio::net::TcpListener::bind(&listen)
        .await
        .with_context(|| format!("Failed to bind {listen}"))?;
    tracing::info!(
        listen = %listen,
        servers = config.servers.len(),
        models = config.models.len(),
        "chatrelay listening"
    );

    axum::serve(listener, router(AppState::new(config)))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;
    tracing::info!("chatrelay stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!("Failed to listen for Ctrl-C: {e}");
        std::future::pending::<()>().await;
    }
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

/// Sender half of a streamed response body.
pub(crate) type BodySender = mpsc::UnboundedSender<Result<String, RelayError>>;

/// A response body fed through a channel.
///
/// The body owns a drop guard for `cancel`: when the client goes away and
/// the body is dropped, the producer sees the token cancelled. An `Err`
/// aborts the response.
pub(crate) fn channel_body(cancel: &CancellationToken) -> (BodySender, Body) {
    let (tx, rx) = mpsc::unbounded_channel::<Result<String, RelayError>>();
    let guard = cancel.clone().drop_guard();
    let chunks = futures_util::stream::unfold((rx, guard), |(mut rx, guard)| async move {
        let chunk = rx.recv().await?;
        Some((chunk.map(Bytes::from), (rx, guard)))
    });
    (tx, Body::from_stream(chunks))
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use chatrelay_config::CliOverrides;
    use std::net::SocketAddr;
    use std::path::Path;

    /// Config read from `settings` written into `dir`, with no environment.
    pub fn config_from(dir: &Path, settings: &str) -> RelayConfig {
        std::fs::write(dir.join("config.toml"), settings).unwrap();
        RelayConfig::load_with_env(
            CliOverrides {
                listen: None,
                config_dir: Some(dir.to_path_buf()),
            },
            |_: &str| None,
        )
    }

    /// Serve the router on an ephemeral port.
    pub async fn spawn(state: AppState) -> SocketAddr {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router(state)).await.unwrap();
        });
        addr
    }
}
