//! Streaming completion relays without tools.
//!
//! `/api/chat/reasoning` re-encodes a custom model's stream as
//! newline-delimited `{"reasoning_content":..}` / `{"content":..}` records;
//! `/api/chat/openrouter` forwards content deltas as plain text.

use super::error::ErrorResponse;
use super::tools::ChatSettings;
use super::{AppState, BodySender, channel_body};
use axum::Json;
use axum::extract::State;
use axum::http::header;
use axum::response::{IntoResponse, Response};
use chatrelay_core::RelayError;
use chatrelay_core::normalize::REASONING_SENTINEL;
use chatrelay_types::{ChatCompletionRequest, ChatDelta, ChatMessage, DeltaStream};
use futures_util::StreamExt;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Longest silence on a reasoning stream before a single space is sent.
const KEEP_ALIVE: Duration = Duration::from_secs(5);

/// Models that take `thinking: {type}` instead of `chat_template_kwargs`.
const MIMO_MODEL_KEYWORD: &str = "mimo";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReasoningRequest {
    pub chat_settings: ChatSettings,
    pub messages: Vec<ChatMessage>,
    pub custom_model_id: String,
    #[serde(default)]
    pub is_thinking_enabled: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlainRequest {
    pub chat_settings: ChatSettings,
    pub messages: Vec<ChatMessage>,
}

pub async fn reasoning(
    State(state): State<AppState>,
    Json(request): Json<ReasoningRequest>,
) -> Result<Response, ErrorResponse> {
    let settings = &request.chat_settings;
    let endpoint = state
        .config
        .custom_endpoint(&request.custom_model_id, Some(&settings.model))?;
    tracing::debug!(
        model = %endpoint.model,
        base_url = %endpoint.base_url,
        thinking = request.is_thinking_enabled,
        "reasoning relay request"
    );

    let mut completion = ChatCompletionRequest::new(&endpoint.model, request.messages);
    completion.temperature = settings.temperature;
    completion.max_tokens = settings.context_length;
    completion.extra = thinking_fields(&endpoint.model, request.is_thinking_enabled);

    let provider = endpoint.provider()?;
    let deltas = provider.stream(&completion).await?;

    let cancel = CancellationToken::new();
    let (tx, body) = channel_body(&cancel);
    let mut encoder = ReasoningEncoder::default();
    tokio::spawn(pump(
        deltas,
        tx,
        cancel,
        move |delta| encoder.encode(delta),
        Some(KEEP_ALIVE),
    ));

    Ok(([(header::CONTENT_TYPE, "application/json")], body).into_response())
}

pub async fn openrouter(
    State(state): State<AppState>,
    Json(request): Json<PlainRequest>,
) -> Result<Response, ErrorResponse> {
    let endpoint = state
        .config
        .openrouter_endpoint(&request.chat_settings.model)?;
    tracing::debug!(model = %endpoint.model, "openrouter relay request");

    let mut completion = ChatCompletionRequest::new(&endpoint.model, request.messages);
    completion.temperature = request.chat_settings.temperature;

    let provider = endpoint.provider()?;
    let deltas = provider.stream(&completion).await?;

    let cancel = CancellationToken::new();
    let (tx, body) = channel_body(&cancel);
    tokio::spawn(pump(
        deltas,
        tx,
        cancel,
        |delta| delta.content.iter().filter(|c| !c.is_empty()).cloned().collect(),
        None,
    ));

    Ok(([(header::CONTENT_TYPE, "text/plain; charset=utf-8")], body).into_response())
}

/// Provider-specific request fields that switch thinking on or off.
fn thinking_fields(model: &str, thinking: bool) -> serde_json::Map<String, serde_json::Value> {
    let mut extra = serde_json::Map::new();
    extra.insert("response_format".into(), json!({ "type": "text" }));
    if model.to_lowercase().contains(MIMO_MODEL_KEYWORD) {
        let mode = if thinking { "enabled" } else { "disable" };
        extra.insert("thinking".into(), json!({ "type": mode }));
    } else if !thinking {
        extra.insert(
            "chat_template_kwargs".into(),
            json!({ "enable_thinking": false }),
        );
    }
    extra
}

/// Turns deltas into reasoning-channel records.
///
/// When content first arrives after reasoning, a sentinel reasoning record
/// is written ahead of it so readers can close the reasoning block.
#[derive(Debug, Default)]
struct ReasoningEncoder {
    saw_reasoning: bool,
    content_started: bool,
}

impl ReasoningEncoder {
    fn encode(&mut self, delta: &ChatDelta) -> Vec<String> {
        let mut lines = Vec::new();
        if let Some(content) = delta.content.as_deref().filter(|c| !c.is_empty()) {
            if self.saw_reasoning && !self.content_started {
                lines.push(record("reasoning_content", REASONING_SENTINEL));
            }
            self.content_started = true;
            lines.push(record("content", content));
        }
        if let Some(reasoning) = delta.reasoning_content.as_deref().filter(|r| !r.is_empty()) {
            self.saw_reasoning = true;
            lines.push(record("reasoning_content", reasoning));
        }
        lines
    }
}

fn record(key: &str, value: &str) -> String {
    let mut object = serde_json::Map::new();
    object.insert(key.to_string(), value.into());
    let mut line = serde_json::Value::Object(object).to_string();
    line.push('\n');
    line
}

/// Copy encoded deltas into the response body until the upstream stream
/// ends, fails, or the client goes away.
async fn pump<F>(
    mut deltas: DeltaStream,
    tx: BodySender,
    cancel: CancellationToken,
    mut encode: F,
    keep_alive: Option<Duration>,
) where
    F: FnMut(&ChatDelta) -> Vec<String> + Send,
{
    let mut last_write = Instant::now();
    loop {
        let deadline = keep_alive.map(|every| last_write + every);
        let idle = async move {
            match deadline {
                Some(deadline) => tokio::time::sleep_until(deadline).await,
                None => std::future::pending().await,
            }
        };

        tokio::select! {
            _ = cancel.cancelled() => {
                tracing::debug!("relay client disconnected");
                return;
            }
            _ = idle => {
                if tx.send(Ok(" ".to_string())).is_err() {
                    return;
                }
                last_write = Instant::now();
            }
            next = deltas.next() => match next {
                Some(Ok(delta)) => {
                    for line in encode(&delta) {
                        if tx.send(Ok(line)).is_err() {
                            return;
                        }
                        last_write = Instant::now();
                    }
                }
                Some(Err(e)) => {
                    tracing::warn!("Relay stream failed: {e}");
                    let _ = tx.send(Err(RelayError::Api(e)));
                    return;
                }
                None => return,
            },
        }
    }
}
