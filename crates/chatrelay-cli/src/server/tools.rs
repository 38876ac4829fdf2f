//! `POST /api/chat/tools`: one tool-augmented chat turn.

use super::error::ErrorResponse;
use super::{AppState, channel_body};
use axum::Json;
use axum::extract::State;
use axum::http::header;
use axum::response::{IntoResponse, Response};
use chatrelay_config::ModelData;
use chatrelay_core::{ConversationDriver, FirstRound, RelayError, Transcript, TurnOptions};
use chatrelay_types::ChatMessage;
use serde::Deserialize;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatSettings {
    pub model: String,
    #[serde(default)]
    pub temperature: Option<f32>,
    #[serde(default)]
    pub context_length: Option<u32>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolChatRequest {
    pub chat_settings: ChatSettings,
    pub messages: Vec<ChatMessage>,
    #[serde(default)]
    pub selected_mcps: Vec<String>,
    pub model_data: ModelData,
}

pub async fn chat_with_tools(
    State(state): State<AppState>,
    Json(request): Json<ToolChatRequest>,
) -> Result<Response, ErrorResponse> {
    let model = &request.chat_settings.model;
    tracing::debug!(
        model = %model,
        provider = %request.model_data.provider,
        servers = ?request.selected_mcps,
        messages = request.messages.len(),
        "tool chat request"
    );

    let endpoint = state
        .config
        .resolve_tool_provider(&request.model_data, model)?;
    let servers = state.config.resolve_servers(&request.selected_mcps)?;

    let mut options = TurnOptions::new(endpoint.model.clone());
    options.temperature = request.chat_settings.temperature;
    let driver = ConversationDriver::new(endpoint.provider()?, options)
        .with_connector(state.connector.clone());

    // Cancelled when the response body is dropped, i.e. the client left.
    let cancel = CancellationToken::new();
    let first = driver
        .start(&servers, Transcript::new(request.messages), cancel.clone())
        .await?;

    let round = match first {
        FirstRound::Answered { text, .. } => {
            return Ok(([(header::CONTENT_TYPE, "text/plain")], text).into_response());
        }
        FirstRound::ToolCalls(round) => round,
    };

    let (tx, body) = channel_body(&cancel);
    tokio::spawn(async move {
        let output = tx.clone();
        let result = round
            .run(move |segment| {
                let _ = output.send(Ok(segment));
            })
            .await;
        match result {
            Ok(_) | Err(RelayError::Cancelled) => {}
            Err(e) => {
                tracing::error!("Tool chat stream failed: {e}");
                let _ = tx.send(Err(e));
            }
        }
    });

    Ok((
        [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
        body,
    )
        .into_response())
}
