//! The two-round conversation driver.
//!
//! Round one is a non-streaming completion offered the merged tool catalog.
//! If the model answers without tool calls the turn ends there. Otherwise
//! every call is executed in order, its progress rendered into the output
//! stream, and round two streams the final answer with no tools offered.
//!
//! The tool-server connections opened for the turn are released on every
//! exit: normal completion, any error, and cancellation through the
//! [`CancellationToken`]. Dropping an unfinished [`ToolRound`] releases them
//! from a background task.

use crate::error::RelayError;
use crate::transcript::Transcript;
use chatrelay_mcp::{
    ConnectionSet, Connector, DefaultConnector, McpToolResult, ToolRegistry, ToolServerConfig,
    build_registry,
};
use chatrelay_types::{ApiError, ChatCompletionRequest, ChatMessage, ChatProvider, ToolCall};
use futures_util::StreamExt;
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Written between the tool transcript and the streamed answer.
pub const RESPONSE_SEPARATOR: &str = "\n---\n\n💬 **AI Response**:\n\n";

/// Where a turn is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnState {
    AwaitingFirstResponse,
    NoToolCalls,
    ExecutingTools,
    AwaitingSecondResponse,
    Done,
    Failed,
}

impl TurnState {
    pub fn is_terminal(self) -> bool {
        matches!(self, TurnState::Done | TurnState::Failed)
    }

    /// Whether `next` is a legal successor of `self`.
    pub fn can_advance_to(self, next: TurnState) -> bool {
        use TurnState::*;
        match (self, next) {
            (Done | Failed, _) => false,
            (_, Failed) => true,
            (AwaitingFirstResponse, NoToolCalls | ExecutingTools) => true,
            (NoToolCalls, Done) => true,
            (ExecutingTools, AwaitingSecondResponse) => true,
            (AwaitingSecondResponse, Done) => true,
            _ => false,
        }
    }
}

fn advance(state: &mut TurnState, next: TurnState) {
    debug_assert!(
        state.can_advance_to(next),
        "illegal turn transition {state:?} -> {next:?}"
    );
    tracing::debug!(from = ?state, to = ?next, "turn state");
    *state = next;
}

/// Model parameters shared by both rounds.
#[derive(Debug, Clone, Default)]
pub struct TurnOptions {
    pub model: String,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
    /// Provider-specific request fields.
    pub extra: serde_json::Map<String, Value>,
}

impl TurnOptions {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            ..Self::default()
        }
    }

    fn request(&self, messages: Vec<ChatMessage>) -> ChatCompletionRequest {
        let mut request = ChatCompletionRequest::new(&self.model, messages);
        request.temperature = self.temperature;
        request.max_tokens = self.max_tokens;
        request.extra = self.extra.clone();
        request
    }
}

/// Result of the first round.
#[derive(Debug)]
pub enum FirstRound {
    /// The model answered directly. Connections are already released.
    Answered { text: String, transcript: Transcript },
    /// The model requested tools; run the returned round to finish the turn.
    ToolCalls(ToolRound),
}

/// Drives tool-augmented chat turns against one provider.
pub struct ConversationDriver {
    provider: Arc<dyn ChatProvider>,
    connector: Arc<dyn Connector>,
    options: TurnOptions,
}

impl ConversationDriver {
    pub fn new(provider: Arc<dyn ChatProvider>, options: TurnOptions) -> Self {
        Self {
            provider,
            connector: Arc::new(DefaultConnector),
            options,
        }
    }

    /// Replace how tool servers are connected.
    pub fn with_connector(mut self, connector: Arc<dyn Connector>) -> Self {
        self.connector = connector;
        self
    }

    /// Connect the servers, build the catalog and run the first round.
    pub async fn start(
        &self,
        servers: &[(String, ToolServerConfig)],
        mut transcript: Transcript,
        cancel: CancellationToken,
    ) -> Result<FirstRound, RelayError> {
        tracing::info!(
            model = %self.options.model,
            provider = self.provider.name(),
            servers = servers.len(),
            "starting chat turn"
        );

        let mut state = TurnState::AwaitingFirstResponse;
        let mut connections = ConnectionSet::new();
        let first = self
            .first_response(servers, &mut connections, &mut transcript, &cancel)
            .await;

        let (registry, calls) = match first {
            Ok(first) => first,
            Err(e) => {
                connections.release().await;
                advance(&mut state, TurnState::Failed);
                return Err(e);
            }
        };

        if calls.is_empty() {
            advance(&mut state, TurnState::NoToolCalls);
            connections.release().await;
            let text = transcript
                .last()
                .and_then(ChatMessage::text)
                .unwrap_or_default()
                .to_string();
            advance(&mut state, TurnState::Done);
            return Ok(FirstRound::Answered { text, transcript });
        }

        tracing::debug!(calls = calls.len(), "model requested tool calls");
        advance(&mut state, TurnState::ExecutingTools);
        Ok(FirstRound::ToolCalls(ToolRound {
            provider: Arc::clone(&self.provider),
            options: self.options.clone(),
            registry,
            connections,
            transcript,
            calls,
            cancel,
            state,
        }))
    }

    async fn first_response(
        &self,
        servers: &[(String, ToolServerConfig)],
        connections: &mut ConnectionSet,
        transcript: &mut Transcript,
        cancel: &CancellationToken,
    ) -> Result<(ToolRegistry, Vec<ToolCall>), RelayError> {
        let registry = until_cancelled(
            cancel,
            build_registry(servers, connections, self.connector.as_ref()),
        )
        .await??;

        let mut request = self.options.request(transcript.messages().to_vec());
        let catalog = registry.catalog();
        if !catalog.is_empty() {
            request.tools = Some(catalog);
            request.tool_choice = Some("auto".to_string());
        }

        let response = until_cancelled(cancel, self.provider.complete(&request)).await??;
        let message = response
            .choices
            .into_iter()
            .next()
            .map(|choice| choice.message)
            .ok_or(ApiError::EmptyResponse)?;
        let calls = message.tool_calls().to_vec();
        transcript.push(message)?;
        Ok((registry, calls))
    }
}

/// The tool-execution and streaming half of a turn.
///
/// Owns the turn's connections until [`run`](Self::run) finishes.
pub struct ToolRound {
    provider: Arc<dyn ChatProvider>,
    options: TurnOptions,
    registry: ToolRegistry,
    connections: ConnectionSet,
    transcript: Transcript,
    calls: Vec<ToolCall>,
    cancel: CancellationToken,
    state: TurnState,
}

impl std::fmt::Debug for ToolRound {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolRound")
            .field("provider", &self.provider.name())
            .field("model", &self.options.model)
            .field("tools", &self.registry.len())
            .field("connections", &self.connections.len())
            .field("calls", &self.calls)
            .field("state", &self.state)
            .finish()
    }
}

impl ToolRound {
    /// Tool calls requested by the first round, in model order.
    pub fn calls(&self) -> &[ToolCall] {
        &self.calls
    }

    pub fn state(&self) -> TurnState {
        self.state
    }

    /// Execute the tool calls and stream the second round. Every piece of
    /// output text goes to `on_output` in order. Returns the completed
    /// transcript.
    pub async fn run<F>(mut self, mut on_output: F) -> Result<Transcript, RelayError>
    where
        F: FnMut(String),
    {
        let result = self.execute(&mut on_output).await;
        self.connections.release().await;
        match result {
            Ok(()) => {
                advance(&mut self.state, TurnState::Done);
                Ok(self.transcript)
            }
            Err(e) => {
                advance(&mut self.state, TurnState::Failed);
                if matches!(e, RelayError::Cancelled) {
                    tracing::info!("chat turn cancelled");
                } else {
                    tracing::warn!("chat turn failed: {e}");
                }
                Err(e)
            }
        }
    }

    async fn execute<F>(&mut self, on_output: &mut F) -> Result<(), RelayError>
    where
        F: FnMut(String),
    {
        let calls = std::mem::take(&mut self.calls);
        for call in &calls {
            self.execute_call(call, on_output).await?;
        }

        on_output(RESPONSE_SEPARATOR.to_string());
        advance(&mut self.state, TurnState::AwaitingSecondResponse);

        let request = self.options.request(self.transcript.messages().to_vec());
        let mut stream = until_cancelled(&self.cancel, self.provider.stream(&request)).await??;

        let mut answer = String::new();
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => return Err(RelayError::Cancelled),
                delta = stream.next() => match delta {
                    Some(Ok(delta)) => {
                        if let Some(text) = delta.content.filter(|t| !t.is_empty()) {
                            answer.push_str(&text);
                            on_output(text);
                        }
                    }
                    Some(Err(e)) => return Err(e.into()),
                    None => break,
                },
            }
        }

        self.transcript.push(ChatMessage::assistant(answer))?;
        Ok(())
    }

    /// Run one call. Failures become an error segment and an `Error: ...`
    /// tool message; only cancellation or a transcript violation aborts.
    async fn execute_call<F>(&mut self, call: &ToolCall, on_output: &mut F) -> Result<(), RelayError>
    where
        F: FnMut(String),
    {
        let name = call.function.name.as_str();
        let raw = call.function.arguments.trim();
        let parsed = if raw.is_empty() {
            Ok(Value::Object(Default::default()))
        } else {
            serde_json::from_str::<Value>(raw)
        };

        let shown = match &parsed {
            Ok(args) => pretty_json(args),
            Err(_) => raw.to_string(),
        };
        on_output(tool_announcement(name, &shown));

        let outcome = match parsed {
            Err(e) => Err(format!("Invalid tool arguments: {e}")),
            Ok(args) => match until_cancelled(&self.cancel, self.registry.invoke(name, args)).await? {
                Ok(result) if result.is_error => Err(reported_error(&result)),
                Ok(result) => Ok(result),
                Err(e) => Err(e.to_string()),
            },
        };

        let content = match outcome {
            Ok(result) => {
                let content = Value::Array(result.content);
                on_output(tool_result_segment(&content));
                content.to_string()
            }
            Err(message) => {
                tracing::warn!(tool = name, call = %call.id, "tool call failed: {message}");
                on_output(tool_error_segment(&message));
                format!("Error: {message}")
            }
        };

        self.transcript
            .push(ChatMessage::tool_result(&call.id, name, content))?;
        Ok(())
    }
}

async fn until_cancelled<F: Future>(
    cancel: &CancellationToken,
    fut: F,
) -> Result<F::Output, RelayError> {
    tokio::select! {
        _ = cancel.cancelled() => Err(RelayError::Cancelled),
        out = fut => Ok(out),
    }
}

fn pretty_json(value: &Value) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string())
}

fn reported_error(result: &McpToolResult) -> String {
    let text = result.text();
    if text.is_empty() {
        "Tool reported an error".to_string()
    } else {
        text
    }
}

pub(crate) fn tool_announcement(name: &str, arguments: &str) -> String {
    format!("\n🔧 **Calling Tool**: {name}\n📝 **Arguments**: {arguments}\n\n")
}

pub(crate) fn tool_result_segment(content: &Value) -> String {
    format!("✅ **Tool Result**:\n```json\n{}\n```\n\n", pretty_json(content))
}

pub(crate) fn tool_error_segment(message: &str) -> String {
    format!("❌ **Tool Error**: {message}\n\n")
}
