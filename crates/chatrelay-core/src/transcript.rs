//! Append-only conversation transcript with tool-call correlation.

use crate::error::TranscriptError;
use chatrelay_types::{ChatMessage, Role};

/// The ordered messages of one turn.
///
/// Tool-role messages are only accepted when their `tool_call_id` names a
/// call of the most recent assistant message and that call has not been
/// answered yet. Any non-tool message closes the open call set.
#[derive(Debug, Clone, Default)]
pub struct Transcript {
    messages: Vec<ChatMessage>,
    open_calls: Vec<String>,
}

impl Transcript {
    /// Start from the client's history. The history is taken as-is; only
    /// later appends are checked.
    pub fn new(history: Vec<ChatMessage>) -> Self {
        let open_calls = match history.last() {
            Some(last) if last.role == Role::Assistant => {
                last.tool_calls().iter().map(|c| c.id.clone()).collect()
            }
            _ => Vec::new(),
        };
        Self {
            messages: history,
            open_calls,
        }
    }

    pub fn push(&mut self, message: ChatMessage) -> Result<(), TranscriptError> {
        match message.role {
            Role::Tool => {
                let call_id = message.tool_call_id.clone().unwrap_or_default();
                let Some(pos) = self.open_calls.iter().position(|id| *id == call_id) else {
                    let answered = self.messages.iter().rev().any(|m| {
                        m.role == Role::Tool && m.tool_call_id.as_deref() == Some(&call_id)
                    });
                    return Err(if answered && !call_id.is_empty() {
                        TranscriptError::DuplicateToolResult { call_id }
                    } else {
                        TranscriptError::UnmatchedToolResult { call_id }
                    });
                };
                self.open_calls.remove(pos);
            }
            Role::Assistant => {
                self.open_calls = message.tool_calls().iter().map(|c| c.id.clone()).collect();
            }
            Role::System | Role::User => self.open_calls.clear(),
        }
        self.messages.push(message);
        Ok(())
    }

    /// Tool calls of the latest assistant message still waiting for a result.
    pub fn open_calls(&self) -> &[String] {
        &self.open_calls
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn last(&self) -> Option<&ChatMessage> {
        self.messages.last()
    }

    pub fn into_messages(self) -> Vec<ChatMessage> {
        self.messages
    }
}
