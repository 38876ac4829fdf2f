//! Error types for the conversation engine.

use chatrelay_mcp::McpError;
use chatrelay_types::{ApiError, ConfigError};

/// A transcript append that would break tool-call correlation.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum TranscriptError {
    #[error("tool result '{call_id}' does not answer a call of the preceding assistant message")]
    UnmatchedToolResult { call_id: String },

    #[error("tool call '{call_id}' already has a result")]
    DuplicateToolResult { call_id: String },
}

/// Everything that can end a relayed chat turn.
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Mcp(#[from] McpError),

    #[error(transparent)]
    Api(#[from] ApiError),

    #[error(transparent)]
    Transcript(#[from] TranscriptError),

    #[error("Request cancelled")]
    Cancelled,
}

impl RelayError {
    /// HTTP status reported to the caller.
    pub fn status_code(&self) -> u16 {
        match self {
            RelayError::Config(_) => 400,
            RelayError::Api(e) => e.status_code(),
            RelayError::Mcp(_) | RelayError::Transcript(_) | RelayError::Cancelled => 500,
        }
    }
}
