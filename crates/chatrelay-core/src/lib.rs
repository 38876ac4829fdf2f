//! Conversation orchestration for chatrelay: the two-round tool-calling
//! driver, the turn transcript and the stream normalizers.

pub mod driver;
pub mod error;
pub mod normalize;
pub mod transcript;

pub use driver::{
    ConversationDriver, FirstRound, RESPONSE_SEPARATOR, ToolRound, TurnOptions, TurnState,
};
pub use error::{RelayError, TranscriptError};
pub use normalize::{NormalizedStream, ResponseFormat, StreamNormalizer};
pub use transcript::Transcript;
