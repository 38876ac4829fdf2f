//! Shared types and error hierarchy for chatrelay.

pub mod error;
pub mod message;
pub mod provider;
pub mod sse;
pub mod tool;
pub mod util;

pub use error::{ApiError, ConfigError};
pub use message::*;
pub use provider::{ChatProvider, DeltaStream};
pub use tool::*;
pub use util::{Utf8Carry, truncate_str};
