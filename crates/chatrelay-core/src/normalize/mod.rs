//! Stream normalizers: turn the relay's heterogeneous streamed bodies into
//! one incrementally rendered text.
//!
//! Each normalizer accepts chunks split at arbitrary byte offsets and, after
//! every chunk, returns the full logical text received so far.

mod line_carry;
mod passthrough;
mod reasoning;
mod stream;

pub use line_carry::LineCarryNormalizer;
pub use passthrough::PassthroughNormalizer;
pub use reasoning::{REASONING_SENTINEL, ReasoningNormalizer, render_reasoning};
pub use stream::NormalizedStream;

use std::fmt;
use std::str::FromStr;

/// Incremental decoder for one streamed response body.
pub trait StreamNormalizer: Send {
    /// Consume one raw chunk and return the full rendered text so far.
    fn feed(&mut self, chunk: &[u8]) -> String;

    /// Flush anything held back at end of stream and return the final text.
    fn finish(&mut self) -> String;
}

/// Wire shape of a streamed response body.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ResponseFormat {
    /// Plain text deltas.
    #[default]
    Hosted,
    /// Newline-delimited `{"reasoning_content":..}` / `{"content":..}` records.
    Reasoning,
    /// Newline-delimited `{"message":{"content":..}}` records.
    LineJson,
}

impl ResponseFormat {
    pub fn normalizer(self) -> Box<dyn StreamNormalizer> {
        match self {
            ResponseFormat::Hosted => Box::new(PassthroughNormalizer::new()),
            ResponseFormat::Reasoning => Box::new(ReasoningNormalizer::new()),
            ResponseFormat::LineJson => Box::new(LineCarryNormalizer::new()),
        }
    }
}

impl fmt::Display for ResponseFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ResponseFormat::Hosted => "hosted",
            ResponseFormat::Reasoning => "reasoning",
            ResponseFormat::LineJson => "line-json",
        })
    }
}

impl FromStr for ResponseFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "hosted" => Ok(ResponseFormat::Hosted),
            "reasoning" => Ok(ResponseFormat::Reasoning),
            "line-json" => Ok(ResponseFormat::LineJson),
            other => Err(format!(
                "unknown response format '{other}' (expected hosted, reasoning or line-json)"
            )),
        }
    }
}
