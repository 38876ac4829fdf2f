//! OpenAI-compatible chat-completions client with SSE streaming for chatrelay.

mod client;
mod provider;
mod retry;
mod stream;

pub use client::{ApiClient, AuthScheme};
pub use provider::OpenAiCompatProvider;
pub use retry::RetryConfig;
pub use stream::ChatCompletionStream;
