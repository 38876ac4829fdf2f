//! Provider trait for OpenAI-compatible chat-completions backends.

use crate::{ApiError, ChatCompletionRequest, ChatCompletionResponse, ChatDelta};
use futures_core::Stream;
use std::future::Future;
use std::pin::Pin;

/// A boxed async stream of incremental deltas from a provider.
pub type DeltaStream = Pin<Box<dyn Stream<Item = Result<ChatDelta, ApiError>> + Send>>;

/// A chat-completions backend.
///
/// Dyn-compatible so the conversation driver works with `Arc<dyn ChatProvider>`
/// and tests can substitute scripted providers.
pub trait ChatProvider: Send + Sync {
    /// Send a non-streaming request and return the full response.
    fn complete<'a>(
        &'a self,
        request: &'a ChatCompletionRequest,
    ) -> Pin<Box<dyn Future<Output = Result<ChatCompletionResponse, ApiError>> + Send + 'a>>;

    /// Send a streaming request, returning a stream of deltas that ends at
    /// the provider's `[DONE]` marker.
    fn stream<'a>(
        &'a self,
        request: &'a ChatCompletionRequest,
    ) -> Pin<Box<dyn Future<Output = Result<DeltaStream, ApiError>> + Send + 'a>>;

    /// Provider name for logging (e.g., "openai").
    fn name(&self) -> &str;
}
