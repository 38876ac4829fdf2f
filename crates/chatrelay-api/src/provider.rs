//! [`ChatProvider`] implementation for OpenAI-compatible endpoints.

use crate::client::ApiClient;
use chatrelay_types::{
    ApiError, ChatCompletionRequest, ChatCompletionResponse, ChatProvider, DeltaStream,
};
use std::future::Future;
use std::pin::Pin;

/// OpenAI, Azure OpenAI, OpenRouter and self-hosted compatibles.
///
/// Wraps `ApiClient` and implements the `ChatProvider` trait, delegating all
/// calls to the underlying client. Retry logic stays in `ApiClient`.
#[derive(Clone)]
pub struct OpenAiCompatProvider {
    name: String,
    client: ApiClient,
}

impl OpenAiCompatProvider {
    pub fn new(name: impl Into<String>, client: ApiClient) -> Self {
        Self {
            name: name.into(),
            client,
        }
    }

    pub fn client(&self) -> &ApiClient {
        &self.client
    }
}

impl ChatProvider for OpenAiCompatProvider {
    fn complete<'a>(
        &'a self,
        request: &'a ChatCompletionRequest,
    ) -> Pin<Box<dyn Future<Output = Result<ChatCompletionResponse, ApiError>> + Send + 'a>> {
        Box::pin(self.client.create_chat_completion(request))
    }

    fn stream<'a>(
        &'a self,
        request: &'a ChatCompletionRequest,
    ) -> Pin<Box<dyn Future<Output = Result<DeltaStream, ApiError>> + Send + 'a>> {
        Box::pin(async move {
            let stream = self.client.create_chat_completion_stream(request).await?;
            Ok(Box::pin(stream) as DeltaStream)
        })
    }

    fn name(&self) -> &str {
        &self.name
    }
}
