//! OpenAI-compatible chat-completions client.

use chatrelay_types::{ApiError, ChatCompletionRequest, ChatCompletionResponse, truncate_str};
use reqwest::header::{CONTENT_TYPE, HeaderMap, HeaderName, HeaderValue};

use crate::retry::RetryConfig;
use crate::stream::ChatCompletionStream;

/// How the API key is presented to the endpoint.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum AuthScheme {
    /// `Authorization: Bearer <key>` (OpenAI, OpenRouter, most compatibles).
    #[default]
    Bearer,
    /// `api-key: <key>` (Azure OpenAI).
    ApiKeyHeader,
}

/// Client for one OpenAI-compatible `{base}/chat/completions` endpoint.
#[derive(Clone)]
pub struct ApiClient {
    http: reqwest::Client,
    api_key: String,
    base_url: String,
    auth: AuthScheme,
    extra_headers: Vec<(String, String)>,
    query: Vec<(String, String)>,
    retry_config: RetryConfig,
}

impl ApiClient {
    /// Create a new API client.
    pub fn new(api_key: impl Into<String>, base_url: impl Into<String>) -> Result<Self, ApiError> {
        let http = reqwest::Client::builder()
            .build()
            .map_err(|e| ApiError::Network(e.to_string()))?;

        Ok(Self {
            http,
            api_key: api_key.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            auth: AuthScheme::default(),
            extra_headers: Vec::new(),
            query: Vec::new(),
            retry_config: RetryConfig::default(),
        })
    }

    pub fn with_auth_scheme(mut self, auth: AuthScheme) -> Self {
        self.auth = auth;
        self
    }

    /// Add a header sent with every request (e.g. OpenRouter's `X-Title`).
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.extra_headers.push((name.into(), value.into()));
        self
    }

    /// Add a query parameter sent with every request (e.g. Azure's `api-version`).
    pub fn with_query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }

    /// Set the retry configuration for transient errors (429, 5xx, network).
    pub fn with_retry_config(mut self, config: RetryConfig) -> Self {
        self.retry_config = config;
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self) -> String {
        format!("{}/chat/completions", self.base_url)
    }

    fn headers(&self) -> Result<HeaderMap, ApiError> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        let invalid_key = |_| ApiError::Auth {
            message: "Invalid API key format".into(),
        };
        match self.auth {
            AuthScheme::Bearer => {
                headers.insert(
                    reqwest::header::AUTHORIZATION,
                    HeaderValue::from_str(&format!("Bearer {}", self.api_key))
                        .map_err(invalid_key)?,
                );
            }
            AuthScheme::ApiKeyHeader => {
                headers.insert(
                    "api-key",
                    HeaderValue::from_str(&self.api_key).map_err(invalid_key)?,
                );
            }
        }

        for (name, value) in &self.extra_headers {
            let name = HeaderName::from_bytes(name.as_bytes()).map_err(|e| {
                ApiError::BadRequest {
                    message: format!("Invalid header name '{name}': {e}"),
                }
            })?;
            let value = HeaderValue::from_str(value).map_err(|e| ApiError::BadRequest {
                message: format!("Invalid header value for '{name}': {e}"),
            })?;
            headers.insert(name, value);
        }
        Ok(headers)
    }

    /// Send a non-streaming request and return the parsed response.
    pub async fn create_chat_completion(
        &self,
        request: &ChatCompletionRequest,
    ) -> Result<ChatCompletionResponse, ApiError> {
        let mut request = request.clone();
        request.stream = false;

        let response = self.send_with_retry(&request).await?;
        let body = response
            .text()
            .await
            .map_err(|e| ApiError::Network(e.to_string()))?;
        let parsed: ChatCompletionResponse = serde_json::from_str(&body).map_err(|e| {
            ApiError::StreamParse(format!(
                "invalid chat completion response ({e}): {}",
                truncate_str(&body, 200)
            ))
        })?;

        if parsed.choices.is_empty() {
            return Err(ApiError::EmptyResponse);
        }
        Ok(parsed)
    }

    /// Send a streaming request and return a stream of deltas.
    pub async fn create_chat_completion_stream(
        &self,
        request: &ChatCompletionRequest,
    ) -> Result<ChatCompletionStream, ApiError> {
        let mut request = request.clone();
        request.stream = true;

        let response = self.send_with_retry(&request).await?;
        Ok(ChatCompletionStream::new(response.bytes_stream()))
    }

    /// POST the request, retrying transient failures. Returns the first
    /// successful response.
    async fn send_with_retry(
        &self,
        request: &ChatCompletionRequest,
    ) -> Result<reqwest::Response, ApiError> {
        let url = self.url();
        let headers = self.headers()?;
        let body = serde_json::to_string(request).map_err(|e| ApiError::BadRequest {
            message: format!("Failed to serialize request: {e}"),
        })?;

        let mut attempt = 0;
        loop {
            tracing::debug!(
                model = %request.model,
                stream = request.stream,
                "POST {url} (attempt {}/{})",
                attempt + 1,
                self.retry_config.max_retries + 1
            );

            let result = self
                .http
                .post(&url)
                .headers(headers.clone())
                .query(&self.query)
                .body(body.clone())
                .send()
                .await;

            let (err, retry_after) = match result {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        return Ok(response);
                    }
                    let retry_after = parse_retry_after(response.headers());
                    let body_text = response.text().await.unwrap_or_default();
                    (
                        classify_error(status.as_u16(), &body_text, retry_after),
                        retry_after,
                    )
                }
                Err(e) if e.is_timeout() => (ApiError::Timeout, None),
                Err(e) => (ApiError::Network(e.to_string()), None),
            };

            if !self.retry_config.should_retry(&err, attempt) {
                return Err(err);
            }

            let delay = self.retry_config.delay(attempt, retry_after);
            tracing::warn!(
                "Retryable API error (attempt {}/{}): {err}. Retrying in {}ms...",
                attempt + 1,
                self.retry_config.max_retries,
                delay.as_millis(),
            );
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }
}

/// Parse the `retry-after` header value as seconds and convert to milliseconds.
fn parse_retry_after(headers: &HeaderMap) -> Option<u64> {
    headers
        .get("retry-after")
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.parse::<f64>().ok())
        .map(|secs| (secs * 1000.0) as u64)
}

/// Classify an HTTP error response into a typed ApiError.
fn classify_error(status: u16, body: &str, retry_after: Option<u64>) -> ApiError {
    #[derive(serde::Deserialize)]
    struct ErrorBody {
        error: Option<ErrorDetail>,
    }
    #[derive(serde::Deserialize)]
    struct ErrorDetail {
        message: Option<String>,
    }

    let message = serde_json::from_str::<ErrorBody>(body)
        .ok()
        .and_then(|b| b.error)
        .and_then(|e| e.message)
        .unwrap_or_else(|| truncate_str(body, 500).to_string());

    match status {
        401 | 403 => ApiError::Auth { message },
        400 => ApiError::BadRequest { message },
        429 => ApiError::RateLimited {
            retry_after_ms: retry_after,
        },
        _ => ApiError::Server { status, message },
    }
}
