//! Error hierarchy shared across chatrelay crates.

use thiserror::Error;

/// Errors from an OpenAI-compatible chat-completions endpoint.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Authentication failed: {message}")]
    Auth { message: String },

    #[error("Bad request: {message}")]
    BadRequest { message: String },

    #[error("Rate limited (retry after {retry_after_ms:?}ms)")]
    RateLimited { retry_after_ms: Option<u64> },

    #[error("Server error: {status} {message}")]
    Server { status: u16, message: String },

    #[error("Network error: {0}")]
    Network(String),

    #[error("Stream parse error: {0}")]
    StreamParse(String),

    #[error("Response contained no choices")]
    EmptyResponse,

    #[error("Request timeout")]
    Timeout,
}

impl ApiError {
    /// HTTP status to report to the caller when this error ends a request.
    pub fn status_code(&self) -> u16 {
        match self {
            ApiError::Auth { .. } => 401,
            ApiError::BadRequest { .. } => 400,
            ApiError::RateLimited { .. } => 429,
            ApiError::Server { status, .. } if *status >= 400 => *status,
            ApiError::Timeout => 504,
            _ => 502,
        }
    }
}

/// Errors from configuration loading and request validation.
///
/// Every variant is surfaced as a 4xx response before any tool server is
/// contacted.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Config file parse error at {path}: {message}")]
    Parse { path: String, message: String },

    #[error("Missing required configuration: {key}")]
    MissingKey { key: String },

    #[error("Invalid configuration value for '{key}': {message}")]
    InvalidValue { key: String, message: String },

    #[error("{provider} API Key not found. Please set it in your profile settings.")]
    MissingCredential { provider: String },

    #[error("{0}")]
    UnsupportedProvider(String),

    #[error("This model does not support tool calling, please switch to another model")]
    ToolCallingUnsupported,

    #[error("Model not found")]
    UnknownModel { model: String },

    #[error("Azure resources not found")]
    AzureResourcesMissing,

    #[error("Unknown tool server '{id}'")]
    UnknownServer { id: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn upstream_status_is_preserved() {
        let err = ApiError::Server {
            status: 503,
            message: "unavailable".into(),
        };
        assert_eq!(err.status_code(), 503);
    }

    #[test]
    fn network_errors_map_to_bad_gateway() {
        assert_eq!(ApiError::Network("reset".into()).status_code(), 502);
        assert_eq!(ApiError::EmptyResponse.status_code(), 502);
    }

    #[test]
    fn missing_credential_message_names_provider() {
        let err = ConfigError::MissingCredential {
            provider: "OpenRouter".into(),
        };
        assert_eq!(
            err.to_string(),
            "OpenRouter API Key not found. Please set it in your profile settings."
        );
    }
}
