//! JSON error responses.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use chatrelay_core::RelayError;

/// A turn that failed before its body started streaming, reported as
/// `{"message": ...}` with the error's status.
#[derive(Debug)]
pub struct ErrorResponse(pub RelayError);

impl<E: Into<RelayError>> From<E> for ErrorResponse {
    fn from(err: E) -> Self {
        Self(err.into())
    }
}

impl IntoResponse for ErrorResponse {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.0.status_code())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        if status.is_server_error() {
            tracing::error!(status = status.as_u16(), "{}", self.0);
        } else {
            tracing::warn!(status = status.as_u16(), "{}", self.0);
        }

        let body = serde_json::json!({
            "message": self.0.to_string()
        });
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chatrelay_types::{ApiError, ConfigError};

    async fn render(err: impl Into<RelayError>) -> (StatusCode, serde_json::Value) {
        let response = ErrorResponse::from(err).into_response();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn config_errors_are_bad_requests() {
        let (status, body) = render(ConfigError::UnknownModel {
            model: "gpt-x".into(),
        })
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["message"], "Model not found");
    }

    #[tokio::test]
    async fn upstream_status_passes_through() {
        let (status, body) = render(ApiError::RateLimited {
            retry_after_ms: None,
        })
        .await;
        assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
        assert!(body["message"].as_str().unwrap().starts_with("Rate limited"));
    }
}
