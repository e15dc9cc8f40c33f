use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

/// Central error type for the request endpoint.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("unauthorized")]
    Unauthorized(String),

    #[error("rate limit exceeded")]
    RateLimited,

    #[error("empty payload")]
    EmptyPayload,

    #[error("no valid events")]
    NoValidEvents,

    #[error("internal server error")]
    Internal(#[from] anyhow::Error),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            AppError::Unauthorized(reason) => (StatusCode::UNAUTHORIZED, reason.clone()),
            AppError::RateLimited => (StatusCode::TOO_MANY_REQUESTS, self.to_string()),
            AppError::EmptyPayload | AppError::NoValidEvents => {
                (StatusCode::BAD_REQUEST, self.to_string())
            }
            AppError::Internal(err) => {
                tracing::error!(error = %err, "request failed");
                (StatusCode::INTERNAL_SERVER_ERROR, self.to_string())
            }
        };

        (status, Json(json!({ "error": message }))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        let cases = [
            (AppError::Unauthorized("missing token".into()), StatusCode::UNAUTHORIZED),
            (AppError::RateLimited, StatusCode::TOO_MANY_REQUESTS),
            (AppError::EmptyPayload, StatusCode::BAD_REQUEST),
            (AppError::NoValidEvents, StatusCode::BAD_REQUEST),
        ];
        for (err, expected) in cases {
            assert_eq!(err.into_response().status(), expected);
        }
    }

    #[test]
    fn test_payload_error_messages() {
        assert_eq!(AppError::EmptyPayload.to_string(), "empty payload");
        assert_eq!(AppError::NoValidEvents.to_string(), "no valid events");
    }
}
