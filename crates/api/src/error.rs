//! API error responses

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;
use veriflow_webhooks::WebhookError;

/// Errors returned to HTTP callers.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Invalid signature")]
    InvalidSignature,

    #[error("Invalid payload: {0}")]
    BadRequest(String),

    #[error("Not found")]
    NotFound,

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<WebhookError> for ApiError {
    fn from(e: WebhookError) -> Self {
        match e {
            WebhookError::InvalidSignature => ApiError::InvalidSignature,
            WebhookError::InvalidPayload(details) => ApiError::BadRequest(details),
            WebhookError::Database(details)
            | WebhookError::Delivery(details)
            | WebhookError::Internal(details) => ApiError::Internal(details),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, body) = match self {
            ApiError::InvalidSignature => (
                StatusCode::UNAUTHORIZED,
                json!({ "error": "Invalid signature" }),
            ),
            ApiError::BadRequest(details) => (
                StatusCode::BAD_REQUEST,
                json!({ "error": "Invalid payload", "details": details }),
            ),
            ApiError::NotFound => (StatusCode::NOT_FOUND, json!({ "error": "Not found" })),
            ApiError::Internal(details) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                json!({ "error": "Internal server error", "details": details }),
            ),
        };

        (status, Json(body)).into_response()
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use axum::http::StatusCode;

    #[test]
    fn webhook_errors_map_to_expected_statuses() {
        let cases = [
            (WebhookError::InvalidSignature, StatusCode::UNAUTHORIZED),
            (
                WebhookError::InvalidPayload("missing vai_number".into()),
                StatusCode::BAD_REQUEST,
            ),
            (
                WebhookError::Database("connection refused".into()),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];

        for (err, expected) in cases {
            let response = ApiError::from(err).into_response();
            assert_eq!(response.status(), expected);
        }
    }
}
