//! Error types for the webhook pipeline.

use thiserror::Error;

/// Errors surfaced by the webhook pipeline.
#[derive(Debug, Error)]
pub enum WebhookError {
    /// The presented signature does not match the computed one. Fatal for
    /// the request, maps to 401.
    #[error("Invalid signature")]
    InvalidSignature,

    /// The request body is malformed or missing required fields. Fatal for
    /// the request, maps to 400.
    #[error("Invalid payload: {0}")]
    InvalidPayload(String),

    /// A storage read or write failed. Maps to 500; inbound events keep
    /// their partial state for manual reconciliation.
    #[error("Database error: {0}")]
    Database(String),

    /// An outbound delivery attempt failed. Never surfaced to HTTP
    /// callers; consumed by the delivery tracker.
    #[error("Delivery failed: {0}")]
    Delivery(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<sqlx::Error> for WebhookError {
    fn from(e: sqlx::Error) -> Self {
        WebhookError::Database(e.to_string())
    }
}

pub type WebhookResult<T> = Result<T, WebhookError>;
