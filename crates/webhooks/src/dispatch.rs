//! First-attempt dispatch of status-update notifications.
//!
//! When a downstream notification endpoint is configured, every processed
//! inbound event produces one outbound POST. The first attempt is made
//! inline with no tracker row; a row is created only once a delivery has
//! failed, after which the retry scheduler owns it.

use serde::Serialize;
use sqlx::PgPool;
use uuid::Uuid;

use crate::delivery::DeliveryTracker;
use crate::error::{WebhookError, WebhookResult};
use crate::events::{ProcessedEvent, VerificationEventType};
use crate::scheduler::{attempt_delivery, DELIVERY_TIMEOUT};

/// Notification body pushed to the downstream endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct StatusNotification {
    pub event_id: Uuid,
    pub status_update_id: Uuid,
    pub vai_number: String,
    pub status_type: VerificationEventType,
    pub data: serde_json::Value,
}

impl StatusNotification {
    pub fn from_processed(processed: &ProcessedEvent, data: serde_json::Value) -> Self {
        Self {
            event_id: processed.event_id,
            status_update_id: processed.status_update_id,
            vai_number: processed.vai_number.clone(),
            status_type: processed.event_type,
            data,
        }
    }
}

/// Pushes status notifications downstream, seeding the retry pipeline on
/// failure.
#[derive(Clone)]
pub struct NotificationDispatcher {
    tracker: DeliveryTracker,
    http_client: reqwest::Client,
    endpoint: Option<String>,
}

impl NotificationDispatcher {
    pub fn new(pool: PgPool, endpoint: Option<String>) -> WebhookResult<Self> {
        let endpoint = endpoint.filter(|e| !e.is_empty());
        if endpoint.is_none() {
            tracing::warn!(
                "NOTIFY_ENDPOINT_URL not configured - status notifications will not be dispatched"
            );
        }

        let http_client = reqwest::Client::builder()
            .timeout(DELIVERY_TIMEOUT)
            .user_agent(concat!("veriflow-webhooks/", env!("CARGO_PKG_VERSION")))
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| WebhookError::Internal(format!("Failed to build HTTP client: {e}")))?;

        Ok(Self {
            tracker: DeliveryTracker::new(pool),
            http_client,
            endpoint,
        })
    }

    pub fn is_enabled(&self) -> bool {
        self.endpoint.is_some()
    }

    /// Attempt one delivery of `notification`. Failures are absorbed: the
    /// tracker row they create is the retry scheduler's input, and the
    /// inbound request that triggered the dispatch has already succeeded.
    pub async fn dispatch(&self, notification: &StatusNotification) {
        let endpoint = match &self.endpoint {
            Some(e) => e,
            None => return,
        };

        let payload = match serde_json::to_value(notification) {
            Ok(v) => v,
            Err(e) => {
                tracing::error!(
                    event_id = %notification.event_id,
                    error = %e,
                    "Failed to serialize status notification"
                );
                return;
            }
        };

        match attempt_delivery(&self.http_client, endpoint, &payload).await {
            Ok(status_code) => {
                tracing::info!(
                    event_id = %notification.event_id,
                    target_endpoint = %endpoint,
                    status_code = status_code,
                    "Status notification delivered"
                );
            }
            Err(delivery_error) => {
                if let Err(e) = self
                    .tracker
                    .record_failure(endpoint, &payload, &delivery_error)
                    .await
                {
                    tracing::error!(
                        event_id = %notification.event_id,
                        target_endpoint = %endpoint,
                        delivery_error = %delivery_error,
                        error = %e,
                        "Notification failed and could not be queued for retry"
                    );
                }
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn notification_serializes_wire_names() {
        let notification = StatusNotification {
            event_id: Uuid::nil(),
            status_update_id: Uuid::nil(),
            vai_number: "VAI-7".to_string(),
            status_type: VerificationEventType::VaiSuspended,
            data: serde_json::json!({"reason": "payment overdue"}),
        };

        let value = serde_json::to_value(&notification).unwrap();
        assert_eq!(value["status_type"], "user.vai_suspended");
        assert_eq!(value["vai_number"], "VAI-7");
        assert_eq!(value["data"]["reason"], "payment overdue");
    }
}
