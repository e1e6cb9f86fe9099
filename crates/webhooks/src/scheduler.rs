//! Retry scheduler for failed outbound deliveries.
//!
//! Stateless over the tracker's rows: one `run_pass` claims a batch of
//! due deliveries, attempts each, and records the outcome. It never loops
//! or waits — periodic invocation belongs to the worker binary (or an
//! operator hitting the manual trigger endpoint).

use std::time::Duration;

use serde::Serialize;
use sqlx::PgPool;

use crate::delivery::{DeliveryTracker, OutboundDelivery, STALE_LEASE_MINUTES};
use crate::error::{WebhookError, WebhookResult};

/// Upper bound on deliveries attempted in a single pass.
pub const MAX_BATCH_SIZE: i64 = 50;

/// Timeout applied to every delivery attempt. Expiry counts as a failure.
pub const DELIVERY_TIMEOUT: Duration = Duration::from_secs(10);

/// Outcome counts of one retry pass. `processed` always equals
/// `succeeded + failed + exhausted`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RetrySummary {
    pub processed: u32,
    pub succeeded: u32,
    pub failed: u32,
    pub exhausted: u32,
}

/// Attempts redelivery of due outbound notifications.
#[derive(Clone)]
pub struct RetryScheduler {
    tracker: DeliveryTracker,
    http_client: reqwest::Client,
}

impl RetryScheduler {
    /// Create a scheduler with a shared HTTP client.
    ///
    /// # Errors
    ///
    /// Returns `WebhookError::Internal` if the HTTP client cannot be
    /// built.
    pub fn new(pool: PgPool) -> WebhookResult<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(DELIVERY_TIMEOUT)
            .user_agent(concat!("veriflow-webhooks/", env!("CARGO_PKG_VERSION")))
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| WebhookError::Internal(format!("Failed to build HTTP client: {e}")))?;

        Ok(Self {
            tracker: DeliveryTracker::new(pool),
            http_client,
        })
    }

    /// Run exactly one retry pass over up to `batch_size` due deliveries.
    ///
    /// Items are attempted oldest-due first and fail independently: one
    /// delivery erroring never aborts the rest of the batch, and the
    /// returned summary accounts for every claimed item exactly once.
    pub async fn run_pass(&self, batch_size: i64) -> WebhookResult<RetrySummary> {
        let batch_size = batch_size.clamp(1, MAX_BATCH_SIZE);
        let due = self.tracker.due_for_retry(batch_size).await?;

        let mut summary = RetrySummary::default();
        if due.is_empty() {
            return Ok(summary);
        }

        tracing::info!(count = due.len(), "Processing due outbound deliveries");

        for delivery in &due {
            summary.processed += 1;

            match attempt_delivery(
                &self.http_client,
                &delivery.target_endpoint,
                &delivery.payload,
            )
            .await
            {
                Ok(status_code) => {
                    tracing::info!(
                        delivery_id = %delivery.id,
                        target_endpoint = %delivery.target_endpoint,
                        status_code = status_code,
                        attempt_count = delivery.attempt_count + 1,
                        "Outbound delivery retry succeeded"
                    );
                    // The delivery itself succeeded; a bookkeeping failure
                    // here must not flip the item's outcome.
                    if let Err(e) = self.tracker.record_success(delivery.id).await {
                        tracing::error!(
                            delivery_id = %delivery.id,
                            error = %e,
                            "Delivered but failed to record success - row will be retried"
                        );
                    }
                    summary.succeeded += 1;
                }
                Err(delivery_error) => {
                    match self
                        .tracker
                        .record_retry_failure(delivery, &delivery_error)
                        .await
                    {
                        Ok(updated) if updated.is_exhausted() => summary.exhausted += 1,
                        Ok(_) => summary.failed += 1,
                        Err(e) => {
                            tracing::error!(
                                delivery_id = %delivery.id,
                                error = %e,
                                "Failed to record retry failure"
                            );
                            summary.failed += 1;
                        }
                    }
                }
            }
        }

        tracing::info!(
            processed = summary.processed,
            succeeded = summary.succeeded,
            failed = summary.failed,
            exhausted = summary.exhausted,
            "Retry pass complete"
        );

        Ok(summary)
    }

    /// Return leases abandoned by a crashed pass to the retry pool.
    pub async fn release_stale_leases(&self) -> WebhookResult<u64> {
        self.tracker.release_stale(STALE_LEASE_MINUTES).await
    }

    pub fn tracker(&self) -> &DeliveryTracker {
        &self.tracker
    }
}

/// Attempt one delivery: POST the stored payload to the target endpoint.
///
/// Any 2xx response is success. Non-2xx, connection failures, and
/// timeouts all return the error string recorded as `last_error`.
pub(crate) async fn attempt_delivery(
    client: &reqwest::Client,
    target_endpoint: &str,
    payload: &serde_json::Value,
) -> Result<u16, String> {
    let result = client.post(target_endpoint).json(payload).send().await;

    match result {
        Ok(response) => {
            let status = response.status();
            if status.is_success() {
                Ok(status.as_u16())
            } else {
                Err(format!("HTTP {}", status.as_u16()))
            }
        }
        Err(e) => {
            if e.is_timeout() {
                Err(format!("Request timeout ({}s)", DELIVERY_TIMEOUT.as_secs()))
            } else if e.is_connect() {
                Err(format!("Connection failed: {e}"))
            } else {
                Err(format!("Request error: {e}"))
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn test_client() -> reqwest::Client {
        reqwest::Client::builder()
            .timeout(Duration::from_secs(2))
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn attempt_succeeds_on_2xx() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/hooks/status")
            .match_header("content-type", "application/json")
            .with_status(200)
            .create_async()
            .await;

        let payload = serde_json::json!({"vai_number": "VAI-1", "status_type": "user.vai_revoked"});
        let result = attempt_delivery(
            &test_client(),
            &format!("{}/hooks/status", server.url()),
            &payload,
        )
        .await;

        assert_eq!(result, Ok(200));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn attempt_treats_204_as_success() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/hooks/status")
            .with_status(204)
            .create_async()
            .await;

        let result = attempt_delivery(
            &test_client(),
            &format!("{}/hooks/status", server.url()),
            &serde_json::json!({}),
        )
        .await;

        assert_eq!(result, Ok(204));
    }

    #[tokio::test]
    async fn attempt_fails_on_server_error() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/hooks/status")
            .with_status(503)
            .create_async()
            .await;

        let result = attempt_delivery(
            &test_client(),
            &format!("{}/hooks/status", server.url()),
            &serde_json::json!({}),
        )
        .await;

        assert_eq!(result, Err("HTTP 503".to_string()));
    }

    #[tokio::test]
    async fn attempt_fails_on_client_error() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/hooks/status")
            .with_status(410)
            .create_async()
            .await;

        let result = attempt_delivery(
            &test_client(),
            &format!("{}/hooks/status", server.url()),
            &serde_json::json!({}),
        )
        .await;

        assert_eq!(result, Err("HTTP 410".to_string()));
    }

    #[tokio::test]
    async fn attempt_fails_on_unreachable_endpoint() {
        // Nothing listens on this port
        let result = attempt_delivery(
            &test_client(),
            "http://127.0.0.1:1/hooks/status",
            &serde_json::json!({}),
        )
        .await;

        assert!(result.is_err());
    }

    #[test]
    fn summary_counts_start_at_zero() {
        let summary = RetrySummary::default();
        assert_eq!(summary.processed, 0);
        assert_eq!(
            summary.processed,
            summary.succeeded + summary.failed + summary.exhausted
        );
    }
}
