//! Outbound delivery tracking and retry state.
//!
//! Every failed outbound notification gets a row here. The retry
//! scheduler claims due rows, attempts redelivery, and feeds the outcome
//! back through `record_success` / `record_retry_failure`. Terminal rows
//! (`delivered`, `exhausted`) are retained for audit.

use serde::Serialize;
use sqlx::PgPool;
use time::{Duration, OffsetDateTime};
use uuid::Uuid;

use crate::error::{WebhookError, WebhookResult};

/// Maximum delivery attempts per notification.
pub const MAX_ATTEMPTS: i32 = 5;

/// Backoff schedule between attempts: 30s, 2min, 8min, 32min, 2hr.
///
/// The schedule is the contract; it is deliberately a table rather than a
/// derived `30s * 4^(n-1)` so the final entry stays at exactly 2 hours.
pub const BACKOFF_SCHEDULE_SECS: [i64; 5] = [30, 120, 480, 1920, 7200];

/// Lease age after which an `in_flight` row is considered abandoned
/// (holder crashed mid-attempt) and returned to the retry pool.
pub const STALE_LEASE_MINUTES: i32 = 10;

/// Retry state of an outbound delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryStatus {
    Pending,
    Retrying,
    /// Leased by a running retry pass; excluded from `due_for_retry` so
    /// concurrent passes cannot double-send.
    InFlight,
    Delivered,
    Exhausted,
}

impl DeliveryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Retrying => "retrying",
            Self::InFlight => "in_flight",
            Self::Delivered => "delivered",
            Self::Exhausted => "exhausted",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "retrying" => Some(Self::Retrying),
            "in_flight" => Some(Self::InFlight),
            "delivered" => Some(Self::Delivered),
            "exhausted" => Some(Self::Exhausted),
            _ => None,
        }
    }
}

impl std::fmt::Display for DeliveryStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Stored outbound delivery row.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct OutboundDelivery {
    pub id: Uuid,
    pub target_endpoint: String,
    pub payload: serde_json::Value,
    pub attempt_count: i32,
    pub max_attempts: i32,
    pub status: String,
    #[serde(with = "time::serde::rfc3339::option")]
    pub next_attempt_at: Option<OffsetDateTime>,
    pub last_error: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

impl OutboundDelivery {
    pub fn is_exhausted(&self) -> bool {
        self.status == DeliveryStatus::Exhausted.as_str()
    }

    pub fn is_delivered(&self) -> bool {
        self.status == DeliveryStatus::Delivered.as_str()
    }
}

/// Counts of deliveries by status.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct DeliveryStats {
    pub pending: i64,
    pub retrying: i64,
    pub in_flight: i64,
    pub delivered: i64,
    pub exhausted: i64,
}

/// Compute the timestamp of the next attempt after `attempt_count`
/// failures, or `None` when the attempt budget is spent.
pub fn calculate_next_attempt_at(
    attempt_count: i32,
    max_attempts: i32,
) -> Option<OffsetDateTime> {
    if attempt_count >= max_attempts {
        return None;
    }

    // attempt_count is 1-based after the first failure
    let idx = (attempt_count - 1).max(0) as usize;
    let delay_secs = BACKOFF_SCHEDULE_SECS
        .get(idx)
        .copied()
        .unwrap_or(BACKOFF_SCHEDULE_SECS[BACKOFF_SCHEDULE_SECS.len() - 1]);

    Some(OffsetDateTime::now_utc() + Duration::seconds(delay_secs))
}

/// Durable tracker for outbound deliveries.
#[derive(Clone)]
pub struct DeliveryTracker {
    pool: PgPool,
}

impl DeliveryTracker {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Record the first failure of an outbound delivery, creating its
    /// tracker row with `attempt_count = 1` and the first backoff slot.
    pub async fn record_failure(
        &self,
        target_endpoint: &str,
        payload: &serde_json::Value,
        error: &str,
    ) -> WebhookResult<OutboundDelivery> {
        let next_attempt_at = calculate_next_attempt_at(1, MAX_ATTEMPTS);
        let status = match next_attempt_at {
            Some(_) => DeliveryStatus::Retrying,
            None => DeliveryStatus::Exhausted,
        };

        let delivery: OutboundDelivery = sqlx::query_as(
            r#"
            INSERT INTO outbound_deliveries
                (target_endpoint, payload, attempt_count, max_attempts, status,
                 next_attempt_at, last_error)
            VALUES ($1, $2, 1, $3, $4, $5, $6)
            RETURNING id, target_endpoint, payload, attempt_count, max_attempts,
                      status, next_attempt_at, last_error, created_at, updated_at
            "#,
        )
        .bind(target_endpoint)
        .bind(payload)
        .bind(MAX_ATTEMPTS)
        .bind(status.as_str())
        .bind(next_attempt_at)
        .bind(error)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            tracing::error!(
                target_endpoint = %target_endpoint,
                error = %e,
                "Failed to record outbound delivery failure"
            );
            WebhookError::Database(e.to_string())
        })?;

        tracing::warn!(
            delivery_id = %delivery.id,
            target_endpoint = %target_endpoint,
            delivery_error = %error,
            next_attempt_at = ?delivery.next_attempt_at,
            "Outbound delivery failed - queued for retry"
        );

        Ok(delivery)
    }

    /// Record a failed retry attempt, advancing the backoff schedule or
    /// marking the row exhausted when the budget is spent.
    pub async fn record_retry_failure(
        &self,
        delivery: &OutboundDelivery,
        error: &str,
    ) -> WebhookResult<OutboundDelivery> {
        let attempt_count = delivery.attempt_count + 1;
        let next_attempt_at = calculate_next_attempt_at(attempt_count, delivery.max_attempts);
        let status = match next_attempt_at {
            Some(_) => DeliveryStatus::Retrying,
            None => DeliveryStatus::Exhausted,
        };

        let updated: OutboundDelivery = sqlx::query_as(
            r#"
            UPDATE outbound_deliveries
            SET attempt_count = $2,
                status = $3,
                next_attempt_at = $4,
                last_error = $5,
                updated_at = NOW()
            WHERE id = $1
            RETURNING id, target_endpoint, payload, attempt_count, max_attempts,
                      status, next_attempt_at, last_error, created_at, updated_at
            "#,
        )
        .bind(delivery.id)
        .bind(attempt_count)
        .bind(status.as_str())
        .bind(next_attempt_at)
        .bind(error)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            tracing::error!(
                delivery_id = %delivery.id,
                error = %e,
                "Failed to record retry failure"
            );
            WebhookError::Database(e.to_string())
        })?;

        if updated.is_exhausted() {
            tracing::error!(
                delivery_id = %updated.id,
                target_endpoint = %updated.target_endpoint,
                attempt_count = updated.attempt_count,
                delivery_error = %error,
                "Outbound delivery exhausted all retry attempts"
            );
        } else {
            tracing::warn!(
                delivery_id = %updated.id,
                target_endpoint = %updated.target_endpoint,
                attempt_count = updated.attempt_count,
                next_attempt_at = ?updated.next_attempt_at,
                delivery_error = %error,
                "Outbound delivery retry failed - rescheduled"
            );
        }

        Ok(updated)
    }

    /// Mark a delivery as successfully delivered and clear its schedule.
    pub async fn record_success(&self, delivery_id: Uuid) -> WebhookResult<()> {
        sqlx::query(
            r#"
            UPDATE outbound_deliveries
            SET status = 'delivered', next_attempt_at = NULL, updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(delivery_id)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            tracing::error!(
                delivery_id = %delivery_id,
                error = %e,
                "Failed to record delivery success"
            );
            WebhookError::Database(e.to_string())
        })?;

        Ok(())
    }

    /// Claim up to `limit` due deliveries, oldest-due first.
    ///
    /// Claiming atomically flips each row to `in_flight` (conditioned on
    /// its previous state, `FOR UPDATE SKIP LOCKED`), so two overlapping
    /// passes never pick up the same row.
    pub async fn due_for_retry(&self, limit: i64) -> WebhookResult<Vec<OutboundDelivery>> {
        let mut claimed: Vec<OutboundDelivery> = sqlx::query_as(
            r#"
            UPDATE outbound_deliveries d
            SET status = 'in_flight', updated_at = NOW()
            FROM (
                SELECT id
                FROM outbound_deliveries
                WHERE status IN ('pending', 'retrying')
                  AND next_attempt_at IS NOT NULL
                  AND next_attempt_at <= NOW()
                ORDER BY next_attempt_at ASC
                LIMIT $1
                FOR UPDATE SKIP LOCKED
            ) due
            WHERE d.id = due.id
            RETURNING d.id, d.target_endpoint, d.payload, d.attempt_count,
                      d.max_attempts, d.status, d.next_attempt_at, d.last_error,
                      d.created_at, d.updated_at
            "#,
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            tracing::error!(error = %e, "Failed to claim due deliveries");
            WebhookError::Database(e.to_string())
        })?;

        // UPDATE ... FROM does not preserve the subselect's order
        claimed.sort_by_key(|d| d.next_attempt_at);

        Ok(claimed)
    }

    /// Return `in_flight` rows older than `max_age_minutes` to the retry
    /// pool. Recovers leases whose holder died mid-attempt.
    pub async fn release_stale(&self, max_age_minutes: i32) -> WebhookResult<u64> {
        let result = sqlx::query(
            r#"
            UPDATE outbound_deliveries
            SET status = 'retrying', next_attempt_at = NOW(), updated_at = NOW()
            WHERE status = 'in_flight'
              AND updated_at < NOW() - ($1 || ' minutes')::INTERVAL
            "#,
        )
        .bind(max_age_minutes)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            tracing::error!(error = %e, "Failed to release stale delivery leases");
            WebhookError::Database(e.to_string())
        })?;

        let released = result.rows_affected();
        if released > 0 {
            tracing::warn!(
                released = released,
                max_age_minutes = max_age_minutes,
                "Released stale in-flight delivery leases"
            );
        }

        Ok(released)
    }

    /// Counts of deliveries by status.
    pub async fn stats(&self) -> WebhookResult<DeliveryStats> {
        let rows: Vec<(String, i64)> = sqlx::query_as(
            r#"
            SELECT status, COUNT(*)
            FROM outbound_deliveries
            GROUP BY status
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        let mut stats = DeliveryStats::default();
        for (status, count) in rows {
            match DeliveryStatus::parse(&status) {
                Some(DeliveryStatus::Pending) => stats.pending = count,
                Some(DeliveryStatus::Retrying) => stats.retrying = count,
                Some(DeliveryStatus::InFlight) => stats.in_flight = count,
                Some(DeliveryStatus::Delivered) => stats.delivered = count,
                Some(DeliveryStatus::Exhausted) => stats.exhausted = count,
                None => {
                    tracing::warn!(status = %status, "Unknown delivery status in database");
                }
            }
        }

        Ok(stats)
    }

    /// List deliveries, optionally filtered by status.
    pub async fn list_deliveries(
        &self,
        status: Option<DeliveryStatus>,
        limit: i64,
        offset: i64,
    ) -> WebhookResult<Vec<OutboundDelivery>> {
        let records: Vec<OutboundDelivery> = match status {
            Some(status) => {
                sqlx::query_as(
                    r#"
                    SELECT id, target_endpoint, payload, attempt_count, max_attempts,
                           status, next_attempt_at, last_error, created_at, updated_at
                    FROM outbound_deliveries
                    WHERE status = $1
                    ORDER BY updated_at DESC
                    LIMIT $2 OFFSET $3
                    "#,
                )
                .bind(status.as_str())
                .bind(limit)
                .bind(offset)
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query_as(
                    r#"
                    SELECT id, target_endpoint, payload, attempt_count, max_attempts,
                           status, next_attempt_at, last_error, created_at, updated_at
                    FROM outbound_deliveries
                    ORDER BY updated_at DESC
                    LIMIT $1 OFFSET $2
                    "#,
                )
                .bind(limit)
                .bind(offset)
                .fetch_all(&self.pool)
                .await?
            }
        };

        Ok(records)
    }
}
