//! Inbound verification events and derived status updates.
//!
//! Events are append-only: every webhook delivery inserts a row, replays
//! included (the provider may retransmit). A row is mutated exactly once,
//! to flip `processed` after its status update has been durably written.

use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::error::{WebhookError, WebhookResult};

/// Event types emitted by the verification provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VerificationEventType {
    #[serde(rename = "user.status_changed")]
    StatusChanged,
    #[serde(rename = "user.account_updated")]
    AccountUpdated,
    #[serde(rename = "user.vai_revoked")]
    VaiRevoked,
    #[serde(rename = "user.vai_suspended")]
    VaiSuspended,
}

impl VerificationEventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::StatusChanged => "user.status_changed",
            Self::AccountUpdated => "user.account_updated",
            Self::VaiRevoked => "user.vai_revoked",
            Self::VaiSuspended => "user.vai_suspended",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "user.status_changed" => Some(Self::StatusChanged),
            "user.account_updated" => Some(Self::AccountUpdated),
            "user.vai_revoked" => Some(Self::VaiRevoked),
            "user.vai_suspended" => Some(Self::VaiSuspended),
            _ => None,
        }
    }
}

impl std::fmt::Display for VerificationEventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Wire format of an inbound webhook body.
///
/// `data` is carried through opaque — the provider attaches free-form
/// extension fields (`status`, `reason`, ...) we store and forward
/// unmodified.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboundEvent {
    pub event_type: String,
    pub user_id: String,
    pub vai_number: String,
    #[serde(default)]
    pub timestamp: Option<String>,
    #[serde(default)]
    pub data: serde_json::Value,
}

impl InboundEvent {
    /// Validate required fields, returning the parsed event type.
    pub fn validate(&self) -> WebhookResult<VerificationEventType> {
        let event_type = VerificationEventType::parse(&self.event_type).ok_or_else(|| {
            WebhookError::InvalidPayload(format!("unknown event_type '{}'", self.event_type))
        })?;

        if self.user_id.trim().is_empty() {
            return Err(WebhookError::InvalidPayload("user_id is required".into()));
        }
        if self.vai_number.trim().is_empty() {
            return Err(WebhookError::InvalidPayload("vai_number is required".into()));
        }

        Ok(event_type)
    }
}

/// Stored inbound event row.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct EventRecord {
    pub id: Uuid,
    pub event_type: String,
    pub subject_user_id: String,
    pub vai_number: String,
    pub payload: serde_json::Value,
    pub received_signature: Option<String>,
    pub processed: bool,
    #[serde(with = "time::serde::rfc3339::option")]
    pub processed_at: Option<OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

/// Result of processing one inbound event end to end.
#[derive(Debug, Clone, Serialize)]
pub struct ProcessedEvent {
    pub event_id: Uuid,
    pub status_update_id: Uuid,
    pub event_type: VerificationEventType,
    pub vai_number: String,
}

/// Durable store for inbound events and their derived status updates.
#[derive(Clone)]
pub struct EventStore {
    pool: PgPool,
}

impl EventStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Insert one inbound event row with `processed = false`.
    ///
    /// On failure the caller must not derive a status update — an orphaned
    /// status row without its originating event would break the audit
    /// trail.
    pub async fn ingest(
        &self,
        event: &InboundEvent,
        signature: Option<&str>,
    ) -> WebhookResult<Uuid> {
        let event_type = event.validate()?;

        let payload = serde_json::to_value(event)
            .map_err(|e| WebhookError::Internal(format!("Failed to serialize payload: {e}")))?;

        let (event_id,): (Uuid,) = sqlx::query_as(
            r#"
            INSERT INTO verification_events
                (event_type, subject_user_id, vai_number, payload, received_signature)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING id
            "#,
        )
        .bind(event_type.as_str())
        .bind(&event.user_id)
        .bind(&event.vai_number)
        .bind(&payload)
        .bind(signature)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            tracing::error!(
                event_type = %event_type,
                vai_number = %event.vai_number,
                error = %e,
                "Failed to insert verification event"
            );
            WebhookError::Database(e.to_string())
        })?;

        Ok(event_id)
    }

    /// Insert the status update derived from an event.
    ///
    /// On failure the originating event stays `processed = false`, leaving
    /// it visible to manual reconciliation.
    pub async fn derive_status(
        &self,
        event_id: Uuid,
        vai_number: &str,
        status_type: VerificationEventType,
        status_data: &serde_json::Value,
    ) -> WebhookResult<Uuid> {
        let (status_update_id,): (Uuid,) = sqlx::query_as(
            r#"
            INSERT INTO status_updates (vai_number, status_type, status_data, event_id)
            VALUES ($1, $2, $3, $4)
            RETURNING id
            "#,
        )
        .bind(vai_number)
        .bind(status_type.as_str())
        .bind(status_data)
        .bind(event_id)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            tracing::error!(
                event_id = %event_id,
                vai_number = %vai_number,
                error = %e,
                "Failed to insert status update - event left unprocessed for reconciliation"
            );
            WebhookError::Database(e.to_string())
        })?;

        Ok(status_update_id)
    }

    /// Flip `processed` to true. Only called after `derive_status`
    /// succeeded.
    pub async fn mark_processed(&self, event_id: Uuid) -> WebhookResult<()> {
        sqlx::query(
            r#"
            UPDATE verification_events
            SET processed = TRUE, processed_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(event_id)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            tracing::error!(
                event_id = %event_id,
                error = %e,
                "Failed to mark event processed - status update exists, flag not advanced"
            );
            WebhookError::Database(e.to_string())
        })?;

        Ok(())
    }

    /// The full inbound sequence: ingest, derive the status update, mark
    /// processed. Each step is gated on the previous one; any failure
    /// aborts and surfaces the error without masking what already
    /// persisted.
    pub async fn process_event(
        &self,
        event: &InboundEvent,
        signature: Option<&str>,
    ) -> WebhookResult<ProcessedEvent> {
        let event_type = event.validate()?;

        let event_id = self.ingest(event, signature).await?;

        let status_update_id = self
            .derive_status(event_id, &event.vai_number, event_type, &event.data)
            .await?;

        self.mark_processed(event_id).await?;

        tracing::info!(
            event_id = %event_id,
            status_update_id = %status_update_id,
            event_type = %event_type,
            vai_number = %event.vai_number,
            "Processed verification event"
        );

        Ok(ProcessedEvent {
            event_id,
            status_update_id,
            event_type,
            vai_number: event.vai_number.clone(),
        })
    }

    /// List stored events, optionally filtered by processed state.
    pub async fn list_events(
        &self,
        processed: Option<bool>,
        limit: i64,
        offset: i64,
    ) -> WebhookResult<Vec<EventRecord>> {
        let records: Vec<EventRecord> = match processed {
            Some(flag) => {
                sqlx::query_as(
                    r#"
                    SELECT id, event_type, subject_user_id, vai_number, payload,
                           received_signature, processed, processed_at, created_at
                    FROM verification_events
                    WHERE processed = $1
                    ORDER BY created_at DESC
                    LIMIT $2 OFFSET $3
                    "#,
                )
                .bind(flag)
                .bind(limit)
                .bind(offset)
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query_as(
                    r#"
                    SELECT id, event_type, subject_user_id, vai_number, payload,
                           received_signature, processed, processed_at, created_at
                    FROM verification_events
                    ORDER BY created_at DESC
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

    pub async fn find_event(&self, event_id: Uuid) -> WebhookResult<Option<EventRecord>> {
        let record: Option<EventRecord> = sqlx::query_as(
            r#"
            SELECT id, event_type, subject_user_id, vai_number, payload,
                   received_signature, processed, processed_at, created_at
            FROM verification_events
            WHERE id = $1
            "#,
        )
        .bind(event_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(event_type: &str) -> InboundEvent {
        InboundEvent {
            event_type: event_type.to_string(),
            user_id: "user_123".to_string(),
            vai_number: "VAI-2024-00042".to_string(),
            timestamp: Some("2024-06-01T12:00:00Z".to_string()),
            data: serde_json::json!({"status": "revoked", "reason": "document expired"}),
        }
    }

    #[test]
    fn event_type_round_trips_wire_names() {
        for (wire, variant) in [
            ("user.status_changed", VerificationEventType::StatusChanged),
            ("user.account_updated", VerificationEventType::AccountUpdated),
            ("user.vai_revoked", VerificationEventType::VaiRevoked),
            ("user.vai_suspended", VerificationEventType::VaiSuspended),
        ] {
            assert_eq!(VerificationEventType::parse(wire), Some(variant));
            assert_eq!(variant.as_str(), wire);
        }
        assert_eq!(VerificationEventType::parse("user.deleted"), None);
    }

    #[test]
    fn validate_accepts_known_event() {
        let ev = event("user.vai_revoked");
        assert_eq!(ev.validate().unwrap(), VerificationEventType::VaiRevoked);
    }

    #[test]
    fn validate_rejects_unknown_event_type() {
        let ev = event("user.deleted");
        assert!(matches!(
            ev.validate(),
            Err(WebhookError::InvalidPayload(_))
        ));
    }

    #[test]
    fn validate_rejects_empty_identifiers() {
        let mut ev = event("user.status_changed");
        ev.user_id = "  ".to_string();
        assert!(matches!(ev.validate(), Err(WebhookError::InvalidPayload(_))));

        let mut ev = event("user.status_changed");
        ev.vai_number = String::new();
        assert!(matches!(ev.validate(), Err(WebhookError::InvalidPayload(_))));
    }

    #[test]
    fn inbound_event_preserves_opaque_data() {
        let raw = r#"{
            "event_type": "user.account_updated",
            "user_id": "user_9",
            "vai_number": "VAI-1",
            "timestamp": "2024-06-01T12:00:00Z",
            "data": {"status": "active", "reason": null, "custom_field": [1, 2, 3]}
        }"#;

        let ev: InboundEvent = serde_json::from_str(raw).unwrap();
        assert_eq!(ev.data["custom_field"], serde_json::json!([1, 2, 3]));

        // Round-trip keeps extension fields intact
        let back = serde_json::to_value(&ev).unwrap();
        assert_eq!(back["data"]["custom_field"], serde_json::json!([1, 2, 3]));
    }

    #[test]
    fn inbound_event_tolerates_missing_optional_fields() {
        let raw = r#"{"event_type": "user.vai_suspended", "user_id": "u", "vai_number": "v"}"#;
        let ev: InboundEvent = serde_json::from_str(raw).unwrap();
        assert!(ev.timestamp.is_none());
        assert!(ev.data.is_null());
        assert!(ev.validate().is_ok());
    }
}
