// Webhook crate clippy configuration
// Test code patterns (expected in test files):
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! Veriflow Webhook Pipeline
//!
//! Propagates identity verification status between the external
//! verification provider and this application's own state.
//!
//! ## Features
//!
//! - **Signature Verification**: Validate inbound callbacks against the
//!   shared provider secret
//! - **Event Ingestion**: Durable, append-only record of inbound events
//!   and the status updates derived from them
//! - **Delivery Tracking**: Per-notification retry state with a bounded
//!   exponential backoff schedule
//! - **Retry Scheduling**: Lease-guarded batch passes over due
//!   deliveries, safe under concurrent invocation
//! - **Notification Dispatch**: Push derived status updates to a
//!   configured downstream endpoint

pub mod delivery;
pub mod dispatch;
pub mod error;
pub mod events;
pub mod scheduler;
pub mod signature;


// Delivery
pub use delivery::{
    calculate_next_attempt_at, DeliveryStats, DeliveryStatus, DeliveryTracker, OutboundDelivery,
    BACKOFF_SCHEDULE_SECS, MAX_ATTEMPTS, STALE_LEASE_MINUTES,
};

// Dispatch
pub use dispatch::{NotificationDispatcher, StatusNotification};

// Error
pub use error::{WebhookError, WebhookResult};

// Events
pub use events::{
    EventRecord, EventStore, InboundEvent, ProcessedEvent, VerificationEventType,
};

// Scheduler
pub use scheduler::{RetryScheduler, RetrySummary, DELIVERY_TIMEOUT, MAX_BATCH_SIZE};

// Signature
pub use signature::{compute_signature, SignatureCheck, SignatureVerifier};

use sqlx::PgPool;

/// Combined webhook service wiring all pipeline components to one pool.
pub struct WebhookService {
    pub signature: SignatureVerifier,
    pub events: EventStore,
    pub tracker: DeliveryTracker,
    pub scheduler: RetryScheduler,
    pub dispatcher: NotificationDispatcher,
}

impl WebhookService {
    /// Create a webhook service.
    ///
    /// `webhook_secret` is the optional shared secret for inbound
    /// verification; `notify_endpoint` is the optional downstream
    /// notification target. Both absences are valid (if insecure / quiet)
    /// configurations.
    pub fn new(
        pool: PgPool,
        webhook_secret: Option<String>,
        notify_endpoint: Option<String>,
    ) -> WebhookResult<Self> {
        Ok(Self {
            signature: SignatureVerifier::new(webhook_secret),
            events: EventStore::new(pool.clone()),
            tracker: DeliveryTracker::new(pool.clone()),
            scheduler: RetryScheduler::new(pool.clone())?,
            dispatcher: NotificationDispatcher::new(pool, notify_endpoint)?,
        })
    }
}
