//! Webhook endpoints
//!
//! Inbound verification callbacks, the manual retry trigger, and the
//! operator read surface over stored events and deliveries.

use axum::body::Bytes;
use axum::extract::{Query, State};
use axum::http::HeaderMap;
use axum::Json;
use serde::Deserialize;
use serde_json::json;
use veriflow_webhooks::{
    DeliveryStatus, InboundEvent, StatusNotification, MAX_BATCH_SIZE,
};

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

/// Header carrying the provider's signature over the raw body.
pub const SIGNATURE_HEADER: &str = "x-vai-signature";

const DEFAULT_PAGE_SIZE: i64 = 50;
const MAX_PAGE_SIZE: i64 = 200;

/// POST /webhooks/verification
///
/// Receives one provider callback. The raw body is verified before any
/// parsing; a mismatched signature short-circuits to 401 and nothing is
/// stored. Storage failures return 500 with whatever partial state was
/// reached left in place for reconciliation — redelivery is the
/// provider's responsibility.
pub async fn receive_verification_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<Json<serde_json::Value>> {
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok());

    state.webhooks.signature.verify(&body, signature)?;

    let event: InboundEvent = serde_json::from_slice(&body)
        .map_err(|e| ApiError::BadRequest(format!("malformed JSON body: {e}")))?;

    let processed = state.webhooks.events.process_event(&event, signature).await?;

    // Downstream dispatch is fire-and-forget: the provider's request has
    // succeeded once the event and status update are durable.
    if state.webhooks.dispatcher.is_enabled() {
        let dispatcher = state.webhooks.dispatcher.clone();
        let notification = StatusNotification::from_processed(&processed, event.data.clone());
        tokio::spawn(async move {
            dispatcher.dispatch(&notification).await;
        });
    }

    Ok(Json(json!({
        "success": true,
        "message": format!("Processed {}", processed.event_type),
        "event_id": processed.event_id,
    })))
}

/// POST /webhooks/retries/process
///
/// Runs exactly one retry pass over a full batch and reports the counts.
/// Never loops and never waits for future retries; a top-level failure
/// is a plain 500.
pub async fn process_retries(
    State(state): State<AppState>,
) -> ApiResult<Json<serde_json::Value>> {
    let summary = state.webhooks.scheduler.run_pass(MAX_BATCH_SIZE).await?;

    Ok(Json(json!({ "results": summary })))
}

#[derive(Debug, Deserialize)]
pub struct ListEventsQuery {
    pub processed: Option<bool>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

/// GET /webhooks/events
pub async fn list_events(
    State(state): State<AppState>,
    Query(query): Query<ListEventsQuery>,
) -> ApiResult<Json<serde_json::Value>> {
    let limit = query
        .limit
        .unwrap_or(DEFAULT_PAGE_SIZE)
        .clamp(1, MAX_PAGE_SIZE);
    let offset = query.offset.unwrap_or(0).max(0);

    let events = state
        .webhooks
        .events
        .list_events(query.processed, limit, offset)
        .await?;

    Ok(Json(json!({ "events": events, "limit": limit, "offset": offset })))
}

#[derive(Debug, Deserialize)]
pub struct ListDeliveriesQuery {
    pub status: Option<String>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

/// GET /webhooks/deliveries
pub async fn list_deliveries(
    State(state): State<AppState>,
    Query(query): Query<ListDeliveriesQuery>,
) -> ApiResult<Json<serde_json::Value>> {
    let status = match &query.status {
        Some(s) => Some(
            DeliveryStatus::parse(s)
                .ok_or_else(|| ApiError::BadRequest(format!("unknown status '{s}'")))?,
        ),
        None => None,
    };

    let limit = query
        .limit
        .unwrap_or(DEFAULT_PAGE_SIZE)
        .clamp(1, MAX_PAGE_SIZE);
    let offset = query.offset.unwrap_or(0).max(0);

    let deliveries = state
        .webhooks
        .tracker
        .list_deliveries(status, limit, offset)
        .await?;

    Ok(Json(json!({ "deliveries": deliveries, "limit": limit, "offset": offset })))
}

/// GET /webhooks/deliveries/stats
pub async fn delivery_stats(
    State(state): State<AppState>,
) -> ApiResult<Json<serde_json::Value>> {
    let stats = state.webhooks.tracker.stats().await?;
    Ok(Json(json!({ "stats": stats })))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use veriflow_webhooks::RetrySummary;

    #[test]
    fn retry_summary_serializes_to_results_shape() {
        let summary = RetrySummary {
            processed: 3,
            succeeded: 1,
            failed: 1,
            exhausted: 1,
        };

        let body = json!({ "results": summary });
        assert_eq!(body["results"]["processed"], 3);
        assert_eq!(body["results"]["succeeded"], 1);
        assert_eq!(body["results"]["failed"], 1);
        assert_eq!(body["results"]["exhausted"], 1);
    }

    #[test]
    fn empty_pass_reports_zero_counts() {
        let body = json!({ "results": RetrySummary::default() });
        assert_eq!(
            body["results"],
            json!({ "processed": 0, "succeeded": 0, "failed": 0, "exhausted": 0 })
        );
    }

    #[test]
    fn list_queries_tolerate_missing_fields() {
        let q: ListEventsQuery = serde_json::from_value(json!({ "processed": false })).unwrap();
        assert_eq!(q.processed, Some(false));
        assert!(q.limit.is_none());
        assert!(q.offset.is_none());

        let q: ListDeliveriesQuery = serde_json::from_value(json!({})).unwrap();
        assert!(q.status.is_none());
    }
}
