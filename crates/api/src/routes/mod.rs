//! HTTP routes

pub mod webhooks;

use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::json;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::state::AppState;

/// Build the application router.
///
/// The permissive CORS layer also answers OPTIONS preflights with an
/// empty body, which is what the verification provider's delivery
/// infrastructure sends before each callback.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route(
            "/webhooks/verification",
            post(webhooks::receive_verification_webhook),
        )
        .route("/webhooks/retries/process", post(webhooks::process_retries))
        .route("/webhooks/events", get(webhooks::list_events))
        .route("/webhooks/deliveries", get(webhooks::list_deliveries))
        .route(
            "/webhooks/deliveries/stats",
            get(webhooks::delivery_stats),
        )
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok", "version": env!("CARGO_PKG_VERSION") }))
}
