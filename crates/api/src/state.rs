//! Application state

use std::sync::Arc;

use sqlx::PgPool;
use veriflow_webhooks::WebhookService;

use crate::config::Config;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub pool: PgPool,
    pub config: Config,
    pub webhooks: Arc<WebhookService>,
}

impl AppState {
    pub fn new(pool: PgPool, config: Config) -> anyhow::Result<Self> {
        if config.webhook_secret.is_some() {
            tracing::info!("Inbound webhook signature verification enabled");
        }
        if let Some(endpoint) = &config.notify_endpoint_url {
            tracing::info!(endpoint = %endpoint, "Status notification dispatch enabled");
        }

        let webhooks = WebhookService::new(
            pool.clone(),
            config.webhook_secret.clone(),
            config.notify_endpoint_url.clone(),
        )?;

        Ok(Self {
            pool,
            config,
            webhooks: Arc::new(webhooks),
        })
    }
}
