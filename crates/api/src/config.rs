//! Environment configuration

use anyhow::Context;

/// Server configuration loaded from the environment.
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    /// Shared secret for inbound webhook signatures. Absence is a valid
    /// (if insecure) configuration: webhooks are accepted unverified.
    pub webhook_secret: Option<String>,
    /// Downstream endpoint for status notifications. Absence disables
    /// outbound dispatch.
    pub notify_endpoint_url: Option<String>,
    pub port: u16,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        let database_url =
            std::env::var("DATABASE_URL").context("DATABASE_URL must be set")?;

        let webhook_secret = std::env::var("VERIFICATION_WEBHOOK_SECRET")
            .ok()
            .filter(|s| !s.is_empty());

        let notify_endpoint_url = std::env::var("NOTIFY_ENDPOINT_URL")
            .ok()
            .filter(|s| !s.is_empty());

        let port = std::env::var("PORT")
            .ok()
            .and_then(|p| p.parse().ok())
            .unwrap_or(8080);

        Ok(Self {
            database_url,
            webhook_secret,
            notify_endpoint_url,
            port,
        })
    }
}
