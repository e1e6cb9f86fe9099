//! Veriflow Background Worker
//!
//! Handles scheduled jobs including:
//! - Outbound delivery retry passes (every minute)
//! - Stale in-flight lease recovery (every 10 minutes)
//! - Health check heartbeat (every 5 minutes)
//!
//! The worker is the periodic clock behind the retry scheduler; the
//! scheduler itself never loops. Operators can run the same pass on
//! demand through the API's manual trigger endpoint.

use std::time::Duration;

use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{error, info};
use veriflow_webhooks::{RetryScheduler, MAX_BATCH_SIZE};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    // Load environment
    dotenvy::dotenv().ok();

    info!("Starting Veriflow Worker");

    let database_url = std::env::var("DATABASE_URL")
        .map_err(|_| anyhow::anyhow!("DATABASE_URL must be set"))?;

    // Create database pool
    let pool = veriflow_shared::create_pool(&database_url).await?;

    let retry_scheduler = RetryScheduler::new(pool.clone())
        .map_err(|e| anyhow::anyhow!("Failed to create retry scheduler: {e}"))?;

    // Create scheduler
    let scheduler = JobScheduler::new().await?;

    // Job 1: Process due outbound deliveries (every minute)
    let pass_scheduler = retry_scheduler.clone();
    scheduler
        .add(Job::new_async("0 * * * * *", move |_uuid, _l| {
            let retry = pass_scheduler.clone();
            Box::pin(async move {
                match retry.run_pass(MAX_BATCH_SIZE).await {
                    Ok(summary) => {
                        if summary.processed > 0 {
                            info!(
                                processed = summary.processed,
                                succeeded = summary.succeeded,
                                failed = summary.failed,
                                exhausted = summary.exhausted,
                                "Scheduled retry pass complete"
                            );
                        }
                    }
                    Err(e) => {
                        error!(error = %e, "Scheduled retry pass failed");
                    }
                }
            })
        })?)
        .await?;
    info!("Scheduled: Outbound delivery retry pass (every minute)");

    // Job 2: Recover stale in-flight leases (every 10 minutes)
    let lease_scheduler = retry_scheduler.clone();
    scheduler
        .add(Job::new_async("0 */10 * * * *", move |_uuid, _l| {
            let retry = lease_scheduler.clone();
            Box::pin(async move {
                match retry.release_stale_leases().await {
                    Ok(released) => {
                        if released > 0 {
                            info!(released = released, "Recovered stale delivery leases");
                        }
                    }
                    Err(e) => {
                        error!(error = %e, "Stale lease recovery failed");
                    }
                }
            })
        })?)
        .await?;
    info!("Scheduled: Stale lease recovery (every 10 minutes)");

    // Job 3: Health check heartbeat (every 5 minutes)
    scheduler
        .add(Job::new_async("0 */5 * * * *", |_uuid, _l| {
            Box::pin(async move {
                info!("Worker heartbeat - all systems operational");
            })
        })?)
        .await?;
    info!("Scheduled: Health check heartbeat (every 5 minutes)");

    // Start the scheduler
    info!("Starting job scheduler");
    scheduler.start().await?;

    info!("Veriflow Worker started successfully with 3 scheduled jobs");

    // Keep the main task running
    // The scheduler runs jobs in background tasks
    loop {
        tokio::time::sleep(Duration::from_secs(3600)).await;
    }
}
