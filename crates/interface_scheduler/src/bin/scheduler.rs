//! Bill Item Scheduler Binary
//!
//! # Usage
//!
//! ```bash
//! # One sweep, then exit
//! SCHEDULER_DATABASE_URL=postgres://... cargo run --bin bill-item-scheduler
//!
//! # Sweep every hour until stopped
//! SCHEDULER_RUN_INTERVAL_SECS=3600 cargo run --bin bill-item-scheduler
//! ```
//!
//! # Environment Variables
//!
//! * `SCHEDULER_DATABASE_URL` - PostgreSQL connection string
//! * `SCHEDULER_MAX_CONNECTIONS` / `SCHEDULER_MIN_CONNECTIONS` - pool sizing (default: 10 / 2)
//! * `SCHEDULER_LOG_LEVEL` - trace, debug, info, warn, error (default: info)
//! * `SCHEDULER_TIMEZONE` - IANA timezone for the "due today" cutoff (default: UTC)
//! * `SCHEDULER_BATCH_SIZE` - rows per phase per sweep (default: 500)
//! * `SCHEDULER_RUN_INTERVAL_SECS` - seconds between sweeps, 0 for a single sweep (default: 0)

use anyhow::Context;
use infra_db::{create_pool, run_migrations, GenerationJob};
use interface_scheduler::{run_once, run_until, SchedulerConfig};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present (useful for local development)
    dotenvy::dotenv().ok();

    let config = SchedulerConfig::from_env().context("invalid SCHEDULER_* configuration")?;
    init_tracing(&config.log_level);

    tracing::info!(
        timezone = %config.timezone.0,
        batch_size = config.batch_size,
        run_interval_secs = config.run_interval_secs,
        "Starting bill item scheduler"
    );

    let pool = create_pool(config.database())
        .await
        .context("failed to connect to the billing database")?;
    run_migrations(&pool).await.context("failed to apply migrations")?;

    let job = GenerationJob::new(pool.clone(), config.generation());

    match config.run_interval() {
        None => {
            let report = run_once(&job).await.context("sweep failed")?;
            tracing::info!(?report, "Single sweep complete");
        }
        Some(interval) => {
            run_until(&job, interval, shutdown_signal()).await;
        }
    }

    pool.close().await;
    tracing::info!("Scheduler shutdown complete");
    Ok(())
}

/// Initializes the tracing subscriber for structured logging.
fn init_tracing(log_level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(log_level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_target(true))
        .init();
}

/// Waits for shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, finishing current sweep");
        }
        _ = terminate => {
            tracing::info!("Received SIGTERM, finishing current sweep");
        }
    }
}
