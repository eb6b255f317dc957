//! Bill Item Scheduler
//!
//! The batch entry point of the billing system. Each sweep runs the
//! [`GenerationJob`]: due upcoming bill items become bill items, pending
//! items past their billing date are billed, and running subscriptions get
//! their next period staged.
//!
//! The binary `bill-item-scheduler` either runs one sweep and exits (the
//! nightly cron setup) or keeps sweeping on an interval until it receives
//! Ctrl+C or SIGTERM.

pub mod config;

use std::future::Future;
use std::time::Duration;

use chrono::Utc;
use infra_db::{DatabaseError, GenerationJob, GenerationReport};
use tracing::{error, info};

pub use config::SchedulerConfig;

/// Runs one sweep as of the current time
pub async fn run_once(job: &GenerationJob) -> Result<GenerationReport, DatabaseError> {
    job.run(Utc::now()).await
}

/// Sweeps every `interval` until `shutdown` resolves
///
/// A sweep that fails is logged and the loop carries on. Shutdown is
/// checked before each tick; a sweep in progress is finished first.
///
/// # Returns
///
/// The number of sweeps that completed
pub async fn run_until<F>(job: &GenerationJob, interval: Duration, shutdown: F) -> u64
where
    F: Future<Output = ()>,
{
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    tokio::pin!(shutdown);

    let mut sweeps = 0;
    loop {
        tokio::select! {
            biased;
            _ = &mut shutdown => {
                info!(sweeps, "Scheduler stopping");
                return sweeps;
            }
            _ = ticker.tick() => {
                match run_once(job).await {
                    Ok(_) => sweeps += 1,
                    Err(e) => error!(error = %e, "Sweep failed"),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use infra_db::GenerationConfig;
    use sqlx::postgres::PgPoolOptions;

    #[tokio::test]
    async fn test_pending_shutdown_stops_before_the_first_sweep() {
        let pool = PgPoolOptions::new()
            .connect_lazy("postgres://localhost/unreachable")
            .unwrap();
        let job = GenerationJob::new(pool, GenerationConfig::default());

        let sweeps = run_until(&job, Duration::from_secs(60), async {}).await;
        assert_eq!(sweeps, 0);
    }
}
