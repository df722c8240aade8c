/// Periodic expiry sweep
///
/// Deletes expired refresh records and drops stale attempt counters on a fixed
/// interval. The task is owned by the process: `spawn_sweeper` starts it and
/// `SweeperHandle::stop` ends it. A failed pass is logged and the next tick
/// runs as usual.

use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};

use crate::audit::{self, AuthEvent};
use crate::auth::rate_limit::RateLimiter;
use crate::auth::refresh_token::RefreshTokenStore;
use crate::error::AppError;

/// Counts from one sweep pass
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SweepReport {
    pub refresh_records: u64,
    pub attempt_counters: usize,
}

pub struct SweeperHandle {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl SweeperHandle {
    /// Signal the loop and wait for it to exit
    pub async fn stop(self) {
        let _ = self.shutdown.send(true);
        if let Err(e) = self.task.await {
            tracing::warn!(error = %e, "Expiry sweeper task ended abnormally");
        }
    }
}

/// One pass. Counter cleanup runs even when the store purge fails.
pub async fn run_once(
    refresh_tokens: &RefreshTokenStore,
    limiter: &RateLimiter,
) -> Result<SweepReport, AppError> {
    let now = Utc::now();
    let attempt_counters = limiter.purge_stale_at(now);
    let refresh_records = refresh_tokens.purge_expired(now).await?;

    let report = SweepReport {
        refresh_records,
        attempt_counters,
    };
    audit::record(AuthEvent::Purged {
        refresh_records: report.refresh_records,
        attempt_counters: report.attempt_counters,
    });
    Ok(report)
}

/// Start the sweep loop. The first pass runs one full period after start.
pub fn spawn_sweeper(
    refresh_tokens: Arc<RefreshTokenStore>,
    limiter: Arc<RateLimiter>,
    period: Duration,
) -> SweeperHandle {
    let (shutdown, mut shutdown_rx) = watch::channel(false);

    let task = tokio::spawn(async move {
        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately
        ticker.tick().await;

        tracing::info!(period_seconds = period.as_secs(), "Expiry sweeper started");

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = run_once(&refresh_tokens, &limiter).await {
                        tracing::error!(error = %e, "Expiry sweep failed; retrying next cycle");
                    }
                }
                changed = shutdown_rx.changed() => {
                    if changed.is_err() || *shutdown_rx.borrow() {
                        break;
                    }
                }
            }
        }

        tracing::info!("Expiry sweeper stopped");
    });

    SweeperHandle { shutdown, task }
}
