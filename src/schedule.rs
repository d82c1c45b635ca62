//! Recurring sync: re-run the scan driver on a fixed interval until it
//! reports a terminal outcome or the process is interrupted.

use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::download::error::SyncError;
use crate::request::Request;
use crate::scan::{ScanDriver, ScanOutcome};

/// Source of delays between sync runs.
#[async_trait]
pub trait Clock: Send + Sync {
    async fn sleep(&self, duration: Duration);
}

/// Real time, via the tokio timer.
pub struct TokioClock;

#[async_trait]
impl Clock for TokioClock {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Something that can run one scan; implemented by [`ScanDriver`].
#[async_trait]
pub trait RunOnce: Send + Sync {
    async fn run(&self, request: &Request) -> Result<ScanOutcome, SyncError>;
}

#[async_trait]
impl RunOnce for ScanDriver {
    async fn run(&self, request: &Request) -> Result<ScanOutcome, SyncError> {
        self.run_once(request).await.map(|r| r.outcome)
    }
}

/// Run `request` repeatedly, sleeping `interval` between runs.
///
/// `Completed` and `CaughtUp` schedule another run; any other outcome ends
/// the loop and is returned. `run_count` starts at the request's value and is
/// incremented for every run after the first.
pub async fn run_sync_loop(
    runner: &dyn RunOnce,
    clock: &dyn Clock,
    request: &Request,
    interval: Duration,
    cancel: &CancellationToken,
) -> Result<ScanOutcome, SyncError> {
    let mut request = request.clone();
    loop {
        tracing::info!(run = request.run_count, "Starting sync run");
        let outcome = runner.run(&request).await?;
        if !matches!(outcome, ScanOutcome::Completed | ScanOutcome::CaughtUp) {
            return Ok(outcome);
        }

        tracing::info!("Next sync in {}s", interval.as_secs());
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                tracing::info!("Sync loop stopped");
                return Ok(ScanOutcome::Aborted);
            }
            _ = clock.sleep(interval) => {}
        }
        request.run_count += 1;
    }
}
