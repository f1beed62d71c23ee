//! Poll/report scheduler.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::agent::{Sampler, SnapshotStore};
use crate::delivery::DeliveryClient;

/// Default grace period for in-flight sends on stop (5 seconds).
pub const DEFAULT_STOP_DEADLINE: Duration = Duration::from_secs(5);

/// Errors raised by the scheduler.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// Poll or report interval is zero.
    #[error("{which} interval must be positive")]
    InvalidInterval { which: &'static str },

    /// The scheduler task panicked.
    #[error("scheduler task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// Drives sampling and reporting from one task.
pub struct Scheduler<S: Sampler> {
    sampler: S,
    store: Arc<SnapshotStore>,
    client: DeliveryClient,
}

impl<S: Sampler> std::fmt::Debug for Scheduler<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("client", &self.client)
            .finish_non_exhaustive()
    }
}

impl<S: Sampler> Scheduler<S> {
    /// Create a scheduler whose store starts with the sampler's catalog.
    pub fn new(sampler: S, client: DeliveryClient) -> Self {
        let store = Arc::new(SnapshotStore::with_catalog(sampler.catalog()));
        Self {
            sampler,
            store,
            client,
        }
    }

    /// Shared handle to the snapshot table.
    pub fn store(&self) -> Arc<SnapshotStore> {
        Arc::clone(&self.store)
    }

    /// Spawn the loop. Both intervals must be positive.
    ///
    /// The first poll and the first report happen one interval after start.
    pub fn start(self, poll: Duration, report: Duration) -> Result<SchedulerHandle, SchedulerError> {
        if poll.is_zero() {
            return Err(SchedulerError::InvalidInterval { which: "poll" });
        }
        if report.is_zero() {
            return Err(SchedulerError::InvalidInterval { which: "report" });
        }

        let cancel = CancellationToken::new();
        let store = Arc::clone(&self.store);
        let client = self.client.clone();
        let task = tokio::spawn(self.run(poll, report, cancel.clone()));
        tracing::info!(poll = ?poll, report = ?report, "Scheduler started");

        Ok(SchedulerHandle {
            cancel,
            task,
            client,
            store,
        })
    }

    async fn run(mut self, poll: Duration, report: Duration, cancel: CancellationToken) {
        let now = Instant::now();
        let mut poll_ticker = tokio::time::interval_at(now + poll, poll);
        let mut report_ticker = tokio::time::interval_at(now + report, report);
        poll_ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        report_ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = poll_ticker.tick() => {
                    let readings = self.sampler.sample();
                    tracing::trace!(count = readings.len(), "Poll");
                    self.store.record_all(readings);
                }
                _ = report_ticker.tick() => {
                    let snapshot = self.store.snapshot();
                    tracing::debug!(count = snapshot.len(), "Report");
                    if let Err(e) = self.client.dispatch(snapshot) {
                        tracing::warn!(error = %e, "Report skipped");
                    }
                }
            }
        }
        tracing::debug!("Scheduler loop stopped");
    }
}

/// Handle to a running [`Scheduler`].
pub struct SchedulerHandle {
    cancel: CancellationToken,
    task: JoinHandle<()>,
    client: DeliveryClient,
    store: Arc<SnapshotStore>,
}

impl std::fmt::Debug for SchedulerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SchedulerHandle")
            .field("cancelled", &self.cancel.is_cancelled())
            .finish_non_exhaustive()
    }
}

impl SchedulerHandle {
    /// Shared handle to the snapshot table.
    pub fn store(&self) -> Arc<SnapshotStore> {
        Arc::clone(&self.store)
    }

    /// Cancel the loop, then give in-flight sends until `deadline` to finish.
    ///
    /// Returns whether delivery drained in time.
    pub async fn stop(self, deadline: Duration) -> Result<bool, SchedulerError> {
        self.cancel.cancel();
        self.task.await?;
        let drained = self.client.drain(deadline).await;
        tracing::info!(drained, "Scheduler stopped");
        Ok(drained)
    }
}
