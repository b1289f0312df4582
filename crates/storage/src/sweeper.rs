//! Background removal of expired files and orphaned objects.

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use futures::{StreamExt, stream};
use serde::Serialize;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use lapse_core::{SearchFilter, SweepConfig};

use crate::error::StorageError;
use crate::storage::Storage;

/// Outcome of one sweep cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SweepSummary {
    /// Expired records discovered this cycle.
    pub expired_found: u64,
    /// Expired records a deletion was attempted for.
    pub expired_processed: u64,
    /// Expired records removed.
    pub deleted: u64,
    /// Expired records whose deletion failed; retried next cycle.
    pub failed: u64,
    /// Unreferenced objects removed by reconciliation.
    pub orphans_deleted: u64,
    /// Unreferenced objects reconciliation could not remove.
    pub orphans_failed: u64,
}

/// Resets the in-progress flag however the cycle ends.
struct RunningGuard<'a>(&'a AtomicBool);

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Single-flight lifecycle sweeper.
///
/// At most one cycle runs at a time; a [`run`](Self::run) call that finds a
/// cycle in progress returns `None` immediately.
#[derive(Debug)]
pub struct Sweeper {
    storage: Arc<Storage>,
    config: SweepConfig,
    running: AtomicBool,
}

impl Sweeper {
    pub fn new(storage: Arc<Storage>, config: SweepConfig) -> Self {
        Self {
            storage,
            config,
            running: AtomicBool::new(false),
        }
    }

    /// Whether a cycle is currently in progress.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Run one cycle unless one is already running.
    pub async fn run(&self) -> Option<SweepSummary> {
        self.run_with_cancel(&CancellationToken::new()).await
    }

    /// Run one cycle, stopping early once `cancel` fires.
    pub async fn run_with_cancel(&self, cancel: &CancellationToken) -> Option<SweepSummary> {
        if self
            .running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!("sweep already in progress; skipping");
            self.storage.metrics().increment_sweeps_skipped();
            return None;
        }
        let _guard = RunningGuard(&self.running);

        let mut summary = SweepSummary::default();
        self.remove_expired(&mut summary, cancel).await;

        if cancel.is_cancelled() {
            info!(?summary, "sweep cancelled");
            return Some(summary);
        }
        match self.storage.reconcile_orphans(cancel).await {
            Ok(report) => {
                summary.orphans_deleted = report.deleted;
                summary.orphans_failed = report.failed;
            }
            Err(e) => error!(error = %e, "orphan reconciliation failed"),
        }

        let metrics = self.storage.metrics();
        metrics.increment_sweeps_run();
        metrics.add_expired_deleted(summary.deleted);
        info!(
            expired_found = summary.expired_found,
            expired_processed = summary.expired_processed,
            deleted = summary.deleted,
            failed = summary.failed,
            orphans_deleted = summary.orphans_deleted,
            orphans_failed = summary.orphans_failed,
            "sweep cycle complete"
        );
        Some(summary)
    }

    /// Page through records expired as of the cycle start and delete them.
    ///
    /// Failed records stay in the result set ahead of unprocessed ones, so
    /// the next page starts after them.
    async fn remove_expired(&self, summary: &mut SweepSummary, cancel: &CancellationToken) {
        let as_of = self.storage.clock().now();
        let mut seen = HashSet::new();
        let mut failed_so_far = 0u32;

        while summary.expired_found < self.config.max_per_cycle && !cancel.is_cancelled() {
            let remaining = self.config.max_per_cycle - summary.expired_found;
            let limit = u32::try_from(remaining)
                .unwrap_or(u32::MAX)
                .min(self.config.batch_size);
            let filter = SearchFilter {
                offset: Some(failed_so_far),
                ..SearchFilter::expired(as_of, limit)
            };

            let page = match self.storage.search(filter).await {
                Ok(page) => page,
                Err(e) => {
                    error!(error = %e, "failed to search expired records");
                    return;
                }
            };
            let batch: Vec<String> = page
                .records
                .into_iter()
                .map(|r| r.id)
                .filter(|id| seen.insert(id.clone()))
                .collect();
            if batch.is_empty() {
                return;
            }
            summary.expired_found += batch.len() as u64;

            let results: Vec<(String, Result<_, StorageError>)> = stream::iter(batch)
                .map(|id| async move {
                    let result = self.storage.delete_by_id(&id).await;
                    (id, result)
                })
                .buffer_unordered(self.config.concurrency.max(1))
                .collect()
                .await;

            for (id, result) in results {
                summary.expired_processed += 1;
                match result {
                    Ok(_) => summary.deleted += 1,
                    // Removed concurrently by someone else.
                    Err(StorageError::NotFound(_)) => {}
                    Err(e) => {
                        warn!(id = %id, error = %e, "failed to delete expired record");
                        summary.failed += 1;
                        failed_so_far = failed_so_far.saturating_add(1);
                    }
                }
            }
        }
    }

    /// Run a cycle every `interval` until `shutdown` fires.
    ///
    /// The first cycle starts immediately. A cycle in progress when shutdown
    /// is requested is cancelled.
    pub async fn run_periodic(&self, interval: Duration, shutdown: CancellationToken) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(interval_secs = interval.as_secs(), "lifecycle sweeper started");

        loop {
            tokio::select! {
                () = shutdown.cancelled() => {
                    info!("lifecycle sweeper received shutdown signal");
                    break;
                }
                _ = ticker.tick() => {
                    self.run_with_cancel(&shutdown).await;
                }
            }
        }
    }
}
