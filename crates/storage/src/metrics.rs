use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Atomic counters tracking storage outcomes.
///
/// All counters use relaxed ordering. For a point-in-time view, call
/// [`snapshot`](Self::snapshot).
#[derive(Debug, Default)]
pub struct StorageMetrics {
    /// Uploads that produced a record.
    pub uploads: AtomicU64,
    /// Uploads linked to an existing object instead of keeping their own.
    pub dedup_hits: AtomicU64,
    /// Downloads opened.
    pub downloads: AtomicU64,
    /// Records deleted through the orchestrator.
    pub deletions: AtomicU64,
    /// Objects whose bytes could not be removed (left as orphans).
    pub byte_delete_failures: AtomicU64,
    /// Sweep cycles completed.
    pub sweeps_run: AtomicU64,
    /// Sweep requests ignored because a cycle was already running.
    pub sweeps_skipped: AtomicU64,
    /// Expired records removed by the sweeper.
    pub expired_deleted: AtomicU64,
    /// Unreferenced objects removed by reconciliation.
    pub orphans_deleted: AtomicU64,
}

impl StorageMetrics {
    pub fn increment_uploads(&self) {
        self.uploads.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_dedup_hits(&self) {
        self.dedup_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_downloads(&self) {
        self.downloads.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_deletions(&self) {
        self.deletions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_byte_delete_failures(&self) {
        self.byte_delete_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_sweeps_run(&self) {
        self.sweeps_run.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_sweeps_skipped(&self) {
        self.sweeps_skipped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_expired_deleted(&self, n: u64) {
        self.expired_deleted.fetch_add(n, Ordering::Relaxed);
    }

    pub fn add_orphans_deleted(&self, n: u64) {
        self.orphans_deleted.fetch_add(n, Ordering::Relaxed);
    }

    /// Take a point-in-time snapshot of all counters.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            uploads: self.uploads.load(Ordering::Relaxed),
            dedup_hits: self.dedup_hits.load(Ordering::Relaxed),
            downloads: self.downloads.load(Ordering::Relaxed),
            deletions: self.deletions.load(Ordering::Relaxed),
            byte_delete_failures: self.byte_delete_failures.load(Ordering::Relaxed),
            sweeps_run: self.sweeps_run.load(Ordering::Relaxed),
            sweeps_skipped: self.sweeps_skipped.load(Ordering::Relaxed),
            expired_deleted: self.expired_deleted.load(Ordering::Relaxed),
            orphans_deleted: self.orphans_deleted.load(Ordering::Relaxed),
        }
    }
}

/// A plain data snapshot of [`StorageMetrics`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub uploads: u64,
    pub dedup_hits: u64,
    pub downloads: u64,
    pub deletions: u64,
    pub byte_delete_failures: u64,
    pub sweeps_run: u64,
    pub sweeps_skipped: u64,
    pub expired_deleted: u64,
    pub orphans_deleted: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_metrics_are_zero() {
        assert_eq!(StorageMetrics::default().snapshot(), MetricsSnapshot::default());
    }

    #[test]
    fn counters_accumulate() {
        let m = StorageMetrics::default();
        m.increment_uploads();
        m.increment_uploads();
        m.increment_dedup_hits();
        m.add_expired_deleted(5);
        m.add_orphans_deleted(0);
        let snap = m.snapshot();
        assert_eq!(snap.uploads, 2);
        assert_eq!(snap.dedup_hits, 1);
        assert_eq!(snap.expired_deleted, 5);
        assert_eq!(snap.orphans_deleted, 0);
    }
}
