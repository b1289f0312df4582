use std::collections::HashSet;

use chrono::Duration;
use futures::TryStreamExt;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::StorageError;
use crate::storage::Storage;

/// Outcome of one orphan reconciliation pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileReport {
    /// Keys listed from the byte store.
    pub scanned: u64,
    /// Unreferenced objects removed.
    pub deleted: u64,
    /// Unreferenced objects that could not be inspected or removed.
    pub failed: u64,
    /// Unreferenced objects left alone because they are younger than the
    /// grace period.
    pub skipped_recent: u64,
}

impl Storage {
    /// Delete byte store objects that no record references.
    ///
    /// The set of referenced keys is snapshotted first, then the byte store
    /// is listed lazily. Objects modified within the orphan grace period are
    /// skipped so an upload whose metadata write is still in flight is never
    /// removed. Per-object failures are counted, not returned.
    pub async fn reconcile_orphans(
        &self,
        cancel: &CancellationToken,
    ) -> Result<ReconcileReport, StorageError> {
        let mut referenced = HashSet::new();
        {
            let mut ids = self.meta.all_ids();
            while let Some(id) = ids.try_next().await? {
                if cancel.is_cancelled() {
                    return Err(StorageError::Cancelled);
                }
                if let Some(record) = self.meta.get(&id).await? {
                    referenced.insert(record.storage_key);
                }
            }
        }

        // `None` when the grace period reaches past the start of time.
        let now = self.clock.now();
        let cutoff = i64::try_from(self.config.orphan_grace_seconds)
            .ok()
            .and_then(Duration::try_seconds)
            .and_then(|grace| now.checked_sub_signed(grace));

        let mut report = ReconcileReport::default();
        let mut keys = self.blob.list_keys(None, cancel);
        while let Some(key) = keys.try_next().await? {
            report.scanned += 1;
            if referenced.contains(&key) {
                continue;
            }

            let meta = match self.blob.get_meta(&key, cancel).await {
                Ok(Some(meta)) => meta,
                Ok(None) => continue,
                Err(e) => {
                    warn!(storage_key = %key, error = %e, "failed to inspect unreferenced object");
                    report.failed += 1;
                    continue;
                }
            };
            let recent = match (cutoff, meta.last_modified) {
                (Some(cutoff), Some(modified)) => modified > cutoff,
                (None, _) => true,
                (Some(_), None) => false,
            };
            if recent {
                report.skipped_recent += 1;
                continue;
            }

            match self.blob.delete(&key, cancel).await {
                Ok(()) => {
                    debug!(storage_key = %key, "orphan deleted");
                    report.deleted += 1;
                }
                Err(e) => {
                    warn!(storage_key = %key, error = %e, "failed to delete orphan");
                    report.failed += 1;
                }
            }
        }

        self.metrics.add_orphans_deleted(report.deleted);
        if report.deleted > 0 || report.failed > 0 {
            info!(
                scanned = report.scanned,
                deleted = report.deleted,
                failed = report.failed,
                skipped_recent = report.skipped_recent,
                "orphan reconciliation complete"
            );
        }
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use lapse_blob::testing::chunked_stream;
    use lapse_blob::{ByteStore, SaveOptions};
    use lapse_core::StorageConfig;

    use super::*;
    use crate::test_support::Harness;

    async fn plant_orphan(h: &Harness, key: &str) {
        h.blob
            .save(
                key,
                chunked_stream(b"nobody owns me", 5),
                &SaveOptions::default(),
                &CancellationToken::new(),
            )
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn removes_only_unreferenced_objects() {
        let h = Harness::new(StorageConfig {
            orphan_grace_seconds: 0,
            ..StorageConfig::default()
        })
        .await;
        let live = h.upload("live.txt", b"keep me", 60).await;
        plant_orphan(&h, "aa/orphan-1").await;
        plant_orphan(&h, "bb/orphan-2").await;
        h.clock.advance(Duration::seconds(5));

        let report = h.storage.reconcile_orphans(&CancellationToken::new()).await.unwrap();
        assert_eq!(report.scanned, 3);
        assert_eq!(report.deleted, 2);
        assert_eq!(report.failed, 0);
        assert_eq!(h.keys().await, vec![live.storage_key.clone()]);
        assert_eq!(h.storage.metrics().snapshot().orphans_deleted, 2);
    }

    #[tokio::test]
    async fn recent_objects_are_left_alone() {
        let h = Harness::new(StorageConfig {
            orphan_grace_seconds: 3600,
            ..StorageConfig::default()
        })
        .await;
        plant_orphan(&h, "cc/in-flight").await;

        let report = h.storage.reconcile_orphans(&CancellationToken::new()).await.unwrap();
        assert_eq!(report.deleted, 0);
        assert_eq!(report.skipped_recent, 1);
        assert_eq!(h.keys().await.len(), 1);

        h.clock.advance(Duration::hours(2));
        let report = h.storage.reconcile_orphans(&CancellationToken::new()).await.unwrap();
        assert_eq!(report.deleted, 1);
        assert!(h.keys().await.is_empty());
    }

    #[tokio::test]
    async fn delete_failures_are_counted() {
        let h = Harness::new(StorageConfig {
            orphan_grace_seconds: 0,
            ..StorageConfig::default()
        })
        .await;
        plant_orphan(&h, "dd/stuck").await;
        h.blob.fail_deletes_of("dd/stuck");
        h.clock.advance(Duration::seconds(5));

        let report = h.storage.reconcile_orphans(&CancellationToken::new()).await.unwrap();
        assert_eq!(report.deleted, 0);
        assert_eq!(report.failed, 1);
    }

    #[tokio::test]
    async fn cancelled_pass_stops() {
        let h = Harness::with_defaults().await;
        h.upload("a.txt", b"x", 60).await;
        let cancel = CancellationToken::new();
        cancel.cancel();
        assert!(matches!(
            h.storage.reconcile_orphans(&cancel).await,
            Err(StorageError::Cancelled)
        ));
    }
}
