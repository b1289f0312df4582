use std::collections::BTreeMap;
use std::sync::Arc;

use futures::TryStreamExt;
use parking_lot::Mutex;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use lapse_blob::{BlobStream, ByteRange, ByteStore, SaveOptions};
use lapse_core::{
    AggregateStats, Clock, ContentHasher, FileRecord, SearchFilter, SearchPage, StorageConfig,
    SystemClock, storage_key_for,
};
use lapse_meta::MetadataStore;

use crate::error::StorageError;
use crate::metrics::StorageMetrics;

/// An upload as handed to [`Storage::upload`].
pub struct UploadRequest {
    /// Filename supplied by the uploader.
    pub original_name: String,
    /// MIME type claimed by the uploader.
    pub mime_type: String,
    /// Size announced by the uploader, if known. The stream may not exceed
    /// it, nor the configured maximum.
    pub declared_size: Option<u64>,
    /// The payload.
    pub body: BlobStream,
}

impl std::fmt::Debug for UploadRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UploadRequest")
            .field("original_name", &self.original_name)
            .field("mime_type", &self.mime_type)
            .field("declared_size", &self.declared_size)
            .finish_non_exhaustive()
    }
}

/// An open download.
pub struct Download {
    pub record: FileRecord,
    pub body: BlobStream,
}

impl std::fmt::Debug for Download {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Download")
            .field("record", &self.record)
            .finish_non_exhaustive()
    }
}

/// Reachability of both backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct HealthStatus {
    pub byte_store: bool,
    pub metadata_store: bool,
}

impl HealthStatus {
    pub fn is_healthy(&self) -> bool {
        self.byte_store && self.metadata_store
    }
}

/// The storage orchestrator.
///
/// Bytes are always written before metadata and metadata is always removed
/// before bytes, so a crash in between can leave an unreferenced object but
/// never a record without content. [`reconcile_orphans`](Self::reconcile_orphans)
/// collects the leftovers.
pub struct Storage {
    pub(crate) blob: Arc<dyn ByteStore>,
    pub(crate) meta: Arc<dyn MetadataStore>,
    pub(crate) config: StorageConfig,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) metrics: StorageMetrics,
}

impl std::fmt::Debug for Storage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Storage")
            .field("config", &self.config)
            .field("clock", &self.clock)
            .finish_non_exhaustive()
    }
}

impl Storage {
    pub fn new(
        blob: Arc<dyn ByteStore>,
        meta: Arc<dyn MetadataStore>,
        config: StorageConfig,
    ) -> Self {
        Self {
            blob,
            meta,
            config,
            clock: Arc::new(SystemClock),
            metrics: StorageMetrics::default(),
        }
    }

    /// Replace the time source used for upload timestamps and expiry checks.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn config(&self) -> &StorageConfig {
        &self.config
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    pub fn metrics(&self) -> &StorageMetrics {
        &self.metrics
    }

    fn validate(&self, request: &UploadRequest, ttl_seconds: u64) -> Result<(), StorageError> {
        let cfg = &self.config;
        if ttl_seconds < cfg.ttl_min_seconds || ttl_seconds > cfg.ttl_max_seconds {
            return Err(StorageError::Validation(format!(
                "ttl {ttl_seconds}s outside [{}, {}]",
                cfg.ttl_min_seconds, cfg.ttl_max_seconds
            )));
        }
        if request.mime_type.trim().is_empty() {
            return Err(StorageError::Validation("mime type is empty".to_owned()));
        }
        if !cfg.allows_mime(&request.mime_type) {
            return Err(StorageError::Validation(format!(
                "mime type '{}' not allowed",
                request.mime_type
            )));
        }
        if let Some(declared) = request.declared_size
            && declared > cfg.max_file_size
        {
            return Err(StorageError::Validation(format!(
                "declared size {declared} exceeds limit of {} bytes",
                cfg.max_file_size
            )));
        }
        Ok(())
    }

    /// Remove an object nobody references any more. Failures only leave an
    /// orphan behind, so they are logged and counted.
    async fn discard_object(&self, key: &str) {
        if let Err(e) = self.blob.delete(key, &CancellationToken::new()).await {
            warn!(storage_key = %key, error = %e, "failed to delete object; left for reconciliation");
            self.metrics.increment_byte_delete_failures();
        }
    }

    /// Store a new file.
    ///
    /// Validation happens before any I/O. The payload is hashed while it
    /// streams into a fresh object; with deduplication enabled an existing
    /// object with the same hash and MIME type is reused and the fresh copy
    /// discarded.
    #[instrument(
        skip(self, request, custom_metadata, cancel),
        fields(name = %request.original_name, mime = %request.mime_type)
    )]
    pub async fn upload(
        &self,
        request: UploadRequest,
        ttl_seconds: Option<u64>,
        custom_metadata: BTreeMap<String, String>,
        cancel: &CancellationToken,
    ) -> Result<FileRecord, StorageError> {
        let ttl_seconds = ttl_seconds.unwrap_or(self.config.default_ttl_seconds);
        self.validate(&request, ttl_seconds)?;

        let UploadRequest {
            original_name,
            mime_type,
            declared_size,
            body,
        } = request;

        let hasher = Arc::new(Mutex::new(ContentHasher::new()));
        let tap = Arc::clone(&hasher);
        let body: BlobStream = Box::pin(body.inspect_ok(move |chunk| tap.lock().update(chunk)));

        let max = self.config.max_file_size;
        let fresh_key = storage_key_for(&uuid::Uuid::new_v4());
        let options = SaveOptions {
            content_type: Some(mime_type.clone()),
            limit: Some(declared_size.map_or(max, |d| d.min(max))),
            ..SaveOptions::default()
        };
        let saved = self.blob.save(&fresh_key, body, &options, cancel).await?;
        let content_hash = std::mem::take(&mut *hasher.lock()).finalize();
        let uploaded_at = self.clock.now();

        let record_for = |storage_key: &str| {
            FileRecord::new(
                original_name.clone(),
                mime_type.clone(),
                saved.size,
                content_hash.clone(),
                storage_key,
                uploaded_at,
                ttl_seconds,
                custom_metadata.clone(),
            )
        };

        if self.config.deduplication {
            let existing = match self.meta.find_by_hash(&content_hash).await {
                Ok(existing) => existing,
                Err(e) => {
                    self.discard_object(&fresh_key).await;
                    return Err(e.into());
                }
            };
            if let Some(existing) = existing
                && existing.mime_type == mime_type
            {
                let linked = record_for(&existing.storage_key);
                match self.meta.put_if_referenced(&linked).await {
                    Ok(true) => {
                        self.discard_object(&fresh_key).await;
                        self.metrics.increment_uploads();
                        self.metrics.increment_dedup_hits();
                        info!(id = %linked.id, storage_key = %linked.storage_key, size = linked.size, "upload deduplicated");
                        return Ok(linked);
                    }
                    Ok(false) => debug!("dedup target vanished; keeping fresh object"),
                    Err(e) => {
                        self.discard_object(&fresh_key).await;
                        return Err(e.into());
                    }
                }
            }
        }

        let record = record_for(&fresh_key);
        if let Err(e) = self.meta.put(&record).await {
            self.discard_object(&fresh_key).await;
            return Err(e.into());
        }
        self.metrics.increment_uploads();
        info!(id = %record.id, storage_key = %record.storage_key, size = record.size, "file stored");
        Ok(record)
    }

    /// Open a live file for reading, optionally a byte range of it.
    ///
    /// Expired records are reported as [`StorageError::NotFound`] even if the
    /// sweeper has not removed them yet.
    pub async fn download(
        &self,
        id: &str,
        range: Option<ByteRange>,
        cancel: &CancellationToken,
    ) -> Result<Download, StorageError> {
        let record = self.live_record(id).await?;
        let body = self
            .blob
            .open_range_stream(&record.storage_key, range, cancel)
            .await?;
        self.metrics.increment_downloads();
        Ok(Download { record, body })
    }

    /// Fetch a record that exists and has not expired.
    pub async fn live_record(&self, id: &str) -> Result<FileRecord, StorageError> {
        match self.meta.get(id).await? {
            Some(record) if !record.is_expired_at(self.clock.now()) => Ok(record),
            _ => Err(StorageError::NotFound(id.to_owned())),
        }
    }

    /// Delete a file. Its bytes go only when no other record shares them.
    #[instrument(skip(self))]
    pub async fn delete_by_id(&self, id: &str) -> Result<FileRecord, StorageError> {
        let removed = self
            .meta
            .delete(id)
            .await?
            .ok_or_else(|| StorageError::NotFound(id.to_owned()))?;
        if removed.remaining_refs == 0 {
            self.discard_object(&removed.record.storage_key).await;
        } else {
            debug!(
                storage_key = %removed.record.storage_key,
                remaining_refs = removed.remaining_refs,
                "object still shared; bytes kept"
            );
        }
        self.metrics.increment_deletions();
        Ok(removed.record)
    }

    /// Search records. An unset `as_of` is taken from the storage clock.
    pub async fn search(&self, mut filter: SearchFilter) -> Result<SearchPage, StorageError> {
        if filter.as_of.is_none() {
            filter.as_of = Some(self.clock.now());
        }
        Ok(self.meta.search(&filter).await?)
    }

    pub async fn stats(&self) -> Result<AggregateStats, StorageError> {
        Ok(self.meta.stats().await?)
    }

    /// Re-hash the stored bytes of a file and compare with its record.
    pub async fn verify(&self, id: &str, cancel: &CancellationToken) -> Result<bool, StorageError> {
        let record = self
            .meta
            .get(id)
            .await?
            .ok_or_else(|| StorageError::NotFound(id.to_owned()))?;
        let stream = self
            .blob
            .open_range_stream(&record.storage_key, None, cancel)
            .await?;
        let hasher = stream
            .try_fold(ContentHasher::new(), |mut hasher, chunk| async move {
                hasher.update(&chunk);
                Ok(hasher)
            })
            .await
            .map_err(|e| StorageError::Blob(e.into()))?;
        if cancel.is_cancelled() {
            return Err(StorageError::Cancelled);
        }

        let intact = hasher.bytes_hashed() == record.size && hasher.finalize() == record.content_hash;
        if !intact {
            warn!(id = %record.id, storage_key = %record.storage_key, "stored bytes do not match record");
        }
        Ok(intact)
    }

    /// Probe both backends.
    pub async fn health(&self) -> HealthStatus {
        let (byte_store, metadata_store) =
            tokio::join!(self.blob.health_check(), self.meta.health_check());
        HealthStatus {
            byte_store,
            metadata_store,
        }
    }
}
