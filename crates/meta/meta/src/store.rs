use async_trait::async_trait;
use futures::stream::BoxStream;

use lapse_core::{AggregateStats, FileId, FileRecord, SearchFilter, SearchPage};

use crate::error::MetaError;

/// A lazily produced sequence of record ids.
pub type IdStream<'a> = BoxStream<'a, Result<FileId, MetaError>>;

/// Outcome of deleting a record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Removed {
    /// The record as it was stored.
    pub record: FileRecord,
    /// Live records still referencing `record.storage_key`.
    pub remaining_refs: u64,
}

/// Persistent record storage with a content-hash index and aggregate stats.
///
/// Every mutation updates the record, the hash index, the storage-key
/// reference set and the statistics as one atomic step.
#[async_trait]
pub trait MetadataStore: Send + Sync {
    /// Load or create persistent state and verify the backend is usable.
    async fn init(&self) -> Result<(), MetaError>;

    /// Insert a new record.
    ///
    /// Returns [`MetaError::Conflict`] if the id is already present.
    async fn put(&self, record: &FileRecord) -> Result<(), MetaError>;

    /// Insert a record only if a live record already references its
    /// `storage_key`. Returns `false` and writes nothing otherwise.
    async fn put_if_referenced(&self, record: &FileRecord) -> Result<bool, MetaError>;

    /// Fetch a record by id.
    async fn get(&self, id: &str) -> Result<Option<FileRecord>, MetaError>;

    /// Delete a record, returning it and the number of records still
    /// sharing its storage key. Returns `None` if the id is unknown.
    async fn delete(&self, id: &str) -> Result<Option<Removed>, MetaError>;

    /// Any live record with the given content hash.
    async fn find_by_hash(&self, content_hash: &str) -> Result<Option<FileRecord>, MetaError>;

    /// Filtered, ordered and paginated record listing.
    async fn search(&self, filter: &SearchFilter) -> Result<SearchPage, MetaError>;

    /// Aggregate statistics over all live records.
    async fn stats(&self) -> Result<AggregateStats, MetaError>;

    /// Stream every record id without loading the whole set at once.
    fn all_ids(&self) -> IdStream<'_>;

    /// Whether the backend is reachable and usable.
    async fn health_check(&self) -> bool;
}
