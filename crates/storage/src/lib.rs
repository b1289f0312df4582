//! Storage orchestration for Lapse.
//!
//! [`Storage`] composes a [`ByteStore`](lapse_blob::ByteStore) and a
//! [`MetadataStore`](lapse_meta::MetadataStore) into validated, hashed and
//! deduplicated uploads, TTL-checked downloads and reference-counted
//! deletes. [`Sweeper`] removes expired files and unreferenced objects in
//! the background.

pub mod error;
pub mod metrics;
mod reconcile;
mod storage;
pub mod sweeper;

#[cfg(test)]
mod test_support;

pub use error::StorageError;
pub use metrics::{MetricsSnapshot, StorageMetrics};
pub use reconcile::ReconcileReport;
pub use storage::{Download, HealthStatus, Storage, UploadRequest};
pub use sweeper::{SweepSummary, Sweeper};
