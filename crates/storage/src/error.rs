use lapse_blob::BlobError;
use lapse_core::FileId;
use lapse_meta::MetaError;
use thiserror::Error;

/// Errors surfaced by [`Storage`](crate::Storage) operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// The request was rejected before any I/O.
    #[error("validation failed: {0}")]
    Validation(String),

    /// No live file with this id.
    #[error("file not found: {0}")]
    NotFound(FileId),

    /// The byte store failed.
    #[error("byte store error: {0}")]
    Blob(BlobError),

    /// The metadata store failed.
    #[error("metadata store error: {0}")]
    Metadata(#[from] MetaError),

    /// The caller cancelled the operation.
    #[error("operation cancelled")]
    Cancelled,
}

impl From<BlobError> for StorageError {
    fn from(err: BlobError) -> Self {
        match err {
            BlobError::Cancelled => Self::Cancelled,
            BlobError::TooLarge { limit } => {
                Self::Validation(format!("payload exceeds {limit} bytes"))
            }
            BlobError::InvalidRange(msg) => Self::Validation(format!("invalid range: {msg}")),
            other => Self::Blob(other),
        }
    }
}
