use thiserror::Error;

/// Errors that can occur during byte store operations.
#[derive(Debug, Error)]
pub enum BlobError {
    /// The requested object was not found.
    #[error("object not found: {0}")]
    NotFound(String),

    /// The stream exceeded the byte limit given to `save`.
    #[error("object too large: exceeds limit of {limit} bytes")]
    TooLarge {
        /// Maximum allowed size.
        limit: u64,
    },

    /// The key is not acceptable for this backend.
    #[error("invalid key: {0}")]
    InvalidKey(String),

    /// The requested byte range cannot be satisfied.
    #[error("invalid range: {0}")]
    InvalidRange(String),

    /// The operation was cancelled before it completed.
    #[error("operation cancelled")]
    Cancelled,

    /// The source stream failed while being read.
    #[error("source stream error: {0}")]
    Source(String),

    /// A storage backend error occurred.
    #[error("blob storage error: {0}")]
    Storage(String),
}

impl From<std::io::Error> for BlobError {
    fn from(err: std::io::Error) -> Self {
        Self::Storage(err.to_string())
    }
}
