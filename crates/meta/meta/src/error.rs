use thiserror::Error;

/// Errors that can occur during metadata store operations.
#[derive(Debug, Error)]
pub enum MetaError {
    /// A record with the same id already exists.
    #[error("record already exists: {0}")]
    Conflict(String),

    /// A stored record or document could not be encoded or decoded.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// The backend rejected or failed the operation.
    #[error("metadata backend error: {0}")]
    Backend(String),

    /// The backend could not be reached.
    #[error("metadata connection error: {0}")]
    Connection(String),
}

impl From<std::io::Error> for MetaError {
    fn from(err: std::io::Error) -> Self {
        Self::Backend(err.to_string())
    }
}
