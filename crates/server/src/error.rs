use thiserror::Error;

use lapse_blob::BlobError;
use lapse_meta::MetaError;

/// Errors that can occur when running the Lapse server.
#[derive(Debug, Error)]
pub enum ServerError {
    /// A configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// An I/O error (e.g. reading the configuration file).
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// The byte store could not be opened.
    #[error("byte store error: {0}")]
    Blob(#[from] BlobError),

    /// The metadata store could not be opened.
    #[error("metadata store error: {0}")]
    Metadata(#[from] MetaError),
}
