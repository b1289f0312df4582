//! Byte store abstraction for Lapse.
//!
//! A [`ByteStore`] keeps opaque byte blobs addressed by string keys. Bytes are
//! meaningless on their own; the metadata store decides which keys are live.
//! Backends live in their own crates (`lapse-blob-fs`, `lapse-blob-s3`) and
//! are checked against the shared suite in [`testing`].

pub mod error;
pub mod store;
pub mod testing;
pub mod types;

pub use error::BlobError;
pub use store::{ByteStore, interruptible};
pub use types::{BlobStream, ByteRange, KeyStream, ObjectMeta, SaveOptions, SavedObject};
