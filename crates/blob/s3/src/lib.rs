//! Amazon S3 (and S3-compatible) byte store backend for Lapse.
//!
//! Uploads stream through multipart upload with a bounded part buffer, so
//! memory use stays at one part regardless of object size. Payloads smaller
//! than one part are sent with a single `PutObject`. An aborted or
//! over-limit upload is cleaned up with `AbortMultipartUpload` and never
//! becomes visible under its key.

pub mod auth;
pub mod config;
pub mod error;
mod store;
mod upload;

pub use config::{AwsBaseConfig, S3BlobConfig};
pub use error::S3Error;
pub use store::S3ByteStore;
