//! Single-file metadata store for Lapse.
//!
//! All records live in one JSON document. A single async mutex serializes
//! writers, and every mutation rewrites the document through a temporary
//! file followed by an atomic rename.

mod config;
mod document;
mod store;

pub use config::FsMetaConfig;
pub use store::FsMetadataStore;
