//! Metadata store abstraction for Lapse.
//!
//! A [`MetadataStore`] owns the [`FileRecord`](lapse_core::FileRecord)s, the
//! content-hash index used for deduplication, the per-object reference sets
//! and the aggregate statistics. Backends keep all four consistent under
//! concurrent use.

pub mod error;
pub mod store;
pub mod testing;

pub use error::MetaError;
pub use store::{IdStream, MetadataStore, Removed};
