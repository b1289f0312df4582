//! Filesystem byte store backend for Lapse.
//!
//! Objects live under `<root>/objects/<key>`. Writes go to a staging file in
//! `<root>/.staging` and are renamed into place only once the stream has been
//! fully received and synced, so a partially written object is never visible.
//! Content type and user metadata are kept in a `<key>.meta.json` sidecar.

mod config;
mod keys;
mod store;

pub use config::FsBlobConfig;
pub use store::FsByteStore;
