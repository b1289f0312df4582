pub mod clock;
pub mod config;
pub mod hash;
pub mod query;
pub mod record;
pub mod stats;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{StorageConfig, SweepConfig};
pub use hash::{ContentHash, ContentHasher, hash_bytes};
pub use query::{SearchFilter, SearchPage};
pub use record::{FileId, FileRecord, storage_key_for};
pub use stats::AggregateStats;
