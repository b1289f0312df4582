//! Redis metadata store for Lapse.
//!
//! Every key lives under `<prefix>:`:
//!
//! | key | type | content |
//! |---|---|---|
//! | `rec:<id>` | hash | record fields |
//! | `hash:<content_hash>` | set | ids with that content |
//! | `refs:<storage_key>` | set | ids sharing that object |
//! | `idx:expires` | zset | id scored by `expires_at` (epoch ms) |
//! | `idx:uploaded` | zset | id scored by negated `uploaded_at` (epoch ms) |
//! | `stats` | hash | `files`, `bytes`, `mime:<type>`, `day:<date>` |
//!
//! Inserts and deletes touch all of them inside one Lua script, and every
//! key a script touches is passed in `KEYS`. On Redis Cluster, choose a
//! prefix with a hash tag (for example `{lapse}`) so one store's keys share
//! a slot.
//!
//! Searches constrained only by expiry or by upload time are counted and
//! paginated inside Redis with `ZCOUNT` and `ZRANGEBYSCORE ... LIMIT`.
//! Filters on MIME type or size read the time range and filter the records.

mod codec;
mod config;
mod keys;
mod scripts;
mod store;

pub use config::RedisConfig;
pub use store::RedisMetadataStore;
