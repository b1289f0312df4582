use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use deadpool_redis::{Config, Pool, Runtime};
use futures::{StreamExt, TryStreamExt, stream};
use redis::{AsyncCommands, Script};
use tracing::{debug, instrument, warn};

use lapse_core::{AggregateStats, FileRecord, SearchFilter, SearchPage};
use lapse_meta::{IdStream, MetaError, MetadataStore, Removed};

use crate::codec;
use crate::config::RedisConfig;
use crate::keys::KeySpace;
use crate::scripts;

/// Records fetched per pipeline while evaluating a search.
const FETCH_BATCH: usize = 500;

/// Index entries requested per `ZSCAN` round trip.
const SCAN_COUNT: usize = 500;

/// Redis-backed implementation of [`MetadataStore`].
///
/// Uses a `deadpool-redis` connection pool. Inserts and deletes run as Lua
/// scripts so the record, its indices and the statistics never diverge.
pub struct RedisMetadataStore {
    pool: Pool,
    keys: KeySpace,
    put_script: Script,
    delete_script: Script,
}

impl std::fmt::Debug for RedisMetadataStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisMetadataStore")
            .field("prefix", &self.keys.prefix())
            .finish_non_exhaustive()
    }
}

fn backend(err: &redis::RedisError) -> MetaError {
    MetaError::Backend(err.to_string())
}

fn millis(value: &DateTime<Utc>) -> i64 {
    value.timestamp_millis()
}

fn on_millisecond(value: &DateTime<Utc>) -> bool {
    value.timestamp_subsec_nanos() % 1_000_000 == 0
}

/// Score bounds in `ZRANGEBYSCORE` syntax.
#[derive(Debug, Clone, PartialEq, Eq)]
struct ScoreRange {
    min: String,
    max: String,
}

/// Scores of records with `expires_at < as_of`.
fn expired_scores(as_of: &DateTime<Utc>) -> ScoreRange {
    let max = if on_millisecond(as_of) {
        format!("({}", millis(as_of))
    } else {
        millis(as_of).to_string()
    };
    ScoreRange {
        min: "-inf".to_owned(),
        max,
    }
}

/// Scores of records uploaded within `[from, to]`.
///
/// The uploaded index holds negated milliseconds, so ascending score order
/// is newest first with ties broken by id.
fn uploaded_scores(from: Option<&DateTime<Utc>>, to: Option<&DateTime<Utc>>) -> ScoreRange {
    let ceil = |t: &DateTime<Utc>| millis(t) + i64::from(!on_millisecond(t));
    ScoreRange {
        min: to.map_or_else(|| "-inf".to_owned(), |t| (-millis(t)).to_string()),
        max: from.map_or_else(|| "+inf".to_owned(), |t| (-ceil(t)).to_string()),
    }
}

/// Where a search reads its candidates from.
#[derive(Debug)]
struct SearchPlan {
    index: String,
    scores: ScoreRange,
    /// The score range alone expresses the filter, so Redis can count and
    /// paginate it directly.
    exact: bool,
}

impl RedisMetadataStore {
    /// Create a new `RedisMetadataStore` from the provided configuration.
    ///
    /// # Errors
    ///
    /// Returns [`MetaError::Connection`] if the pool cannot be created.
    pub fn new(config: &RedisConfig) -> Result<Self, MetaError> {
        let cfg = Config::from_url(&config.url);
        let pool = cfg
            .builder()
            .map(|b| {
                b.max_size(config.pool_size)
                    .wait_timeout(Some(config.connection_timeout))
                    .runtime(Runtime::Tokio1)
                    .build()
            })
            .map_err(|e| MetaError::Connection(e.to_string()))?
            .map_err(|e| MetaError::Connection(e.to_string()))?;

        Ok(Self {
            pool,
            keys: KeySpace::new(config.prefix.clone()),
            put_script: Script::new(scripts::PUT_RECORD),
            delete_script: Script::new(scripts::DELETE_RECORD),
        })
    }

    async fn conn(&self) -> Result<deadpool_redis::Connection, MetaError> {
        self.pool
            .get()
            .await
            .map_err(|e| MetaError::Connection(e.to_string()))
    }

    /// Run the insert script. Returns the script status (1, 0 or -1).
    async fn insert(&self, record: &FileRecord, require_ref: bool) -> Result<i64, MetaError> {
        let fields = codec::encode(record)?;
        let mut conn = self.conn().await?;
        self.put_script
            .key(self.keys.record(&record.id))
            .key(self.keys.by_hash(&record.content_hash))
            .key(self.keys.refs(&record.storage_key))
            .key(self.keys.expires_index())
            .key(self.keys.uploaded_index())
            .key(self.keys.stats())
            .arg(&record.id)
            .arg(if require_ref { "1" } else { "0" })
            .arg(millis(&record.expires_at))
            .arg(-millis(&record.uploaded_at))
            .arg(record.size)
            .arg(&record.mime_type)
            .arg(record.date_bucket())
            .arg(fields)
            .invoke_async(&mut conn)
            .await
            .map_err(|e| backend(&e))
    }

    /// Fetch records by id in pipelined batches, skipping ids deleted in
    /// the meantime.
    async fn fetch_many(&self, ids: &[String]) -> Result<Vec<FileRecord>, MetaError> {
        let mut conn = self.conn().await?;
        let mut records = Vec::with_capacity(ids.len());
        for chunk in ids.chunks(FETCH_BATCH) {
            let mut pipe = redis::pipe();
            for id in chunk {
                pipe.hgetall(self.keys.record(id));
            }
            let rows: Vec<HashMap<String, String>> =
                pipe.query_async(&mut conn).await.map_err(|e| backend(&e))?;
            for row in rows {
                if !row.is_empty() {
                    records.push(codec::decode(row)?);
                }
            }
        }
        Ok(records)
    }

    /// Pick the score index for a filter.
    ///
    /// Record timestamps have millisecond precision, so index scores are
    /// exact and the range is precise for the time constraints it covers.
    fn plan(&self, filter: &SearchFilter, as_of: &DateTime<Utc>) -> SearchPlan {
        let unconstrained = filter.mime_type.is_none()
            && filter.min_size.is_none()
            && filter.max_size.is_none();
        if filter.expired_only {
            SearchPlan {
                index: self.keys.expires_index(),
                scores: expired_scores(as_of),
                exact: unconstrained
                    && filter.uploaded_from.is_none()
                    && filter.uploaded_to.is_none(),
            }
        } else {
            SearchPlan {
                index: self.keys.uploaded_index(),
                scores: uploaded_scores(filter.uploaded_from.as_ref(), filter.uploaded_to.as_ref()),
                exact: unconstrained,
            }
        }
    }

    /// Every id inside the plan's score range.
    async fn candidates(&self, plan: &SearchPlan) -> Result<Vec<String>, MetaError> {
        let mut conn = self.conn().await?;
        conn.zrangebyscore(&plan.index, &plan.scores.min, &plan.scores.max)
            .await
            .map_err(|e| backend(&e))
    }

    /// Count and slice the plan's range inside Redis.
    async fn page(
        &self,
        plan: &SearchPlan,
        offset: u32,
        limit: u32,
    ) -> Result<(u64, Vec<String>), MetaError> {
        let mut conn = self.conn().await?;
        redis::pipe()
            .atomic()
            .zcount(&plan.index, &plan.scores.min, &plan.scores.max)
            .zrangebyscore_limit(
                &plan.index,
                &plan.scores.min,
                &plan.scores.max,
                isize::try_from(offset).unwrap_or(isize::MAX),
                isize::try_from(limit).unwrap_or(isize::MAX),
            )
            .query_async(&mut conn)
            .await
            .map_err(|e| backend(&e))
    }
}

#[async_trait]
impl MetadataStore for RedisMetadataStore {
    async fn init(&self) -> Result<(), MetaError> {
        let mut conn = self.conn().await?;
        redis::cmd("PING")
            .query_async::<String>(&mut conn)
            .await
            .map_err(|e| MetaError::Connection(e.to_string()))?;
        debug!(prefix = %self.keys.prefix(), "redis metadata store ready");
        Ok(())
    }

    #[instrument(skip(self, record), fields(id = %record.id))]
    async fn put(&self, record: &FileRecord) -> Result<(), MetaError> {
        match self.insert(record, false).await? {
            1 => Ok(()),
            -1 => Err(MetaError::Conflict(record.id.clone())),
            other => Err(MetaError::Backend(format!(
                "unexpected insert script status {other}"
            ))),
        }
    }

    #[instrument(skip(self, record), fields(id = %record.id, storage_key = %record.storage_key))]
    async fn put_if_referenced(&self, record: &FileRecord) -> Result<bool, MetaError> {
        match self.insert(record, true).await? {
            1 => Ok(true),
            0 => {
                debug!("storage key no longer referenced; link refused");
                Ok(false)
            }
            -1 => Err(MetaError::Conflict(record.id.clone())),
            other => Err(MetaError::Backend(format!(
                "unexpected insert script status {other}"
            ))),
        }
    }

    async fn get(&self, id: &str) -> Result<Option<FileRecord>, MetaError> {
        let mut conn = self.conn().await?;
        let fields: HashMap<String, String> = conn
            .hgetall(self.keys.record(id))
            .await
            .map_err(|e| backend(&e))?;
        if fields.is_empty() {
            return Ok(None);
        }
        codec::decode(fields).map(Some)
    }

    #[instrument(skip(self))]
    async fn delete(&self, id: &str) -> Result<Option<Removed>, MetaError> {
        let mut conn = self.conn().await?;
        let (content_hash, storage_key): (Option<String>, Option<String>) = redis::cmd("HMGET")
            .arg(self.keys.record(id))
            .arg("content_hash")
            .arg("storage_key")
            .query_async(&mut conn)
            .await
            .map_err(|e| backend(&e))?;
        let (Some(content_hash), Some(storage_key)) = (content_hash, storage_key) else {
            return Ok(None);
        };

        let (status, remaining_refs, fields): (i64, u64, HashMap<String, String>) = self
            .delete_script
            .key(self.keys.record(id))
            .key(self.keys.expires_index())
            .key(self.keys.uploaded_index())
            .key(self.keys.stats())
            .key(self.keys.by_hash(&content_hash))
            .key(self.keys.refs(&storage_key))
            .arg(id)
            .arg(&content_hash)
            .arg(&storage_key)
            .invoke_async(&mut conn)
            .await
            .map_err(|e| backend(&e))?;

        match status {
            1 => Ok(Some(Removed {
                record: codec::decode(fields)?,
                remaining_refs,
            })),
            0 => Ok(None),
            -1 => Err(MetaError::Conflict(id.to_owned())),
            other => Err(MetaError::Backend(format!(
                "unexpected delete script status {other}"
            ))),
        }
    }

    async fn find_by_hash(&self, content_hash: &str) -> Result<Option<FileRecord>, MetaError> {
        let ids: Vec<String> = {
            let mut conn = self.conn().await?;
            conn.smembers(self.keys.by_hash(content_hash))
                .await
                .map_err(|e| backend(&e))?
        };
        for id in ids {
            if let Some(record) = self.get(&id).await? {
                return Ok(Some(record));
            }
        }
        Ok(None)
    }

    async fn search(&self, filter: &SearchFilter) -> Result<SearchPage, MetaError> {
        let as_of = filter.reference_time();
        let pinned = SearchFilter {
            as_of: Some(as_of),
            ..filter.clone()
        };
        let plan = self.plan(&pinned, &as_of);
        if !plan.exact {
            let ids = self.candidates(&plan).await?;
            let records = self.fetch_many(&ids).await?;
            return Ok(pinned.apply(records));
        }

        let limit = pinned.effective_limit();
        let offset = pinned.effective_offset();
        let (total, ids) = self.page(&plan, offset, limit).await?;
        // Ids deleted since the range was read are skipped.
        let records = self.fetch_many(&ids).await?;
        Ok(SearchPage {
            records,
            total,
            limit,
            offset,
        })
    }

    async fn stats(&self) -> Result<AggregateStats, MetaError> {
        let mut conn = self.conn().await?;
        let fields: HashMap<String, i64> = conn
            .hgetall(self.keys.stats())
            .await
            .map_err(|e| backend(&e))?;
        Ok(codec::decode_stats(fields))
    }

    fn all_ids(&self) -> IdStream<'_> {
        // `ZSCAN` may repeat members across pages; callers treat ids as a set.
        stream::try_unfold(Some(0u64), move |cursor| async move {
            let Some(cursor) = cursor else {
                return Ok::<_, MetaError>(None);
            };
            let mut conn = self.conn().await?;
            let (next, page): (u64, Vec<String>) = redis::cmd("ZSCAN")
                .arg(self.keys.uploaded_index())
                .arg(cursor)
                .arg("COUNT")
                .arg(SCAN_COUNT)
                .query_async(&mut conn)
                .await
                .map_err(|e| backend(&e))?;
            // Replies alternate member and score.
            let ids: Vec<Result<String, MetaError>> =
                page.into_iter().step_by(2).map(Ok).collect();
            let state = (next != 0).then_some(next);
            Ok(Some((stream::iter(ids), state)))
        })
        .try_flatten()
        .boxed()
    }

    async fn health_check(&self) -> bool {
        match self.init().await {
            Ok(()) => true,
            Err(e) => {
                warn!(error = %e, "redis health check failed");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    fn at_millis(ms: i64) -> DateTime<Utc> {
        Utc.timestamp_millis_opt(ms).unwrap()
    }

    #[test]
    fn expiry_bound_is_exclusive_on_a_whole_millisecond() {
        let scores = expired_scores(&at_millis(1_700_000_000_000));
        assert_eq!(scores.min, "-inf");
        assert_eq!(scores.max, "(1700000000000");
    }

    #[test]
    fn expiry_bound_includes_the_current_millisecond_otherwise() {
        let as_of = at_millis(1_700_000_000_000) + chrono::Duration::microseconds(250);
        assert_eq!(expired_scores(&as_of).max, "1700000000000");
    }

    #[test]
    fn upload_bounds_are_negated_and_rounded_inwards() {
        let from = at_millis(1_000) + chrono::Duration::microseconds(1);
        let to = at_millis(5_000) + chrono::Duration::microseconds(999);
        let scores = uploaded_scores(Some(&from), Some(&to));
        assert_eq!(scores.min, "-5000");
        assert_eq!(scores.max, "-1001");

        let open = uploaded_scores(None, None);
        assert_eq!((open.min.as_str(), open.max.as_str()), ("-inf", "+inf"));
    }
}

#[cfg(all(test, feature = "integration"))]
mod integration_tests {
    use super::*;

    fn test_config() -> RedisConfig {
        RedisConfig {
            url: std::env::var("REDIS_URL")
                .unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string()),
            prefix: format!("lapse-test-{}", uuid::Uuid::new_v4()),
            ..RedisConfig::default()
        }
    }

    #[tokio::test]
    async fn store_conformance() {
        let store = RedisMetadataStore::new(&test_config()).expect("pool creation should succeed");
        lapse_meta::testing::run_conformance_tests(&store)
            .await
            .expect("conformance tests should pass");
    }

    #[tokio::test]
    async fn expired_pages_come_from_the_index() {
        let store = RedisMetadataStore::new(&test_config()).expect("pool creation should succeed");
        let start = Utc::now();
        let mut expected = Vec::new();
        for i in 0..25 {
            let record = FileRecord::new(
                "f",
                "text/plain",
                1,
                format!("page-{i}"),
                format!("pg/{i}"),
                start - chrono::Duration::seconds(3_600 - i),
                60,
                std::collections::BTreeMap::new(),
            );
            store.put(&record).await.unwrap();
            expected.push(record.id);
        }
        let live = FileRecord::new(
            "f",
            "text/plain",
            1,
            "live",
            "pg/live",
            start,
            3_600,
            std::collections::BTreeMap::new(),
        );
        store.put(&live).await.unwrap();

        let filter = SearchFilter {
            offset: Some(10),
            ..SearchFilter::expired(start, 10)
        };
        assert!(store.plan(&filter, &start).exact);
        let page = store.search(&filter).await.unwrap();
        assert_eq!(page.total, 25);
        let ids: Vec<String> = page.records.into_iter().map(|r| r.id).collect();
        assert_eq!(ids, expected[10..20].to_vec());

        let newest = store
            .search(&SearchFilter {
                limit: Some(2),
                ..SearchFilter::default()
            })
            .await
            .unwrap();
        assert_eq!(newest.total, 26);
        assert_eq!(newest.records[0].id, live.id);
        assert_eq!(newest.records[1].id, expected[24]);
    }

    #[tokio::test]
    async fn delete_returns_remaining_references() {
        let store = RedisMetadataStore::new(&test_config()).expect("pool creation should succeed");
        let make = |hash: &str| {
            FileRecord::new(
                "f",
                "text/plain",
                4,
                hash,
                "shared/object",
                Utc::now(),
                60,
                std::collections::BTreeMap::new(),
            )
        };
        let first = make("same");
        let second = make("same");
        store.put(&first).await.unwrap();
        assert!(store.put_if_referenced(&second).await.unwrap());

        let removed = store.delete(&first.id).await.unwrap().unwrap();
        assert_eq!(removed.record, first);
        assert_eq!(removed.remaining_refs, 1);
        assert!(store.delete(&first.id).await.unwrap().is_none());

        let removed = store.delete(&second.id).await.unwrap().unwrap();
        assert_eq!(removed.remaining_refs, 0);
        assert!(store.find_by_hash("same").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn concurrent_inserts_keep_stats_exact() {
        let store = std::sync::Arc::new(
            RedisMetadataStore::new(&test_config()).expect("pool creation should succeed"),
        );
        let handles: Vec<_> = (0..50)
            .map(|i| {
                let store = std::sync::Arc::clone(&store);
                tokio::spawn(async move {
                    let record = FileRecord::new(
                        "f",
                        "text/plain",
                        10,
                        format!("h{i}"),
                        "shared/key",
                        Utc::now(),
                        60,
                        std::collections::BTreeMap::new(),
                    );
                    store.put(&record).await
                })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap().unwrap();
        }
        let stats = store.stats().await.unwrap();
        assert_eq!(stats.total_files, 50);
        assert_eq!(stats.total_size, 500);
    }
}
