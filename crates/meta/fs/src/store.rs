use std::ffi::OsString;
use std::io::ErrorKind;
use std::ops::Bound;
use std::path::PathBuf;

use async_trait::async_trait;
use chrono::Utc;
use futures::{StreamExt, TryStreamExt, stream};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::{MappedMutexGuard, Mutex, MutexGuard};
use tracing::{debug, info, instrument, warn};

use lapse_core::{AggregateStats, FileId, FileRecord, SearchFilter, SearchPage};
use lapse_meta::{IdStream, MetaError, MetadataStore, Removed};

use crate::config::FsMetaConfig;
use crate::document::{Catalog, DOCUMENT_VERSION, Document};

/// Ids handed out per lock acquisition by [`MetadataStore::all_ids`].
const ID_PAGE: usize = 256;

/// Metadata store persisted as a single JSON document.
///
/// The document is loaded on first use (or by [`MetadataStore::init`]) and
/// kept in memory. Writers are serialized by one mutex; a mutation that
/// cannot be persisted is rolled back in memory before the error is
/// returned.
#[derive(Debug)]
pub struct FsMetadataStore {
    path: PathBuf,
    catalog: Mutex<Option<Catalog>>,
}

impl FsMetadataStore {
    pub fn new(config: FsMetaConfig) -> Self {
        Self {
            path: config.path,
            catalog: Mutex::new(None),
        }
    }

    fn staging_path(&self) -> PathBuf {
        let mut name = OsString::from(self.path.as_os_str());
        name.push(".tmp");
        PathBuf::from(name)
    }

    /// Lock the catalog, loading it from disk first if needed.
    async fn lock(&self) -> Result<MappedMutexGuard<'_, Catalog>, MetaError> {
        let mut guard = self.catalog.lock().await;
        if guard.is_none() {
            *guard = Some(self.load().await?);
        }
        Ok(MutexGuard::map(guard, |c| c.get_or_insert_with(Catalog::default)))
    }

    async fn load(&self) -> Result<Catalog, MetaError> {
        match fs::read(&self.path).await {
            Ok(raw) => {
                let doc: Document = serde_json::from_slice(&raw)
                    .map_err(|e| MetaError::Serialization(e.to_string()))?;
                if doc.version > DOCUMENT_VERSION {
                    return Err(MetaError::Serialization(format!(
                        "unsupported metadata document version {}",
                        doc.version
                    )));
                }
                let (mut catalog, healed) = Catalog::from_document(doc);
                if healed {
                    warn!(
                        path = %self.path.display(),
                        "stored totals disagreed with records; recomputed"
                    );
                    self.persist(&mut catalog.doc).await?;
                }
                info!(
                    path = %self.path.display(),
                    records = catalog.doc.records.len(),
                    "metadata document loaded"
                );
                Ok(catalog)
            }
            Err(e) if e.kind() == ErrorKind::NotFound => {
                if let Some(parent) = self.path.parent()
                    && !parent.as_os_str().is_empty()
                {
                    fs::create_dir_all(parent).await?;
                }
                let mut catalog = Catalog::default();
                self.persist(&mut catalog.doc).await?;
                info!(path = %self.path.display(), "created empty metadata document");
                Ok(catalog)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Write the whole document via a temporary file and an atomic rename.
    async fn persist(&self, doc: &mut Document) -> Result<(), MetaError> {
        doc.last_updated = Utc::now();
        let json =
            serde_json::to_vec_pretty(doc).map_err(|e| MetaError::Serialization(e.to_string()))?;

        let staging = self.staging_path();
        let written = async {
            let mut file = fs::File::create(&staging).await?;
            file.write_all(&json).await?;
            file.sync_all().await?;
            drop(file);
            fs::rename(&staging, &self.path).await
        }
        .await;

        if let Err(e) = written {
            if let Err(cleanup) = fs::remove_file(&staging).await
                && cleanup.kind() != ErrorKind::NotFound
            {
                warn!(path = %staging.display(), error = %cleanup, "failed to remove staging document");
            }
            return Err(e.into());
        }
        Ok(())
    }

    async fn insert_persisted(
        &self,
        catalog: &mut Catalog,
        record: &FileRecord,
    ) -> Result<(), MetaError> {
        catalog.insert(record.clone());
        if let Err(e) = self.persist(&mut catalog.doc).await {
            catalog.remove(&record.id);
            return Err(e);
        }
        Ok(())
    }
}

#[async_trait]
impl MetadataStore for FsMetadataStore {
    async fn init(&self) -> Result<(), MetaError> {
        self.lock().await.map(|_| ())
    }

    #[instrument(skip(self, record), fields(id = %record.id))]
    async fn put(&self, record: &FileRecord) -> Result<(), MetaError> {
        let mut catalog = self.lock().await?;
        if catalog.contains(&record.id) {
            return Err(MetaError::Conflict(record.id.clone()));
        }
        self.insert_persisted(&mut catalog, record).await?;
        debug!("record stored");
        Ok(())
    }

    #[instrument(skip(self, record), fields(id = %record.id, storage_key = %record.storage_key))]
    async fn put_if_referenced(&self, record: &FileRecord) -> Result<bool, MetaError> {
        let mut catalog = self.lock().await?;
        if catalog.ref_count(&record.storage_key) == 0 {
            debug!("storage key no longer referenced; link refused");
            return Ok(false);
        }
        if catalog.contains(&record.id) {
            return Err(MetaError::Conflict(record.id.clone()));
        }
        self.insert_persisted(&mut catalog, record).await?;
        Ok(true)
    }

    async fn get(&self, id: &str) -> Result<Option<FileRecord>, MetaError> {
        let catalog = self.lock().await?;
        Ok(catalog.doc.records.get(id).cloned())
    }

    #[instrument(skip(self))]
    async fn delete(&self, id: &str) -> Result<Option<Removed>, MetaError> {
        let mut catalog = self.lock().await?;
        let Some((record, remaining_refs)) = catalog.remove(id) else {
            return Ok(None);
        };
        if let Err(e) = self.persist(&mut catalog.doc).await {
            catalog.insert(record);
            return Err(e);
        }
        Ok(Some(Removed {
            record,
            remaining_refs,
        }))
    }

    async fn find_by_hash(&self, content_hash: &str) -> Result<Option<FileRecord>, MetaError> {
        let catalog = self.lock().await?;
        Ok(catalog.find_by_hash(content_hash).cloned())
    }

    async fn search(&self, filter: &SearchFilter) -> Result<SearchPage, MetaError> {
        let now = filter.reference_time();
        let catalog = self.lock().await?;
        let matching = catalog
            .doc
            .records
            .values()
            .filter(|r| filter.matches(r, now))
            .cloned();
        Ok(filter.apply(matching))
    }

    async fn stats(&self) -> Result<AggregateStats, MetaError> {
        Ok(self.lock().await?.doc.totals.clone())
    }

    fn all_ids(&self) -> IdStream<'_> {
        // State: `None` once exhausted, otherwise the last id handed out.
        stream::try_unfold(Some(None::<FileId>), move |cursor| async move {
            let Some(after) = cursor else {
                return Ok::<_, MetaError>(None);
            };
            let page: Vec<FileId> = {
                let catalog = self.lock().await?;
                let lower = match &after {
                    Some(id) => Bound::Excluded(id.as_str()),
                    None => Bound::Unbounded,
                };
                catalog
                    .doc
                    .records
                    .range::<str, _>((lower, Bound::Unbounded))
                    .take(ID_PAGE)
                    .map(|(id, _)| id.clone())
                    .collect()
            };
            let next = (page.len() == ID_PAGE).then(|| page.last().cloned());
            Ok(Some((stream::iter(page.into_iter().map(Ok)), next)))
        })
        .try_flatten()
        .boxed()
    }

    async fn health_check(&self) -> bool {
        match self.lock().await {
            Ok(_) => true,
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "metadata health check failed");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::sync::Arc;

    use lapse_meta::testing::run_conformance_tests;

    use super::*;

    fn store_in(dir: &tempfile::TempDir) -> FsMetadataStore {
        FsMetadataStore::new(FsMetaConfig::new(dir.path().join("meta").join("records.json")))
    }

    fn record(hash: &str) -> FileRecord {
        FileRecord::new("a.txt", "text/plain", 7, hash, format!("k/{hash}"), Utc::now(), 60, BTreeMap::new())
    }

    #[tokio::test]
    async fn conformance() {
        let dir = tempfile::tempdir().unwrap();
        run_conformance_tests(&store_in(&dir)).await.unwrap();
    }

    #[tokio::test]
    async fn init_creates_document() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        store.init().await.unwrap();
        let raw = std::fs::read(dir.path().join("meta/records.json")).unwrap();
        let doc: Document = serde_json::from_slice(&raw).unwrap();
        assert_eq!(doc.version, DOCUMENT_VERSION);
        assert!(doc.records.is_empty());
    }

    #[tokio::test]
    async fn records_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let rec = record("persist");
        store_in(&dir).put(&rec).await.unwrap();

        let reopened = store_in(&dir);
        assert_eq!(reopened.get(&rec.id).await.unwrap(), Some(rec.clone()));
        assert_eq!(reopened.stats().await.unwrap().total_files, 1);
        assert_eq!(
            reopened.find_by_hash("persist").await.unwrap().map(|r| r.id),
            Some(rec.id)
        );
    }

    #[tokio::test]
    async fn corrupt_document_is_reported_not_overwritten() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("meta/records.json");
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, b"{not json").unwrap();

        let store = store_in(&dir);
        assert!(matches!(store.init().await, Err(MetaError::Serialization(_))));
        assert!(!store.health_check().await);
        assert_eq!(std::fs::read(&path).unwrap(), b"{not json");
    }

    #[tokio::test]
    async fn totals_are_recomputed_on_load() {
        let dir = tempfile::tempdir().unwrap();
        let rec = record("heal");
        store_in(&dir).put(&rec).await.unwrap();

        let path = dir.path().join("meta/records.json");
        let mut doc: Document = serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
        doc.totals = AggregateStats::default();
        std::fs::write(&path, serde_json::to_vec(&doc).unwrap()).unwrap();

        let stats = store_in(&dir).stats().await.unwrap();
        assert_eq!(stats.total_files, 1);
        assert_eq!(stats.total_size, 7);
    }

    #[tokio::test]
    async fn concurrent_writers_keep_counters_exact() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(store_in(&dir));
        let handles: Vec<_> = (0..20)
            .map(|i| {
                let store = Arc::clone(&store);
                tokio::spawn(async move { store.put(&record(&format!("c{i}"))).await })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        let stats = store.stats().await.unwrap();
        assert_eq!(stats.total_files, 20);
        assert_eq!(stats.total_size, 140);
        assert_eq!(store_in(&dir).stats().await.unwrap(), stats);
    }

    #[tokio::test]
    async fn all_ids_pages_through_large_sets() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        let count = ID_PAGE * 2 + 3;
        for i in 0..count {
            store.put(&record(&format!("p{i}"))).await.unwrap();
        }
        let ids: Vec<FileId> = store.all_ids().try_collect().await.unwrap();
        assert_eq!(ids.len(), count);
        assert!(ids.windows(2).all(|w| w[0] < w[1]));
    }
}
