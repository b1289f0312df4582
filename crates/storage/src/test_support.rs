use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use lapse_blob::testing::chunked_stream;
use lapse_blob::{
    BlobError, BlobStream, ByteRange, ByteStore, KeyStream, ObjectMeta, SaveOptions, SavedObject,
};
use lapse_blob_fs::{FsBlobConfig, FsByteStore};
use lapse_core::{AggregateStats, FileRecord, ManualClock, SearchFilter, SearchPage, StorageConfig};
use lapse_meta::{IdStream, MetaError, MetadataStore, Removed};
use lapse_meta_fs::{FsMetaConfig, FsMetadataStore};

use crate::storage::{Storage, UploadRequest};

/// Wraps a byte store and fails deletes of selected keys.
#[derive(Debug)]
pub struct FlakyBlob<S> {
    inner: S,
    failing: parking_lot::Mutex<HashSet<String>>,
}

impl<S> FlakyBlob<S> {
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            failing: parking_lot::Mutex::new(HashSet::new()),
        }
    }

    pub fn fail_deletes_of(&self, key: &str) {
        self.failing.lock().insert(key.to_owned());
    }
}

#[async_trait]
impl<S: ByteStore> ByteStore for FlakyBlob<S> {
    async fn save(
        &self,
        key: &str,
        data: BlobStream,
        options: &SaveOptions,
        cancel: &CancellationToken,
    ) -> Result<SavedObject, BlobError> {
        self.inner.save(key, data, options, cancel).await
    }

    async fn open_range_stream(
        &self,
        key: &str,
        range: Option<ByteRange>,
        cancel: &CancellationToken,
    ) -> Result<BlobStream, BlobError> {
        self.inner.open_range_stream(key, range, cancel).await
    }

    async fn get_meta(
        &self,
        key: &str,
        cancel: &CancellationToken,
    ) -> Result<Option<ObjectMeta>, BlobError> {
        self.inner.get_meta(key, cancel).await
    }

    async fn delete(&self, key: &str, cancel: &CancellationToken) -> Result<(), BlobError> {
        if self.failing.lock().contains(key) {
            return Err(BlobError::Storage(format!("injected delete failure for {key}")));
        }
        self.inner.delete(key, cancel).await
    }

    fn list_keys<'a>(
        &'a self,
        prefix: Option<&'a str>,
        cancel: &'a CancellationToken,
    ) -> KeyStream<'a> {
        self.inner.list_keys(prefix, cancel)
    }

    async fn health_check(&self) -> bool {
        self.inner.health_check().await
    }
}

/// Wraps a metadata store to inject failures and observe deletes.
#[derive(Debug)]
pub struct FlakyMeta<M> {
    inner: M,
    failing: parking_lot::Mutex<HashSet<String>>,
    fail_puts: AtomicBool,
    refuse_links: AtomicBool,
    delete_delay: parking_lot::Mutex<Option<Duration>>,
    deletes_in_flight: AtomicUsize,
    peak_deletes: AtomicUsize,
}

impl<M> FlakyMeta<M> {
    pub fn new(inner: M) -> Self {
        Self {
            inner,
            failing: parking_lot::Mutex::new(HashSet::new()),
            fail_puts: AtomicBool::new(false),
            refuse_links: AtomicBool::new(false),
            delete_delay: parking_lot::Mutex::new(None),
            deletes_in_flight: AtomicUsize::new(0),
            peak_deletes: AtomicUsize::new(0),
        }
    }

    pub fn fail_deletes_of(&self, id: &str) {
        self.failing.lock().insert(id.to_owned());
    }

    /// Make every `put` fail with a backend error.
    pub fn fail_puts(&self) {
        self.fail_puts.store(true, Ordering::SeqCst);
    }

    /// Make `put_if_referenced` answer that the object lost its last reference.
    pub fn refuse_links(&self) {
        self.refuse_links.store(true, Ordering::SeqCst);
    }

    /// Hold every delete for `delay` before it reaches the inner store.
    pub fn slow_deletes(&self, delay: Duration) {
        *self.delete_delay.lock() = Some(delay);
    }

    /// Highest number of deletes observed running at once.
    pub fn peak_deletes(&self) -> usize {
        self.peak_deletes.load(Ordering::SeqCst)
    }

    pub fn heal(&self) {
        self.failing.lock().clear();
        self.fail_puts.store(false, Ordering::SeqCst);
        self.refuse_links.store(false, Ordering::SeqCst);
    }
}

/// Decrements the in-flight delete gauge when a delete finishes.
struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl<M: MetadataStore> MetadataStore for FlakyMeta<M> {
    async fn init(&self) -> Result<(), MetaError> {
        self.inner.init().await
    }

    async fn put(&self, record: &FileRecord) -> Result<(), MetaError> {
        if self.fail_puts.load(Ordering::SeqCst) {
            return Err(MetaError::Backend(format!("injected put failure for {}", record.id)));
        }
        self.inner.put(record).await
    }

    async fn put_if_referenced(&self, record: &FileRecord) -> Result<bool, MetaError> {
        if self.refuse_links.load(Ordering::SeqCst) {
            return Ok(false);
        }
        self.inner.put_if_referenced(record).await
    }

    async fn get(&self, id: &str) -> Result<Option<FileRecord>, MetaError> {
        self.inner.get(id).await
    }

    async fn delete(&self, id: &str) -> Result<Option<Removed>, MetaError> {
        let running = self.deletes_in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        let _in_flight = InFlight(&self.deletes_in_flight);
        self.peak_deletes.fetch_max(running, Ordering::SeqCst);
        let delay = *self.delete_delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.failing.lock().contains(id) {
            return Err(MetaError::Backend(format!("injected delete failure for {id}")));
        }
        self.inner.delete(id).await
    }

    async fn find_by_hash(&self, content_hash: &str) -> Result<Option<FileRecord>, MetaError> {
        self.inner.find_by_hash(content_hash).await
    }

    async fn search(&self, filter: &SearchFilter) -> Result<SearchPage, MetaError> {
        self.inner.search(filter).await
    }

    async fn stats(&self) -> Result<AggregateStats, MetaError> {
        self.inner.stats().await
    }

    fn all_ids(&self) -> IdStream<'_> {
        self.inner.all_ids()
    }

    async fn health_check(&self) -> bool {
        self.inner.health_check().await
    }
}

/// A storage orchestrator over filesystem backends in a temporary directory.
pub struct Harness {
    pub storage: Arc<Storage>,
    pub blob: Arc<FlakyBlob<FsByteStore>>,
    pub meta: Arc<FlakyMeta<FsMetadataStore>>,
    pub clock: ManualClock,
    _dir: tempfile::TempDir,
}

impl Harness {
    pub async fn new(config: StorageConfig) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let blob = Arc::new(FlakyBlob::new(
            FsByteStore::new(FsBlobConfig::new(dir.path().join("blobs")))
                .await
                .unwrap(),
        ));
        let meta = Arc::new(FlakyMeta::new(FsMetadataStore::new(FsMetaConfig::new(
            dir.path().join("metadata.json"),
        ))));
        meta.init().await.unwrap();
        let clock = ManualClock::default();
        let storage = Storage::new(blob.clone(), meta.clone(), config)
            .with_clock(Arc::new(clock.clone()));
        Self {
            storage: Arc::new(storage),
            blob,
            meta,
            clock,
            _dir: dir,
        }
    }

    pub async fn with_defaults() -> Self {
        Self::new(StorageConfig::default()).await
    }

    /// Upload `data` as `text/plain` with the given TTL.
    pub async fn upload(&self, name: &str, data: &[u8], ttl: u64) -> FileRecord {
        self.storage
            .upload(
                request(name, "text/plain", data),
                Some(ttl),
                BTreeMap::new(),
                &CancellationToken::new(),
            )
            .await
            .unwrap()
    }

    /// Every key currently in the byte store.
    pub async fn keys(&self) -> Vec<String> {
        use futures::TryStreamExt;
        let cancel = CancellationToken::new();
        let mut keys: Vec<String> = self.blob.list_keys(None, &cancel).try_collect().await.unwrap();
        keys.sort();
        keys
    }
}

pub fn request(name: &str, mime: &str, data: &[u8]) -> UploadRequest {
    UploadRequest {
        original_name: name.to_owned(),
        mime_type: mime.to_owned(),
        declared_size: Some(data.len() as u64),
        body: chunked_stream(data, 100),
    }
}

pub fn payload(len: usize, seed: u8) -> Vec<u8> {
    (0..len)
        .map(|i| u8::try_from(i % 241).unwrap_or(0).wrapping_add(seed))
        .collect()
}
