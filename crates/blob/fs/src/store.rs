use std::collections::{BTreeMap, VecDeque};
use std::io::{ErrorKind, SeekFrom};
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::{StreamExt, stream};
use serde::{Deserialize, Serialize};
use tokio::fs;
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tokio_util::io::ReaderStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use lapse_blob::{
    BlobError, BlobStream, ByteRange, ByteStore, KeyStream, ObjectMeta, SaveOptions, SavedObject,
    interruptible,
};

use crate::config::FsBlobConfig;
use crate::keys::{SIDECAR_SUFFIX, key_to_relative, relative_to_key, sidecar_path};

const OBJECTS_DIR: &str = "objects";
const STAGING_DIR: &str = ".staging";

#[derive(Debug, Default, Serialize, Deserialize)]
struct Sidecar {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    content_type: Option<String>,
    #[serde(default)]
    metadata: BTreeMap<String, String>,
}

/// Byte store backed by a local directory.
///
/// One process should own a root at a time: opening the store discards
/// whatever is left in the staging directory.
#[derive(Debug, Clone)]
pub struct FsByteStore {
    objects: PathBuf,
    staging: PathBuf,
}

impl FsByteStore {
    /// Open (and create if needed) a store rooted at `config.root`.
    ///
    /// # Errors
    ///
    /// Returns [`BlobError::Storage`] if the directories cannot be created.
    pub async fn new(config: FsBlobConfig) -> Result<Self, BlobError> {
        let objects = config.root.join(OBJECTS_DIR);
        let staging = config.root.join(STAGING_DIR);
        fs::create_dir_all(&objects).await?;
        fs::create_dir_all(&staging).await?;

        let store = Self { objects, staging };
        store.clear_staging().await;
        info!(root = %config.root.display(), "filesystem byte store opened");
        Ok(store)
    }

    async fn clear_staging(&self) {
        let Ok(mut entries) = fs::read_dir(&self.staging).await else {
            return;
        };
        let mut removed = 0u64;
        while let Ok(Some(entry)) = entries.next_entry().await {
            if fs::remove_file(entry.path()).await.is_ok() {
                removed += 1;
            }
        }
        if removed > 0 {
            info!(removed, "discarded stale staging files");
        }
    }

    fn object_path(&self, key: &str) -> Result<PathBuf, BlobError> {
        Ok(self.objects.join(key_to_relative(key)?))
    }

    fn staging_path(&self, suffix: &str) -> PathBuf {
        self.staging
            .join(format!("{}.{suffix}", uuid::Uuid::new_v4().simple()))
    }

    /// Drain `data` into `path`, enforcing `limit` and honouring `cancel`.
    async fn write_staged(
        path: &Path,
        data: &mut BlobStream,
        limit: Option<u64>,
        cancel: &CancellationToken,
    ) -> Result<u64, BlobError> {
        let mut file = fs::File::create(path).await?;
        let mut written = 0u64;
        loop {
            let next = tokio::select! {
                biased;
                () = cancel.cancelled() => return Err(BlobError::Cancelled),
                next = data.next() => next,
            };
            let Some(chunk) = next else {
                break;
            };
            let chunk = chunk.map_err(|e| BlobError::Source(e.to_string()))?;
            written += chunk.len() as u64;
            if let Some(limit) = limit
                && written > limit
            {
                return Err(BlobError::TooLarge { limit });
            }
            file.write_all(&chunk).await?;
        }
        file.flush().await?;
        file.sync_all().await?;
        Ok(written)
    }

    /// Move a fully written staging file (and its sidecar) into place.
    async fn commit(
        &self,
        staged: &Path,
        target: &Path,
        options: &SaveOptions,
    ) -> Result<(), BlobError> {
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).await?;
        }

        let sidecar = sidecar_path(target);
        if options.content_type.is_some() || !options.metadata.is_empty() {
            let doc = Sidecar {
                content_type: options.content_type.clone(),
                metadata: options.metadata.clone(),
            };
            let json =
                serde_json::to_vec(&doc).map_err(|e| BlobError::Storage(e.to_string()))?;
            let tmp = self.staging_path("side");
            fs::write(&tmp, json).await?;
            if let Err(e) = fs::rename(&tmp, &sidecar).await {
                remove_quietly(&tmp).await;
                return Err(e.into());
            }
        } else {
            remove_quietly(&sidecar).await;
        }

        fs::rename(staged, target).await?;
        Ok(())
    }
}

async fn remove_quietly(path: &Path) {
    if let Err(e) = fs::remove_file(path).await
        && e.kind() != ErrorKind::NotFound
    {
        warn!(path = %path.display(), error = %e, "failed to remove file");
    }
}

async fn remove_if_exists(path: &Path) -> Result<(), BlobError> {
    match fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

async fn read_sidecar(object_path: &Path) -> Sidecar {
    match fs::read(sidecar_path(object_path)).await {
        Ok(raw) => serde_json::from_slice(&raw).unwrap_or_else(|e| {
            warn!(path = %object_path.display(), error = %e, "ignoring unreadable sidecar");
            Sidecar::default()
        }),
        Err(_) => Sidecar::default(),
    }
}

struct Walk {
    dirs: Vec<PathBuf>,
    ready: VecDeque<String>,
}

#[async_trait]
impl ByteStore for FsByteStore {
    #[instrument(skip(self, data, options, cancel), fields(key = %key))]
    async fn save(
        &self,
        key: &str,
        mut data: BlobStream,
        options: &SaveOptions,
        cancel: &CancellationToken,
    ) -> Result<SavedObject, BlobError> {
        let target = self.object_path(key)?;
        let staged = self.staging_path("part");

        let size = match Self::write_staged(&staged, &mut data, options.limit, cancel).await {
            Ok(size) => size,
            Err(e) => {
                remove_quietly(&staged).await;
                debug!(error = %e, "save aborted");
                return Err(e);
            }
        };
        if let Err(e) = self.commit(&staged, &target, options).await {
            remove_quietly(&staged).await;
            return Err(e);
        }

        debug!(size, "object saved");
        Ok(SavedObject {
            key: key.to_owned(),
            size,
        })
    }

    async fn open_range_stream(
        &self,
        key: &str,
        range: Option<ByteRange>,
        cancel: &CancellationToken,
    ) -> Result<BlobStream, BlobError> {
        if cancel.is_cancelled() {
            return Err(BlobError::Cancelled);
        }
        let path = self.object_path(key)?;
        let mut file = match fs::File::open(&path).await {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(BlobError::NotFound(key.to_owned()));
            }
            Err(e) => return Err(e.into()),
        };

        let size = file.metadata().await?.len();
        let (offset, len) = range
            .unwrap_or(ByteRange::starting_at(0))
            .resolve(size)?;
        if offset > 0 {
            file.seek(SeekFrom::Start(offset)).await?;
        }

        Ok(interruptible(
            ReaderStream::new(file.take(len)).boxed(),
            cancel.clone(),
        ))
    }

    async fn get_meta(
        &self,
        key: &str,
        _cancel: &CancellationToken,
    ) -> Result<Option<ObjectMeta>, BlobError> {
        let path = self.object_path(key)?;
        let meta = match fs::metadata(&path).await {
            Ok(meta) if meta.is_file() => meta,
            Ok(_) => return Ok(None),
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let sidecar = read_sidecar(&path).await;

        Ok(Some(ObjectMeta {
            key: key.to_owned(),
            size: meta.len(),
            content_type: sidecar.content_type,
            last_modified: meta.modified().ok().map(DateTime::<Utc>::from),
            metadata: sidecar.metadata,
        }))
    }

    #[instrument(skip(self, _cancel), fields(key = %key))]
    async fn delete(&self, key: &str, _cancel: &CancellationToken) -> Result<(), BlobError> {
        let path = self.object_path(key)?;
        remove_if_exists(&path).await?;
        remove_if_exists(&sidecar_path(&path)).await?;
        debug!("object deleted");
        Ok(())
    }

    fn list_keys<'a>(
        &'a self,
        prefix: Option<&'a str>,
        cancel: &'a CancellationToken,
    ) -> KeyStream<'a> {
        let walk = Walk {
            dirs: vec![self.objects.clone()],
            ready: VecDeque::new(),
        };
        stream::try_unfold(walk, move |mut walk| async move {
            loop {
                if cancel.is_cancelled() {
                    return Err(BlobError::Cancelled);
                }
                if let Some(key) = walk.ready.pop_front() {
                    return Ok(Some((key, walk)));
                }
                let Some(dir) = walk.dirs.pop() else {
                    return Ok(None);
                };
                let mut entries = match fs::read_dir(&dir).await {
                    Ok(entries) => entries,
                    Err(e) if e.kind() == ErrorKind::NotFound => continue,
                    Err(e) => return Err(e.into()),
                };
                while let Some(entry) = entries.next_entry().await? {
                    let path = entry.path();
                    if entry.file_type().await?.is_dir() {
                        walk.dirs.push(path);
                        continue;
                    }
                    if path
                        .file_name()
                        .and_then(|n| n.to_str())
                        .is_none_or(|n| n.ends_with(SIDECAR_SUFFIX))
                    {
                        continue;
                    }
                    let Some(key) = path
                        .strip_prefix(&self.objects)
                        .ok()
                        .and_then(relative_to_key)
                    else {
                        continue;
                    };
                    if prefix.is_none_or(|p| key.starts_with(p)) {
                        walk.ready.push_back(key);
                    }
                }
            }
        })
        .boxed()
    }

    async fn health_check(&self) -> bool {
        let objects = fs::metadata(&self.objects).await;
        let staging = fs::metadata(&self.staging).await;
        objects.is_ok_and(|m| m.is_dir()) && staging.is_ok_and(|m| m.is_dir())
    }
}

#[cfg(test)]
mod tests {
    use futures::TryStreamExt;
    use lapse_blob::testing::{chunked_stream, run_conformance_tests};

    use super::*;

    async fn open(dir: &tempfile::TempDir) -> FsByteStore {
        FsByteStore::new(FsBlobConfig::new(dir.path()))
            .await
            .expect("open store")
    }

    #[tokio::test]
    async fn conformance() {
        let dir = tempfile::tempdir().unwrap();
        let store = open(&dir).await;
        run_conformance_tests(&store, "conf").await.unwrap();
    }

    #[tokio::test]
    async fn rejects_keys_escaping_the_root() {
        let dir = tempfile::tempdir().unwrap();
        let store = open(&dir).await;
        let cancel = CancellationToken::new();
        let result = store
            .save(
                "../escape",
                chunked_stream(b"x", 1),
                &SaveOptions::default(),
                &cancel,
            )
            .await;
        assert!(matches!(result, Err(BlobError::InvalidKey(_))));
        assert!(!dir.path().join("escape").exists());
    }

    #[tokio::test]
    async fn stale_staging_files_are_discarded_on_open() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join(STAGING_DIR)).unwrap();
        let leftover = dir.path().join(STAGING_DIR).join("crashed.part");
        std::fs::write(&leftover, b"half").unwrap();

        let _store = open(&dir).await;
        assert!(!leftover.exists());
    }

    #[tokio::test]
    async fn sidecar_keeps_metadata_and_is_hidden_from_listing() {
        let dir = tempfile::tempdir().unwrap();
        let store = open(&dir).await;
        let cancel = CancellationToken::new();
        let options = SaveOptions {
            content_type: Some("text/plain".into()),
            metadata: BTreeMap::from([("origin".to_owned(), "test".to_owned())]),
            ..SaveOptions::default()
        };
        store
            .save("ab/abc", chunked_stream(b"hello", 2), &options, &cancel)
            .await
            .unwrap();

        let meta = store.get_meta("ab/abc", &cancel).await.unwrap().unwrap();
        assert_eq!(meta.metadata.get("origin").map(String::as_str), Some("test"));
        assert!(meta.last_modified.is_some());

        let keys: Vec<String> = store.list_keys(None, &cancel).try_collect().await.unwrap();
        assert_eq!(keys, vec!["ab/abc".to_owned()]);

        store.delete("ab/abc", &cancel).await.unwrap();
        assert!(!dir.path().join(OBJECTS_DIR).join("ab/abc.meta.json").exists());
    }

    #[tokio::test]
    async fn cancelled_listing_errors() {
        let dir = tempfile::tempdir().unwrap();
        let store = open(&dir).await;
        let cancel = CancellationToken::new();
        cancel.cancel();
        let result: Result<Vec<String>, _> = store.list_keys(None, &cancel).try_collect().await;
        assert!(matches!(result, Err(BlobError::Cancelled)));
    }
}
