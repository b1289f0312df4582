use std::io;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use futures::{StreamExt, TryStreamExt, stream};
use tokio_util::sync::CancellationToken;

use crate::error::BlobError;
use crate::types::{BlobStream, ByteRange, KeyStream, ObjectMeta, SaveOptions, SavedObject};

/// Pluggable raw object storage.
///
/// Implementations must be `Send + Sync` and safe for concurrent access. Every
/// call takes a [`CancellationToken`]; a cancelled `save` must not leave an
/// object readable under the requested key.
#[async_trait]
pub trait ByteStore: Send + Sync {
    /// Stream `data` into the object at `key`.
    ///
    /// The payload is never fully buffered. If `options.limit` is set and the
    /// stream yields more bytes, the write is aborted with
    /// [`BlobError::TooLarge`] and nothing becomes visible under `key`.
    async fn save(
        &self,
        key: &str,
        data: BlobStream,
        options: &SaveOptions,
        cancel: &CancellationToken,
    ) -> Result<SavedObject, BlobError>;

    /// Open a stream over the object, optionally restricted to a byte range.
    ///
    /// Returns [`BlobError::NotFound`] if the key does not exist.
    async fn open_range_stream(
        &self,
        key: &str,
        range: Option<ByteRange>,
        cancel: &CancellationToken,
    ) -> Result<BlobStream, BlobError>;

    /// Fetch object metadata. Returns `None` if the key does not exist.
    async fn get_meta(
        &self,
        key: &str,
        cancel: &CancellationToken,
    ) -> Result<Option<ObjectMeta>, BlobError>;

    /// Delete an object. Deleting a missing key succeeds.
    async fn delete(&self, key: &str, cancel: &CancellationToken) -> Result<(), BlobError>;

    /// Lazily enumerate keys, optionally restricted to a prefix.
    ///
    /// The stream pages through the backend; it never loads the whole key
    /// space up front.
    fn list_keys<'a>(
        &'a self,
        prefix: Option<&'a str>,
        cancel: &'a CancellationToken,
    ) -> KeyStream<'a>;

    /// Whether the backend is reachable and usable.
    async fn health_check(&self) -> bool;

    /// Read a whole object into memory.
    async fn read(&self, key: &str, cancel: &CancellationToken) -> Result<Bytes, BlobError> {
        let stream = self.open_range_stream(key, None, cancel).await?;
        let buf = stream
            .try_fold(BytesMut::new(), |mut acc, chunk| async move {
                acc.extend_from_slice(&chunk);
                Ok(acc)
            })
            .await
            .map_err(|e| match e.kind() {
                io::ErrorKind::Interrupted => BlobError::Cancelled,
                _ => BlobError::Storage(e.to_string()),
            })?;
        Ok(buf.freeze())
    }
}

/// Wrap a body so that cancelling `cancel` ends it with an
/// [`io::ErrorKind::Interrupted`] error rather than a clean end of stream.
///
/// Readers can then tell a truncated body from a complete one.
pub fn interruptible(body: BlobStream, cancel: CancellationToken) -> BlobStream {
    stream::unfold(Some((body, cancel)), |state| async move {
        let (mut body, cancel) = state?;
        let next = tokio::select! {
            biased;
            () = cancel.cancelled() => None,
            next = body.next() => Some(next),
        };
        match next {
            None => Some((
                Err(io::Error::new(io::ErrorKind::Interrupted, "read cancelled")),
                None,
            )),
            Some(item) => item.map(|item| (item, Some((body, cancel)))),
        }
    })
    .boxed()
}
