//! Conformance suite shared by every [`ByteStore`] backend.

use std::collections::BTreeSet;

use bytes::Bytes;
use futures::{StreamExt, TryStreamExt, stream};
use tokio_util::sync::CancellationToken;

use crate::error::BlobError;
use crate::store::ByteStore;
use crate::types::{BlobStream, ByteRange, SaveOptions};

/// Build a [`BlobStream`] yielding `data` in chunks of `chunk_size` bytes.
pub fn chunked_stream(data: &[u8], chunk_size: usize) -> BlobStream {
    let chunks: Vec<Result<Bytes, std::io::Error>> = data
        .chunks(chunk_size.max(1))
        .map(|c| Ok(Bytes::copy_from_slice(c)))
        .collect();
    stream::iter(chunks).boxed()
}

/// Build a [`BlobStream`] that yields `data` and then never finishes.
pub fn stalled_stream(data: &[u8]) -> BlobStream {
    let first = Bytes::copy_from_slice(data);
    stream::once(async move { Ok::<_, std::io::Error>(first) })
        .chain(stream::pending())
        .boxed()
}

fn payload(len: usize) -> Vec<u8> {
    (0..len).map(|i| u8::try_from(i % 251).unwrap_or(0)).collect()
}

/// Run the full byte store conformance test suite.
///
/// Every key used is placed under `prefix`, so the suite can share a bucket
/// with other data. Call this from your backend's test module.
///
/// # Errors
///
/// Returns an error if a backend call fails unexpectedly.
pub async fn run_conformance_tests(store: &dyn ByteStore, prefix: &str) -> Result<(), BlobError> {
    test_missing_key(store, prefix).await?;
    test_save_and_read(store, prefix).await?;
    test_range_read(store, prefix).await?;
    test_delete_is_idempotent(store, prefix).await?;
    test_limit_aborts_without_object(store, prefix).await?;
    test_cancelled_save_leaves_nothing(store, prefix).await?;
    test_cancelled_read_is_reported(store, prefix).await?;
    test_list_keys(store, prefix).await?;
    Ok(())
}

async fn test_missing_key(store: &dyn ByteStore, prefix: &str) -> Result<(), BlobError> {
    let cancel = CancellationToken::new();
    let key = format!("{prefix}/missing");
    assert!(store.get_meta(&key, &cancel).await?.is_none());
    let opened = store.open_range_stream(&key, None, &cancel).await;
    assert!(
        matches!(opened, Err(BlobError::NotFound(_))),
        "opening a missing key should be NotFound"
    );
    Ok(())
}

async fn test_save_and_read(store: &dyn ByteStore, prefix: &str) -> Result<(), BlobError> {
    let cancel = CancellationToken::new();
    let key = format!("{prefix}/roundtrip");
    let data = payload(10_000);
    let options = SaveOptions {
        content_type: Some("application/octet-stream".into()),
        limit: Some(10_000),
        ..SaveOptions::default()
    };
    let saved = store
        .save(&key, chunked_stream(&data, 333), &options, &cancel)
        .await?;
    assert_eq!(saved.key, key);
    assert_eq!(saved.size, 10_000);

    let read = store.read(&key, &cancel).await?;
    assert_eq!(read.as_ref(), data.as_slice());

    let meta = store.get_meta(&key, &cancel).await?.expect("meta after save");
    assert_eq!(meta.size, 10_000);
    assert_eq!(
        meta.content_type.as_deref(),
        Some("application/octet-stream")
    );
    Ok(())
}

async fn test_range_read(store: &dyn ByteStore, prefix: &str) -> Result<(), BlobError> {
    let cancel = CancellationToken::new();
    let key = format!("{prefix}/range");
    let data = payload(1_000);
    store
        .save(&key, chunked_stream(&data, 100), &SaveOptions::default(), &cancel)
        .await?;

    let slice = collect(
        store
            .open_range_stream(&key, Some(ByteRange::inclusive(10, 19)), &cancel)
            .await?,
    )
    .await?;
    assert_eq!(slice, &data[10..20]);

    let tail = collect(
        store
            .open_range_stream(&key, Some(ByteRange::starting_at(990)), &cancel)
            .await?,
    )
    .await?;
    assert_eq!(tail, &data[990..]);

    let beyond = store
        .open_range_stream(&key, Some(ByteRange::starting_at(5_000)), &cancel)
        .await;
    assert!(matches!(beyond, Err(BlobError::InvalidRange(_))));
    Ok(())
}

async fn test_delete_is_idempotent(store: &dyn ByteStore, prefix: &str) -> Result<(), BlobError> {
    let cancel = CancellationToken::new();
    let key = format!("{prefix}/to-delete");
    store
        .save(&key, chunked_stream(b"bye", 3), &SaveOptions::default(), &cancel)
        .await?;
    store.delete(&key, &cancel).await?;
    assert!(store.get_meta(&key, &cancel).await?.is_none());
    store.delete(&key, &cancel).await?;
    Ok(())
}

async fn test_limit_aborts_without_object(
    store: &dyn ByteStore,
    prefix: &str,
) -> Result<(), BlobError> {
    let cancel = CancellationToken::new();
    let key = format!("{prefix}/too-large");
    let options = SaveOptions {
        limit: Some(1_024),
        ..SaveOptions::default()
    };
    let result = store
        .save(&key, chunked_stream(&payload(2_048), 256), &options, &cancel)
        .await;
    assert!(
        matches!(result, Err(BlobError::TooLarge { limit: 1_024 })),
        "oversized stream should be rejected"
    );
    assert!(store.get_meta(&key, &cancel).await?.is_none());
    Ok(())
}

async fn test_cancelled_save_leaves_nothing(
    store: &dyn ByteStore,
    prefix: &str,
) -> Result<(), BlobError> {
    let cancel = CancellationToken::new();
    let key = format!("{prefix}/cancelled");
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        trigger.cancel();
    });
    let result = store
        .save(&key, stalled_stream(b"partial"), &SaveOptions::default(), &cancel)
        .await;
    assert!(matches!(result, Err(BlobError::Cancelled)));
    let fresh = CancellationToken::new();
    assert!(store.get_meta(&key, &fresh).await?.is_none());
    Ok(())
}

async fn test_cancelled_read_is_reported(
    store: &dyn ByteStore,
    prefix: &str,
) -> Result<(), BlobError> {
    let key = format!("{prefix}/cancelled-read");
    let data = payload(200_000);
    store
        .save(
            &key,
            chunked_stream(&data, 8_192),
            &SaveOptions::default(),
            &CancellationToken::new(),
        )
        .await?;

    let cancel = CancellationToken::new();
    let mut body = store.open_range_stream(&key, None, &cancel).await?;
    let first = body.next().await;
    assert!(matches!(first, Some(Ok(_))), "first chunk should arrive");
    cancel.cancel();

    let mut received = first.and_then(Result::ok).map_or(0, |c| c.len());
    let mut interrupted = false;
    while let Some(item) = body.next().await {
        match item {
            Ok(chunk) => received += chunk.len(),
            Err(e) => {
                assert_eq!(e.kind(), std::io::ErrorKind::Interrupted);
                interrupted = true;
                break;
            }
        }
    }
    assert!(interrupted, "a cancelled read must not end as a complete body");
    assert!(received < data.len());
    assert!(body.next().await.is_none(), "nothing follows the interruption");

    assert!(matches!(store.read(&key, &cancel).await, Err(BlobError::Cancelled)));
    store.delete(&key, &CancellationToken::new()).await?;
    Ok(())
}

async fn test_list_keys(store: &dyn ByteStore, prefix: &str) -> Result<(), BlobError> {
    let cancel = CancellationToken::new();
    let list_prefix = format!("{prefix}/listing");
    let mut expected = BTreeSet::new();
    for i in 0..5 {
        let key = format!("{list_prefix}/k{i}");
        store
            .save(&key, chunked_stream(b"x", 1), &SaveOptions::default(), &cancel)
            .await?;
        expected.insert(key);
    }
    let listed: BTreeSet<String> = store
        .list_keys(Some(&list_prefix), &cancel)
        .try_collect()
        .await?;
    assert_eq!(listed, expected);

    let all: BTreeSet<String> = store.list_keys(None, &cancel).try_collect().await?;
    assert!(all.is_superset(&expected));
    assert!(
        all.iter().all(|k| !k.contains(".tmp") && !k.ends_with(".meta.json")),
        "listing must not expose staging or sidecar files"
    );
    Ok(())
}

async fn collect(stream: BlobStream) -> Result<Vec<u8>, BlobError> {
    stream
        .try_fold(Vec::new(), |mut acc, chunk| async move {
            acc.extend_from_slice(&chunk);
            Ok(acc)
        })
        .await
        .map_err(|e| BlobError::Storage(e.to_string()))
}
