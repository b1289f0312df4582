//! Conformance suite shared by every [`MetadataStore`] backend.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Duration, TimeZone, Utc};
use futures::TryStreamExt;

use lapse_core::{AggregateStats, FileRecord, SearchFilter};

use crate::error::MetaError;
use crate::store::MetadataStore;

fn base_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0)
        .single()
        .unwrap_or(DateTime::<Utc>::UNIX_EPOCH)
}

fn record(hash: &str, key: &str, mime: &str, size: u64, offset_secs: i64, ttl: u64) -> FileRecord {
    FileRecord::new(
        format!("{hash}.bin"),
        mime,
        size,
        hash,
        key,
        base_time() + Duration::seconds(offset_secs),
        ttl,
        BTreeMap::from([("suite".to_owned(), "conformance".to_owned())]),
    )
}

/// Run the full metadata store conformance test suite.
///
/// Call this from your backend's test module with a fresh, empty store: the
/// suite checks aggregate statistics against the records it created.
///
/// # Errors
///
/// Returns an error if a backend call fails unexpectedly.
pub async fn run_conformance_tests(store: &dyn MetadataStore) -> Result<(), MetaError> {
    store.init().await?;
    test_missing(store).await?;
    test_put_and_get(store).await?;
    test_duplicate_id_conflicts(store).await?;
    test_find_by_hash(store).await?;
    test_reference_counting(store).await?;
    test_search(store).await?;
    test_stats_track_mutations(store).await?;
    test_all_ids(store).await?;
    Ok(())
}

async fn test_missing(store: &dyn MetadataStore) -> Result<(), MetaError> {
    assert!(store.get("no-such-id").await?.is_none());
    assert!(store.delete("no-such-id").await?.is_none());
    assert!(store.find_by_hash("no-such-hash").await?.is_none());
    Ok(())
}

async fn test_put_and_get(store: &dyn MetadataStore) -> Result<(), MetaError> {
    let rec = record("h-roundtrip", "ro/roundtrip", "text/plain", 42, 0, 600);
    store.put(&rec).await?;
    let fetched = store.get(&rec.id).await?;
    assert_eq!(fetched.as_ref(), Some(&rec), "record must round-trip intact");

    store.delete(&rec.id).await?;
    Ok(())
}

async fn test_duplicate_id_conflicts(store: &dyn MetadataStore) -> Result<(), MetaError> {
    let rec = record("h-dup", "du/dup", "text/plain", 1, 0, 600);
    store.put(&rec).await?;
    let again = store.put(&rec).await;
    assert!(
        matches!(again, Err(MetaError::Conflict(_))),
        "second put with the same id should conflict"
    );
    store.delete(&rec.id).await?;
    Ok(())
}

async fn test_find_by_hash(store: &dyn MetadataStore) -> Result<(), MetaError> {
    let rec = record("h-find", "fi/find", "image/png", 10, 0, 600);
    store.put(&rec).await?;
    let found = store.find_by_hash("h-find").await?;
    assert_eq!(found.map(|r| r.id), Some(rec.id.clone()));

    store.delete(&rec.id).await?;
    assert!(
        store.find_by_hash("h-find").await?.is_none(),
        "hash index entry must go with the record"
    );
    Ok(())
}

async fn test_reference_counting(store: &dyn MetadataStore) -> Result<(), MetaError> {
    let orphan_link = record("h-ref", "re/shared", "text/plain", 5, 0, 600);
    assert!(
        !store.put_if_referenced(&orphan_link).await?,
        "linking to an unreferenced key must be refused"
    );
    assert!(store.get(&orphan_link.id).await?.is_none());

    let first = record("h-ref", "re/shared", "text/plain", 5, 0, 600);
    let second = record("h-ref", "re/shared", "text/plain", 5, 1, 60);
    store.put(&first).await?;
    assert!(store.put_if_referenced(&second).await?);

    let removed = store.delete(&first.id).await?;
    let removed = removed.ok_or_else(|| MetaError::Backend("first record vanished".into()))?;
    assert_eq!(removed.record, first);
    assert_eq!(removed.remaining_refs, 1);
    assert_eq!(
        store.find_by_hash("h-ref").await?.map(|r| r.id),
        Some(second.id.clone()),
        "hash index must still point at the surviving record"
    );

    let removed = store.delete(&second.id).await?;
    assert_eq!(removed.map(|r| r.remaining_refs), Some(0));
    Ok(())
}

async fn test_search(store: &dyn MetadataStore) -> Result<(), MetaError> {
    // Expiry times relative to base: 10s, 20s, 20s, and one far in the future.
    let a = record("h-s-a", "se/a", "image/png", 100, 0, 10);
    let b = record("h-s-b", "se/b", "image/png", 200, 10, 10);
    let c = record("h-s-c", "se/c", "text/plain", 300, 0, 20);
    let fresh = record("h-s-d", "se/d", "image/png", 400, 30, 86_400);
    for r in [&a, &b, &c, &fresh] {
        store.put(r).await?;
    }

    let as_of = base_time() + Duration::seconds(60);
    let page = store.search(&SearchFilter::expired(as_of, 10)).await?;
    assert_eq!(page.total, 3);
    let mut tied = [b.id.clone(), c.id.clone()];
    tied.sort();
    let ids: Vec<String> = page.records.iter().map(|r| r.id.clone()).collect();
    assert_eq!(ids, vec![a.id.clone(), tied[0].clone(), tied[1].clone()]);

    let second_page = store
        .search(&SearchFilter {
            offset: Some(1),
            ..SearchFilter::expired(as_of, 1)
        })
        .await?;
    assert_eq!(second_page.total, 3);
    assert_eq!(second_page.records.len(), 1);
    assert_eq!(second_page.records[0].id, tied[0]);

    let pngs = store
        .search(&SearchFilter {
            mime_type: Some("image/png".into()),
            min_size: Some(150),
            ..SearchFilter::default()
        })
        .await?;
    let ids: Vec<String> = pngs.records.iter().map(|r| r.id.clone()).collect();
    assert_eq!(ids, vec![fresh.id.clone(), b.id.clone()], "newest upload first");

    for r in [&a, &b, &c, &fresh] {
        store.delete(&r.id).await?;
    }
    Ok(())
}

async fn test_stats_track_mutations(store: &dyn MetadataStore) -> Result<(), MetaError> {
    let before = store.stats().await?;
    let x = record("h-st-x", "st/x", "application/pdf", 1_000, 0, 600);
    let y = record("h-st-y", "st/y", "application/pdf", 24, 86_400, 600);
    store.put(&x).await?;
    store.put(&y).await?;

    let stats = store.stats().await?;
    assert_eq!(stats.total_files, before.total_files + 2);
    assert_eq!(stats.total_size, before.total_size + 1_024);
    assert_eq!(stats.by_mime_type.get("application/pdf"), Some(&2));
    assert_eq!(stats.by_upload_date.get("2026-03-02"), Some(&1));

    store.delete(&x.id).await?;
    store.delete(&y.id).await?;
    assert_eq!(store.stats().await?, before);
    assert_eq!(before, AggregateStats::default(), "suite expects an empty store");
    Ok(())
}

async fn test_all_ids(store: &dyn MetadataStore) -> Result<(), MetaError> {
    let mut expected = BTreeSet::new();
    let mut created = Vec::new();
    for i in 0..25 {
        let r = record(&format!("h-ids-{i}"), &format!("id/{i}"), "text/plain", 1, i, 600);
        store.put(&r).await?;
        expected.insert(r.id.clone());
        created.push(r);
    }

    let listed: BTreeSet<String> = store.all_ids().try_collect().await?;
    assert_eq!(listed, expected);

    for r in created {
        store.delete(&r.id).await?;
    }
    Ok(())
}
