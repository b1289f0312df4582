use std::collections::BTreeMap;

use chrono::{DateTime, Duration, SubsecRound, Utc};
use serde::{Deserialize, Serialize};

/// Caller-facing handle of a stored file.
pub type FileId = String;

/// Metadata for one stored object.
///
/// A record is immutable once created: `expires_at` is derived from
/// `uploaded_at` and `ttl_seconds` by [`FileRecord::new`] and never changes.
/// Several records may share one `storage_key` when their content was
/// deduplicated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRecord {
    /// Unique identifier (UUID-v4).
    pub id: FileId,
    /// Filename supplied by the uploader.
    pub original_name: String,
    /// MIME content type (e.g. `"image/png"`).
    pub mime_type: String,
    /// Size in bytes, as observed while streaming the upload.
    pub size: u64,
    /// Hex `SHA-256` digest of the stored bytes.
    pub content_hash: String,
    /// Location of the bytes in the byte store.
    pub storage_key: String,
    /// When the upload completed.
    pub uploaded_at: DateTime<Utc>,
    /// Time-to-live in seconds.
    pub ttl_seconds: u64,
    /// `uploaded_at + ttl_seconds`.
    pub expires_at: DateTime<Utc>,
    /// Caller-supplied labels, opaque to the store.
    #[serde(default)]
    pub custom_metadata: BTreeMap<String, String>,
}

impl FileRecord {
    /// Build a new record with a fresh id, deriving `expires_at`.
    ///
    /// Both timestamps are truncated to whole milliseconds, so they survive
    /// stores that index by epoch milliseconds without losing order.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        original_name: impl Into<String>,
        mime_type: impl Into<String>,
        size: u64,
        content_hash: impl Into<String>,
        storage_key: impl Into<String>,
        uploaded_at: DateTime<Utc>,
        ttl_seconds: u64,
        custom_metadata: BTreeMap<String, String>,
    ) -> Self {
        let uploaded_at = uploaded_at.trunc_subsecs(3);
        let ttl = i64::try_from(ttl_seconds).unwrap_or(i64::MAX);
        let expires_at = Duration::try_seconds(ttl)
            .and_then(|d| uploaded_at.checked_add_signed(d))
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
            .trunc_subsecs(3);
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            original_name: original_name.into(),
            mime_type: mime_type.into(),
            size,
            content_hash: content_hash.into(),
            storage_key: storage_key.into(),
            uploaded_at,
            ttl_seconds,
            expires_at,
            custom_metadata,
        }
    }

    /// Returns `true` once `now` is strictly past `expires_at`.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }

    /// Upload date bucket used by the aggregate statistics (`YYYY-MM-DD`).
    pub fn date_bucket(&self) -> String {
        self.uploaded_at.format("%Y-%m-%d").to_string()
    }
}

/// Generate a fresh byte store key, sharded by the first two characters of
/// a UUID so no single directory grows unbounded.
pub fn storage_key_for(id: &uuid::Uuid) -> String {
    let simple = id.simple().to_string();
    format!("{}/{simple}", &simple[..2])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(ttl: u64) -> FileRecord {
        let uploaded = DateTime::parse_from_rfc3339("2026-03-01T10:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        FileRecord::new(
            "a.txt",
            "text/plain",
            3,
            "abc",
            "ab/abcdef",
            uploaded,
            ttl,
            BTreeMap::new(),
        )
    }

    #[test]
    fn expires_at_is_derived_from_ttl() {
        let rec = sample(60);
        assert_eq!(rec.expires_at - rec.uploaded_at, Duration::seconds(60));
    }

    #[test]
    fn timestamps_have_millisecond_precision() {
        let uploaded = DateTime::parse_from_rfc3339("2026-03-01T10:00:00.123456789Z")
            .unwrap()
            .with_timezone(&Utc);
        let rec = FileRecord::new("a", "text/plain", 1, "h", "k", uploaded, 5, BTreeMap::new());
        assert_eq!(rec.uploaded_at.timestamp_subsec_nanos(), 123_000_000);
        assert_eq!(rec.expires_at.timestamp_subsec_nanos(), 123_000_000);

        let forever = FileRecord::new("a", "text/plain", 1, "h", "k", uploaded, u64::MAX, BTreeMap::new());
        assert_eq!(forever.expires_at.timestamp_subsec_nanos() % 1_000_000, 0);
    }

    #[test]
    fn expiry_is_strict() {
        let rec = sample(60);
        assert!(!rec.is_expired_at(rec.expires_at));
        assert!(rec.is_expired_at(rec.expires_at + Duration::milliseconds(1)));
    }

    #[test]
    fn huge_ttl_saturates() {
        let rec = sample(u64::MAX);
        assert_eq!(rec.expires_at, DateTime::<Utc>::MAX_UTC);
    }

    #[test]
    fn ids_are_unique() {
        assert_ne!(sample(1).id, sample(1).id);
    }

    #[test]
    fn date_bucket_format() {
        assert_eq!(sample(1).date_bucket(), "2026-03-01");
    }

    #[test]
    fn storage_key_is_sharded() {
        let id = uuid::Uuid::new_v4();
        let key = storage_key_for(&id);
        let (shard, rest) = key.split_once('/').unwrap();
        assert_eq!(shard.len(), 2);
        assert!(rest.starts_with(shard));
        assert_eq!(rest.len(), 32);
    }

    #[test]
    fn missing_custom_metadata_deserializes_empty() {
        let mut json = serde_json::to_value(sample(60)).unwrap();
        json.as_object_mut().unwrap().remove("custom_metadata");
        let rec: FileRecord = serde_json::from_value(json).unwrap();
        assert!(rec.custom_metadata.is_empty());
        assert_eq!(rec.ttl_seconds, 60);
    }
}
