use std::collections::HashMap;

use chrono::{DateTime, SecondsFormat, Utc};

use lapse_core::{AggregateStats, FileRecord};
use lapse_meta::MetaError;

fn timestamp(value: &DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::AutoSi, true)
}

/// Flatten a record into `field, value` pairs for `HSET`.
///
/// The `day` field duplicates the upload date bucket so the delete script
/// can adjust statistics without parsing timestamps.
pub fn encode(record: &FileRecord) -> Result<Vec<String>, MetaError> {
    let custom = serde_json::to_string(&record.custom_metadata)
        .map_err(|e| MetaError::Serialization(e.to_string()))?;
    let fields = [
        ("id", record.id.clone()),
        ("original_name", record.original_name.clone()),
        ("mime_type", record.mime_type.clone()),
        ("size", record.size.to_string()),
        ("content_hash", record.content_hash.clone()),
        ("storage_key", record.storage_key.clone()),
        ("uploaded_at", timestamp(&record.uploaded_at)),
        ("ttl_seconds", record.ttl_seconds.to_string()),
        ("expires_at", timestamp(&record.expires_at)),
        ("custom_metadata", custom),
        ("day", record.date_bucket()),
    ];
    Ok(fields
        .into_iter()
        .flat_map(|(k, v)| [k.to_owned(), v])
        .collect())
}

/// Rebuild a record from the fields returned by `HGETALL`.
pub fn decode(mut fields: HashMap<String, String>) -> Result<FileRecord, MetaError> {
    let mut take = |name: &str| {
        fields
            .remove(name)
            .ok_or_else(|| MetaError::Serialization(format!("record field '{name}' missing")))
    };
    let id = take("id")?;
    let original_name = take("original_name")?;
    let mime_type = take("mime_type")?;
    let size = take("size")?;
    let content_hash = take("content_hash")?;
    let storage_key = take("storage_key")?;
    let uploaded_at = take("uploaded_at")?;
    let ttl_seconds = take("ttl_seconds")?;
    let expires_at = take("expires_at")?;
    let custom_metadata = take("custom_metadata")?;

    Ok(FileRecord {
        id,
        original_name,
        mime_type,
        size: parse_u64("size", &size)?,
        content_hash,
        storage_key,
        uploaded_at: parse_time("uploaded_at", &uploaded_at)?,
        ttl_seconds: parse_u64("ttl_seconds", &ttl_seconds)?,
        expires_at: parse_time("expires_at", &expires_at)?,
        custom_metadata: serde_json::from_str(&custom_metadata)
            .map_err(|e| MetaError::Serialization(e.to_string()))?,
    })
}

/// Parse the `stats` hash.
pub fn decode_stats(fields: HashMap<String, i64>) -> AggregateStats {
    let mut stats = AggregateStats::default();
    for (field, value) in fields {
        let Ok(count) = u64::try_from(value) else {
            continue;
        };
        if count == 0 {
            continue;
        }
        match field.as_str() {
            "files" => stats.total_files = count,
            "bytes" => stats.total_size = count,
            other => {
                if let Some(mime) = other.strip_prefix("mime:") {
                    stats.by_mime_type.insert(mime.to_owned(), count);
                } else if let Some(day) = other.strip_prefix("day:") {
                    stats.by_upload_date.insert(day.to_owned(), count);
                }
            }
        }
    }
    stats
}

fn parse_u64(name: &str, raw: &str) -> Result<u64, MetaError> {
    raw.parse()
        .map_err(|_| MetaError::Serialization(format!("record field '{name}' is not a number")))
}

fn parse_time(name: &str, raw: &str) -> Result<DateTime<Utc>, MetaError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| MetaError::Serialization(format!("record field '{name}': {e}")))
}
