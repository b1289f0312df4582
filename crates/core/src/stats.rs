use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::record::FileRecord;

/// Aggregate statistics over all live records.
///
/// Always recomputable from the record set via [`AggregateStats::from_records`];
/// backends that maintain it incrementally apply [`add`](Self::add) and
/// [`remove`](Self::remove) atomically with the record mutation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AggregateStats {
    /// Number of live records.
    pub total_files: u64,
    /// Sum of `size` over live records.
    pub total_size: u64,
    /// Record count per MIME type.
    #[serde(default)]
    pub by_mime_type: BTreeMap<String, u64>,
    /// Record count per upload day (`YYYY-MM-DD`, UTC).
    #[serde(default)]
    pub by_upload_date: BTreeMap<String, u64>,
}

impl AggregateStats {
    /// Recompute statistics from scratch.
    pub fn from_records<'a>(records: impl IntoIterator<Item = &'a FileRecord>) -> Self {
        let mut stats = Self::default();
        for record in records {
            stats.add(record);
        }
        stats
    }

    /// Account for a newly created record.
    pub fn add(&mut self, record: &FileRecord) {
        self.total_files += 1;
        self.total_size += record.size;
        *self
            .by_mime_type
            .entry(record.mime_type.clone())
            .or_default() += 1;
        *self.by_upload_date.entry(record.date_bucket()).or_default() += 1;
    }

    /// Account for a deleted record. Buckets that drop to zero are removed.
    pub fn remove(&mut self, record: &FileRecord) {
        self.total_files = self.total_files.saturating_sub(1);
        self.total_size = self.total_size.saturating_sub(record.size);
        decrement(&mut self.by_mime_type, &record.mime_type);
        decrement(&mut self.by_upload_date, &record.date_bucket());
    }
}

fn decrement(map: &mut BTreeMap<String, u64>, key: &str) {
    if let Some(count) = map.get_mut(key) {
        *count = count.saturating_sub(1);
        if *count == 0 {
            map.remove(key);
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};

    use super::*;

    fn record(mime: &str, size: u64, day: u32) -> FileRecord {
        FileRecord::new(
            "f",
            mime,
            size,
            "h",
            "k",
            Utc.with_ymd_and_hms(2026, 1, day, 12, 0, 0).unwrap(),
            60,
            BTreeMap::new(),
        )
    }

    #[test]
    fn add_and_remove_are_inverse() {
        let a = record("text/plain", 10, 1);
        let b = record("image/png", 20, 2);
        let mut stats = AggregateStats::default();
        stats.add(&a);
        stats.add(&b);
        assert_eq!(stats.total_files, 2);
        assert_eq!(stats.total_size, 30);
        assert_eq!(stats.by_mime_type.get("image/png"), Some(&1));
        assert_eq!(stats.by_upload_date.get("2026-01-02"), Some(&1));

        stats.remove(&b);
        assert_eq!(stats, AggregateStats::from_records([&a]));
        stats.remove(&a);
        assert_eq!(stats, AggregateStats::default());
    }

    #[test]
    fn remove_never_underflows() {
        let mut stats = AggregateStats::default();
        stats.remove(&record("text/plain", 5, 1));
        assert_eq!(stats, AggregateStats::default());
    }
}
