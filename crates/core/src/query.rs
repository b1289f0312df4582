use std::cmp::Ordering;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::record::FileRecord;

/// Filters and pagination for a metadata search.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SearchFilter {
    /// Exact MIME type match.
    pub mime_type: Option<String>,
    /// Minimum size in bytes (inclusive).
    pub min_size: Option<u64>,
    /// Maximum size in bytes (inclusive).
    pub max_size: Option<u64>,
    /// Only records uploaded at or after this time.
    pub uploaded_from: Option<DateTime<Utc>>,
    /// Only records uploaded at or before this time.
    pub uploaded_to: Option<DateTime<Utc>>,
    /// Only records whose `expires_at` is before [`as_of`](Self::as_of).
    ///
    /// Expired results are ordered by `expires_at` ascending, ties by `id`.
    #[serde(default)]
    pub expired_only: bool,
    /// Reference time for `expired_only`; defaults to now.
    pub as_of: Option<DateTime<Utc>>,
    /// Maximum number of records to return (default 50, max 1000).
    pub limit: Option<u32>,
    /// Number of records to skip.
    pub offset: Option<u32>,
}

impl SearchFilter {
    /// Filter selecting records expired as of `as_of`, longest-expired first.
    pub fn expired(as_of: DateTime<Utc>, limit: u32) -> Self {
        Self {
            expired_only: true,
            as_of: Some(as_of),
            limit: Some(limit),
            ..Self::default()
        }
    }

    /// Return the effective limit, clamped to 1..=1000, defaulting to 50.
    pub fn effective_limit(&self) -> u32 {
        self.limit.unwrap_or(50).clamp(1, 1000)
    }

    /// Return the effective offset, defaulting to 0.
    pub fn effective_offset(&self) -> u32 {
        self.offset.unwrap_or(0)
    }

    /// Reference time used for expiry comparisons.
    pub fn reference_time(&self) -> DateTime<Utc> {
        self.as_of.unwrap_or_else(Utc::now)
    }

    /// Whether `record` passes every filter (pagination aside).
    pub fn matches(&self, record: &FileRecord, now: DateTime<Utc>) -> bool {
        if let Some(ref mime) = self.mime_type
            && record.mime_type != *mime
        {
            return false;
        }
        if self.min_size.is_some_and(|min| record.size < min) {
            return false;
        }
        if self.max_size.is_some_and(|max| record.size > max) {
            return false;
        }
        if self.uploaded_from.is_some_and(|from| record.uploaded_at < from) {
            return false;
        }
        if self.uploaded_to.is_some_and(|to| record.uploaded_at > to) {
            return false;
        }
        if self.expired_only && !record.is_expired_at(now) {
            return false;
        }
        true
    }

    /// Result ordering for this filter.
    pub fn compare(&self, a: &FileRecord, b: &FileRecord) -> Ordering {
        if self.expired_only {
            a.expires_at
                .cmp(&b.expires_at)
                .then_with(|| a.id.cmp(&b.id))
        } else {
            b.uploaded_at
                .cmp(&a.uploaded_at)
                .then_with(|| a.id.cmp(&b.id))
        }
    }

    /// Filter, order and paginate an in-memory candidate set.
    pub fn apply(&self, candidates: impl IntoIterator<Item = FileRecord>) -> SearchPage {
        let now = self.reference_time();
        let limit = self.effective_limit();
        let offset = self.effective_offset();

        let mut matching: Vec<FileRecord> = candidates
            .into_iter()
            .filter(|r| self.matches(r, now))
            .collect();
        matching.sort_by(|a, b| self.compare(a, b));

        let total = matching.len() as u64;
        let records = matching
            .into_iter()
            .skip(offset as usize)
            .take(limit as usize)
            .collect();

        SearchPage {
            records,
            total,
            limit,
            offset,
        }
    }
}

/// A paginated page of file records.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchPage {
    /// The records on this page.
    pub records: Vec<FileRecord>,
    /// Total number of records matching the filter (before pagination).
    pub total: u64,
    /// The limit used for this page.
    pub limit: u32,
    /// The offset used for this page.
    pub offset: u32,
}
