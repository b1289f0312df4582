use std::collections::BTreeMap;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};

use crate::error::BlobError;

/// A stream of payload chunks. Pull-based, so a slow consumer throttles the
/// producer instead of buffering.
pub type BlobStream = BoxStream<'static, Result<Bytes, std::io::Error>>;

/// A lazily produced sequence of object keys.
pub type KeyStream<'a> = BoxStream<'a, Result<String, BlobError>>;

/// Inclusive byte range for partial reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ByteRange {
    /// First byte offset.
    pub start: u64,
    /// Last byte offset (inclusive). `None` reads to the end.
    pub end: Option<u64>,
}

impl ByteRange {
    /// Range from `start` to the end of the object.
    pub fn starting_at(start: u64) -> Self {
        Self { start, end: None }
    }

    /// Range `start..=end`.
    pub fn inclusive(start: u64, end: u64) -> Self {
        Self {
            start,
            end: Some(end),
        }
    }

    /// Resolve against an object of `size` bytes into `(offset, length)`.
    ///
    /// The end is clamped to the object; a start beyond the object or an end
    /// before the start is rejected.
    pub fn resolve(&self, size: u64) -> Result<(u64, u64), BlobError> {
        if let Some(end) = self.end
            && end < self.start
        {
            return Err(BlobError::InvalidRange(format!(
                "end {end} before start {}",
                self.start
            )));
        }
        if size == 0 && self.start == 0 {
            return Ok((0, 0));
        }
        if self.start >= size {
            return Err(BlobError::InvalidRange(format!(
                "start {} beyond object of {size} bytes",
                self.start
            )));
        }
        let last = self.end.map_or(size - 1, |end| end.min(size - 1));
        Ok((self.start, last - self.start + 1))
    }

    /// Render as an HTTP `Range` header value.
    pub fn to_header(&self) -> String {
        match self.end {
            Some(end) => format!("bytes={}-{end}", self.start),
            None => format!("bytes={}-", self.start),
        }
    }
}

/// Options for [`ByteStore::save`](crate::ByteStore::save).
#[derive(Debug, Clone, Default)]
pub struct SaveOptions {
    /// MIME type stored alongside the object.
    pub content_type: Option<String>,
    /// Abort once more than this many bytes have been read from the source.
    pub limit: Option<u64>,
    /// Backend-level user metadata.
    pub metadata: BTreeMap<String, String>,
}

/// Result of a completed save.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SavedObject {
    /// The key the object is reachable under.
    pub key: String,
    /// Number of bytes written.
    pub size: u64,
}

/// Descriptive information about a stored object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectMeta {
    pub key: String,
    pub size: u64,
    pub content_type: Option<String>,
    pub last_modified: Option<DateTime<Utc>>,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_clamps_end() {
        assert_eq!(ByteRange::inclusive(2, 100).resolve(10).unwrap(), (2, 8));
        assert_eq!(ByteRange::starting_at(0).resolve(10).unwrap(), (0, 10));
        assert_eq!(ByteRange::inclusive(9, 9).resolve(10).unwrap(), (9, 1));
    }

    #[test]
    fn resolve_rejects_bad_ranges() {
        assert!(matches!(
            ByteRange::starting_at(10).resolve(10),
            Err(BlobError::InvalidRange(_))
        ));
        assert!(matches!(
            ByteRange::inclusive(5, 2).resolve(10),
            Err(BlobError::InvalidRange(_))
        ));
    }

    #[test]
    fn empty_object_reads_nothing() {
        assert_eq!(ByteRange::starting_at(0).resolve(0).unwrap(), (0, 0));
    }

    #[test]
    fn header_format() {
        assert_eq!(ByteRange::inclusive(0, 99).to_header(), "bytes=0-99");
        assert_eq!(ByteRange::starting_at(512).to_header(), "bytes=512-");
    }
}
