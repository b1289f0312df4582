use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Upload policy for the storage orchestrator.
///
/// Treated as validated, immutable input once the orchestrator is built.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Largest accepted payload in bytes.
    pub max_file_size: u64,
    /// Accepted MIME types. Entries may be exact (`image/png`), a type
    /// wildcard (`image/*`) or `*/*`. An empty list accepts everything.
    pub allowed_mime_types: Vec<String>,
    /// Smallest accepted TTL in seconds.
    pub ttl_min_seconds: u64,
    /// Largest accepted TTL in seconds.
    pub ttl_max_seconds: u64,
    /// TTL applied when the caller does not supply one.
    pub default_ttl_seconds: u64,
    /// Share one stored object between uploads with identical content.
    pub deduplication: bool,
    /// Unreferenced objects younger than this are left alone by reconciliation.
    pub orphan_grace_seconds: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            max_file_size: 100 * 1024 * 1024,
            allowed_mime_types: Vec::new(),
            ttl_min_seconds: 60,
            ttl_max_seconds: 7 * 24 * 3600,
            default_ttl_seconds: 24 * 3600,
            deduplication: true,
            orphan_grace_seconds: 3600,
        }
    }
}

impl StorageConfig {
    /// Check that the limits are coherent.
    pub fn validate(&self) -> Result<(), String> {
        if self.max_file_size == 0 {
            return Err("max_file_size must be positive".to_owned());
        }
        if self.ttl_min_seconds > self.ttl_max_seconds {
            return Err(format!(
                "ttl_min_seconds ({}) exceeds ttl_max_seconds ({})",
                self.ttl_min_seconds, self.ttl_max_seconds
            ));
        }
        if !(self.ttl_min_seconds..=self.ttl_max_seconds).contains(&self.default_ttl_seconds) {
            return Err(format!(
                "default_ttl_seconds ({}) outside [{}, {}]",
                self.default_ttl_seconds, self.ttl_min_seconds, self.ttl_max_seconds
            ));
        }
        Ok(())
    }

    /// Whether `mime_type` is accepted by the allow-list.
    pub fn allows_mime(&self, mime_type: &str) -> bool {
        if self.allowed_mime_types.is_empty() {
            return true;
        }
        let mime = mime_type.trim().to_ascii_lowercase();
        self.allowed_mime_types.iter().any(|pattern| {
            let pattern = pattern.trim().to_ascii_lowercase();
            if pattern == "*/*" || pattern == mime {
                return true;
            }
            match pattern.strip_suffix("/*") {
                Some(top) => mime
                    .split_once('/')
                    .is_some_and(|(mime_top, _)| mime_top == top),
                None => false,
            }
        })
    }
}

/// Settings for the lifecycle sweeper.
#[derive(Debug, Clone)]
pub struct SweepConfig {
    /// Time between periodic sweeps.
    pub interval: Duration,
    /// Expired records fetched per search page.
    pub batch_size: u32,
    /// Upper bound on expired records processed in one cycle.
    pub max_per_cycle: u64,
    /// Concurrent deletions in flight.
    pub concurrency: usize,
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(15 * 60),
            batch_size: 100,
            max_per_cycle: 1000,
            concurrency: 10,
        }
    }
}
