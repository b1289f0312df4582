use std::collections::{BTreeMap, BTreeSet, HashMap};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use lapse_core::{AggregateStats, FileId, FileRecord};

/// Current on-disk format version.
pub const DOCUMENT_VERSION: u32 = 1;

/// The persisted metadata document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    pub version: u32,
    pub last_updated: DateTime<Utc>,
    pub totals: AggregateStats,
    pub records: BTreeMap<FileId, FileRecord>,
}

impl Default for Document {
    fn default() -> Self {
        Self {
            version: DOCUMENT_VERSION,
            last_updated: Utc::now(),
            totals: AggregateStats::default(),
            records: BTreeMap::new(),
        }
    }
}

/// The document plus the lookup indices derived from it.
///
/// Indices are never persisted; they are rebuilt on load.
#[derive(Debug, Default)]
pub struct Catalog {
    pub doc: Document,
    by_hash: HashMap<String, BTreeSet<FileId>>,
    refs: HashMap<String, BTreeSet<FileId>>,
}

impl Catalog {
    /// Build the indices for a loaded document.
    ///
    /// Returns the catalog and whether the stored totals had to be
    /// recomputed.
    pub fn from_document(mut doc: Document) -> (Self, bool) {
        let recomputed = AggregateStats::from_records(doc.records.values());
        let healed = recomputed != doc.totals;
        doc.totals = recomputed;

        let mut catalog = Self {
            doc,
            ..Self::default()
        };
        let records: Vec<(FileId, String, String)> = catalog
            .doc
            .records
            .values()
            .map(|r| (r.id.clone(), r.content_hash.clone(), r.storage_key.clone()))
            .collect();
        for (id, hash, key) in records {
            catalog.by_hash.entry(hash).or_default().insert(id.clone());
            catalog.refs.entry(key).or_default().insert(id);
        }
        (catalog, healed)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.doc.records.contains_key(id)
    }

    /// Live records referencing `storage_key`.
    pub fn ref_count(&self, storage_key: &str) -> u64 {
        self.refs.get(storage_key).map_or(0, |ids| ids.len() as u64)
    }

    pub fn find_by_hash(&self, content_hash: &str) -> Option<&FileRecord> {
        self.by_hash
            .get(content_hash)?
            .iter()
            .find_map(|id| self.doc.records.get(id))
    }

    /// Add a record and account for it everywhere. The id must be new.
    pub fn insert(&mut self, record: FileRecord) {
        self.by_hash
            .entry(record.content_hash.clone())
            .or_default()
            .insert(record.id.clone());
        self.refs
            .entry(record.storage_key.clone())
            .or_default()
            .insert(record.id.clone());
        self.doc.totals.add(&record);
        self.doc.records.insert(record.id.clone(), record);
    }

    /// Remove a record, returning it and the references left on its key.
    pub fn remove(&mut self, id: &str) -> Option<(FileRecord, u64)> {
        let record = self.doc.records.remove(id)?;
        unlink(&mut self.by_hash, &record.content_hash, id);
        unlink(&mut self.refs, &record.storage_key, id);
        self.doc.totals.remove(&record);
        let remaining = self.ref_count(&record.storage_key);
        Some((record, remaining))
    }
}

fn unlink(index: &mut HashMap<String, BTreeSet<FileId>>, key: &str, id: &str) {
    if let Some(ids) = index.get_mut(key) {
        ids.remove(id);
        if ids.is_empty() {
            index.remove(key);
        }
    }
}
