//! Record deduplication keyed on normalized name + address.
//!
//! Formatting noise differs between sessions (stray whitespace, punctuation,
//! capitalization), so dedup identity is computed from a folded subset of
//! fields rather than full structural equality. The same normalization is
//! used within a single task's extracted list and across the combined set,
//! so a record never needs two dedup code paths.

use std::collections::HashSet;

use crate::record::BusinessRecord;

/// Normalized dedup identity for one record.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RecordKey(String);

/// Fold one field: lower-case, strip punctuation, collapse whitespace.
fn fold(field: &str) -> String {
    let stripped: String = field
        .to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .collect();
    stripped.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Compute the dedup key from name + address. Pure and deterministic.
pub fn normalize_key(record: &BusinessRecord) -> RecordKey {
    let address = record.address.as_deref().unwrap_or("");
    RecordKey(format!("{}|{}", fold(&record.name), fold(address)))
}

/// Set of keys already admitted into a result collection.
#[derive(Debug, Default)]
pub struct DedupIndex {
    seen: HashSet<RecordKey>,
}

impl DedupIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Admit a record, returning false if its key was already present.
    /// First-seen record wins; later duplicates are no-ops.
    pub fn insert(&mut self, record: &BusinessRecord) -> bool {
        self.seen.insert(normalize_key(record))
    }

    pub fn contains(&self, record: &BusinessRecord) -> bool {
        self.seen.contains(&normalize_key(record))
    }

    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }
}

/// Drop duplicates from a single task's extracted list, preserving order.
pub fn dedup_records(records: Vec<BusinessRecord>) -> Vec<BusinessRecord> {
    let mut index = DedupIndex::new();
    records
        .into_iter()
        .filter(|record| index.insert(record))
        .collect()
}
