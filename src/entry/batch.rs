//! Per-round ingestion batches

use std::collections::BTreeMap;

use tracing::debug;

use super::{BucketEntry, LedgerEntry, LedgerKey};

/// Entries created, updated and deleted by one round
#[derive(Debug, Clone, Default)]
pub struct LedgerBatch {
    pub created: Vec<LedgerEntry>,
    pub updated: Vec<LedgerEntry>,
    pub deleted: Vec<LedgerKey>,
}

impl LedgerBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create(mut self, entry: LedgerEntry) -> Self {
        self.created.push(entry);
        self
    }

    pub fn update(mut self, entry: LedgerEntry) -> Self {
        self.updated.push(entry);
        self
    }

    pub fn delete(mut self, key: LedgerKey) -> Self {
        self.deleted.push(key);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.created.is_empty() && self.updated.is_empty() && self.deleted.is_empty()
    }

    /// Collapse the batch into sorted bucket records, one per key.
    ///
    /// A key repeated within the batch keeps its last occurrence, with
    /// created < updated < deleted.
    pub fn into_bucket_entries(self) -> Vec<BucketEntry> {
        let mut records: BTreeMap<LedgerKey, BucketEntry> = BTreeMap::new();
        let mut collapsed = 0usize;

        for entry in self.created.into_iter().chain(self.updated) {
            if records.insert(entry.key(), BucketEntry::Live(entry)).is_some() {
                collapsed += 1;
            }
        }
        for key in self.deleted {
            if records.insert(key.clone(), BucketEntry::Dead(key)).is_some() {
                collapsed += 1;
            }
        }

        if collapsed > 0 {
            debug!(collapsed, "duplicate keys collapsed within batch");
        }

        records.into_values().collect()
    }
}
