//! Individual index: one `(key, offset)` pair per record.

use serde::{Deserialize, Serialize};

use crate::entry::LedgerKey;

use super::IndexLookup;

/// Exact offsets for every key, sorted by key
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndividualIndex {
    entries: Vec<(LedgerKey, u64)>,
}

impl IndividualIndex {
    /// Records arrive in bucket order, which is already key order
    pub(crate) fn push(&mut self, key: LedgerKey, offset: u64) {
        self.entries.push((key, offset));
    }

    pub fn lookup(&self, key: &LedgerKey) -> IndexLookup {
        match self.entries.binary_search_by(|(k, _)| k.cmp(key)) {
            Ok(pos) => IndexLookup::Offset(self.entries[pos].1),
            Err(_) => IndexLookup::Absent,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &(LedgerKey, u64)> {
        self.entries.iter()
    }
}
