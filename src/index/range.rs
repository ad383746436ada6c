//! Range index
//!
//! Instead of storing every key, stores the key range and starting offset of
//! each page of records. A lookup finds the single page whose range could
//! hold the key; the bucket then scans that byte window.
//!
//! A new page starts at the first record whose offset reaches the current
//! page's byte boundary, so pages hold whole records and may run past the
//! nominal page size by one record.
//!
//! A [`KeyFilter`] over every key answers most misses before a page is read.

use serde::{Deserialize, Serialize};

use crate::entry::LedgerKey;

use super::filter::{self, KeyFilter};
use super::IndexLookup;

/// Inclusive key range covered by one page
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RangeEntry {
    pub lower: LedgerKey,
    pub upper: LedgerKey,
}

impl RangeEntry {
    pub fn contains(&self, key: &LedgerKey) -> bool {
        self.lower <= *key && *key <= self.upper
    }
}

/// Page-granular index for large buckets
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RangeIndex {
    page_size: u64,
    /// (key range, offset of the page's first record)
    pages: Vec<(RangeEntry, u64)>,
    /// End of the record section; the last page runs up to here
    data_end: u64,
    /// Absent for buckets with fewer than two keys
    filter: Option<KeyFilter>,
    /// Byte boundary that opens the next page (build state only)
    #[serde(skip)]
    page_upper_bound: u64,
    /// Filter hashes collected while building
    #[serde(skip)]
    key_hashes: Vec<u64>,
}

impl RangeIndex {
    /// `page_size` must be a power of two
    pub(crate) fn new(page_size: u64) -> Self {
        Self {
            page_size,
            pages: Vec::new(),
            data_end: 0,
            filter: None,
            page_upper_bound: 0,
            key_hashes: Vec::new(),
        }
    }

    pub(crate) fn push(&mut self, key: LedgerKey, offset: u64) {
        self.key_hashes.push(filter::hash_key(&key));
        match self.pages.last_mut() {
            Some((range, _)) if offset < self.page_upper_bound => range.upper = key,
            _ => {
                self.page_upper_bound = (offset & !(self.page_size - 1)) + self.page_size;
                self.pages.push((
                    RangeEntry {
                        lower: key.clone(),
                        upper: key,
                    },
                    offset,
                ));
            }
        }
    }

    pub(crate) fn finish(&mut self, data_end: u64) {
        self.data_end = data_end;
        self.page_upper_bound = 0;
        let mut hashes = std::mem::take(&mut self.key_hashes);
        self.filter = KeyFilter::from_hashes(&mut hashes);
    }

    pub fn lookup(&self, key: &LedgerKey) -> IndexLookup {
        let idx = self.pages.partition_point(|(range, _)| range.upper < *key);
        let Some((range, start)) = self.pages.get(idx) else {
            return IndexLookup::Absent;
        };
        if !range.contains(key) {
            return IndexLookup::Absent;
        }
        if let Some(filter) = &self.filter {
            if !filter.may_contain(key) {
                return IndexLookup::Absent;
            }
        }
        let end = self
            .pages
            .get(idx + 1)
            .map_or(self.data_end, |(_, next)| *next);
        IndexLookup::Page { start: *start, end }
    }

    pub fn page_size(&self) -> u64 {
        self.page_size
    }

    pub fn num_pages(&self) -> usize {
        self.pages.len()
    }

    pub fn pages(&self) -> impl Iterator<Item = &(RangeEntry, u64)> {
        self.pages.iter()
    }

    pub fn filter(&self) -> Option<&KeyFilter> {
        self.filter.as_ref()
    }
}
