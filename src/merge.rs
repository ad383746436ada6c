//! Bucket Merge
//!
//! Linear co-scan of two sorted buckets into a new one.
//!
//! | newer     | older     | output                                  |
//! |-----------|-----------|-----------------------------------------|
//! | record    | -         | newer record                            |
//! | -         | record    | older record                            |
//! | record    | record    | newer record (older one is shadowed)    |
//!
//! A tombstone in the output is dropped when `keep_tombstones` is false,
//! which is only the case for merges into the last level.

use std::cmp::Ordering;
use std::sync::Arc;

use tracing::debug;

use crate::bucket::{Bucket, BucketIterator, BucketStore};
use crate::entry::{BucketEntry, LedgerKey};
use crate::error::Result;

/// Counts reported by one merge
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeStats {
    pub from_newer: u64,
    pub from_older: u64,
    pub shadowed: u64,
    pub tombstones_dropped: u64,
}

/// Merge `newer` over `older` into a new bucket in `store`
pub fn merge_buckets(
    store: &BucketStore,
    newer: &Bucket,
    older: &Bucket,
    keep_tombstones: bool,
) -> Result<Arc<Bucket>> {
    merge_buckets_with_stats(store, newer, older, keep_tombstones).map(|(bucket, _)| bucket)
}

/// [`merge_buckets`], also returning what happened to each record
pub fn merge_buckets_with_stats(
    store: &BucketStore,
    newer: &Bucket,
    older: &Bucket,
    keep_tombstones: bool,
) -> Result<(Arc<Bucket>, MergeStats)> {
    let mut stats = MergeStats::default();
    if newer.is_empty() && older.is_empty() {
        return Ok((store.empty_bucket(), stats));
    }

    let mut newer_input = MergeInput::new(newer)?;
    let mut older_input = MergeInput::new(older)?;
    let mut writer = store.writer()?;

    loop {
        let side = match (newer_input.peek_key(), older_input.peek_key()) {
            (None, None) => break,
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (Some(n), Some(o)) => n.cmp(o),
        };

        let record = match side {
            Ordering::Less => {
                stats.from_newer += 1;
                newer_input.pop()?
            }
            Ordering::Greater => {
                stats.from_older += 1;
                older_input.pop()?
            }
            Ordering::Equal => {
                stats.from_newer += 1;
                stats.shadowed += 1;
                older_input.pop()?;
                newer_input.pop()?
            }
        };

        let Some(record) = record else { continue };
        if !keep_tombstones && record.is_tombstone() {
            stats.tombstones_dropped += 1;
            continue;
        }
        writer.append(&record)?;
    }

    let bucket = store.finish(writer)?;
    debug!(
        newer = %newer.hash(),
        older = %older.hash(),
        output = %bucket.hash(),
        entries = bucket.entry_count(),
        shadowed = stats.shadowed,
        tombstones_dropped = stats.tombstones_dropped,
        "merged buckets"
    );
    Ok((bucket, stats))
}

/// One side of a merge with its current record buffered
struct MergeInput {
    iter: BucketIterator,
    head: Option<(LedgerKey, BucketEntry)>,
}

impl MergeInput {
    fn new(bucket: &Bucket) -> Result<Self> {
        let mut input = Self {
            iter: bucket.iter()?,
            head: None,
        };
        input.advance()?;
        Ok(input)
    }

    fn peek_key(&self) -> Option<&LedgerKey> {
        self.head.as_ref().map(|(key, _)| key)
    }

    fn pop(&mut self) -> Result<Option<BucketEntry>> {
        let record = self.head.take().map(|(_, record)| record);
        self.advance()?;
        Ok(record)
    }

    fn advance(&mut self) -> Result<()> {
        self.head = match self.iter.next() {
            Some(item) => {
                let (_, record) = item?;
                Some((record.key(), record))
            }
            None => None,
        };
        Ok(())
    }
}
