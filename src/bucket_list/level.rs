//! One level of the bucket list: `curr`, `snap`, and an optional merge in
//! flight into `curr`.

use std::sync::Arc;

use crate::bucket::{Bucket, BucketStore};
use crate::error::Result;
use crate::merge_pool::{MergePool, PendingMerge};

/// State of a level's `curr` slot
#[derive(Debug, Clone)]
pub enum Curr {
    Ready(Arc<Bucket>),
    Merging(PendingMerge),
}

#[derive(Debug, Clone)]
pub struct BucketLevel {
    level: usize,
    curr: Curr,
    snap: Arc<Bucket>,
}

impl BucketLevel {
    pub fn new(level: usize, empty: Arc<Bucket>) -> Self {
        Self {
            level,
            curr: Curr::Ready(Arc::clone(&empty)),
            snap: empty,
        }
    }

    pub(crate) fn from_parts(level: usize, curr: Curr, snap: Arc<Bucket>) -> Self {
        Self { level, curr, snap }
    }

    pub fn level(&self) -> usize {
        self.level
    }

    pub fn curr(&self) -> &Curr {
        &self.curr
    }

    pub fn snap(&self) -> &Arc<Bucket> {
        &self.snap
    }

    pub fn pending_merge(&self) -> Option<&PendingMerge> {
        match &self.curr {
            Curr::Merging(pending) => Some(pending),
            Curr::Ready(_) => None,
        }
    }

    /// Buckets to consult for lookups, newest first
    pub fn buckets(&self) -> Vec<Arc<Bucket>> {
        match &self.curr {
            Curr::Ready(curr) => vec![Arc::clone(curr), Arc::clone(&self.snap)],
            Curr::Merging(pending) => vec![
                Arc::clone(pending.newer()),
                Arc::clone(pending.older()),
                Arc::clone(&self.snap),
            ],
        }
    }

    /// Install the output of a finished merge, if any; never blocks
    pub fn commit_if_ready(&mut self, store: &BucketStore) -> Result<()> {
        let curr = std::mem::replace(&mut self.curr, Curr::Ready(store.empty_bucket()));
        self.curr = match curr {
            Curr::Merging(pending) => match pending.try_resolve(store)? {
                Ok(output) => Curr::Ready(output),
                Err(still_pending) => Curr::Merging(still_pending),
            },
            ready => ready,
        };
        Ok(())
    }

    /// Take `curr`, waiting for its merge if one is in flight; leaves the
    /// slot empty
    pub fn take_curr(&mut self, store: &BucketStore) -> Result<Arc<Bucket>> {
        match std::mem::replace(&mut self.curr, Curr::Ready(store.empty_bucket())) {
            Curr::Ready(bucket) => Ok(bucket),
            Curr::Merging(pending) => pending.resolve(store),
        }
    }

    /// This level spills: `curr` becomes `snap`, `curr` is emptied, and the
    /// old `snap` is returned for the next level
    pub fn spill(&mut self, store: &BucketStore) -> Result<Arc<Bucket>> {
        let curr = self.take_curr(store)?;
        Ok(std::mem::replace(&mut self.snap, curr))
    }

    /// Merge a spilled `snap` from the level above into `curr`
    pub fn receive(
        &mut self,
        incoming: Arc<Bucket>,
        keep_tombstones: bool,
        store: &BucketStore,
        merges: &MergePool,
    ) -> Result<()> {
        let curr = self.take_curr(store)?;
        self.curr = if incoming.is_empty() {
            // Merges into this level already dropped what they had to drop
            Curr::Ready(curr)
        } else if curr.is_empty() && keep_tombstones {
            Curr::Ready(incoming)
        } else {
            Curr::Merging(merges.start(self.level, incoming, curr, keep_tombstones))
        };
        Ok(())
    }

    /// Install a fresh bucket as `curr` (level 0 only, after it spilled)
    pub fn set_curr(&mut self, bucket: Arc<Bucket>) {
        self.curr = Curr::Ready(bucket);
    }
}
