//! Bucket Index
//!
//! Per-bucket lookup structures built in one forward scan of the bucket.
//!
//! Two strategies:
//! - [`IndividualIndex`]: exact offset for every key, for small buckets
//! - [`RangeIndex`]: key range + offset per page, for large buckets, plus
//!   a [`KeyFilter`] that rules out most missing keys without a page read
//!
//! Both also carry entry counters and an asset → liquidity pool map that
//! answers the pool-share trustline query without scanning.

mod filter;
mod individual;
pub mod persist;
mod range;

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::bucket::Bucket;
use crate::entry::{Asset, BucketEntry, LedgerKey, PoolId};
use crate::error::Result;

pub use filter::KeyFilter;
pub use individual::IndividualIndex;
pub use persist::LoadOutcome;
pub use range::{RangeEntry, RangeIndex};

/// Version of the index layout; part of the fingerprint
pub const INDEX_VERSION: u32 = 2;

// =============================================================================
// Build Parameters
// =============================================================================

/// Parameters an index was built with. A persisted index is only reused
/// when its fingerprint equals the current one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexFingerprint {
    pub version: u32,
    /// 0 means individual indexes only
    pub page_size_exponent: u32,
    /// 0 means range indexes only
    pub cutoff_bytes: u64,
}

impl IndexFingerprint {
    pub fn page_size(&self) -> u64 {
        1u64 << self.page_size_exponent
    }
}

/// Index settings handed to buckets by the storage manager
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexSettings {
    pub fingerprint: IndexFingerprint,
    /// Write built indexes to disk
    pub persist: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IndexStrategy {
    Individual,
    Range,
}

impl IndexStrategy {
    /// Pick the strategy for a bucket file of `file_size` bytes
    pub fn for_bucket(fingerprint: &IndexFingerprint, file_size: u64) -> Self {
        if fingerprint.page_size_exponent == 0 {
            IndexStrategy::Individual
        } else if fingerprint.cutoff_bytes == 0 || file_size >= fingerprint.cutoff_bytes {
            IndexStrategy::Range
        } else {
            IndexStrategy::Individual
        }
    }
}

// =============================================================================
// Lookup Result
// =============================================================================

/// Where a key may live in a bucket file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexLookup {
    /// Definitely not in the bucket
    Absent,
    /// Exact record offset
    Offset(u64),
    /// Scan `[start, end)`; the key is there or nowhere
    Page { start: u64, end: u64 },
}

// =============================================================================
// Secondary Data
// =============================================================================

/// Live and tombstone record counts
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryCounters {
    pub live: u64,
    pub dead: u64,
}

impl EntryCounters {
    pub fn record(&mut self, entry: &BucketEntry) {
        match entry {
            BucketEntry::Live(_) => self.live += 1,
            BucketEntry::Dead(_) => self.dead += 1,
        }
    }

    pub fn total(&self) -> u64 {
        self.live + self.dead
    }
}

/// Asset → ids of the live liquidity pools (in this bucket) trading it
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetPoolMap {
    map: BTreeMap<Asset, BTreeSet<PoolId>>,
}

impl AssetPoolMap {
    pub fn add_pool(&mut self, pool_id: PoolId, asset_a: &Asset, asset_b: &Asset) {
        self.map.entry(asset_a.clone()).or_default().insert(pool_id);
        self.map.entry(asset_b.clone()).or_default().insert(pool_id);
    }

    pub fn pools_for(&self, asset: &Asset) -> impl Iterator<Item = &PoolId> {
        self.map.get(asset).into_iter().flatten()
    }

    pub fn num_assets(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

// =============================================================================
// Bucket Index
// =============================================================================

/// Strategy-specific part of an index
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum IndexKind {
    Individual(IndividualIndex),
    Range(RangeIndex),
}

/// Complete index of one bucket
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BucketIndex {
    fingerprint: IndexFingerprint,
    counters: EntryCounters,
    asset_pools: AssetPoolMap,
    kind: IndexKind,
}

impl BucketIndex {
    /// Build in one forward scan of `bucket`
    pub fn build(bucket: &Bucket, fingerprint: &IndexFingerprint) -> Result<Self> {
        let mut kind = match IndexStrategy::for_bucket(fingerprint, bucket.file_size()) {
            IndexStrategy::Individual => IndexKind::Individual(IndividualIndex::default()),
            IndexStrategy::Range => IndexKind::Range(RangeIndex::new(fingerprint.page_size())),
        };
        let mut counters = EntryCounters::default();
        let mut asset_pools = AssetPoolMap::default();

        for item in bucket.iter()? {
            let (offset, entry) = item?;
            counters.record(&entry);
            if let BucketEntry::Live(live) = &entry {
                if let Some((pool_id, asset_a, asset_b)) = live.pool_assets() {
                    asset_pools.add_pool(pool_id, asset_a, asset_b);
                }
            }

            let key = entry.key();
            match &mut kind {
                IndexKind::Individual(index) => index.push(key, offset),
                IndexKind::Range(index) => index.push(key, offset),
            }
        }

        if let IndexKind::Range(index) = &mut kind {
            index.finish(bucket.data_end());
        }

        Ok(Self {
            fingerprint: *fingerprint,
            counters,
            asset_pools,
            kind,
        })
    }

    pub fn lookup(&self, key: &LedgerKey) -> IndexLookup {
        match &self.kind {
            IndexKind::Individual(index) => index.lookup(key),
            IndexKind::Range(index) => index.lookup(key),
        }
    }

    pub fn strategy(&self) -> IndexStrategy {
        match self.kind {
            IndexKind::Individual(_) => IndexStrategy::Individual,
            IndexKind::Range(_) => IndexStrategy::Range,
        }
    }

    pub fn fingerprint(&self) -> &IndexFingerprint {
        &self.fingerprint
    }

    pub fn counters(&self) -> &EntryCounters {
        &self.counters
    }

    pub fn asset_pools(&self) -> &AssetPoolMap {
        &self.asset_pools
    }

    pub fn kind(&self) -> &IndexKind {
        &self.kind
    }
}
