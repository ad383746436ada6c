//! Bucket List
//!
//! A fixed number of levels, each holding a `curr` and a `snap` bucket.
//! Lower levels hold newer data; within a level `curr` is newer than `snap`.
//!
//! ## Adding a round
//! ```text
//! for level in (0..last).rev() where level spills at this round:
//!     old_snap         = snap(level)
//!     snap(level)      = curr(level)
//!     curr(level)      = empty
//!     curr(level + 1)  = merge(newer: old_snap, older: curr(level + 1))
//! curr(0) = fresh bucket of the round
//! ```
//! Going from the highest spilling level down means a level that spills in
//! the same round as the one above it hands its snap to an already-emptied
//! `curr`.

mod level;
mod schedule;
mod state;

use std::collections::HashSet;
use std::sync::Arc;

use tracing::{debug, info};

use crate::bucket::{Bucket, BucketStore};
use crate::error::{BucketDbError, Result};
use crate::hash::Hash256;
use crate::merge_pool::MergePool;

pub use level::{BucketLevel, Curr};
pub use schedule::{
    keep_tombstones, level_should_spill, levels_spilling_at, spill_period, DEFAULT_NUM_LEVELS,
    MAX_NUM_LEVELS, SPILL_BASE,
};
pub use state::{BucketListState, LevelState, PendingState, STATE_VERSION};

/// Per-level summary for tooling
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LevelStats {
    pub level: usize,
    pub curr: Hash256,
    pub snap: Hash256,
    pub curr_entries: u64,
    pub snap_entries: u64,
    pub merging: bool,
}

#[derive(Debug, Clone)]
pub struct BucketList {
    levels: Vec<BucketLevel>,
    /// Last applied round (0 before the first one)
    round: u32,
}

impl BucketList {
    /// An empty list with `num_levels` levels
    pub fn new(num_levels: usize, store: &BucketStore) -> Self {
        schedule::assert_monotonic(num_levels);
        Self {
            levels: (0..num_levels)
                .map(|level| BucketLevel::new(level, store.empty_bucket()))
                .collect(),
            round: 0,
        }
    }

    pub fn num_levels(&self) -> usize {
        self.levels.len()
    }

    pub fn round(&self) -> u32 {
        self.round
    }

    pub fn levels(&self) -> &[BucketLevel] {
        &self.levels
    }

    /// Apply one round's fresh bucket, spilling levels as scheduled
    pub fn add_batch(
        &mut self,
        round: u32,
        fresh: Arc<Bucket>,
        store: &BucketStore,
        merges: &MergePool,
    ) -> Result<()> {
        if round == 0 || round <= self.round {
            return Err(BucketDbError::InvalidRound {
                round,
                last: self.round,
            });
        }

        self.commit_finished_merges(store)?;

        let num_levels = self.levels.len();
        for level in (0..num_levels - 1).rev() {
            if !level_should_spill(round, level, num_levels) {
                continue;
            }
            let spilled = self.levels[level].spill(store)?;
            debug!(round, level, entries = spilled.entry_count(), "level spilled");
            self.levels[level + 1].receive(
                spilled,
                keep_tombstones(level + 1, num_levels),
                store,
                merges,
            )?;
        }

        self.levels[0].set_curr(fresh);
        self.round = round;
        Ok(())
    }

    /// Install outputs of merges that already finished
    pub fn commit_finished_merges(&mut self, store: &BucketStore) -> Result<()> {
        for level in &mut self.levels {
            level.commit_if_ready(store)?;
        }
        Ok(())
    }

    /// Wait for every in-flight merge and install its output
    pub fn resolve_all_merges(&mut self, store: &BucketStore) -> Result<()> {
        for level in &mut self.levels {
            if level.pending_merge().is_some() {
                let output = level.take_curr(store)?;
                level.set_curr(output);
            }
        }
        Ok(())
    }

    /// Immutable view for queries
    pub fn snapshot(&self) -> BucketListSnapshot {
        BucketListSnapshot {
            round: self.round,
            levels: self.levels.iter().map(BucketLevel::buckets).collect(),
        }
    }

    /// Every bucket hash the list needs on disk
    pub fn referenced_hashes(&self) -> HashSet<Hash256> {
        self.levels
            .iter()
            .flat_map(BucketLevel::buckets)
            .map(|b| b.hash())
            .filter(|h| !h.is_zero())
            .collect()
    }

    pub fn stats(&self) -> Vec<LevelStats> {
        self.levels
            .iter()
            .map(|level| {
                let (curr, merging) = match level.curr() {
                    Curr::Ready(bucket) => (Some(bucket), false),
                    Curr::Merging(_) => (None, true),
                };
                LevelStats {
                    level: level.level(),
                    curr: curr.map_or(Hash256::ZERO, |b| b.hash()),
                    snap: level.snap().hash(),
                    curr_entries: curr.map_or(0, |b| b.entry_count()),
                    snap_entries: level.snap().entry_count(),
                    merging,
                }
            })
            .collect()
    }

    // =========================================================================
    // Manifest
    // =========================================================================

    pub fn to_state(&self) -> BucketListState {
        BucketListState {
            version: STATE_VERSION,
            round: self.round,
            levels: self
                .levels
                .iter()
                .map(|level| match level.curr() {
                    Curr::Ready(curr) => LevelState {
                        curr: curr.hash(),
                        snap: level.snap().hash(),
                        pending: None,
                    },
                    Curr::Merging(pending) => LevelState {
                        curr: Hash256::ZERO,
                        snap: level.snap().hash(),
                        pending: Some(PendingState {
                            newer: pending.newer().hash(),
                            older: pending.older().hash(),
                            keep_tombstones: pending.keep_tombstones(),
                        }),
                    },
                })
                .collect(),
        }
    }

    /// Rebuild a list from its manifest, restarting pending merges
    pub fn from_state(
        state: &BucketListState,
        store: &BucketStore,
        merges: &MergePool,
    ) -> Result<Self> {
        if !(2..=MAX_NUM_LEVELS).contains(&state.levels.len()) {
            return Err(BucketDbError::Corrupt(format!(
                "manifest has {} levels, expected 2 to {}",
                state.levels.len(),
                MAX_NUM_LEVELS
            )));
        }
        schedule::assert_monotonic(state.levels.len());
        let mut levels = Vec::with_capacity(state.levels.len());
        for (i, level) in state.levels.iter().enumerate() {
            let snap = store.get_or_open(&level.snap)?;
            let curr = match &level.pending {
                Some(pending) => {
                    info!(level = i, "restarting merge from manifest");
                    Curr::Merging(merges.start(
                        i,
                        store.get_or_open(&pending.newer)?,
                        store.get_or_open(&pending.older)?,
                        pending.keep_tombstones,
                    ))
                }
                None => Curr::Ready(store.get_or_open(&level.curr)?),
            };
            levels.push(BucketLevel::from_parts(i, curr, snap));
        }
        Ok(Self {
            levels,
            round: state.round,
        })
    }
}

/// Point-in-time view of the list: per level, buckets newest first
#[derive(Debug, Clone)]
pub struct BucketListSnapshot {
    round: u32,
    levels: Vec<Vec<Arc<Bucket>>>,
}

impl BucketListSnapshot {
    pub fn round(&self) -> u32 {
        self.round
    }

    pub fn levels(&self) -> &[Vec<Arc<Bucket>>] {
        &self.levels
    }

    /// All buckets, newest first
    pub fn buckets(&self) -> impl Iterator<Item = &Arc<Bucket>> {
        self.levels.iter().flatten()
    }

    /// Bucket with `hash`, if the snapshot holds it
    pub fn find(&self, hash: &Hash256) -> Option<&Arc<Bucket>> {
        self.buckets().find(|b| b.hash() == *hash)
    }
}
