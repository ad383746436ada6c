//! Storage Manager
//!
//! The façade over the bucket list: ingests round batches and answers
//! lookups.
//!
//! ## Responsibilities
//! - Reopen the bucket list from its manifest on startup
//! - Turn each round's batch into a fresh bucket and add it to the list
//! - Answer point, bulk and pool-share lookups against a snapshot
//! - Build indexes lazily and delete files nothing references

use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tracing::{debug, info};

use crate::bucket::BucketStore;
use crate::bucket_list::{BucketList, BucketListSnapshot, BucketListState, LevelStats};
use crate::config::Config;
use crate::entry::{AccountId, Asset, BucketEntry, LedgerBatch, LedgerEntry, LedgerKey, PoolId, TrustLineAsset};
use crate::error::{BucketDbError, Result};
use crate::hash::Hash256;
use crate::index::{BucketIndex, IndexSettings};
use crate::merge_pool::MergePool;

/// Owns the bucket list and serves all reads and writes
///
/// ## Concurrency:
/// - `bucket_list`: RwLock; queries hold the read lock only long enough to
///   clone a snapshot, ingestion swaps in a whole new list under the write
///   lock
/// - `apply_lock`: serializes `apply_batch` callers
/// - All methods use `&self`
pub struct StorageManager {
    config: Config,
    index_settings: Option<IndexSettings>,
    store: Arc<BucketStore>,
    merges: MergePool,
    bucket_list: RwLock<BucketList>,
    apply_lock: Mutex<()>,
}

impl StorageManager {
    /// Open or create storage under `config.data_dir`
    ///
    /// On startup:
    /// 1. Validate the config and create directories
    /// 2. Start the merge pool
    /// 3. Reload the level manifest if present (restarting pending merges)
    /// 4. Remove files the manifest does not mention
    pub fn open(config: Config) -> Result<Self> {
        config.validate()?;
        std::fs::create_dir_all(&config.data_dir)?;

        let store = Arc::new(BucketStore::open(&config.bucket_dir())?);
        let merges = MergePool::new(Arc::clone(&store), config.merge_threads)?;

        let bucket_list = match BucketListState::load(&config.state_path())? {
            Some(state) => {
                if state.levels.len() != config.num_levels {
                    return Err(BucketDbError::Config(format!(
                        "stored bucket list has {} levels, config asks for {}",
                        state.levels.len(),
                        config.num_levels
                    )));
                }
                info!(round = state.round, "reopening bucket list");
                BucketList::from_state(&state, &store, &merges)?
            }
            None => {
                info!(levels = config.num_levels, "creating empty bucket list");
                BucketList::new(config.num_levels, &store)
            }
        };

        let manager = Self {
            index_settings: config.index_settings(),
            config,
            store,
            merges,
            bucket_list: RwLock::new(bucket_list),
            apply_lock: Mutex::new(()),
        };
        manager.collect_garbage()?;
        Ok(manager)
    }

    // =========================================================================
    // Ingestion
    // =========================================================================

    /// Apply one round's created, updated and deleted entries.
    ///
    /// Rounds start at 1 and must strictly increase. Readers see the list
    /// either before or after the whole round.
    pub fn apply_batch(&self, round: u32, batch: LedgerBatch) -> Result<()> {
        let _guard = self.apply_lock.lock();

        let mut next = self.bucket_list.read().clone();
        if round == 0 || round <= next.round() {
            return Err(BucketDbError::InvalidRound {
                round,
                last: next.round(),
            });
        }

        let records = batch.into_bucket_entries();
        let fresh = self.store.write_bucket(&records)?;
        debug!(round, entries = records.len(), hash = %fresh.hash(), "fresh bucket written");

        next.add_batch(round, fresh, &self.store, &self.merges)?;
        next.to_state().save(&self.config.state_path())?;
        *self.bucket_list.write() = next;

        self.collect_garbage()?;
        Ok(())
    }

    // =========================================================================
    // Queries
    // =========================================================================

    /// Capture the current list for a consistent multi-step read
    pub fn snapshot(&self) -> BucketListSnapshot {
        self.bucket_list.read().snapshot()
    }

    /// Live entries for `keys`; keys that are absent or deleted are omitted
    pub fn load_keys(&self, keys: &BTreeSet<LedgerKey>) -> Result<Vec<LedgerEntry>> {
        self.load_keys_from(&self.snapshot(), keys)
    }

    /// Same as [`load_keys`](Self::load_keys) against a caller-held snapshot
    pub fn load_keys_from(
        &self,
        snapshot: &BucketListSnapshot,
        keys: &BTreeSet<LedgerKey>,
    ) -> Result<Vec<LedgerEntry>> {
        let mut remaining = keys.clone();
        let mut found = Vec::new();

        for bucket in snapshot.buckets() {
            if remaining.is_empty() {
                break;
            }
            for record in bucket.get_many(&remaining, self.index_settings.as_ref())? {
                remaining.remove(&record.key());
                if let BucketEntry::Live(entry) = record {
                    found.push(entry);
                }
            }
        }
        Ok(found)
    }

    /// The live entry for `key`, or `None` if absent or deleted
    pub fn get_entry(&self, key: &LedgerKey) -> Result<Option<LedgerEntry>> {
        let snapshot = self.snapshot();
        for bucket in snapshot.buckets() {
            if let Some(record) = bucket.get(key, self.index_settings.as_ref())? {
                return Ok(record.into_live());
            }
        }
        Ok(None)
    }

    /// Pool-share trustlines held by `account` in pools that trade `asset`
    pub fn load_pool_share_trustlines(
        &self,
        account: &AccountId,
        asset: &Asset,
    ) -> Result<Vec<LedgerEntry>> {
        let snapshot = self.snapshot();
        let pool_ids = match &self.index_settings {
            Some(settings) => self.pool_ids_by_index(&snapshot, settings, asset)?,
            None => self.pool_ids_by_scan(&snapshot, asset)?,
        };

        let keys: BTreeSet<LedgerKey> = pool_ids
            .into_iter()
            .map(|pool_id| LedgerKey::Trustline {
                account_id: *account,
                asset: TrustLineAsset::PoolShare(pool_id),
            })
            .collect();
        self.load_keys_from(&snapshot, &keys)
    }

    /// Every live entry matching `filter`, resolving shadowing across levels
    pub fn scan_live_entries<F>(&self, filter: F) -> Result<Vec<LedgerEntry>>
    where
        F: FnMut(&LedgerEntry) -> bool,
    {
        Self::scan_snapshot(&self.snapshot(), filter)
    }

    // =========================================================================
    // Introspection
    // =========================================================================

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Last applied round
    pub fn round(&self) -> u32 {
        self.bucket_list.read().round()
    }

    pub fn level_stats(&self) -> Vec<LevelStats> {
        self.bucket_list.read().stats()
    }

    /// The published index of a bucket in the current list, if built
    pub fn index_for(&self, hash: &Hash256) -> Option<Arc<BucketIndex>> {
        self.snapshot().find(hash).and_then(|b| b.index())
    }

    /// Build (or load) indexes for every bucket in the current list
    pub fn ensure_indexes(&self) -> Result<()> {
        let Some(settings) = &self.index_settings else {
            return Ok(());
        };
        for bucket in self.snapshot().buckets().filter(|b| !b.is_empty()) {
            bucket.ensure_index(settings)?;
        }
        Ok(())
    }

    /// Block until all in-flight merges are installed
    pub fn wait_for_merges(&self) -> Result<()> {
        let _guard = self.apply_lock.lock();
        let mut next = self.bucket_list.read().clone();
        next.resolve_all_merges(&self.store)?;
        next.to_state().save(&self.config.state_path())?;
        *self.bucket_list.write() = next;
        self.collect_garbage()?;
        Ok(())
    }

    // =========================================================================
    // Private Helpers
    // =========================================================================

    /// Delete bucket and index files no longer referenced by the list
    fn collect_garbage(&self) -> Result<usize> {
        let referenced: HashSet<Hash256> = self.bucket_list.read().referenced_hashes();
        self.store.collect_garbage(&referenced)
    }

    /// Pools named by any bucket's pool map that are still live in the
    /// newest state
    fn pool_ids_by_index(
        &self,
        snapshot: &BucketListSnapshot,
        settings: &IndexSettings,
        asset: &Asset,
    ) -> Result<BTreeSet<PoolId>> {
        let mut pool_keys = BTreeSet::new();
        for bucket in snapshot.buckets().filter(|b| !b.is_empty()) {
            let index = bucket.ensure_index(settings)?;
            pool_keys.extend(
                index
                    .asset_pools()
                    .pools_for(asset)
                    .map(|&pool_id| LedgerKey::LiquidityPool { pool_id }),
            );
        }
        Ok(self
            .load_keys_from(snapshot, &pool_keys)?
            .iter()
            .filter_map(|entry| entry.pool_assets())
            .filter(|(_, a, b)| *a == asset || *b == asset)
            .map(|(pool_id, _, _)| pool_id)
            .collect())
    }

    fn pool_ids_by_scan(
        &self,
        snapshot: &BucketListSnapshot,
        asset: &Asset,
    ) -> Result<BTreeSet<PoolId>> {
        let pools = Self::scan_snapshot(snapshot, |entry| {
            entry
                .pool_assets()
                .map_or(false, |(_, a, b)| a == asset || b == asset)
        })?;
        Ok(pools
            .iter()
            .filter_map(|entry| entry.pool_assets().map(|(pool_id, _, _)| pool_id))
            .collect())
    }

    fn scan_snapshot<F>(snapshot: &BucketListSnapshot, mut filter: F) -> Result<Vec<LedgerEntry>>
    where
        F: FnMut(&LedgerEntry) -> bool,
    {
        let mut seen: HashSet<LedgerKey> = HashSet::new();
        let mut found = Vec::new();
        for bucket in snapshot.buckets() {
            for item in bucket.iter()? {
                let (_, record) = item?;
                if !seen.insert(record.key()) {
                    continue;
                }
                if let BucketEntry::Live(entry) = record {
                    if filter(&entry) {
                        found.push(entry);
                    }
                }
            }
        }
        Ok(found)
    }
}
