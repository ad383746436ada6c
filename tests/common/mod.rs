//! Shared helpers for integration tests
//!
//! Entry constructors, seeded data generation, config variants, and the
//! query scenarios run against every index configuration.

#![allow(dead_code)]

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use bucketdb::entry::{
    AccountEntry, AccountId, Asset, ContractCodeEntry, ContractDataEntry, DataEntry, Durability,
    LedgerEntryData, LiquidityPoolEntry, OfferEntry, PoolId, TrustLineAsset, TrustlineEntry,
};
use bucketdb::{Config, Hash256, LedgerBatch, LedgerEntry, LedgerKey, StorageManager};
use rand::rngs::StdRng;
use rand::seq::IteratorRandom;
use rand::{Rng, SeedableRng};
use tempfile::TempDir;

// =============================================================================
// Setup
// =============================================================================

pub fn setup_temp_dir() -> TempDir {
    TempDir::new().unwrap()
}

pub fn seeded_rng(seed: u64) -> StdRng {
    StdRng::seed_from_u64(seed)
}

/// Index configurations every query scenario runs under
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexVariant {
    /// Page size exponent 0: individual indexes only
    IndividualOnly,
    /// Small buckets individual, large buckets range
    Mixed,
    /// Cutoff 0: range indexes only
    RangeOnly,
    /// No indexes; every lookup scans
    Disabled,
}

impl IndexVariant {
    pub const ALL: [IndexVariant; 4] = [
        IndexVariant::IndividualOnly,
        IndexVariant::Mixed,
        IndexVariant::RangeOnly,
        IndexVariant::Disabled,
    ];
}

/// Four levels, one merge worker, small pages so range indexes get many pages
pub fn test_config(dir: &Path, variant: IndexVariant) -> Config {
    let builder = Config::builder()
        .data_dir(dir)
        .num_levels(4)
        .merge_threads(1);
    let builder = match variant {
        IndexVariant::IndividualOnly => builder.index_page_size_exponent(0),
        IndexVariant::Mixed => builder
            .index_page_size_exponent(8)
            .index_cutoff_bytes(4 * 1024),
        IndexVariant::RangeOnly => builder.index_page_size_exponent(8).index_cutoff_bytes(0),
        IndexVariant::Disabled => builder.indexing_enabled(false),
    };
    builder.build()
}

pub fn open_manager(dir: &Path, variant: IndexVariant) -> StorageManager {
    StorageManager::open(test_config(dir, variant)).unwrap()
}

// =============================================================================
// Entry Constructors
// =============================================================================

pub fn account_id(byte: u8) -> AccountId {
    AccountId([byte; 32])
}

pub fn pool_id(byte: u8) -> PoolId {
    PoolId([byte; 32])
}

pub fn account(id: AccountId, balance: i64, round: u32) -> LedgerEntry {
    LedgerEntry::new(
        round,
        LedgerEntryData::Account(AccountEntry {
            account_id: id,
            balance,
            seq_num: i64::from(round),
        }),
    )
}

pub fn account_key(id: AccountId) -> LedgerKey {
    LedgerKey::Account { account_id: id }
}

pub fn data_entry(id: AccountId, name: &str, value: Vec<u8>, round: u32) -> LedgerEntry {
    LedgerEntry::new(
        round,
        LedgerEntryData::Data(DataEntry {
            account_id: id,
            name: name.to_string(),
            value,
        }),
    )
}

pub fn offer(seller: AccountId, offer_id: i64, amount: i64, round: u32) -> LedgerEntry {
    LedgerEntry::new(
        round,
        LedgerEntryData::Offer(OfferEntry {
            seller_id: seller,
            offer_id,
            selling: Asset::Native,
            buying: Asset::credit("USD", account_id(0xEE)),
            amount,
            price_n: 1,
            price_d: 2,
        }),
    )
}

pub fn trustline(id: AccountId, asset: TrustLineAsset, balance: i64, round: u32) -> LedgerEntry {
    LedgerEntry::new(
        round,
        LedgerEntryData::Trustline(TrustlineEntry {
            account_id: id,
            asset,
            balance,
            limit: i64::MAX,
        }),
    )
}

pub fn pool_share_key(id: AccountId, pool: PoolId) -> LedgerKey {
    LedgerKey::Trustline {
        account_id: id,
        asset: TrustLineAsset::PoolShare(pool),
    }
}

pub fn liquidity_pool(pool: PoolId, asset_a: Asset, asset_b: Asset, round: u32) -> LedgerEntry {
    LedgerEntry::new(
        round,
        LedgerEntryData::LiquidityPool(LiquidityPoolEntry {
            pool_id: pool,
            asset_a,
            asset_b,
            reserve_a: 1_000,
            reserve_b: 1_000,
            total_shares: 1_000,
        }),
    )
}

pub fn contract_data(
    contract: u8,
    key: &[u8],
    durability: Durability,
    live_until_round: u32,
    round: u32,
) -> LedgerEntry {
    LedgerEntry::new(
        round,
        LedgerEntryData::ContractData(ContractDataEntry {
            contract: Hash256([contract; 32]),
            key: key.to_vec(),
            durability,
            value: vec![contract; 24],
            live_until_round,
        }),
    )
}

pub fn contract_code(seed: u8, code_len: usize, live_until_round: u32, round: u32) -> LedgerEntry {
    LedgerEntry::new(
        round,
        LedgerEntryData::ContractCode(ContractCodeEntry {
            hash: Hash256::hash(&[seed]),
            code: vec![seed; code_len],
            live_until_round,
        }),
    )
}

// =============================================================================
// Random Data
// =============================================================================

/// A random entry of a random kind
pub fn random_entry(rng: &mut StdRng, round: u32) -> LedgerEntry {
    let id = AccountId(rng.gen());
    match rng.gen_range(0..4) {
        0 => account(id, rng.gen_range(0..1_000_000), round),
        1 => {
            let len = rng.gen_range(0..64);
            let value = (0..len).map(|_| rng.gen()).collect();
            data_entry(id, &format!("name-{}", rng.gen::<u16>()), value, round)
        }
        2 => offer(id, rng.gen_range(1..1_000_000), rng.gen_range(1..1_000), round),
        _ => LedgerEntry::new(
            round,
            LedgerEntryData::ContractData(ContractDataEntry {
                contract: Hash256(rng.gen()),
                key: rng.gen::<[u8; 8]>().to_vec(),
                durability: Durability::Persistent,
                value: vec![0xAB; rng.gen_range(0..48)],
                live_until_round: round + 1_000,
            }),
        ),
    }
}

/// Same entry with a changed payload
pub fn modified(entry: &LedgerEntry, rng: &mut StdRng, round: u32) -> LedgerEntry {
    let mut next = entry.clone();
    next.last_modified_round = round;
    match &mut next.data {
        LedgerEntryData::Account(a) => a.balance = rng.gen_range(0..1_000_000),
        LedgerEntryData::Data(d) => d.value = vec![rng.gen(); 8],
        LedgerEntryData::Offer(o) => o.amount = rng.gen_range(1..1_000),
        LedgerEntryData::ContractData(c) => c.value = vec![rng.gen(); 4],
        LedgerEntryData::ContractCode(c) => c.code.push(rng.gen()),
        LedgerEntryData::Trustline(t) => t.balance = rng.gen_range(0..1_000),
        LedgerEntryData::LiquidityPool(p) => p.reserve_a = rng.gen_range(0..1_000),
    }
    next
}

/// Compare query results to the expected live entries, ignoring order
pub fn assert_same_entries(actual: Vec<LedgerEntry>, expected: Vec<LedgerEntry>) {
    let actual: BTreeMap<LedgerKey, LedgerEntry> =
        actual.into_iter().map(|e| (e.key(), e)).collect();
    let expected: BTreeMap<LedgerKey, LedgerEntry> =
        expected.into_iter().map(|e| (e.key(), e)).collect();
    assert_eq!(actual.len(), expected.len(), "different number of entries");
    assert_eq!(actual, expected);
}

// =============================================================================
// Query Scenarios
// =============================================================================

/// A workload that populates a manager, then checks its query results
/// against an in-memory model
pub trait QueryScenario {
    fn build(&mut self, manager: &StorageManager, rng: &mut StdRng);
    fn run(&self, manager: &StorageManager);
}

/// Random creates, updates and deletes over many rounds
pub struct GeneralScenario {
    rounds: u32,
    live: BTreeMap<LedgerKey, LedgerEntry>,
    deleted: BTreeSet<LedgerKey>,
}

impl GeneralScenario {
    pub fn new(rounds: u32) -> Self {
        Self {
            rounds,
            live: BTreeMap::new(),
            deleted: BTreeSet::new(),
        }
    }
}

impl QueryScenario for GeneralScenario {
    fn build(&mut self, manager: &StorageManager, rng: &mut StdRng) {
        for round in 1..=self.rounds {
            let mut batch = LedgerBatch::new();
            let mut touched = BTreeSet::new();

            for _ in 0..rng.gen_range(5..15) {
                let entry = random_entry(rng, round);
                let key = entry.key();
                if self.live.contains_key(&key) || !touched.insert(key.clone()) {
                    continue;
                }
                self.deleted.remove(&key);
                self.live.insert(key, entry.clone());
                batch.created.push(entry);
            }

            let updates: Vec<LedgerKey> = self
                .live
                .keys()
                .filter(|k| !touched.contains(*k))
                .cloned()
                .choose_multiple(rng, 3);
            for key in updates {
                let entry = modified(&self.live[&key], rng, round);
                touched.insert(key.clone());
                self.live.insert(key, entry.clone());
                batch.updated.push(entry);
            }

            let deletes: Vec<LedgerKey> = self
                .live
                .keys()
                .filter(|k| !touched.contains(*k))
                .cloned()
                .choose_multiple(rng, 2);
            for key in deletes {
                self.live.remove(&key);
                self.deleted.insert(key.clone());
                batch.deleted.push(key);
            }

            manager.apply_batch(round, batch).unwrap();
        }
    }

    fn run(&self, manager: &StorageManager) {
        // Bulk load of everything ever written: deleted keys must not appear
        let all_keys: BTreeSet<LedgerKey> = self
            .live
            .keys()
            .chain(self.deleted.iter())
            .cloned()
            .collect();
        let loaded = manager.load_keys(&all_keys).unwrap();
        assert_same_entries(loaded, self.live.values().cloned().collect());

        // Point lookups
        for (key, entry) in self.live.iter().take(50) {
            assert_eq!(manager.get_entry(key).unwrap().as_ref(), Some(entry));
        }
        for key in self.deleted.iter().take(50) {
            assert_eq!(manager.get_entry(key).unwrap(), None);
        }
    }
}

/// Accounts holding pool-share trustlines in pools over a few assets; some
/// trustlines are deleted after their creation has moved to older levels
pub struct PoolShareScenario {
    rounds: u32,
    accounts: Vec<AccountId>,
    assets: Vec<Asset>,
    pools: BTreeMap<PoolId, (Asset, Asset)>,
    live_trustlines: BTreeMap<LedgerKey, LedgerEntry>,
}

impl PoolShareScenario {
    pub fn new(rounds: u32) -> Self {
        let issuer = account_id(0xA0);
        Self {
            rounds,
            accounts: (1..=6).map(account_id).collect(),
            assets: vec![
                Asset::Native,
                Asset::credit("USD", issuer),
                Asset::credit("EUR", issuer),
                Asset::credit("LONGASSET", issuer),
            ],
            pools: BTreeMap::new(),
            live_trustlines: BTreeMap::new(),
        }
    }

    fn expected(&self, account: &AccountId, asset: &Asset) -> Vec<LedgerEntry> {
        self.live_trustlines
            .iter()
            .filter(|(key, _)| match key {
                LedgerKey::Trustline {
                    account_id,
                    asset: TrustLineAsset::PoolShare(pool),
                } => {
                    account_id == account
                        && self
                            .pools
                            .get(pool)
                            .map_or(false, |(a, b)| a == asset || b == asset)
                }
                _ => false,
            })
            .map(|(_, entry)| entry.clone())
            .collect()
    }
}

impl QueryScenario for PoolShareScenario {
    fn build(&mut self, manager: &StorageManager, rng: &mut StdRng) {
        let mut next_pool = 1u8;
        for round in 1..=self.rounds {
            let mut batch = LedgerBatch::new();

            // A new pool every few rounds
            if round % 3 == 1 && next_pool < 40 {
                let pool = pool_id(next_pool);
                next_pool += 1;
                let pair: Vec<Asset> = self.assets.iter().cloned().choose_multiple(rng, 2);
                let (a, b) = (pair[0].clone(), pair[1].clone());
                self.pools.insert(pool, (a.clone(), b.clone()));
                batch.created.push(liquidity_pool(pool, a, b, round));
            }

            // Some accounts join existing pools
            if let Some((&pool, _)) = self.pools.iter().choose(rng) {
                let holder = *self.accounts.iter().choose(rng).unwrap();
                let key = pool_share_key(holder, pool);
                if !self.live_trustlines.contains_key(&key) {
                    let entry = trustline(holder, TrustLineAsset::PoolShare(pool), 10, round);
                    self.live_trustlines.insert(key, entry.clone());
                    batch.created.push(entry);
                }
            }

            // Plain-asset trustlines must never show up in pool-share results
            let holder = *self.accounts.iter().choose(rng).unwrap();
            batch.created.push(trustline(
                holder,
                TrustLineAsset::Asset(Asset::credit(&format!("T{}", round), account_id(0xA1))),
                1,
                round,
            ));

            // Occasionally delete an older pool-share trustline
            if round % 5 == 0 {
                if let Some(key) = self.live_trustlines.keys().next().cloned() {
                    self.live_trustlines.remove(&key);
                    batch.deleted.push(key);
                }
            }

            manager.apply_batch(round, batch).unwrap();
        }
    }

    fn run(&self, manager: &StorageManager) {
        for account in &self.accounts {
            for asset in &self.assets {
                let actual = manager.load_pool_share_trustlines(account, asset).unwrap();
                assert_same_entries(actual, self.expected(account, asset));
            }
        }

        // An account with no trustlines at all
        let stranger = account_id(0xFF);
        for asset in &self.assets {
            assert!(manager
                .load_pool_share_trustlines(&stranger, asset)
                .unwrap()
                .is_empty());
        }
    }
}
