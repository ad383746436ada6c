//! Tests for the storage manager
//!
//! These tests verify:
//! - Bulk, point and pool-share queries under every index configuration
//! - Deleted and never-written keys are absent
//! - Reopening from disk returns the same data
//! - Readers run alongside ingestion
//! - Unreferenced bucket files are collected

mod common;

use std::collections::{BTreeSet, HashSet};
use std::fs;

use bucketdb::bucket_list::MAX_NUM_LEVELS;
use bucketdb::entry::{Asset, TrustLineAsset};
use bucketdb::{BucketDbError, Config, LedgerBatch, LedgerKey, StorageManager};
use common::*;

// =============================================================================
// Scenario Tests (every index configuration)
// =============================================================================

fn check_scenario<S, F>(make: F, seed: u64)
where
    S: QueryScenario,
    F: Fn() -> S,
{
    for variant in IndexVariant::ALL {
        let temp = setup_temp_dir();
        let manager = open_manager(temp.path(), variant);
        let mut scenario = make();
        let mut rng = seeded_rng(seed);

        scenario.build(&manager, &mut rng);
        scenario.run(&manager);

        // Same answers once every merge has landed
        manager.wait_for_merges().unwrap();
        scenario.run(&manager);
    }
}

#[test]
fn test_general_queries_all_index_variants() {
    check_scenario(|| GeneralScenario::new(40), 1);
    check_scenario(|| GeneralScenario::new(70), 2);
}

#[test]
fn test_pool_share_queries_all_index_variants() {
    check_scenario(|| PoolShareScenario::new(60), 3);
}

// =============================================================================
// Basic Query Tests
// =============================================================================

#[test]
fn test_insert_then_delete_some() {
    for variant in IndexVariant::ALL {
        let temp = setup_temp_dir();
        let manager = open_manager(temp.path(), variant);

        let entries: Vec<_> = (1..=10).map(|i| account(account_id(i), 100, 1)).collect();
        let mut batch = LedgerBatch::new();
        for entry in &entries {
            batch = batch.create(entry.clone());
        }
        manager.apply_batch(1, batch).unwrap();

        let deleted: Vec<LedgerKey> = entries[..3].iter().map(|e| e.key()).collect();
        let mut batch = LedgerBatch::new();
        for key in &deleted {
            batch = batch.delete(key.clone());
        }
        manager.apply_batch(2, batch).unwrap();

        let keys: BTreeSet<LedgerKey> = entries.iter().map(|e| e.key()).collect();
        let loaded = manager.load_keys(&keys).unwrap();
        assert_same_entries(loaded, entries[3..].to_vec());

        for key in &deleted {
            assert_eq!(manager.get_entry(key).unwrap(), None);
        }

        // Merge everything down to the last level, which drops tombstones
        for round in 3..=70 {
            manager.apply_batch(round, LedgerBatch::new()).unwrap();
        }
        manager.wait_for_merges().unwrap();

        let loaded = manager.load_keys(&keys).unwrap();
        assert_same_entries(loaded, entries[3..].to_vec());
        let stats = manager.level_stats();
        assert_eq!(stats[3].curr_entries, 7, "{:?}", variant);
        for key in &deleted {
            assert_eq!(manager.get_entry(key).unwrap(), None);
        }
    }
}

#[test]
fn test_never_inserted_keys_are_absent() {
    let temp = setup_temp_dir();
    let manager = open_manager(temp.path(), IndexVariant::Mixed);

    // Nothing written yet
    assert_eq!(manager.get_entry(&account_key(account_id(1))).unwrap(), None);

    manager
        .apply_batch(1, LedgerBatch::new().create(account(account_id(1), 5, 1)))
        .unwrap();

    let keys: BTreeSet<LedgerKey> = (2..20).map(|i| account_key(account_id(i))).collect();
    assert!(manager.load_keys(&keys).unwrap().is_empty());
    assert!(manager.load_keys(&BTreeSet::new()).unwrap().is_empty());
}

#[test]
fn test_newest_version_wins_across_levels() {
    let temp = setup_temp_dir();
    let manager = open_manager(temp.path(), IndexVariant::IndividualOnly);
    let key = account_key(account_id(9));

    for round in 1..=30u32 {
        let mut batch = LedgerBatch::new();
        if round % 7 == 1 {
            batch = batch.update(account(account_id(9), i64::from(round), round));
        }
        // Filler so every round writes something
        batch = batch.create(account(account_id(100 + round as u8), 0, round));
        manager.apply_batch(round, batch).unwrap();
    }

    let entry = manager.get_entry(&key).unwrap().unwrap();
    assert_eq!(entry, account(account_id(9), 29, 29));
    assert_eq!(manager.round(), 30);
}

#[test]
fn test_empty_rounds_are_accepted() {
    let temp = setup_temp_dir();
    let manager = open_manager(temp.path(), IndexVariant::RangeOnly);

    manager
        .apply_batch(1, LedgerBatch::new().create(account(account_id(1), 5, 1)))
        .unwrap();
    for round in 2..=20 {
        manager.apply_batch(round, LedgerBatch::new()).unwrap();
    }

    assert_eq!(
        manager.get_entry(&account_key(account_id(1))).unwrap(),
        Some(account(account_id(1), 5, 1))
    );
}

#[test]
fn test_invalid_round_is_rejected() {
    let temp = setup_temp_dir();
    let manager = open_manager(temp.path(), IndexVariant::Mixed);

    assert!(matches!(
        manager.apply_batch(0, LedgerBatch::new()),
        Err(BucketDbError::InvalidRound { round: 0, .. })
    ));
    manager.apply_batch(3, LedgerBatch::new()).unwrap();
    assert!(matches!(
        manager.apply_batch(2, LedgerBatch::new()),
        Err(BucketDbError::InvalidRound { round: 2, last: 3 })
    ));
    assert_eq!(manager.round(), 3);
}

// =============================================================================
// Pool-Share Tests
// =============================================================================

#[test]
fn test_shadowed_pool_share_trustline_is_not_returned() {
    for variant in IndexVariant::ALL {
        let temp = setup_temp_dir();
        let manager = open_manager(temp.path(), variant);
        let holder = account_id(1);
        let usd = Asset::credit("USD", account_id(0xA0));

        manager
            .apply_batch(
                1,
                LedgerBatch::new()
                    .create(liquidity_pool(pool_id(1), Asset::Native, usd.clone(), 1))
                    .create(liquidity_pool(pool_id(2), usd.clone(), Asset::Native, 1))
                    .create(trustline(holder, TrustLineAsset::PoolShare(pool_id(1)), 10, 1))
                    .create(trustline(holder, TrustLineAsset::PoolShare(pool_id(2)), 20, 1)),
            )
            .unwrap();

        // Push round 1 down a level, then delete one trustline in a newer bucket
        for round in 2..=4 {
            manager.apply_batch(round, LedgerBatch::new()).unwrap();
        }
        manager
            .apply_batch(
                5,
                LedgerBatch::new().delete(pool_share_key(holder, pool_id(1))),
            )
            .unwrap();

        let found = manager.load_pool_share_trustlines(&holder, &usd).unwrap();
        assert_same_entries(
            found,
            vec![trustline(holder, TrustLineAsset::PoolShare(pool_id(2)), 20, 1)],
        );

        let other = Asset::credit("EUR", account_id(0xA0));
        assert!(manager
            .load_pool_share_trustlines(&holder, &other)
            .unwrap()
            .is_empty());
    }
}

#[test]
fn test_deleted_pool_hides_its_trustlines() {
    for variant in IndexVariant::ALL {
        let temp = setup_temp_dir();
        let manager = open_manager(temp.path(), variant);
        let holder = account_id(1);
        let usd = Asset::credit("USD", account_id(0xA0));

        manager
            .apply_batch(
                1,
                LedgerBatch::new()
                    .create(liquidity_pool(pool_id(1), Asset::Native, usd.clone(), 1))
                    .create(trustline(holder, TrustLineAsset::PoolShare(pool_id(1)), 10, 1)),
            )
            .unwrap();
        manager
            .apply_batch(
                2,
                LedgerBatch::new().delete(LedgerKey::LiquidityPool {
                    pool_id: pool_id(1),
                }),
            )
            .unwrap();

        // The older bucket's pool map still names the pool
        assert!(
            manager.load_pool_share_trustlines(&holder, &usd).unwrap().is_empty(),
            "{:?}",
            variant
        );

        for round in 3..=10 {
            manager.apply_batch(round, LedgerBatch::new()).unwrap();
        }
        manager.wait_for_merges().unwrap();
        assert!(
            manager.load_pool_share_trustlines(&holder, &usd).unwrap().is_empty(),
            "{:?}",
            variant
        );
        // The trustline itself is untouched
        assert!(manager
            .get_entry(&pool_share_key(holder, pool_id(1)))
            .unwrap()
            .is_some());
    }
}

// =============================================================================
// Scan Tests
// =============================================================================

#[test]
fn test_scan_live_entries_resolves_shadowing() {
    let temp = setup_temp_dir();
    let manager = open_manager(temp.path(), IndexVariant::Disabled);

    manager
        .apply_batch(
            1,
            LedgerBatch::new()
                .create(account(account_id(1), 1, 1))
                .create(account(account_id(2), 2, 1))
                .create(offer(account_id(3), 7, 50, 1)),
        )
        .unwrap();
    manager
        .apply_batch(
            2,
            LedgerBatch::new()
                .update(account(account_id(1), 11, 2))
                .delete(account_key(account_id(2))),
        )
        .unwrap();

    let accounts = manager
        .scan_live_entries(|e| e.key().kind() == "account")
        .unwrap();
    assert_eq!(accounts, vec![account(account_id(1), 11, 2)]);

    let everything = manager.scan_live_entries(|_| true).unwrap();
    assert_eq!(everything.len(), 2);
}

// =============================================================================
// Persistence Tests
// =============================================================================

#[test]
fn test_reopen_returns_same_data() {
    for variant in [IndexVariant::Mixed, IndexVariant::Disabled] {
        let temp = setup_temp_dir();
        let mut scenario = GeneralScenario::new(25);
        {
            let manager = open_manager(temp.path(), variant);
            scenario.build(&manager, &mut seeded_rng(5));
            manager.ensure_indexes().unwrap();
        }

        let manager = open_manager(temp.path(), variant);
        assert_eq!(manager.round(), 25);
        scenario.run(&manager);

        // Ingestion continues from the stored round
        assert!(manager.apply_batch(25, LedgerBatch::new()).is_err());
        manager.apply_batch(26, LedgerBatch::new()).unwrap();
    }
}

#[test]
fn test_reopen_with_other_level_count_fails() {
    let temp = setup_temp_dir();
    {
        let manager = open_manager(temp.path(), IndexVariant::Mixed);
        manager
            .apply_batch(1, LedgerBatch::new().create(account(account_id(1), 1, 1)))
            .unwrap();
    }

    let config = Config::builder()
        .data_dir(temp.path())
        .num_levels(6)
        .build();
    assert!(matches!(
        StorageManager::open(config),
        Err(BucketDbError::Config(_))
    ));
}

#[test]
fn test_invalid_config_is_rejected() {
    let temp = setup_temp_dir();
    for num_levels in [1, MAX_NUM_LEVELS + 1] {
        let config = Config::builder()
            .data_dir(temp.path())
            .num_levels(num_levels)
            .build();
        assert!(matches!(
            StorageManager::open(config),
            Err(BucketDbError::Config(_))
        ));
    }

    let config = Config::builder()
        .data_dir(temp.path())
        .num_levels(MAX_NUM_LEVELS)
        .build();
    assert!(StorageManager::open(config).is_ok());
}

// =============================================================================
// Index Publication Tests
// =============================================================================

#[test]
fn test_index_published_after_query() {
    let temp = setup_temp_dir();
    let manager = open_manager(temp.path(), IndexVariant::Mixed);
    manager
        .apply_batch(1, LedgerBatch::new().create(account(account_id(1), 1, 1)))
        .unwrap();

    let curr = manager.level_stats()[0].curr;
    assert!(manager.index_for(&curr).is_none());

    manager.get_entry(&account_key(account_id(1))).unwrap();
    let index = manager.index_for(&curr).expect("index built by the lookup");
    assert_eq!(index.counters().live, 1);
}

#[test]
fn test_disabled_indexing_builds_nothing() {
    let temp = setup_temp_dir();
    let manager = open_manager(temp.path(), IndexVariant::Disabled);
    manager
        .apply_batch(1, LedgerBatch::new().create(account(account_id(1), 1, 1)))
        .unwrap();

    manager.get_entry(&account_key(account_id(1))).unwrap();
    manager.ensure_indexes().unwrap();

    assert!(manager.index_for(&manager.level_stats()[0].curr).is_none());
    let index_files = fs::read_dir(manager.config().bucket_dir())
        .unwrap()
        .filter(|e| {
            e.as_ref()
                .unwrap()
                .path()
                .extension()
                .map_or(false, |ext| ext == "index")
        })
        .count();
    assert_eq!(index_files, 0);
}

// =============================================================================
// Concurrency Tests
// =============================================================================

#[test]
fn test_readers_during_ingestion() {
    let temp = setup_temp_dir();
    let manager = open_manager(temp.path(), IndexVariant::Mixed);

    let stable: Vec<_> = (1..=20).map(|i| account(account_id(i), 1_000, 1)).collect();
    let mut batch = LedgerBatch::new();
    for entry in &stable {
        batch = batch.create(entry.clone());
    }
    manager.apply_batch(1, batch).unwrap();

    std::thread::scope(|s| {
        for reader in 0..4 {
            let manager = &manager;
            let stable = &stable;
            s.spawn(move || {
                for i in 0..200 {
                    let entry = &stable[(i + reader) % stable.len()];
                    let found = manager.get_entry(&entry.key()).unwrap();
                    assert_eq!(found.as_ref(), Some(entry));
                }
            });
        }

        let mut rng = seeded_rng(6);
        for round in 2..=40 {
            let mut batch = LedgerBatch::new();
            for _ in 0..10 {
                batch = batch.create(random_entry(&mut rng, round));
            }
            manager.apply_batch(round, batch).unwrap();
        }
    });
}

#[test]
fn test_snapshot_is_stable_across_ingestion() {
    let temp = setup_temp_dir();
    let manager = open_manager(temp.path(), IndexVariant::IndividualOnly);
    manager
        .apply_batch(1, LedgerBatch::new().create(account(account_id(1), 1, 1)))
        .unwrap();

    let snapshot = manager.snapshot();
    manager
        .apply_batch(2, LedgerBatch::new().update(account(account_id(1), 2, 2)))
        .unwrap();

    let keys = BTreeSet::from([account_key(account_id(1))]);
    assert_eq!(
        manager.load_keys_from(&snapshot, &keys).unwrap(),
        vec![account(account_id(1), 1, 1)]
    );
    assert_eq!(
        manager.load_keys(&keys).unwrap(),
        vec![account(account_id(1), 2, 2)]
    );
    assert_eq!(snapshot.round(), 1);
}

// =============================================================================
// Garbage Collection Tests
// =============================================================================

#[test]
fn test_unreferenced_buckets_are_collected() {
    let temp = setup_temp_dir();
    let mut config = test_config(temp.path(), IndexVariant::Mixed);
    config.merge_threads = 0;
    let manager = StorageManager::open(config).unwrap();

    let mut rng = seeded_rng(7);
    for round in 1..=50 {
        let mut batch = LedgerBatch::new();
        for _ in 0..5 {
            batch = batch.create(random_entry(&mut rng, round));
        }
        manager.apply_batch(round, batch).unwrap();
    }
    manager.wait_for_merges().unwrap();
    manager.ensure_indexes().unwrap();

    let referenced: HashSet<String> = manager
        .level_stats()
        .iter()
        .flat_map(|s| [s.curr, s.snap])
        .filter(|h| !h.is_zero())
        .map(|h| h.to_hex())
        .collect();
    let on_disk: HashSet<String> = fs::read_dir(manager.config().bucket_dir())
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .filter_map(|name| {
            name.strip_prefix("bucket-")
                .and_then(|rest| rest.strip_suffix(".bkt"))
                .map(str::to_string)
        })
        .collect();

    assert_eq!(on_disk, referenced);
}
