//! Entry Model
//!
//! Typed ledger records, their keys, and the bucket record that wraps them.
//! A bucket record is either a live entry or a tombstone for a key.

mod batch;
mod types;

pub use batch::LedgerBatch;
pub use types::{
    AccountEntry, AccountId, Asset, BucketEntry, ContractCodeEntry, ContractDataEntry, DataEntry,
    Durability, LedgerEntry, LedgerEntryData, LedgerKey, LiquidityPoolEntry, OfferEntry, PoolId,
    TrustLineAsset, TrustlineEntry,
};

/// Serialized size of a key, used for resource metering
pub fn key_size(key: &LedgerKey) -> u64 {
    bincode::serialized_size(key).unwrap_or(0)
}

/// Serialized size of an entry, used for resource metering
pub fn entry_size(entry: &LedgerEntry) -> u64 {
    bincode::serialized_size(entry).unwrap_or(0)
}
