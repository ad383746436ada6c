//! Ledger keys and entries
//!
//! The derived `Ord` on [`LedgerKey`] is the bucket sort order: variant
//! order first, then fields in declaration order.

use serde::{Deserialize, Serialize};

use crate::hash::Hash256;

// =============================================================================
// Identifiers
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AccountId(pub [u8; 32]);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PoolId(pub [u8; 32]);

/// A tradeable asset
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Asset {
    Native,
    CreditAlphanum4 { code: [u8; 4], issuer: AccountId },
    CreditAlphanum12 { code: [u8; 12], issuer: AccountId },
}

impl Asset {
    /// Credit asset with an ASCII code; codes longer than 4 bytes use the
    /// 12-byte form and anything past 12 bytes is truncated.
    pub fn credit(code: &str, issuer: AccountId) -> Self {
        let raw = code.as_bytes();
        if raw.len() <= 4 {
            let mut code = [0u8; 4];
            code[..raw.len()].copy_from_slice(raw);
            Asset::CreditAlphanum4 { code, issuer }
        } else {
            let len = raw.len().min(12);
            let mut code = [0u8; 12];
            code[..len].copy_from_slice(&raw[..len]);
            Asset::CreditAlphanum12 { code, issuer }
        }
    }
}

/// What a trustline holds: a plain asset or shares of a liquidity pool
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum TrustLineAsset {
    Asset(Asset),
    PoolShare(PoolId),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Durability {
    Temporary,
    Persistent,
}

// =============================================================================
// Keys
// =============================================================================

/// Identity of a ledger entry
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum LedgerKey {
    Account {
        account_id: AccountId,
    },
    Trustline {
        account_id: AccountId,
        asset: TrustLineAsset,
    },
    Offer {
        seller_id: AccountId,
        offer_id: i64,
    },
    Data {
        account_id: AccountId,
        name: String,
    },
    LiquidityPool {
        pool_id: PoolId,
    },
    ContractData {
        contract: Hash256,
        key: Vec<u8>,
        durability: Durability,
    },
    ContractCode {
        hash: Hash256,
    },
}

impl LedgerKey {
    /// Contract data and code carry a liveness horizon
    pub fn is_contract(&self) -> bool {
        matches!(
            self,
            LedgerKey::ContractData { .. } | LedgerKey::ContractCode { .. }
        )
    }

    pub fn is_temporary(&self) -> bool {
        matches!(
            self,
            LedgerKey::ContractData {
                durability: Durability::Temporary,
                ..
            }
        )
    }

    /// Short name of the key kind, for logs and tooling
    pub fn kind(&self) -> &'static str {
        match self {
            LedgerKey::Account { .. } => "account",
            LedgerKey::Trustline { .. } => "trustline",
            LedgerKey::Offer { .. } => "offer",
            LedgerKey::Data { .. } => "data",
            LedgerKey::LiquidityPool { .. } => "liquidity_pool",
            LedgerKey::ContractData { .. } => "contract_data",
            LedgerKey::ContractCode { .. } => "contract_code",
        }
    }
}

// =============================================================================
// Entry Payloads
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountEntry {
    pub account_id: AccountId,
    pub balance: i64,
    pub seq_num: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrustlineEntry {
    pub account_id: AccountId,
    pub asset: TrustLineAsset,
    pub balance: i64,
    pub limit: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OfferEntry {
    pub seller_id: AccountId,
    pub offer_id: i64,
    pub selling: Asset,
    pub buying: Asset,
    pub amount: i64,
    pub price_n: i32,
    pub price_d: i32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataEntry {
    pub account_id: AccountId,
    pub name: String,
    pub value: Vec<u8>,
}

/// Constant-product pool over an asset pair
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LiquidityPoolEntry {
    pub pool_id: PoolId,
    pub asset_a: Asset,
    pub asset_b: Asset,
    pub reserve_a: i64,
    pub reserve_b: i64,
    pub total_shares: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContractDataEntry {
    pub contract: Hash256,
    pub key: Vec<u8>,
    pub durability: Durability,
    pub value: Vec<u8>,
    pub live_until_round: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContractCodeEntry {
    pub hash: Hash256,
    pub code: Vec<u8>,
    pub live_until_round: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum LedgerEntryData {
    Account(AccountEntry),
    Trustline(TrustlineEntry),
    Offer(OfferEntry),
    Data(DataEntry),
    LiquidityPool(LiquidityPoolEntry),
    ContractData(ContractDataEntry),
    ContractCode(ContractCodeEntry),
}

// =============================================================================
// Entries
// =============================================================================

/// A live ledger record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub last_modified_round: u32,
    pub data: LedgerEntryData,
}

impl LedgerEntry {
    pub fn new(last_modified_round: u32, data: LedgerEntryData) -> Self {
        Self {
            last_modified_round,
            data,
        }
    }

    /// Derive the key identifying this entry
    pub fn key(&self) -> LedgerKey {
        match &self.data {
            LedgerEntryData::Account(a) => LedgerKey::Account {
                account_id: a.account_id,
            },
            LedgerEntryData::Trustline(t) => LedgerKey::Trustline {
                account_id: t.account_id,
                asset: t.asset.clone(),
            },
            LedgerEntryData::Offer(o) => LedgerKey::Offer {
                seller_id: o.seller_id,
                offer_id: o.offer_id,
            },
            LedgerEntryData::Data(d) => LedgerKey::Data {
                account_id: d.account_id,
                name: d.name.clone(),
            },
            LedgerEntryData::LiquidityPool(p) => LedgerKey::LiquidityPool { pool_id: p.pool_id },
            LedgerEntryData::ContractData(c) => LedgerKey::ContractData {
                contract: c.contract,
                key: c.key.clone(),
                durability: c.durability,
            },
            LedgerEntryData::ContractCode(c) => LedgerKey::ContractCode { hash: c.hash },
        }
    }

    /// Liveness horizon of contract entries, `None` for everything else
    pub fn live_until_round(&self) -> Option<u32> {
        match &self.data {
            LedgerEntryData::ContractData(c) => Some(c.live_until_round),
            LedgerEntryData::ContractCode(c) => Some(c.live_until_round),
            _ => None,
        }
    }

    /// Move the liveness horizon; returns false for entries without one
    pub fn set_live_until_round(&mut self, round: u32) -> bool {
        match &mut self.data {
            LedgerEntryData::ContractData(c) => c.live_until_round = round,
            LedgerEntryData::ContractCode(c) => c.live_until_round = round,
            _ => return false,
        }
        true
    }

    /// Entries without a horizon are always live
    pub fn is_live_at(&self, round: u32) -> bool {
        self.live_until_round().map_or(true, |until| until >= round)
    }

    /// The pool's asset pair, if this is a liquidity pool entry
    pub fn pool_assets(&self) -> Option<(PoolId, &Asset, &Asset)> {
        match &self.data {
            LedgerEntryData::LiquidityPool(p) => Some((p.pool_id, &p.asset_a, &p.asset_b)),
            _ => None,
        }
    }
}

/// One record of a bucket: a live entry or a tombstone
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum BucketEntry {
    Live(LedgerEntry),
    Dead(LedgerKey),
}

impl BucketEntry {
    pub fn key(&self) -> LedgerKey {
        match self {
            BucketEntry::Live(entry) => entry.key(),
            BucketEntry::Dead(key) => key.clone(),
        }
    }

    pub fn is_tombstone(&self) -> bool {
        matches!(self, BucketEntry::Dead(_))
    }

    pub fn into_live(self) -> Option<LedgerEntry> {
        match self {
            BucketEntry::Live(entry) => Some(entry),
            BucketEntry::Dead(_) => None,
        }
    }
}
