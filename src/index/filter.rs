//! Key filter for range indexes
//!
//! A binary fuse filter over SipHash-2-4 hashes of every key in a bucket.
//! A key the filter rejects is definitely not in the bucket, so the range
//! index can answer without reading a page. Accepted keys may still be
//! absent, at a rate of roughly 1 in 65536.

use std::fmt;
use std::hash::Hasher;

use serde::{Deserialize, Serialize};
use siphasher::sip::SipHasher24;
use tracing::debug;
use xorf::{BinaryFuse16, Filter};

use crate::entry::LedgerKey;

/// SipHash key; fixed so persisted filters stay valid across restarts
const FILTER_SEED: [u8; 16] = *b"bucketdb-filter!";

/// Construction needs at least two distinct keys
const MIN_KEYS: usize = 2;

/// Hash of a key's bincode encoding
pub fn hash_key(key: &LedgerKey) -> u64 {
    let mut hasher = SipHasher24::new_with_key(&FILTER_SEED);
    if let Ok(bytes) = bincode::serialize(key) {
        hasher.write(&bytes);
    }
    hasher.finish()
}

#[derive(Clone, Serialize, Deserialize)]
pub struct KeyFilter(BinaryFuse16);

impl KeyFilter {
    /// Returns `None` when there are too few keys or construction fails;
    /// the index then falls back to page reads.
    pub(crate) fn from_hashes(hashes: &mut Vec<u64>) -> Option<Self> {
        hashes.sort_unstable();
        hashes.dedup();
        if hashes.len() < MIN_KEYS {
            return None;
        }
        match BinaryFuse16::try_from(hashes.as_slice()) {
            Ok(filter) => Some(Self(filter)),
            Err(reason) => {
                debug!(keys = hashes.len(), %reason, "building without a key filter");
                None
            }
        }
    }

    pub fn may_contain(&self, key: &LedgerKey) -> bool {
        self.0.contains(&hash_key(key))
    }

    pub fn size_bytes(&self) -> usize {
        self.0.len() * std::mem::size_of::<u16>()
    }
}

// The filter's fields are opaque, so compare encodings
impl PartialEq for KeyFilter {
    fn eq(&self, other: &Self) -> bool {
        match (bincode::serialize(&self.0), bincode::serialize(&other.0)) {
            (Ok(a), Ok(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for KeyFilter {}

impl fmt::Debug for KeyFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyFilter")
            .field("size_bytes", &self.size_bytes())
            .finish()
    }
}
