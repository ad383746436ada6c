//! Bucket Module
//!
//! Immutable, key-sorted, content-addressed runs of ledger records.
//!
//! ## File Format
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │ Header (6 bytes)                                        │
//! │   Magic: "LKVB" (4) | Version: u16 (2)                  │
//! ├─────────────────────────────────────────────────────────┤
//! │ Records (variable)                                      │
//! │   [PayloadLen: u32][bincode(BucketEntry)]               │
//! │   ... repeated, strictly increasing by key ...          │
//! ├─────────────────────────────────────────────────────────┤
//! │ Footer (16 bytes)                                       │
//! │   EntryCount: u64 (8) | DataCRC: u32 (4) | Padding (4)  │
//! └─────────────────────────────────────────────────────────┘
//! ```
//!
//! The bucket hash is the SHA-256 of the record section. The empty bucket
//! has the all-zero hash and no file.

mod iterator;
mod reader;
mod store;
mod writer;

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, info, warn};

use crate::entry::{BucketEntry, LedgerKey};
use crate::error::{BucketDbError, Result};
use crate::hash::Hash256;
use crate::index::{persist, BucketIndex, IndexLookup, IndexSettings, LoadOutcome};

pub use iterator::BucketIterator;
pub use store::BucketStore;
pub use writer::BucketWriter;

use reader::BucketFile;

// =============================================================================
// Shared Constants (used by writer, reader, iterator)
// =============================================================================

/// Magic bytes identifying a bucket file
pub(crate) const MAGIC: &[u8; 4] = b"LKVB";

/// Current bucket format version
pub(crate) const VERSION: u16 = 1;

/// Header size: Magic (4) + Version (2) = 6 bytes
pub(crate) const HEADER_SIZE: u64 = 6;

/// Footer size: EntryCount (8) + DataCRC (4) + Padding (4) = 16 bytes
pub(crate) const FOOTER_SIZE: u64 = 16;

/// Length prefix in front of every record
pub(crate) const RECORD_PREFIX_SIZE: u64 = 4;

/// Prefix of in-progress files; swept when a store opens
pub(crate) const TMP_PREFIX: &str = "tmp-bucket-";

/// `bucket-<hex>.bkt`
pub fn bucket_file_name(hash: &Hash256) -> String {
    format!("bucket-{}.bkt", hash.to_hex())
}

/// `bucket-<hex>.index`
pub fn index_file_name(hash: &Hash256) -> String {
    format!("bucket-{}.index", hash.to_hex())
}

// =============================================================================
// Bucket
// =============================================================================

/// An immutable bucket, shared between levels and snapshots through `Arc`
///
/// ## Concurrency:
/// - Point reads share one file handle behind a mutex
/// - The index is published once; readers see either nothing or the
///   complete index
pub struct Bucket {
    hash: Hash256,
    /// `None` for the empty bucket
    file: Option<BucketFile>,
    index: RwLock<Option<Arc<BucketIndex>>>,
}

impl std::fmt::Debug for Bucket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Bucket")
            .field("hash", &self.hash)
            .field("entries", &self.entry_count())
            .finish()
    }
}

impl Bucket {
    /// The canonical empty bucket
    pub fn empty() -> Self {
        Self {
            hash: Hash256::ZERO,
            file: None,
            index: RwLock::new(None),
        }
    }

    /// Open an existing bucket file
    pub fn open(path: &Path, hash: Hash256) -> Result<Self> {
        Ok(Self {
            hash,
            file: Some(BucketFile::open(path)?),
            index: RwLock::new(None),
        })
    }

    pub fn hash(&self) -> Hash256 {
        self.hash
    }

    pub fn is_empty(&self) -> bool {
        self.file.is_none()
    }

    pub fn entry_count(&self) -> u64 {
        self.file.as_ref().map_or(0, |f| f.entry_count)
    }

    /// Size of the bucket file in bytes (0 for the empty bucket)
    pub fn file_size(&self) -> u64 {
        self.file.as_ref().map_or(0, |f| f.file_size)
    }

    pub fn path(&self) -> Option<&Path> {
        self.file.as_ref().map(|f| f.path.as_path())
    }

    /// Path of the persisted index belonging to this bucket
    pub fn index_path(&self) -> Option<PathBuf> {
        self.path()
            .map(|p| p.with_file_name(index_file_name(&self.hash)))
    }

    /// End of the record section
    pub fn data_end(&self) -> u64 {
        self.file.as_ref().map_or(HEADER_SIZE, BucketFile::data_end)
    }

    /// Iterate over all records in key order
    pub fn iter(&self) -> Result<BucketIterator> {
        match &self.file {
            Some(file) => BucketIterator::open(&file.path, file.data_end()),
            None => Ok(BucketIterator::empty()),
        }
    }

    /// Check the footer checksum against the record section
    pub fn verify_checksum(&self) -> Result<bool> {
        match &self.file {
            Some(file) => file.verify_checksum(),
            None => Ok(true),
        }
    }

    // =========================================================================
    // Lookups
    // =========================================================================

    /// Look up a single key.
    ///
    /// Returns:
    /// - `Ok(Some(Live(..)))`: key present with a value
    /// - `Ok(Some(Dead(..)))`: key present as a tombstone
    /// - `Ok(None)`: key not in this bucket
    ///
    /// With `settings == None` (indexing disabled) the file is scanned.
    pub fn get(
        &self,
        key: &LedgerKey,
        settings: Option<&IndexSettings>,
    ) -> Result<Option<BucketEntry>> {
        let Some(file) = &self.file else {
            return Ok(None);
        };

        let Some(settings) = settings else {
            return self.scan_for(key);
        };

        let index = self.ensure_index(settings)?;
        match index.lookup(key) {
            IndexLookup::Absent => Ok(None),
            IndexLookup::Offset(offset) => {
                let entry = file.read_at(offset)?;
                if entry.key() != *key {
                    return Err(BucketDbError::Corrupt(format!(
                        "bucket {} index points at wrong record for {:?}",
                        self.hash, key
                    )));
                }
                Ok(Some(entry))
            }
            IndexLookup::Page { start, end } => file.scan_window(start, end, key),
        }
    }

    /// Look up many keys at once; returns the records found, in key order
    pub fn get_many(
        &self,
        keys: &BTreeSet<LedgerKey>,
        settings: Option<&IndexSettings>,
    ) -> Result<Vec<BucketEntry>> {
        if self.is_empty() || keys.is_empty() {
            return Ok(Vec::new());
        }

        if settings.is_some() {
            let mut found = Vec::new();
            for key in keys {
                if let Some(entry) = self.get(key, settings)? {
                    found.push(entry);
                }
            }
            return Ok(found);
        }

        // Unindexed: one pass, walking the sorted key set alongside the file
        let mut found = Vec::new();
        let mut wanted = keys.iter().peekable();
        for item in self.iter()? {
            let (_, entry) = item?;
            let key = entry.key();
            while wanted.next_if(|w| **w < key).is_some() {}
            match wanted.peek() {
                None => break,
                Some(w) if **w == key => {
                    wanted.next();
                    found.push(entry);
                }
                Some(_) => {}
            }
        }
        Ok(found)
    }

    fn scan_for(&self, key: &LedgerKey) -> Result<Option<BucketEntry>> {
        for item in self.iter()? {
            let (_, entry) = item?;
            match entry.key().cmp(key) {
                std::cmp::Ordering::Less => continue,
                std::cmp::Ordering::Equal => return Ok(Some(entry)),
                std::cmp::Ordering::Greater => break,
            }
        }
        Ok(None)
    }

    // =========================================================================
    // Index Lifecycle
    // =========================================================================

    /// The published index, if one has been built or loaded
    pub fn index(&self) -> Option<Arc<BucketIndex>> {
        self.index.read().clone()
    }

    /// Return the published index, loading or building it first if needed.
    ///
    /// Building happens outside the lock; if another thread published first,
    /// its index wins and ours is discarded.
    pub fn ensure_index(&self, settings: &IndexSettings) -> Result<Arc<BucketIndex>> {
        if let Some(index) = self.index.read().as_ref() {
            return Ok(Arc::clone(index));
        }

        let built = Arc::new(self.load_or_build_index(settings)?);

        let mut slot = self.index.write();
        if let Some(existing) = slot.as_ref() {
            return Ok(Arc::clone(existing));
        }
        *slot = Some(Arc::clone(&built));
        Ok(built)
    }

    fn load_or_build_index(&self, settings: &IndexSettings) -> Result<BucketIndex> {
        let expected = &settings.fingerprint;
        let index_path = self.index_path();

        if let Some(path) = &index_path {
            match persist::load_index(path, &self.hash, expected) {
                LoadOutcome::Loaded(index) => {
                    debug!(hash = %self.hash, "loaded persisted bucket index");
                    return Ok(index);
                }
                LoadOutcome::Missing => {}
                LoadOutcome::Stale(found) => {
                    info!(
                        hash = %self.hash,
                        ?found,
                        ?expected,
                        "persisted index built with different parameters, rebuilding"
                    );
                }
                LoadOutcome::Corrupt(reason) => {
                    debug!(hash = %self.hash, %reason, "rebuilding index after discarding file");
                }
            }
        }

        let index = BucketIndex::build(self, expected)?;
        debug!(
            hash = %self.hash,
            strategy = ?index.strategy(),
            entries = self.entry_count(),
            "built bucket index"
        );

        if settings.persist {
            if let Some(path) = &index_path {
                if let Err(e) = persist::save_index(path, &self.hash, &index) {
                    warn!(hash = %self.hash, error = %e, "failed to persist bucket index");
                }
            }
        }
        Ok(index)
    }
}
