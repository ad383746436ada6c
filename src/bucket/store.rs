//! Bucket Store
//!
//! Owns the bucket directory and shares open buckets by content hash.
//!
//! ## Responsibilities
//! - Turn finished writers into shared `Arc<Bucket>` handles
//! - Reopen buckets named by the level manifest
//! - Delete bucket and index files nothing refers to anymore

use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::entry::BucketEntry;
use crate::error::{BucketDbError, Result};
use crate::hash::Hash256;

use super::{bucket_file_name, Bucket, BucketWriter, TMP_PREFIX};

/// Manages bucket files in one directory
///
/// ## Concurrency:
/// - `registry`: every bucket opened through the store, held weakly.
///   Finishing a writer and garbage collection both run under this lock,
///   so a freshly renamed file is registered before GC can see it.
pub struct BucketStore {
    dir: PathBuf,
    empty: Arc<Bucket>,
    registry: Mutex<HashMap<Hash256, Weak<Bucket>>>,
}

impl BucketStore {
    /// Open or create the bucket directory, removing leftover temp files
    pub fn open(dir: &Path) -> Result<Self> {
        fs::create_dir_all(dir)?;

        for entry in fs::read_dir(dir)? {
            let path = entry?.path();
            let is_tmp = path
                .file_name()
                .and_then(|n| n.to_str())
                .map_or(false, |n| n.starts_with(TMP_PREFIX));
            if is_tmp {
                debug!(path = %path.display(), "removing abandoned temp bucket");
                fs::remove_file(&path)?;
            }
        }

        Ok(Self {
            dir: dir.to_path_buf(),
            empty: Arc::new(Bucket::empty()),
            registry: Mutex::new(HashMap::new()),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn bucket_path(&self, hash: &Hash256) -> PathBuf {
        self.dir.join(bucket_file_name(hash))
    }

    pub fn empty_bucket(&self) -> Arc<Bucket> {
        Arc::clone(&self.empty)
    }

    /// Start writing a new bucket in this store
    pub fn writer(&self) -> Result<BucketWriter> {
        BucketWriter::new(&self.dir)
    }

    /// Finish a writer and return the shared bucket for its content
    pub fn finish(&self, writer: BucketWriter) -> Result<Arc<Bucket>> {
        let mut registry = self.registry.lock();
        let hash = writer.finish()?;
        self.open_locked(&mut registry, hash)
    }

    /// Write sorted records as a new bucket
    pub fn write_bucket(&self, records: &[BucketEntry]) -> Result<Arc<Bucket>> {
        if records.is_empty() {
            return Ok(self.empty_bucket());
        }
        let mut writer = self.writer()?;
        for record in records {
            writer.append(record)?;
        }
        self.finish(writer)
    }

    /// Return the bucket with `hash`, opening its file if no live handle exists
    pub fn get_or_open(&self, hash: &Hash256) -> Result<Arc<Bucket>> {
        let mut registry = self.registry.lock();
        self.open_locked(&mut registry, *hash)
    }

    /// Number of buckets currently alive in the registry
    pub fn live_bucket_count(&self) -> usize {
        self.registry
            .lock()
            .values()
            .filter(|w| w.strong_count() > 0)
            .count()
    }

    /// Delete bucket and index files that are neither in `referenced` nor
    /// held by any live handle. Returns the number of files removed.
    pub fn collect_garbage(&self, referenced: &HashSet<Hash256>) -> Result<usize> {
        let mut registry = self.registry.lock();
        registry.retain(|_, weak| weak.strong_count() > 0);

        let mut removed = 0;
        for entry in fs::read_dir(&self.dir)? {
            let path = entry?.path();
            let Some(hash) = Self::parse_hash(&path) else {
                continue;
            };
            if referenced.contains(&hash) || registry.contains_key(&hash) {
                continue;
            }
            match fs::remove_file(&path) {
                Ok(()) => removed += 1,
                Err(e) => warn!(path = %path.display(), error = %e, "failed to remove unreferenced file"),
            }
        }

        if removed > 0 {
            debug!(removed, "garbage collected bucket files");
        }
        Ok(removed)
    }

    // =========================================================================
    // Private Helpers
    // =========================================================================

    fn open_locked(
        &self,
        registry: &mut HashMap<Hash256, Weak<Bucket>>,
        hash: Hash256,
    ) -> Result<Arc<Bucket>> {
        if hash.is_zero() {
            return Ok(self.empty_bucket());
        }
        if let Some(bucket) = registry.get(&hash).and_then(Weak::upgrade) {
            return Ok(bucket);
        }

        let path = self.bucket_path(&hash);
        if !path.exists() {
            return Err(BucketDbError::NotFound(format!(
                "bucket {} ({})",
                hash,
                path.display()
            )));
        }

        let bucket = Arc::new(Bucket::open(&path, hash)?);
        registry.insert(hash, Arc::downgrade(&bucket));
        Ok(bucket)
    }

    /// "bucket-<hex>.bkt" or "bucket-<hex>.index" → Some(hash)
    fn parse_hash(path: &Path) -> Option<Hash256> {
        let name = path.file_name()?.to_str()?;
        let rest = name.strip_prefix("bucket-")?;
        let hex = rest
            .strip_suffix(".bkt")
            .or_else(|| rest.strip_suffix(".index"))?;
        Hash256::from_hex(hex).ok()
    }
}
