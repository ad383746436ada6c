//! Configuration for bucketdb
//!
//! Centralized configuration with sensible defaults.

use std::path::PathBuf;

use crate::bucket_list::{DEFAULT_NUM_LEVELS, MAX_NUM_LEVELS};
use crate::error::{BucketDbError, Result};
use crate::index::{IndexFingerprint, IndexSettings, INDEX_VERSION};

/// Largest accepted page size exponent (4 GiB pages)
pub const MAX_PAGE_SIZE_EXPONENT: u32 = 32;

/// Main configuration for a bucketdb instance
#[derive(Debug, Clone)]
pub struct Config {
    // -------------------------------------------------------------------------
    // Storage Configuration
    // -------------------------------------------------------------------------
    /// Root directory for all data files
    /// Internal structure:
    ///   {data_dir}/
    ///     ├── bucketlist.state          (level manifest)
    ///     └── buckets/
    ///           ├── bucket-<hash>.bkt   (bucket files)
    ///           └── bucket-<hash>.index (persisted indexes)
    pub data_dir: PathBuf,

    /// Number of levels in the bucket list (the last one never spills)
    pub num_levels: usize,

    // -------------------------------------------------------------------------
    // Index Configuration
    // -------------------------------------------------------------------------
    /// Build per-bucket indexes; when false every lookup scans bucket files
    pub indexing_enabled: bool,

    /// Range index page size is `1 << index_page_size_exponent` bytes.
    /// 0 means individual indexes only.
    pub index_page_size_exponent: u32,

    /// Buckets smaller than this get an individual index, larger ones a
    /// range index. 0 means range indexes only.
    pub index_cutoff_bytes: u64,

    /// Write built indexes next to their bucket so restarts can reuse them
    pub persist_index: bool,

    // -------------------------------------------------------------------------
    // Merge Configuration
    // -------------------------------------------------------------------------
    /// Background merge workers (0 = merge inline on the ingest thread)
    pub merge_threads: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./bucketdb_data"),
            num_levels: DEFAULT_NUM_LEVELS,
            indexing_enabled: true,
            index_page_size_exponent: 14, // 16 KiB pages
            index_cutoff_bytes: 20 * 1024 * 1024, // 20 MB
            persist_index: true,
            merge_threads: 2,
        }
    }
}

impl Config {
    /// Create a new config builder
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }

    /// Reject settings the engine cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.num_levels < 2 || self.num_levels > MAX_NUM_LEVELS {
            return Err(BucketDbError::Config(format!(
                "num_levels must be between 2 and {}, got {}",
                MAX_NUM_LEVELS, self.num_levels
            )));
        }
        if self.index_page_size_exponent > MAX_PAGE_SIZE_EXPONENT {
            return Err(BucketDbError::Config(format!(
                "index_page_size_exponent must be at most {}, got {}",
                MAX_PAGE_SIZE_EXPONENT, self.index_page_size_exponent
            )));
        }
        Ok(())
    }

    /// Build parameters recorded in every persisted index
    pub fn index_fingerprint(&self) -> IndexFingerprint {
        IndexFingerprint {
            version: INDEX_VERSION,
            page_size_exponent: self.index_page_size_exponent,
            cutoff_bytes: self.index_cutoff_bytes,
        }
    }

    /// Index settings, or `None` when indexing is disabled
    pub fn index_settings(&self) -> Option<IndexSettings> {
        self.indexing_enabled.then(|| IndexSettings {
            fingerprint: self.index_fingerprint(),
            persist: self.persist_index,
        })
    }

    /// Directory holding bucket and index files
    pub fn bucket_dir(&self) -> PathBuf {
        self.data_dir.join("buckets")
    }

    /// Path of the level manifest
    pub fn state_path(&self) -> PathBuf {
        self.data_dir.join("bucketlist.state")
    }
}

/// Builder for Config
#[derive(Default)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Set the data directory (root for all storage)
    pub fn data_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.data_dir = path.into();
        self
    }

    /// Set the number of levels
    pub fn num_levels(mut self, levels: usize) -> Self {
        self.config.num_levels = levels;
        self
    }

    /// Enable or disable per-bucket indexes
    pub fn indexing_enabled(mut self, enabled: bool) -> Self {
        self.config.indexing_enabled = enabled;
        self
    }

    /// Set the range index page size exponent
    pub fn index_page_size_exponent(mut self, exponent: u32) -> Self {
        self.config.index_page_size_exponent = exponent;
        self
    }

    /// Set the individual/range cutoff (in bytes)
    pub fn index_cutoff_bytes(mut self, bytes: u64) -> Self {
        self.config.index_cutoff_bytes = bytes;
        self
    }

    /// Set the individual/range cutoff (in MB)
    pub fn index_cutoff_mb(mut self, mb: u64) -> Self {
        self.config.index_cutoff_bytes = mb.saturating_mul(1024 * 1024);
        self
    }

    /// Enable or disable writing index files
    pub fn persist_index(mut self, persist: bool) -> Self {
        self.config.persist_index = persist;
        self
    }

    /// Set the number of background merge workers
    pub fn merge_threads(mut self, threads: usize) -> Self {
        self.config.merge_threads = threads;
        self
    }

    pub fn build(self) -> Config {
        self.config
    }
}
