//! # bucketdb
//!
//! A leveled, merge-based store for ledger state:
//! - Immutable, key-sorted, content-addressed bucket files
//! - Levels that spill on a fixed schedule, merged in the background
//! - Per-bucket individual or page-range indexes, persisted across restarts
//! - Snapshot reads that never block on ingestion
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     StorageManager                          │
//! │   apply_batch / load_keys / get_entry / pool-share query    │
//! └─────────────────────┬───────────────────────────────────────┘
//!                       │
//! ┌─────────────────────▼───────────────────────────────────────┐
//! │                      BucketList                             │
//! │   L0 [curr|snap]  L1 [curr|snap]  ...  Ln [curr]            │
//! └──────────┬──────────────────────────────────┬───────────────┘
//!            │                                  │
//!            ▼                                  ▼
//!   ┌─────────────────┐                ┌─────────────────┐
//!   │     Bucket      │◄───────────────│    MergePool    │
//!   │ (file + index)  │   new buckets  │   (workers)     │
//!   └─────────────────┘                └─────────────────┘
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod config;
pub mod hash;

pub mod entry;
pub mod bucket;
pub mod index;
pub mod merge;
pub mod merge_pool;
pub mod bucket_list;
pub mod manager;
pub mod restore;

// =============================================================================
// Public API Re-exports
// =============================================================================

pub use error::{BucketDbError, ResourceKind, Result};
pub use config::Config;
pub use hash::Hash256;
pub use entry::{BucketEntry, LedgerBatch, LedgerEntry, LedgerKey};
pub use manager::StorageManager;
pub use restore::{ExtendRequest, PreparedUpdate, ResourceBudget, RestoreRequest};

// =============================================================================
// Version Info
// =============================================================================

/// Current version of bucketdb
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
