//! Index persistence
//!
//! Indexes are written next to their bucket so a restart can skip the
//! rebuild scan.
//!
//! # File Format
//!
//! ```text
//! bucket-{hash}.index
//! ├── header (bincode)
//! │   ├── magic: "LKVI"
//! │   ├── bucket_hash
//! │   ├── fingerprint: version, page_size_exponent, cutoff_bytes
//! │   └── strategy
//! └── body (bincode BucketIndex)
//! ```
//!
//! A header whose fingerprint differs from the current one marks the file
//! stale; anything that fails to decode marks it corrupt and it is removed.

use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::bucket::TMP_PREFIX;
use crate::error::{BucketDbError, Result};
use crate::hash::Hash256;

use super::{BucketIndex, IndexFingerprint, IndexStrategy};

const INDEX_MAGIC: [u8; 4] = *b"LKVI";

static NEXT_TMP_ID: AtomicU64 = AtomicU64::new(0);

#[derive(Debug, Serialize, Deserialize)]
struct IndexHeader {
    magic: [u8; 4],
    bucket_hash: Hash256,
    fingerprint: IndexFingerprint,
    strategy: IndexStrategy,
}

/// Result of trying to reuse a persisted index
#[derive(Debug)]
pub enum LoadOutcome {
    Loaded(BucketIndex),
    /// No index file
    Missing,
    /// Built with other parameters (carries the stored fingerprint)
    Stale(IndexFingerprint),
    /// Undecodable or inconsistent; the file has been removed
    Corrupt(String),
}

/// Save an index via temp file + rename
pub fn save_index(path: &Path, bucket_hash: &Hash256, index: &BucketIndex) -> Result<()> {
    let tmp_path = path.with_file_name(format!(
        "{}index-{}-{}",
        TMP_PREFIX,
        std::process::id(),
        NEXT_TMP_ID.fetch_add(1, Ordering::Relaxed)
    ));

    let header = IndexHeader {
        magic: INDEX_MAGIC,
        bucket_hash: *bucket_hash,
        fingerprint: *index.fingerprint(),
        strategy: index.strategy(),
    };

    {
        let mut writer = BufWriter::new(File::create(&tmp_path)?);
        bincode::serialize_into(&mut writer, &header)?;
        bincode::serialize_into(&mut writer, index)?;
        writer.flush()?;
        writer.get_ref().sync_all()?;
    }
    fs::rename(&tmp_path, path)?;

    debug!(path = %path.display(), "saved bucket index");
    Ok(())
}

/// Load the index at `path` if it belongs to `bucket_hash` and was built
/// with `expected` parameters
pub fn load_index(path: &Path, bucket_hash: &Hash256, expected: &IndexFingerprint) -> LoadOutcome {
    let file = match File::open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return LoadOutcome::Missing,
        Err(e) => return discard(path, format!("open failed: {}", e)),
    };
    let mut reader = BufReader::new(file);

    let header: IndexHeader = match bincode::deserialize_from(&mut reader) {
        Ok(h) => h,
        Err(e) => return discard(path, format!("header: {}", e)),
    };
    if header.magic != INDEX_MAGIC {
        return discard(path, format!("bad magic {:?}", header.magic));
    }
    if header.bucket_hash != *bucket_hash {
        return discard(
            path,
            format!("belongs to bucket {}, expected {}", header.bucket_hash, bucket_hash),
        );
    }
    if header.fingerprint != *expected {
        return LoadOutcome::Stale(header.fingerprint);
    }

    let index: BucketIndex = match bincode::deserialize_from(&mut reader) {
        Ok(index) => index,
        Err(e) => return discard(path, format!("body: {}", e)),
    };
    if index.strategy() != header.strategy || *index.fingerprint() != header.fingerprint {
        return discard(path, "header disagrees with body".to_string());
    }

    LoadOutcome::Loaded(index)
}

/// Decode an index file without checking it against any bucket
pub fn read_index_file(path: &Path) -> Result<(Hash256, BucketIndex)> {
    let mut reader = BufReader::new(File::open(path)?);
    let header: IndexHeader = bincode::deserialize_from(&mut reader)?;
    if header.magic != INDEX_MAGIC {
        return Err(BucketDbError::Corrupt(format!(
            "{}: bad index magic {:?}",
            path.display(),
            header.magic
        )));
    }
    let index: BucketIndex = bincode::deserialize_from(&mut reader)?;
    Ok((header.bucket_hash, index))
}

fn discard(path: &Path, reason: String) -> LoadOutcome {
    warn!(path = %path.display(), %reason, "removing unreadable index file");
    if let Err(e) = fs::remove_file(path) {
        if e.kind() != std::io::ErrorKind::NotFound {
            warn!(path = %path.display(), error = %e, "failed to remove index file");
        }
    }
    LoadOutcome::Corrupt(reason)
}
