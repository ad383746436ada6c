//! Bucket Writer
//!
//! Streams sorted records into a temp file, then renames it to its
//! content-addressed name.

use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use bytes::{BufMut, BytesMut};
use sha2::{Digest, Sha256};

use crate::entry::{BucketEntry, LedgerKey};
use crate::error::{BucketDbError, Result};
use crate::hash::Hash256;

use super::{bucket_file_name, HEADER_SIZE, MAGIC, TMP_PREFIX, VERSION};

static NEXT_TMP_ID: AtomicU64 = AtomicU64::new(0);

/// Writer for a new bucket file
///
/// Records must arrive in strictly increasing key order; anything else is an
/// invariant violation and panics.
pub struct BucketWriter {
    dir: PathBuf,
    tmp_path: PathBuf,
    writer: BufWriter<File>,
    entry_count: u64,
    /// Offset where the next record starts
    offset: u64,
    last_key: Option<LedgerKey>,
    data_crc: crc32fast::Hasher,
    content_hash: Sha256,
    /// Scratch buffer for one framed record
    frame: BytesMut,
}

impl BucketWriter {
    /// Start a new bucket in `dir`; the header is written immediately
    pub fn new(dir: &Path) -> Result<Self> {
        let tmp_path = dir.join(format!(
            "{}{}-{}.bkt",
            TMP_PREFIX,
            std::process::id(),
            NEXT_TMP_ID.fetch_add(1, Ordering::Relaxed)
        ));
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&tmp_path)?;

        let mut writer = BufWriter::new(file);
        writer.write_all(MAGIC)?;
        writer.write_all(&VERSION.to_le_bytes())?;

        Ok(Self {
            dir: dir.to_path_buf(),
            tmp_path,
            writer,
            entry_count: 0,
            offset: HEADER_SIZE,
            last_key: None,
            data_crc: crc32fast::Hasher::new(),
            content_hash: Sha256::new(),
            frame: BytesMut::with_capacity(256),
        })
    }

    /// Append a record; returns the offset it was written at
    pub fn append(&mut self, entry: &BucketEntry) -> Result<u64> {
        let key = entry.key();
        if let Some(last) = &self.last_key {
            assert!(
                *last < key,
                "bucket records out of order: {:?} must sort before {:?}",
                last,
                key
            );
        }

        let payload = bincode::serialize(entry)?;
        let len = u32::try_from(payload.len()).map_err(|_| {
            BucketDbError::Serialization(format!("record too large: {} bytes", payload.len()))
        })?;

        self.frame.clear();
        self.frame.put_u32_le(len);
        self.frame.put_slice(&payload);

        self.writer.write_all(&self.frame)?;
        self.data_crc.update(&self.frame);
        self.content_hash.update(&self.frame);

        let offset = self.offset;
        self.offset += self.frame.len() as u64;
        self.entry_count += 1;
        self.last_key = Some(key);
        Ok(offset)
    }

    pub fn entry_count(&self) -> u64 {
        self.entry_count
    }

    /// Write the footer and move the file to its content-addressed name.
    ///
    /// Returns the content hash; a writer that received no records yields
    /// [`Hash256::ZERO`] and leaves no file behind.
    pub fn finish(mut self) -> Result<Hash256> {
        if self.entry_count == 0 {
            drop(self.writer);
            fs::remove_file(&self.tmp_path)?;
            return Ok(Hash256::ZERO);
        }

        // Footer: entry_count (8) + data_crc (4) + padding (4)
        self.writer.write_all(&self.entry_count.to_le_bytes())?;
        self.writer.write_all(&self.data_crc.finalize().to_le_bytes())?;
        self.writer.write_all(&[0u8; 4])?;
        self.writer.flush()?;

        let file = self
            .writer
            .into_inner()
            .map_err(std::io::IntoInnerError::into_error)?;
        file.sync_all()?;
        drop(file);

        let hash = Hash256::from_hasher(self.content_hash);
        let final_path = self.dir.join(bucket_file_name(&hash));
        if final_path.exists() {
            // Identical content already on disk
            fs::remove_file(&self.tmp_path)?;
        } else {
            fs::rename(&self.tmp_path, &final_path)?;
        }
        Ok(hash)
    }
}
