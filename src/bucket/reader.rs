//! Bucket Reader
//!
//! Opens bucket files, validates header and footer, and serves point reads
//! through a shared handle.

use std::cmp::Ordering;
use std::fs::File;
use std::io::{BufReader, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use bytes::Buf;
use parking_lot::Mutex;

use crate::entry::{BucketEntry, LedgerKey};
use crate::error::{BucketDbError, Result};

use super::{FOOTER_SIZE, HEADER_SIZE, MAGIC, RECORD_PREFIX_SIZE, VERSION};

/// Read one length-prefixed record; returns it with its framed size
pub(crate) fn read_record<R: Read>(reader: &mut R) -> Result<(BucketEntry, u64)> {
    let mut prefix = [0u8; RECORD_PREFIX_SIZE as usize];
    reader.read_exact(&mut prefix)?;
    let len = (&prefix[..]).get_u32_le() as usize;

    let mut payload = vec![0u8; len];
    reader.read_exact(&mut payload)?;
    let entry = bincode::deserialize(&payload)?;

    Ok((entry, RECORD_PREFIX_SIZE + len as u64))
}

/// An open, non-empty bucket file
pub(crate) struct BucketFile {
    pub(crate) path: PathBuf,
    pub(crate) entry_count: u64,
    pub(crate) file_size: u64,
    pub(crate) data_crc: u32,
    /// Shared handle for point reads; iteration opens its own
    reader: Mutex<BufReader<File>>,
}

impl BucketFile {
    pub(crate) fn open(path: &Path) -> Result<Self> {
        let mut file = File::open(path)?;
        let file_size = file.metadata()?.len();

        if file_size < HEADER_SIZE + FOOTER_SIZE {
            return Err(BucketDbError::Corrupt(format!(
                "{}: file too small ({} bytes)",
                path.display(),
                file_size
            )));
        }

        let mut header = [0u8; HEADER_SIZE as usize];
        file.read_exact(&mut header)?;
        if &header[0..4] != MAGIC {
            return Err(BucketDbError::Corrupt(format!(
                "{}: invalid magic {:?}",
                path.display(),
                &header[0..4]
            )));
        }
        let version = (&header[4..6]).get_u16_le();
        if version != VERSION {
            return Err(BucketDbError::Corrupt(format!(
                "{}: unsupported version {}",
                path.display(),
                version
            )));
        }

        file.seek(SeekFrom::End(-(FOOTER_SIZE as i64)))?;
        let mut footer = [0u8; FOOTER_SIZE as usize];
        file.read_exact(&mut footer)?;
        let mut footer = &footer[..];
        let entry_count = footer.get_u64_le();
        let data_crc = footer.get_u32_le();

        file.seek(SeekFrom::Start(0))?;

        Ok(Self {
            path: path.to_path_buf(),
            entry_count,
            file_size,
            data_crc,
            reader: Mutex::new(BufReader::new(file)),
        })
    }

    /// End of the record section (start of the footer)
    pub(crate) fn data_end(&self) -> u64 {
        self.file_size - FOOTER_SIZE
    }

    /// Read the record starting at `offset`
    pub(crate) fn read_at(&self, offset: u64) -> Result<BucketEntry> {
        let mut reader = self.reader.lock();
        reader.seek(SeekFrom::Start(offset))?;
        let (entry, _) = read_record(&mut *reader)?;
        Ok(entry)
    }

    /// Scan records in `[start, end)` for `key`, stopping once keys pass it
    pub(crate) fn scan_window(
        &self,
        start: u64,
        end: u64,
        key: &LedgerKey,
    ) -> Result<Option<BucketEntry>> {
        let mut reader = self.reader.lock();
        reader.seek(SeekFrom::Start(start))?;

        let mut offset = start;
        while offset < end {
            let (entry, size) = read_record(&mut *reader)?;
            offset += size;
            match entry.key().cmp(key) {
                Ordering::Less => continue,
                Ordering::Equal => return Ok(Some(entry)),
                Ordering::Greater => break,
            }
        }
        Ok(None)
    }

    /// Recompute the record-section checksum and compare it to the footer
    pub(crate) fn verify_checksum(&self) -> Result<bool> {
        let mut file = File::open(&self.path)?;
        file.seek(SeekFrom::Start(HEADER_SIZE))?;
        let mut data = BufReader::new(file).take(self.data_end() - HEADER_SIZE);

        let mut hasher = crc32fast::Hasher::new();
        let mut chunk = [0u8; 8192];
        loop {
            let n = data.read(&mut chunk)?;
            if n == 0 {
                break;
            }
            hasher.update(&chunk[..n]);
        }
        Ok(hasher.finalize() == self.data_crc)
    }
}
