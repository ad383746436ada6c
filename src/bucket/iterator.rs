//! Bucket Iterator
//!
//! Sequential iteration over all records of a bucket, on its own file handle.

use std::fs::File;
use std::io::{BufReader, Seek, SeekFrom};
use std::path::Path;

use crate::entry::BucketEntry;
use crate::error::Result;

use super::reader::read_record;
use super::HEADER_SIZE;

/// Iterator over `(offset, record)` pairs in key order
pub struct BucketIterator {
    /// `None` once exhausted or after an error
    reader: Option<BufReader<File>>,
    offset: u64,
    /// Start of the footer
    end_offset: u64,
}

impl BucketIterator {
    pub(super) fn open(path: &Path, end_offset: u64) -> Result<Self> {
        let mut file = File::open(path)?;
        file.seek(SeekFrom::Start(HEADER_SIZE))?;
        Ok(Self {
            reader: Some(BufReader::new(file)),
            offset: HEADER_SIZE,
            end_offset,
        })
    }

    /// Iterator over the empty bucket
    pub(super) fn empty() -> Self {
        Self {
            reader: None,
            offset: HEADER_SIZE,
            end_offset: HEADER_SIZE,
        }
    }
}

impl Iterator for BucketIterator {
    type Item = Result<(u64, BucketEntry)>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.offset >= self.end_offset {
            self.reader = None;
            return None;
        }
        let reader = self.reader.as_mut()?;

        match read_record(reader) {
            Ok((entry, size)) => {
                let offset = self.offset;
                self.offset += size;
                Some(Ok((offset, entry)))
            }
            Err(e) => {
                self.reader = None;
                Some(Err(e))
            }
        }
    }
}
