//! Level manifest
//!
//! Records which bucket hashes make up every level, so a restart can reopen
//! the list and restart merges that were in flight.

use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{BucketDbError, Result};
use crate::hash::Hash256;

/// Current manifest format version
pub const STATE_VERSION: u32 = 1;

/// Inputs of a merge that was in flight when the manifest was written
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingState {
    pub newer: Hash256,
    pub older: Hash256,
    pub keep_tombstones: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LevelState {
    /// Zero while a merge is pending
    pub curr: Hash256,
    pub snap: Hash256,
    pub pending: Option<PendingState>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BucketListState {
    pub version: u32,
    /// Last applied round
    pub round: u32,
    pub levels: Vec<LevelState>,
}

impl BucketListState {
    /// Every bucket hash the manifest refers to
    pub fn hashes(&self) -> impl Iterator<Item = Hash256> + '_ {
        self.levels.iter().flat_map(|level| {
            let pending = level
                .pending
                .iter()
                .flat_map(|p| [p.newer, p.older]);
            [level.curr, level.snap].into_iter().chain(pending)
        })
    }

    /// Write via temp file + rename
    pub fn save(&self, path: &Path) -> Result<()> {
        let tmp_path = path.with_extension("state.tmp");
        {
            let mut writer = BufWriter::new(File::create(&tmp_path)?);
            bincode::serialize_into(&mut writer, self)?;
            writer.flush()?;
            writer.get_ref().sync_all()?;
        }
        fs::rename(&tmp_path, path)?;
        debug!(round = self.round, path = %path.display(), "saved bucket list state");
        Ok(())
    }

    /// Load the manifest, or `None` if there is none yet
    pub fn load(path: &Path) -> Result<Option<Self>> {
        let file = match File::open(path) {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let state: Self = bincode::deserialize_from(BufReader::new(file))
            .map_err(|e| BucketDbError::Corrupt(format!("{}: {}", path.display(), e)))?;
        if state.version != STATE_VERSION {
            return Err(BucketDbError::Corrupt(format!(
                "{}: unsupported state version {}",
                path.display(),
                state.version
            )));
        }
        Ok(Some(state))
    }
}
