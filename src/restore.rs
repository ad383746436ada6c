//! Restore and extend
//!
//! Prepare liveness-horizon updates for contract entries under a byte
//! budget. Nothing is written here: the returned entries go into the next
//! round's batch as updates.
//!
//! Metering charges `serialized key size + serialized entry size` per
//! entry read, and the same again per entry written. Running over either
//! budget fails the whole request.

use std::collections::BTreeSet;

use tracing::debug;

use crate::bucket_list::BucketListSnapshot;
use crate::entry::{entry_size, key_size, LedgerEntry, LedgerKey};
use crate::error::{BucketDbError, ResourceKind, Result};
use crate::manager::StorageManager;

/// Byte limits for one request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResourceBudget {
    pub read_bytes: u64,
    pub write_bytes: u64,
}

impl ResourceBudget {
    pub fn unlimited() -> Self {
        Self {
            read_bytes: u64::MAX,
            write_bytes: u64::MAX,
        }
    }
}

/// Bytes charged so far
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResourceUsage {
    pub read_bytes: u64,
    pub write_bytes: u64,
}

impl ResourceUsage {
    fn charge_read(&mut self, bytes: u64, budget: &ResourceBudget) -> Result<()> {
        self.read_bytes = self.read_bytes.saturating_add(bytes);
        check(ResourceKind::ReadBytes, self.read_bytes, budget.read_bytes)
    }

    fn charge_write(&mut self, bytes: u64, budget: &ResourceBudget) -> Result<()> {
        self.write_bytes = self.write_bytes.saturating_add(bytes);
        check(ResourceKind::WriteBytes, self.write_bytes, budget.write_bytes)
    }
}

fn check(kind: ResourceKind, used: u64, limit: u64) -> Result<()> {
    if used > limit {
        return Err(BucketDbError::ResourceLimitExceeded { kind, used, limit });
    }
    Ok(())
}

/// Bring archived persistent entries back to life
#[derive(Debug, Clone, Copy)]
pub struct RestoreRequest {
    /// Round the restore happens in; entries live at this round are skipped
    pub current_round: u32,
    /// Horizon given to restored entries
    pub new_live_until: u32,
    pub budget: ResourceBudget,
}

/// Push the horizon of live contract entries out to `extend_to`
#[derive(Debug, Clone, Copy)]
pub struct ExtendRequest {
    pub current_round: u32,
    pub extend_to: u32,
    pub budget: ResourceBudget,
}

/// Entries to apply as updates, and what preparing them cost
#[derive(Debug, Clone, Default)]
pub struct PreparedUpdate {
    pub entries: Vec<LedgerEntry>,
    pub usage: ResourceUsage,
    /// Keys that were missing or needed no change
    pub skipped: usize,
}

impl StorageManager {
    /// Restore expired persistent contract entries.
    ///
    /// Missing entries and entries still live at `current_round` are
    /// skipped. Only persistent contract data and contract code can be
    /// restored.
    pub fn prepare_restore(
        &self,
        keys: &BTreeSet<LedgerKey>,
        request: &RestoreRequest,
    ) -> Result<PreparedUpdate> {
        for key in keys {
            if !key.is_contract() || key.is_temporary() {
                return Err(BucketDbError::InvalidKey(format!(
                    "only persistent contract entries can be restored, got {}",
                    key.kind()
                )));
            }
        }

        let snapshot = self.snapshot();
        let mut prepared = PreparedUpdate::default();
        for key in keys {
            let Some(mut entry) = self.get_from(&snapshot, key)? else {
                prepared.skipped += 1;
                continue;
            };

            let size = key_size(key) + entry_size(&entry);
            prepared.usage.charge_read(size, &request.budget)?;

            if entry.is_live_at(request.current_round) {
                prepared.skipped += 1;
                continue;
            }

            prepared.usage.charge_write(size, &request.budget)?;
            entry.set_live_until_round(request.new_live_until);
            entry.last_modified_round = request.current_round;
            prepared.entries.push(entry);
        }

        debug!(
            restored = prepared.entries.len(),
            skipped = prepared.skipped,
            read_bytes = prepared.usage.read_bytes,
            write_bytes = prepared.usage.write_bytes,
            "prepared restore"
        );
        Ok(prepared)
    }

    /// Extend the horizon of live contract entries.
    ///
    /// Missing or expired entries and entries already live through
    /// `extend_to` are skipped. Only reads are metered.
    pub fn prepare_extend(
        &self,
        keys: &BTreeSet<LedgerKey>,
        request: &ExtendRequest,
    ) -> Result<PreparedUpdate> {
        for key in keys {
            if !key.is_contract() {
                return Err(BucketDbError::InvalidKey(format!(
                    "only contract entries have a liveness horizon, got {}",
                    key.kind()
                )));
            }
        }

        let snapshot = self.snapshot();
        let mut prepared = PreparedUpdate::default();
        for key in keys {
            let entry = match self.get_from(&snapshot, key)? {
                Some(entry) if entry.is_live_at(request.current_round) => entry,
                _ => {
                    prepared.skipped += 1;
                    continue;
                }
            };

            let size = key_size(key) + entry_size(&entry);
            prepared.usage.charge_read(size, &request.budget)?;

            if entry.live_until_round().map_or(true, |until| until >= request.extend_to) {
                prepared.skipped += 1;
                continue;
            }

            let mut entry = entry;
            entry.set_live_until_round(request.extend_to);
            entry.last_modified_round = request.current_round;
            prepared.entries.push(entry);
        }

        debug!(
            extended = prepared.entries.len(),
            skipped = prepared.skipped,
            read_bytes = prepared.usage.read_bytes,
            "prepared extend"
        );
        Ok(prepared)
    }

    fn get_from(
        &self,
        snapshot: &BucketListSnapshot,
        key: &LedgerKey,
    ) -> Result<Option<LedgerEntry>> {
        let keys = BTreeSet::from([key.clone()]);
        Ok(self.load_keys_from(snapshot, &keys)?.pop())
    }
}
