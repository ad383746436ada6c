//! Spill schedule
//!
//! Level 0 spills every round and level `i` every `SPILL_BASE^i` rounds. The
//! last level never spills. Everything here is a pure function of
//! `(round, level, num_levels)`.

/// Growth factor between consecutive levels' spill periods
pub const SPILL_BASE: u64 = 4;

/// Default number of levels
pub const DEFAULT_NUM_LEVELS: usize = 11;

/// Deepest list whose spill periods all fit in a u64
pub const MAX_NUM_LEVELS: usize = 32;

/// Rounds between two spills of `level`
pub fn spill_period(level: usize) -> u64 {
    SPILL_BASE.saturating_pow(level as u32)
}

/// Whether `level` spills at the end of `round`
pub fn level_should_spill(round: u32, level: usize, num_levels: usize) -> bool {
    if level + 1 >= num_levels {
        return false;
    }
    u64::from(round) % spill_period(level) == 0
}

/// Whether merges into `level` keep tombstones (all but the last level)
pub fn keep_tombstones(level: usize, num_levels: usize) -> bool {
    level + 1 < num_levels
}

/// Levels spilling at `round`, lowest first
pub fn levels_spilling_at(round: u32, num_levels: usize) -> Vec<usize> {
    (0..num_levels)
        .filter(|&level| level_should_spill(round, level, num_levels))
        .collect()
}

/// Every level's period must divide the next one's, so a level never spills
/// without the levels below it spilling in the same round
pub(crate) fn assert_monotonic(num_levels: usize) {
    for level in 1..num_levels {
        assert!(
            spill_period(level) % spill_period(level - 1) == 0,
            "spill period of level {} does not divide level {}",
            level - 1,
            level
        );
    }
}
