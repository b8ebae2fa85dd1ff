//! Compaction policy: deciding which sealed datafiles are worth rewriting
//! into a fresh `compactor-<fid>.db`, and how many to fold into one pass.
//!
//! Mirrors the split in this codebase's own `storage_v2::compaction`
//! module: the policy here is pure and free-standing (`is_candidate`,
//! `should_compact`, `plan`), taking only the per-datafile stats a
//! [`super::collection::Collection`] already tracks. `Collection::compact`
//! owns the mechanics -- reading live markers out of the chosen datafiles,
//! writing a fresh sealed one, and swinging the primary index -- since that
//! part needs the collection's private state (journal, datafiles, barrier).

use crate::collection::collection::DatafileStats;

/// Thresholds controlling when sealed datafiles are worth compacting.
#[derive(Debug, Clone, Copy)]
pub struct CompactionConfig {
    /// A sealed datafile becomes a candidate once
    /// `dead_size / (alive_size + dead_size)` reaches this fraction.
    pub dead_ratio_threshold: f64,
    /// A compaction pass only runs once at least this many candidates
    /// exist -- rewriting a single mostly-live datafile isn't worth the
    /// copy.
    pub min_candidates: usize,
}

impl Default for CompactionConfig {
    fn default() -> Self {
        Self { dead_ratio_threshold: 0.5, min_candidates: 2 }
    }
}

/// Outcome of one [`super::collection::Collection::compact`] pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CompactionOutcome {
    /// Sealed datafiles removed from the working set.
    pub datafiles_removed: usize,
    /// Live documents/edges relocated into the new datafile.
    pub documents_relocated: usize,
    /// Dead bytes reclaimed (sum of the removed datafiles' dead + alive
    /// size, minus the size of the fresh datafile written in their place).
    pub bytes_reclaimed: u64,
}

fn dead_ratio(stats: &DatafileStats) -> f64 {
    let total = stats.alive_size + stats.dead_size;
    if total == 0 {
        0.0
    } else {
        stats.dead_size as f64 / total as f64
    }
}

/// Whether a single sealed datafile's stats make it worth rewriting.
pub fn is_candidate(stats: &DatafileStats, config: &CompactionConfig) -> bool {
    stats.dead_count > 0 && dead_ratio(stats) >= config.dead_ratio_threshold
}

/// Whether a compaction pass should run at all, given every sealed
/// (non-journal) datafile's stats.
pub fn should_compact<'a>(
    sealed_stats: impl Iterator<Item = &'a DatafileStats>,
    config: &CompactionConfig,
) -> bool {
    sealed_stats.filter(|s| is_candidate(s, config)).count() >= config.min_candidates
}

/// Select which fids to fold into the next compaction pass.
pub fn plan<'a>(
    datafiles: impl Iterator<Item = (u64, &'a DatafileStats)>,
    config: &CompactionConfig,
) -> Vec<u64> {
    datafiles
        .filter(|(_, stats)| is_candidate(stats, config))
        .map(|(fid, _)| fid)
        .collect()
}
