//! Host resource detection and adaptive tuning.
//!
//! Detects available RAM and CPU cores, then derives the defaults a freshly
//! opened database falls back to when `parameter.json` and the caller don't
//! pin a value explicitly: journal size, the cap-constraint cascade batch
//! size, and how many threads a collection's background compactor gets.
//! Stateless: each call to `ResourceManager::auto_tune()` re-probes the host.

use sysinfo::{MemoryRefreshKind, RefreshKind, System};

const MB: u64 = 1024 * 1024;
const GB: u64 = 1024 * 1024 * 1024;

/// Default journal size floor (1 MiB) -- below this a datafile can barely
/// hold a file header, footer, and one small document.
const JOURNAL_SIZE_MIN: u64 = 1 * MB;

/// Default journal size ceiling (256 MiB), matching the historical default
/// in datafile-oriented stores of this lineage.
const JOURNAL_SIZE_MAX: u64 = 256 * MB;

/// Fraction of available memory a single collection's default journal is
/// allowed to claim.
const JOURNAL_SIZE_FRACTION: f64 = 0.01;

/// Snapshot of detected hardware resources.
#[derive(Debug, Clone)]
pub struct SystemResources {
    /// Total physical RAM in bytes.
    pub total_memory_bytes: u64,
    /// Available (re-usable) RAM in bytes.
    pub available_memory_bytes: u64,
    /// Logical CPU count.
    pub cpu_count: usize,
}

impl SystemResources {
    /// Probe the current system for RAM and CPU information.
    pub fn detect() -> Self {
        let mut sys = System::new_with_specifics(
            RefreshKind::new().with_memory(MemoryRefreshKind::everything()),
        );
        sys.refresh_memory();

        let cpu_count = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);

        Self {
            total_memory_bytes: sys.total_memory(),
            available_memory_bytes: sys.available_memory(),
            cpu_count,
        }
    }

    /// Memory pressure indicator (0.0 = no pressure, 1.0 = critical).
    ///
    /// Formula: `1.0 - (available / total)`.
    pub fn memory_pressure(&self) -> f64 {
        if self.total_memory_bytes == 0 {
            return 1.0;
        }
        let ratio = self.available_memory_bytes as f64 / self.total_memory_bytes as f64;
        (1.0 - ratio).clamp(0.0, 1.0)
    }
}

/// Adaptive parameters computed from system resources.
#[derive(Debug, Clone)]
pub struct TuningProfile {
    /// Default journal (`max_size`) in bytes for a collection whose
    /// `parameter.json` doesn't pin one, before page alignment.
    pub default_journal_size: u64,
    /// How many documents the cap-constraint cascade deletes per batch
    /// when a collection exceeds its configured cap.
    pub cap_check_batch_size: usize,
    /// Thread count handed to a collection's compactor for the parallel
    /// merge of sealed datafiles.
    pub compaction_threads: usize,
    /// Memory pressure at detection time (0.0 = no pressure, 1.0 = critical).
    pub memory_pressure: f64,
}

impl TuningProfile {
    /// Compute a tuning profile from detected resources.
    ///
    /// Heuristics:
    /// - `default_journal_size`: `clamp(available * 0.01, 1 MiB, 256 MiB)`.
    /// - `cap_check_batch_size`: RAM < 4 GB -> 100, < 16 GB -> 500, else 2000.
    /// - `compaction_threads`: RAM < 4 GB -> 1, else `clamp(cpu / 2, 1, 4)`.
    pub fn from_resources(res: &SystemResources) -> Self {
        let total_gb = res.total_memory_bytes as f64 / GB as f64;

        let raw_journal = (res.available_memory_bytes as f64 * JOURNAL_SIZE_FRACTION) as u64;
        let default_journal_size = raw_journal.clamp(JOURNAL_SIZE_MIN, JOURNAL_SIZE_MAX);

        let cap_check_batch_size = if total_gb < 4.0 {
            100
        } else if total_gb < 16.0 {
            500
        } else {
            2000
        };

        let compaction_threads = if total_gb < 4.0 {
            1
        } else {
            (res.cpu_count / 2).clamp(1, 4)
        };

        Self {
            default_journal_size,
            cap_check_batch_size,
            compaction_threads,
            memory_pressure: res.memory_pressure(),
        }
    }
}

impl Default for TuningProfile {
    /// Conservative defaults suitable for tests and unknown environments.
    fn default() -> Self {
        Self {
            default_journal_size: 32 * MB,
            cap_check_batch_size: 500,
            compaction_threads: 1,
            memory_pressure: 0.0,
        }
    }
}

/// Stateless utility: detect system resources and compute a tuning profile.
pub struct ResourceManager;

impl ResourceManager {
    /// Probe the system and return an adaptive tuning profile.
    pub fn auto_tune() -> TuningProfile {
        let resources = SystemResources::detect();
        TuningProfile::from_resources(&resources)
    }
}
