//! Lock-free metrics for the storage core.
//!
//! Tracks per-operation latencies (with percentile calculation), slow
//! operations, and compaction timing. One `Metrics` instance is shared by a
//! whole database instance; every collection operation records into it.
//!
//! Zero external dependencies beyond atomics and the standard library,
//! matching the zero-cost-when-unused design of the metrics this module is
//! grounded on.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Instant;

/// Rolling window of the most recent operation latencies kept for percentile
/// calculation.
const LATENCY_WINDOW_SIZE: usize = 1000;

/// How many recent slow operations are retained for reporting.
const MAX_SLOW_OPERATIONS: usize = 10;

/// Operations taking longer than this are tracked separately as slow.
pub const SLOW_OPERATION_THRESHOLD_MS: u64 = 100;

/// The operation kinds this crate records metrics for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationKind {
    Create,
    Read,
    Update,
    Delete,
    Truncate,
    ShaperAttribute,
    ShaperShape,
    SkiplistInsert,
    SkiplistLookup,
    Other,
}

impl OperationKind {
    fn as_str(&self) -> &'static str {
        match self {
            OperationKind::Create => "Create",
            OperationKind::Read => "Read",
            OperationKind::Update => "Update",
            OperationKind::Delete => "Delete",
            OperationKind::Truncate => "Truncate",
            OperationKind::ShaperAttribute => "ShaperAttribute",
            OperationKind::ShaperShape => "ShaperShape",
            OperationKind::SkiplistInsert => "SkiplistInsert",
            OperationKind::SkiplistLookup => "SkiplistLookup",
            OperationKind::Other => "Other",
        }
    }

    const ALL: [OperationKind; 9] = [
        OperationKind::Create,
        OperationKind::Read,
        OperationKind::Update,
        OperationKind::Delete,
        OperationKind::Truncate,
        OperationKind::ShaperAttribute,
        OperationKind::ShaperShape,
        OperationKind::SkiplistInsert,
        OperationKind::SkiplistLookup,
    ];

    fn index(&self) -> usize {
        match self {
            OperationKind::Create => 0,
            OperationKind::Read => 1,
            OperationKind::Update => 2,
            OperationKind::Delete => 3,
            OperationKind::Truncate => 4,
            OperationKind::ShaperAttribute => 5,
            OperationKind::ShaperShape => 6,
            OperationKind::SkiplistInsert => 7,
            OperationKind::SkiplistLookup => 8,
            OperationKind::Other => 9,
        }
    }
}

/// Thread-safe metrics collector for the write/read/compaction paths this
/// crate owns.
pub struct Metrics {
    op_count: AtomicU64,
    slow_op_count: AtomicU64,
    latencies_us: Mutex<VecDeque<u64>>,
    latency_sum_us: AtomicU64,

    // Index 9 in these arrays is "other" (anything not in OperationKind::ALL).
    op_counts: [AtomicU64; 10],
    op_latency_sums: [AtomicU64; 10],

    compaction_count: AtomicU64,
    compaction_total_ms: AtomicU64,
    last_compaction_ms: AtomicU64,
    last_compaction_markers_rewritten: AtomicU64,
    last_compaction_bytes_reclaimed: AtomicU64,

    slow_ops: Mutex<VecDeque<SlowOperation>>,

    started_at: Instant,
}

/// A recorded slow operation.
#[derive(Clone, Debug, PartialEq)]
pub struct SlowOperation {
    pub operation: String,
    pub duration_us: u64,
    pub timestamp_ms: u64,
}

/// Point-in-time copy of all metrics, safe to serialize.
#[derive(Clone, Debug, Default)]
pub struct MetricsSnapshot {
    pub op_count: u64,
    pub slow_op_count: u64,
    pub op_p50_us: u64,
    pub op_p95_us: u64,
    pub op_p99_us: u64,
    pub op_avg_us: u64,

    pub compaction_count: u64,
    pub compaction_avg_ms: u64,
    pub last_compaction_ms: u64,
    pub last_compaction_markers_rewritten: u64,
    pub last_compaction_bytes_reclaimed: u64,

    pub top_slow_operations: Vec<SlowOperation>,
    pub uptime_secs: u64,
    pub op_stats: Vec<OperationStat>,
}

/// Statistics for a single operation kind.
#[derive(Clone, Debug, PartialEq)]
pub struct OperationStat {
    pub operation: String,
    pub count: u64,
    pub avg_us: u64,
}

fn new_atomic_array() -> [AtomicU64; 10] {
    std::array::from_fn(|_| AtomicU64::new(0))
}

impl Metrics {
    /// Create a new metrics collector. Uptime begins ticking immediately.
    pub fn new() -> Self {
        Self {
            op_count: AtomicU64::new(0),
            slow_op_count: AtomicU64::new(0),
            latencies_us: Mutex::new(VecDeque::with_capacity(LATENCY_WINDOW_SIZE)),
            latency_sum_us: AtomicU64::new(0),
            op_counts: new_atomic_array(),
            op_latency_sums: new_atomic_array(),
            compaction_count: AtomicU64::new(0),
            compaction_total_ms: AtomicU64::new(0),
            last_compaction_ms: AtomicU64::new(0),
            last_compaction_markers_rewritten: AtomicU64::new(0),
            last_compaction_bytes_reclaimed: AtomicU64::new(0),
            slow_ops: Mutex::new(VecDeque::with_capacity(MAX_SLOW_OPERATIONS)),
            started_at: Instant::now(),
        }
    }

    /// Record one completed operation. Called after every create / read /
    /// update / delete / truncate / shaper lookup / skip-list operation.
    pub fn record_operation(&self, kind: OperationKind, duration_us: u64) {
        self.op_count.fetch_add(1, Ordering::Relaxed);

        let idx = kind.index();
        self.op_counts[idx].fetch_add(1, Ordering::Relaxed);
        self.op_latency_sums[idx].fetch_add(duration_us, Ordering::Relaxed);

        {
            let mut latencies = self.latencies_us.lock().unwrap();
            if latencies.len() >= LATENCY_WINDOW_SIZE {
                if let Some(old) = latencies.pop_front() {
                    self.latency_sum_us.fetch_sub(old, Ordering::Relaxed);
                }
            }
            latencies.push_back(duration_us);
            self.latency_sum_us.fetch_add(duration_us, Ordering::Relaxed);
        }

        let duration_ms = duration_us / 1000;
        if duration_ms >= SLOW_OPERATION_THRESHOLD_MS {
            self.slow_op_count.fetch_add(1, Ordering::Relaxed);
            let slow = SlowOperation {
                operation: kind.as_str().to_string(),
                duration_us,
                timestamp_ms: self.started_at.elapsed().as_millis() as u64,
            };
            let mut slow_ops = self.slow_ops.lock().unwrap();
            if slow_ops.len() >= MAX_SLOW_OPERATIONS {
                slow_ops.pop_front();
            }
            slow_ops.push_back(slow);
        }
    }

    /// Record a compactor pass rolling sealed datafiles into a fresh one.
    pub fn record_compaction(&self, duration_ms: u64, markers_rewritten: u64, bytes_reclaimed: u64) {
        self.compaction_count.fetch_add(1, Ordering::Relaxed);
        self.compaction_total_ms.fetch_add(duration_ms, Ordering::Relaxed);
        self.last_compaction_ms.store(duration_ms, Ordering::Relaxed);
        self.last_compaction_markers_rewritten
            .store(markers_rewritten, Ordering::Relaxed);
        self.last_compaction_bytes_reclaimed
            .store(bytes_reclaimed, Ordering::Relaxed);
    }

    /// Take a point-in-time snapshot suitable for serialization.
    pub fn snapshot(&self) -> MetricsSnapshot {
        let op_count = self.op_count.load(Ordering::Relaxed);
        let slow_op_count = self.slow_op_count.load(Ordering::Relaxed);

        let (p50, p95, p99, avg) = {
            let latencies = self.latencies_us.lock().unwrap();
            if latencies.is_empty() {
                (0, 0, 0, 0)
            } else {
                let mut sorted: Vec<u64> = latencies.iter().copied().collect();
                sorted.sort_unstable();
                let len = sorted.len();
                let p50 = sorted[len * 50 / 100];
                let p95 = sorted[len * 95 / 100];
                let p99 = sorted.get(len * 99 / 100).copied().unwrap_or(sorted[len - 1]);
                let avg = self.latency_sum_us.load(Ordering::Relaxed) / len as u64;
                (p50, p95, p99, avg)
            }
        };

        let compaction_count = self.compaction_count.load(Ordering::Relaxed);
        let compaction_avg_ms = if compaction_count > 0 {
            self.compaction_total_ms.load(Ordering::Relaxed) / compaction_count
        } else {
            0
        };

        let top_slow = {
            let slow = self.slow_ops.lock().unwrap();
            slow.iter().cloned().collect()
        };

        MetricsSnapshot {
            op_count,
            slow_op_count,
            op_p50_us: p50,
            op_p95_us: p95,
            op_p99_us: p99,
            op_avg_us: avg,
            compaction_count,
            compaction_avg_ms,
            last_compaction_ms: self.last_compaction_ms.load(Ordering::Relaxed),
            last_compaction_markers_rewritten: self
                .last_compaction_markers_rewritten
                .load(Ordering::Relaxed),
            last_compaction_bytes_reclaimed: self
                .last_compaction_bytes_reclaimed
                .load(Ordering::Relaxed),
            top_slow_operations: top_slow,
            uptime_secs: self.started_at.elapsed().as_secs(),
            op_stats: self.per_operation_stats(),
        }
    }

    fn per_operation_stats(&self) -> Vec<OperationStat> {
        let mut stats: Vec<OperationStat> = OperationKind::ALL
            .iter()
            .map(|kind| {
                let idx = kind.index();
                let count = self.op_counts[idx].load(Ordering::Relaxed);
                let sum = self.op_latency_sums[idx].load(Ordering::Relaxed);
                OperationStat {
                    operation: kind.as_str().to_string(),
                    count,
                    avg_us: if count > 0 { sum / count } else { 0 },
                }
            })
            .filter(|s| s.count > 0)
            .collect();
        stats.sort_by(|a, b| b.count.cmp(&a.count));
        stats
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}
