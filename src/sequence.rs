//! Process-wide monotonic tick generator.
//!
//! Every persisted marker carries a tick drawn from here. Recovery scans the
//! datafiles on disk and calls `observe()` with the maximum tick found, so the
//! generator never hands out a tick that was already used in a previous run.

use std::sync::atomic::{AtomicU64, Ordering};

/// A 48-bit-safe monotonic counter shared by every writer in a process.
///
/// A plain `AtomicU64` with `fetch_add`/`compare_exchange` gives the same
/// externally-observable behavior as a spin-lock-protected counter (strictly
/// increasing, never skips backward) without an explicit lock, which is the
/// idiomatic way to express a single contended counter.
#[derive(Debug, Default)]
pub struct SequenceGenerator {
    current: AtomicU64,
}

impl SequenceGenerator {
    /// A fresh generator starting at zero.
    pub fn new() -> Self {
        Self {
            current: AtomicU64::new(0),
        }
    }

    /// A generator seeded at a known starting point, e.g. when resuming a
    /// process that must not hand out ticks lower than `start`.
    pub fn starting_at(start: u64) -> Self {
        Self {
            current: AtomicU64::new(start),
        }
    }

    /// Draw the next tick. Strictly greater than every tick previously
    /// returned by this generator (and every tick passed to `observe`).
    pub fn new_tick(&self) -> u64 {
        self.current.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Raise the counter if `tick` is greater than the current value.
    ///
    /// Used during recovery: each marker read from disk is `observe`d so
    /// that, once recovery completes, `new_tick()` cannot reissue a tick
    /// that already exists on disk.
    pub fn observe(&self, tick: u64) {
        let mut current = self.current.load(Ordering::SeqCst);
        while tick > current {
            match self.current.compare_exchange_weak(
                current,
                tick,
                Ordering::SeqCst,
                Ordering::SeqCst,
            ) {
                Ok(_) => break,
                Err(actual) => current = actual,
            }
        }
    }

    /// The current value, without advancing it.
    pub fn value(&self) -> u64 {
        self.current.load(Ordering::SeqCst)
    }
}
