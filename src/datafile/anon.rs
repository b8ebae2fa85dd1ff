//! Anonymous (non-persistent) memory-mapped regions.
//!
//! Used to back volatile collections (`parameter.json`'s `is_volatile = true`,
//! SPEC_FULL.md §6.3): a datafile that never touches disk. `memmap2` exposes
//! `MmapMut::map_anon`, which is the Rust-idiomatic equivalent of the
//! `MAP_ANONYMOUS` fallback described in SPEC_FULL.md §9.

use memmap2::MmapMut;

use crate::error::{Result, StorageError};

/// A growable-by-replacement anonymous mapping. `AnonymousRegion` owns the
/// mapping and hands out `&[u8]`/`&mut [u8]` views into it.
pub struct AnonymousRegion {
    mmap: MmapMut,
}

impl AnonymousRegion {
    /// Allocate a new zero-filled anonymous region of exactly `size` bytes.
    pub fn new(size: usize) -> Result<Self> {
        let mmap = MmapMut::map_anon(size).map_err(StorageError::Io)?;
        Ok(Self { mmap })
    }

    pub fn len(&self) -> usize {
        self.mmap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mmap.is_empty()
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.mmap
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.mmap
    }

    /// Unwrap into the underlying writable mapping (used when sealing: the
    /// caller converts it to a read-only `Mmap` via `MmapMut::make_read_only`).
    pub fn into_inner(self) -> MmapMut {
        self.mmap
    }
}
