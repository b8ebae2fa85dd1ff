//! The primary hash index: `key -> mptr`.
//!
//! Rather than a raw pointer into a memory-mapped region (unsound to hold
//! across the `mmap`'s own lifetime in safe Rust), an `mptr`'s `data_ptr` is
//! a `(datafile_id, offset)` pair -- the design notes table's "lifetime-
//! parameterised slice owned by a mapping handle" strategy applied
//! concretely: the collection looks the datafile up by id and slices it,
//! and a [`crate::collection::barrier::Barrier`] guarantees that datafile
//! stays mapped for as long as any reader holds the offset.

use std::collections::HashMap;

/// An in-memory locator for one document's latest on-disk marker.
#[derive(Debug, Clone)]
pub struct Mptr {
    pub key: String,
    /// Revision id of the marker this mptr currently points at.
    pub rid_current: u64,
    /// Revision id this mptr became valid at (the rid of the insert, or of
    /// the update that last swung the pointer).
    pub rid_valid_from: u64,
    /// Revision id this mptr stopped being valid at; `0` means live.
    pub rid_valid_to: u64,
    /// Which datafile (by `fid`) currently holds the live marker.
    pub datafile_id: u64,
    /// Byte offset of the marker header within that datafile.
    pub offset: usize,
}

impl Mptr {
    pub fn is_live(&self) -> bool {
        self.rid_valid_to == 0
    }
}

/// Hash-indexed `key -> mptr` table. Not internally synchronised: the
/// collection's read-write lock governs access, matching SPEC_FULL.md §5's
/// lock-acquisition order (the primary index is mutated only under the
/// collection write lock).
#[derive(Default)]
pub struct PrimaryIndex {
    by_key: HashMap<String, Mptr>,
}

impl PrimaryIndex {
    pub fn new() -> Self {
        Self { by_key: HashMap::new() }
    }

    pub fn get(&self, key: &str) -> Option<&Mptr> {
        self.by_key.get(key)
    }

    /// Insert a brand-new mptr (first sight of `key`). Overwrites silently
    /// if `key` already has an mptr -- callers (`Collection::create`) check
    /// for an existing live key first and reject the create instead.
    pub fn insert(&mut self, mptr: Mptr) {
        self.by_key.insert(mptr.key.clone(), mptr);
    }

    /// Swing an existing key's mptr to a new marker location (update path).
    /// Returns the previous `(datafile_id, offset, rid)` so the caller can
    /// account the old body as dead bytes in its datafile.
    pub fn swing(&mut self, key: &str, new_rid: u64, datafile_id: u64, offset: usize) -> Option<(u64, usize, u64)> {
        let mptr = self.by_key.get_mut(key)?;
        let previous = (mptr.datafile_id, mptr.offset, mptr.rid_current);
        mptr.rid_valid_from = new_rid;
        mptr.rid_current = new_rid;
        mptr.datafile_id = datafile_id;
        mptr.offset = offset;
        Some(previous)
    }

    /// Move `key`'s mptr to a new on-disk location without touching its
    /// revision id (compaction path: the marker's bytes moved, but it's
    /// still the same revision). No-op if `key` isn't present (it may have
    /// been deleted concurrently with the compaction's read phase).
    pub fn relocate(&mut self, key: &str, datafile_id: u64, offset: usize) {
        if let Some(mptr) = self.by_key.get_mut(key) {
            mptr.datafile_id = datafile_id;
            mptr.offset = offset;
        }
    }

    /// Remove `key`'s mptr entirely (delete path): the caller has already
    /// written a deletion marker; the entry no longer belongs in the index.
    pub fn remove(&mut self, key: &str) -> Option<Mptr> {
        self.by_key.remove(key)
    }

    pub fn len(&self) -> usize {
        self.by_key.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_key.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.by_key.keys().map(|k| k.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Mptr)> {
        self.by_key.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn clear(&mut self) {
        self.by_key.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mptr(key: &str, rid: u64) -> Mptr {
        Mptr {
            key: key.to_string(),
            rid_current: rid,
            rid_valid_from: rid,
            rid_valid_to: 0,
            datafile_id: 1,
            offset: 0,
        }
    }

    #[test]
    fn insert_then_get() {
        let mut idx = PrimaryIndex::new();
        idx.insert(mptr("a", 1));
        assert_eq!(idx.get("a").unwrap().rid_current, 1);
        assert!(idx.get("b").is_none());
    }

    #[test]
    fn swing_updates_pointer_and_returns_previous() {
        let mut idx = PrimaryIndex::new();
        idx.insert(mptr("a", 1));
        let previous = idx.swing("a", 2, 9, 128).unwrap();
        assert_eq!(previous, (1, 0, 1));
        let current = idx.get("a").unwrap();
        assert_eq!(current.rid_current, 2);
        assert_eq!(current.datafile_id, 9);
        assert_eq!(current.offset, 128);
    }

    #[test]
    fn relocate_moves_pointer_without_changing_rid() {
        let mut idx = PrimaryIndex::new();
        idx.insert(mptr("a", 5));
        idx.relocate("a", 42, 256);
        let current = idx.get("a").unwrap();
        assert_eq!(current.rid_current, 5);
        assert_eq!(current.datafile_id, 42);
        assert_eq!(current.offset, 256);

        // No-op for an absent key.
        idx.relocate("missing", 1, 1);
        assert!(idx.get("missing").is_none());
    }

    #[test]
    fn remove_drops_entry() {
        let mut idx = PrimaryIndex::new();
        idx.insert(mptr("a", 1));
        let removed = idx.remove("a").unwrap();
        assert_eq!(removed.key, "a");
        assert!(idx.get("a").is_none());
    }

    #[test]
    fn live_check() {
        let mut live = mptr("a", 1);
        assert!(live.is_live());
        live.rid_valid_to = 2;
        assert!(!live.is_live());
    }
}
