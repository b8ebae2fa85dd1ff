//! Attribute dictionary: `name <-> aid`, plus the weight that gives
//! attribute names a deterministic total order.
//!
//! A new name is inserted at its lexicographic position in a sorted vector
//! and given a weight halfway between its neighbours (stride 100). If the
//! gap between neighbours is too small for a midpoint to differ from both,
//! every weight in the vector is reassigned in one pass (`0, 100, 200, ...`).
//!
//! Interned via a double-checked hash lookup under a mutex before allocating
//! a new id.

use std::collections::HashMap;
use std::sync::Mutex;

use crate::error::Result;

/// Weight stride used both for fresh inserts at either end of the sorted
/// vector and for a full rebalance pass.
const WEIGHT_RESOLUTION: i64 = 100;

struct Inner {
    /// name -> aid
    names: HashMap<String, u64>,
    /// aid -> name
    by_id: Vec<String>,
    /// aid -> weight, indexed in parallel with `sorted` (name ordering).
    weights: HashMap<u64, i64>,
    /// aids in ascending lexicographic order of their name, used both to
    /// find insertion position and to do a full rebalance.
    sorted: Vec<u64>,
    next_aid: u64,
}

/// The attribute half of the shaper: name-to-id, id-to-name, and weighted
/// ordering, kept as three views over one `Mutex`-guarded structure rather
/// than three independently-locked ones.
pub struct AttributeDictionary {
    inner: Mutex<Inner>,
}

impl AttributeDictionary {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                names: HashMap::new(),
                by_id: Vec::new(),
                weights: HashMap::new(),
                sorted: Vec::new(),
                next_aid: 0,
            }),
        }
    }

    /// Used only by shaper/shape tests that need an `AttributeDictionary`
    /// without a backing datafile.
    #[cfg(test)]
    pub fn new_in_memory_for_test() -> Self {
        Self::new()
    }

    #[cfg(test)]
    pub fn clone_names_for_test(&self) -> HashMap<u64, String> {
        let inner = self.inner.lock().unwrap();
        inner
            .by_id
            .iter()
            .enumerate()
            .map(|(aid, name)| (aid as u64, name.clone()))
            .collect()
    }

    /// Find `name`'s attribute id, inserting a fresh one (with a computed
    /// weight) if this is the first time it's been seen. Double-checks the
    /// lookup after acquiring the lock.
    pub fn find_or_insert(&self, name: &str) -> Result<u64> {
        let mut inner = self.inner.lock().unwrap();
        if let Some(&aid) = inner.names.get(name) {
            return Ok(aid);
        }
        let aid = inner.next_aid;
        inner.next_aid += 1;
        inner.names.insert(name.to_string(), aid);
        inner.by_id.push(name.to_string());
        assign_weight(&mut inner, aid, name);
        Ok(aid)
    }

    /// Like [`find_or_insert`](Self::find_or_insert), but runs `on_insert`
    /// exactly once, while still holding the attribute mutex, iff this call
    /// is the one that actually allocates a fresh aid -- used by the shaper
    /// to append an attribute marker to its datafile atomically with the
    /// in-memory insert. If `on_insert` fails,
    /// the insertion is not committed and the error propagates.
    pub fn find_or_insert_with<F>(&self, name: &str, on_insert: F) -> Result<u64>
    where
        F: FnOnce(u64, i64, &str) -> Result<()>,
    {
        let mut inner = self.inner.lock().unwrap();
        if let Some(&aid) = inner.names.get(name) {
            return Ok(aid);
        }
        let aid = inner.next_aid;
        assign_weight(&mut inner, aid, name);
        // assign_weight only touches `sorted`/`weights`; commit `names`/`by_id`
        // only after the caller's persistence step succeeds.
        let weight = inner.weights[&aid];
        on_insert(aid, weight, name)?;
        inner.next_aid += 1;
        inner.names.insert(name.to_string(), aid);
        inner.by_id.push(name.to_string());
        Ok(aid)
    }

    /// Look up an id without inserting.
    pub fn lookup(&self, name: &str) -> Option<u64> {
        self.inner.lock().unwrap().names.get(name).copied()
    }

    /// Look up a name by id without inserting.
    pub fn name_of(&self, aid: u64) -> Option<String> {
        self.inner.lock().unwrap().by_id.get(aid as usize).cloned()
    }

    /// Weight of an attribute, used by `shaper::compare` to order array
    /// fields deterministically.
    pub fn weight_of(&self, aid: u64) -> Option<i64> {
        self.inner.lock().unwrap().weights.get(&aid).copied()
    }

    /// Re-populate from a recovered attribute marker: the aid is already
    /// fixed, weights are always recomputed in a final pass once every
    /// marker has been replayed.
    pub fn reload(&self, aid: u64, name: &str) {
        let mut inner = self.inner.lock().unwrap();
        if inner.names.contains_key(name) {
            return;
        }
        inner.names.insert(name.to_string(), aid);
        if inner.by_id.len() <= aid as usize {
            inner.by_id.resize(aid as usize + 1, String::new());
        }
        inner.by_id[aid as usize] = name.to_string();
        if aid >= inner.next_aid {
            inner.next_aid = aid + 1;
        }
    }

    /// Rebuild every weight from scratch by sorting all names
    /// lexicographically and assigning `0, 100, 200, ...` -- run once after
    /// `reload` has replayed every attribute marker on open.
    pub fn rebuild_weights(&self) {
        let mut inner = self.inner.lock().unwrap();
        let mut by_name: Vec<(String, u64)> = inner
            .by_id
            .iter()
            .enumerate()
            .map(|(aid, name)| (name.clone(), aid as u64))
            .collect();
        by_name.sort_by(|a, b| a.0.cmp(&b.0));
        inner.sorted = by_name.iter().map(|(_, aid)| *aid).collect();
        inner.weights.clear();
        for (i, (_, aid)) in by_name.iter().enumerate() {
            inner.weights.insert(*aid, i as i64 * WEIGHT_RESOLUTION);
        }
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for AttributeDictionary {
    fn default() -> Self {
        Self::new()
    }
}

/// Insert `aid` (whose name is `name`) into the sorted vector at its
/// lexicographic position and assign it a weight, rebalancing every weight
/// if the gap between neighbours is too narrow for a distinct midpoint.
fn assign_weight(inner: &mut Inner, aid: u64, name: &str) {
    let position = inner
        .sorted
        .binary_search_by(|&candidate| inner.by_id[candidate as usize].as_str().cmp(name))
        .unwrap_or_else(|insert_at| insert_at);

    let len = inner.sorted.len();
    let weight = if len == 0 {
        0
    } else if position == 0 {
        let right = inner.weights[&inner.sorted[0]];
        right - WEIGHT_RESOLUTION
    } else if position == len {
        let left = inner.weights[&inner.sorted[len - 1]];
        left + WEIGHT_RESOLUTION
    } else {
        let left = inner.weights[&inner.sorted[position - 1]];
        let right = inner.weights[&inner.sorted[position]];
        let mid = left + (right - left) / 2;
        if mid == left || mid == right {
            // Gap too narrow: fall through to a full rebalance below.
            i64::MIN
        } else {
            mid
        }
    };

    inner.sorted.insert(position, aid);

    if weight == i64::MIN {
        full_rebalance(inner);
    } else {
        inner.weights.insert(aid, weight);
    }
}

fn full_rebalance(inner: &mut Inner) {
    for (i, &aid) in inner.sorted.iter().enumerate() {
        inner.weights.insert(aid, i as i64 * WEIGHT_RESOLUTION);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_name_returns_same_aid() {
        let dict = AttributeDictionary::new();
        let a1 = dict.find_or_insert("name").unwrap();
        let a2 = dict.find_or_insert("name").unwrap();
        assert_eq!(a1, a2);
    }

    #[test]
    fn distinct_names_get_distinct_aids_in_insertion_order() {
        let dict = AttributeDictionary::new();
        let a = dict.find_or_insert("a").unwrap();
        let b = dict.find_or_insert("b").unwrap();
        let c = dict.find_or_insert("c").unwrap();
        assert_eq!((a, b, c), (0, 1, 2));
    }

    #[test]
    fn weights_respect_lexicographic_order() {
        let dict = AttributeDictionary::new();
        let b = dict.find_or_insert("banana").unwrap();
        let a = dict.find_or_insert("apple").unwrap();
        let c = dict.find_or_insert("cherry").unwrap();

        let wa = dict.weight_of(a).unwrap();
        let wb = dict.weight_of(b).unwrap();
        let wc = dict.weight_of(c).unwrap();
        assert!(wa < wb);
        assert!(wb < wc);
    }

    #[test]
    fn dense_inserts_between_neighbours_trigger_rebalance() {
        let dict = AttributeDictionary::new();
        // Force a chain of midpoint inserts between "a" and "b" until the
        // gap is exhausted and a full rebalance is required.
        dict.find_or_insert("a").unwrap();
        dict.find_or_insert("b").unwrap();
        for i in 0..10 {
            // Each of these sorts lexicographically between "a" and "b".
            dict.find_or_insert(&format!("a{}", "m".repeat(i + 1))).unwrap();
        }
        // After all insertions weights must still strictly respect order.
        let mut names: Vec<String> = (0..dict.len() as u64)
            .map(|aid| dict.name_of(aid).unwrap())
            .collect();
        names.sort();
        let mut prev_weight = i64::MIN;
        for name in &names {
            let aid = dict.lookup(name).unwrap();
            let w = dict.weight_of(aid).unwrap();
            assert!(w > prev_weight, "weights must be strictly increasing");
            prev_weight = w;
        }
    }

    #[test]
    fn reload_then_rebuild_weights_matches_fresh_insertion() {
        let dict = AttributeDictionary::new();
        dict.reload(0, "zebra");
        dict.reload(1, "apple");
        dict.reload(2, "mango");
        dict.rebuild_weights();

        let apple = dict.lookup("apple").unwrap();
        let mango = dict.lookup("mango").unwrap();
        let zebra = dict.lookup("zebra").unwrap();
        assert!(dict.weight_of(apple).unwrap() < dict.weight_of(mango).unwrap());
        assert!(dict.weight_of(mango).unwrap() < dict.weight_of(zebra).unwrap());
    }
}
