//! A generic skip-list secondary index.
//!
//! Nodes live in an arena (`Vec<Option<Node<E>>>`) addressed by index rather
//! than pointer, so the whole structure is safe and `Send` without `unsafe`.
//! `Uniqueness` (zero-sized `Unique`/`Multi`) picks the insertion/removal
//! behavior at the type level, replacing the original engine's duplicated
//! unique/multi skip-list implementations with one generic body
//!.

use std::cmp::Ordering;
use std::marker::PhantomData;

use rand::rngs::StdRng;
use rand::SeedableRng;

use crate::error::{Result, StorageError};
use crate::skiplist::comparator::{Comparator, KeyComparison};
use crate::skiplist::height::{HeightSampler, Probability};

const START: usize = 0;
const END: usize = 1;

/// Default tower height ceiling: `2^32` addressable elements at p=½.
pub const DEFAULT_MAX_HEIGHT: usize = 32;

/// Per-level forward/backward neighbours (a variable-height tower); the
/// original's `TRI_skiplist_nb_t`.
#[derive(Debug, Clone, Copy)]
struct Level {
    prev: Option<usize>,
    next: Option<usize>,
}

struct Node<E> {
    element: Option<E>,
    levels: Vec<Level>,
}

/// Marker trait selecting unique/multi insertion and removal semantics.
pub trait Uniqueness {
    /// Whether a run of equal-keyed elements should be advanced *past*
    /// during insertion (true for `Multi`, so duplicates land after
    /// existing equals in insertion order) or treated as a conflict
    /// (false for `Unique`).
    const ALLOW_DUPLICATE_KEYS: bool;
}

/// Every key appears at most once.
pub struct Unique;
impl Uniqueness for Unique {
    const ALLOW_DUPLICATE_KEYS: bool = false;
}

/// Duplicate keys permitted; insertion order among equals is preserved.
pub struct Multi;
impl Uniqueness for Multi {
    const ALLOW_DUPLICATE_KEYS: bool = true;
}

/// Opaque handle to a node, returned by lookups and accepted by
/// `next_node`/`prev_node`. Always resolves to a real slot: the sentinels
/// are valid handles too.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeHandle(usize);

/// A probabilistic ordered index over elements of type `E`, keyed (for
/// lookups) by `K` through a caller-supplied [`Comparator`].
pub struct SkipList<K, E, C, U: Uniqueness> {
    comparator: C,
    arena: Vec<Option<Node<E>>>,
    free: Vec<usize>,
    sampler: HeightSampler,
    rng: StdRng,
    len: usize,
    _key: PhantomData<K>,
    _uniqueness: PhantomData<U>,
}

impl<K, E, C, U> SkipList<K, E, C, U>
where
    C: Comparator<K, E>,
    U: Uniqueness,
{
    /// Build an empty skip list with the given height bound and probability.
    pub fn new(comparator: C, max_height: usize, prob: Probability) -> Self {
        let max_height = max_height.max(1);
        let full_height = vec![Level { prev: None, next: None }; max_height];
        let start = Node { element: None, levels: full_height.clone() };
        let end = Node { element: None, levels: full_height };

        let mut list = Self {
            comparator,
            arena: vec![Some(start), Some(end)],
            free: Vec::new(),
            sampler: HeightSampler::new(prob, max_height),
            rng: StdRng::from_os_rng(),
            len: 0,
            _key: PhantomData,
            _uniqueness: PhantomData,
        };
        for level in 0..max_height {
            list.node_mut(START).levels[level].next = Some(END);
            list.node_mut(END).levels[level].prev = Some(START);
        }
        list
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn start(&self) -> NodeHandle {
        NodeHandle(START)
    }

    pub fn end(&self) -> NodeHandle {
        NodeHandle(END)
    }

    fn node(&self, id: usize) -> &Node<E> {
        self.arena[id].as_ref().expect("dangling skip-list node id")
    }

    fn node_mut(&mut self, id: usize) -> &mut Node<E> {
        self.arena[id].as_mut().expect("dangling skip-list node id")
    }

    fn height(&self) -> usize {
        self.node(START).levels.len()
    }

    /// Element stored at a handle, or `None` for the sentinels.
    pub fn element(&self, handle: NodeHandle) -> Option<&E> {
        self.node(handle.0).element.as_ref()
    }

    /// Descend from the top level to level 0, advancing past every node for
    /// which `keep_going` returns `true`. Returns the per-level predecessor
    /// ids (for splicing) and the level-0 node the descent stopped at.
    fn descend(&self, keep_going: impl Fn(KeyComparison) -> bool, key: &K) -> (Vec<usize>, usize) {
        let height = self.height();
        let mut preds = vec![START; height];
        let mut cur = START;
        for level in (0..height).rev() {
            loop {
                let next = self.node(cur).levels[level].next;
                let Some(next) = next else { break };
                if next == END {
                    break;
                }
                let cmp = self.comparator.compare_key_element(key, self.node(next).element.as_ref().unwrap());
                if keep_going(cmp) {
                    cur = next;
                } else {
                    break;
                }
            }
            preds[level] = cur;
        }
        (preds, cur)
    }

    /// Greatest node strictly less than `key`.
    pub fn left_lookup(&self, key: &K) -> NodeHandle {
        let (_, cur) = self.descend(KeyComparison::element_precedes_key, key);
        NodeHandle(cur)
    }

    /// Least node strictly greater than `key`.
    pub fn right_lookup(&self, key: &K) -> NodeHandle {
        let (_, cur) = self.descend(|cmp| !matches!(cmp, KeyComparison::Less | KeyComparison::SlightlyLess), key);
        let next = self.node(cur).levels[0].next.unwrap_or(END);
        NodeHandle(next)
    }

    /// The node matching `key` exactly, if any.
    pub fn lookup_by_key(&self, key: &K) -> Option<NodeHandle> {
        let (_, cur) = self.descend(KeyComparison::element_precedes_key, key);
        let next = self.node(cur).levels[0].next.unwrap_or(END);
        if next == END {
            return None;
        }
        let cmp = self.comparator.compare_key_element(key, self.node(next).element.as_ref().unwrap());
        matches!(cmp, KeyComparison::Equal).then_some(NodeHandle(next))
    }

    /// Insert `element`. A `Unique` list rejects a key that already exists
    /// unless `overwrite` is set, in which case the existing node's element
    /// is replaced in place. A `Multi` list always inserts, landing the new
    /// element after any existing equal-keyed run.
    pub fn insert(&mut self, element: E, overwrite: bool) -> Result<NodeHandle> {
        let height = self.height();
        let mut preds = vec![START; height];
        let mut cur = START;
        for level in (0..height).rev() {
            loop {
                let next = self.node(cur).levels[level].next;
                let Some(next) = next else { break };
                if next == END {
                    break;
                }
                let existing = self.node(next).element.as_ref().unwrap();
                let ord = self.comparator.compare_element_element(existing, &element);
                let keep_going = match ord {
                    Ordering::Less => true,
                    Ordering::Equal => U::ALLOW_DUPLICATE_KEYS,
                    Ordering::Greater => false,
                };
                if keep_going {
                    cur = next;
                } else {
                    break;
                }
            }
            preds[level] = cur;
        }

        if !U::ALLOW_DUPLICATE_KEYS {
            let candidate = self.node(preds[0]).levels[0].next.unwrap_or(END);
            if candidate != END {
                let existing = self.node(candidate).element.as_ref().unwrap();
                if self.comparator.compare_element_element(existing, &element) == Ordering::Equal {
                    if !overwrite {
                        return Err(StorageError::UniqueViolation);
                    }
                    self.node_mut(candidate).element = Some(element);
                    return Ok(NodeHandle(candidate));
                }
            }
        }

        let new_height = self.sampler.sample(&mut self.rng).min(height);
        let id = self.alloc_node(element, new_height);
        for level in 0..new_height {
            let pred = preds[level];
            let next = self.node(pred).levels[level].next.unwrap_or(END);
            self.node_mut(pred).levels[level].next = Some(id);
            self.node_mut(id).levels[level] = Level { prev: Some(pred), next: Some(next) };
            self.node_mut(next).levels[level].prev = Some(id);
        }
        self.len += 1;
        Ok(NodeHandle(id))
    }

    fn alloc_node(&mut self, element: E, height: usize) -> usize {
        let node = Node { element: Some(element), levels: vec![Level { prev: None, next: None }; height] };
        if let Some(id) = self.free.pop() {
            self.arena[id] = Some(node);
            id
        } else {
            self.arena.push(Some(node));
            self.arena.len() - 1
        }
    }

    /// Remove the element equal to `target` (via `equal_element_element` for
    /// `Multi` lists, to pick the exact node among a run of equal keys), and
    /// return it.
    pub fn remove(&mut self, target: &E) -> Option<E> {
        let height = self.height();
        let mut cur = START;
        for level in (0..height).rev() {
            loop {
                let next = self.node(cur).levels[level].next;
                let Some(next) = next else { break };
                if next == END {
                    break;
                }
                let existing = self.node(next).element.as_ref().unwrap();
                if self.comparator.compare_element_element(existing, target) == Ordering::Less {
                    cur = next;
                } else {
                    break;
                }
            }
        }

        let found = loop {
            let next = self.node(cur).levels[0].next.unwrap_or(END);
            if next == END {
                break None;
            }
            let existing = self.node(next).element.as_ref().unwrap();
            match self.comparator.compare_element_element(existing, target) {
                Ordering::Greater => break None,
                Ordering::Less => unreachable!("descent already skipped every strictly-lesser element"),
                Ordering::Equal => {
                    if self.comparator.equal_element_element(existing, target) {
                        break Some(next);
                    }
                    cur = next;
                }
            }
        };

        let found = found?;
        let node_height = self.node(found).levels.len();
        for level in 0..node_height {
            let prev = self.node(found).levels[level].prev;
            let next = self.node(found).levels[level].next;
            if let Some(prev) = prev {
                self.node_mut(prev).levels[level].next = next;
            }
            if let Some(next) = next {
                self.node_mut(next).levels[level].prev = prev;
            }
        }
        let element = self.arena[found].take().and_then(|n| n.element);
        self.free.push(found);
        self.len -= 1;
        element
    }

    /// The node after `handle` at level 0; returns the end sentinel at the
    /// end of the list and keeps returning it thereafter.
    pub fn next_node(&self, handle: NodeHandle) -> NodeHandle {
        if handle.0 == END {
            return handle;
        }
        NodeHandle(self.node(handle.0).levels[0].next.unwrap_or(END))
    }

    /// The node before `handle` at level 0; returns the start sentinel at
    /// the beginning of the list and keeps returning it thereafter.
    pub fn prev_node(&self, handle: NodeHandle) -> NodeHandle {
        if handle.0 == START {
            return handle;
        }
        NodeHandle(self.node(handle.0).levels[0].prev.unwrap_or(START))
    }

    pub fn is_start(&self, handle: NodeHandle) -> bool {
        handle.0 == START
    }

    pub fn is_end(&self, handle: NodeHandle) -> bool {
        handle.0 == END
    }

    /// Walk every element in ascending order -- used by tests and by range
    /// scans that the collection layer builds on top of `left_lookup`/
    /// `right_lookup`/`next_node`.
    pub fn iter(&self) -> SkipListIter<'_, K, E, C, U> {
        SkipListIter { list: self, cur: self.start() }
    }
}

pub struct SkipListIter<'a, K, E, C, U: Uniqueness> {
    list: &'a SkipList<K, E, C, U>,
    cur: NodeHandle,
}

impl<'a, K, E, C, U> Iterator for SkipListIter<'a, K, E, C, U>
where
    C: Comparator<K, E>,
    U: Uniqueness,
{
    type Item = &'a E;

    fn next(&mut self) -> Option<Self::Item> {
        self.cur = self.list.next_node(self.cur);
        if self.list.is_end(self.cur) {
            None
        } else {
            self.list.element(self.cur)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct IntComparator;

    impl Comparator<i64, i64> for IntComparator {
        fn compare_key_element(&self, key: &i64, element: &i64) -> KeyComparison {
            match key.cmp(element) {
                Ordering::Less => KeyComparison::Less,
                Ordering::Equal => KeyComparison::Equal,
                Ordering::Greater => KeyComparison::Greater,
            }
        }

        fn compare_element_element(&self, a: &i64, b: &i64) -> Ordering {
            a.cmp(b)
        }

        fn equal_element_element(&self, a: &i64, b: &i64) -> bool {
            a == b
        }
    }

    fn unique_list() -> SkipList<i64, i64, IntComparator, Unique> {
        SkipList::new(IntComparator, 8, Probability::Half)
    }

    fn multi_list() -> SkipList<i64, i64, IntComparator, Multi> {
        SkipList::new(IntComparator, 8, Probability::Half)
    }

    #[test]
    fn insert_then_lookup_by_key() {
        let mut list = unique_list();
        for n in [5, 1, 3, 9, 7] {
            list.insert(n, false).unwrap();
        }
        assert_eq!(list.len(), 5);
        for n in [5, 1, 3, 9, 7] {
            let handle = list.lookup_by_key(&n).unwrap();
            assert_eq!(*list.element(handle).unwrap(), n);
        }
        assert!(list.lookup_by_key(&42).is_none());
    }

    #[test]
    fn unique_insert_rejects_duplicate_without_overwrite() {
        let mut list = unique_list();
        list.insert(1, false).unwrap();
        let err = list.insert(1, false).unwrap_err();
        assert!(matches!(err, StorageError::UniqueViolation));
        assert_eq!(list.len(), 1);
    }

    #[test]
    fn unique_insert_overwrites_when_requested() {
        let mut list = unique_list();
        list.insert(1, false).unwrap();
        list.insert(1, true).unwrap();
        assert_eq!(list.len(), 1);
    }

    #[test]
    fn multi_list_keeps_every_duplicate() {
        let mut list = multi_list();
        for _ in 0..3 {
            list.insert(1, false).unwrap();
        }
        assert_eq!(list.len(), 3);
        let collected: Vec<i64> = list.iter().copied().collect();
        assert_eq!(collected, vec![1, 1, 1]);
    }

    #[test]
    fn ascending_order_is_maintained_across_inserts() {
        let mut list = unique_list();
        for n in [50, 10, 30, 90, 70, 20, 60] {
            list.insert(n, false).unwrap();
        }
        let collected: Vec<i64> = list.iter().copied().collect();
        let mut sorted = collected.clone();
        sorted.sort_unstable();
        assert_eq!(collected, sorted);
    }

    #[test]
    fn range_scenario_matches_half_open_lookup_contract() {
        let mut list = unique_list();
        for n in [1, 3, 5, 7, 9] {
            list.insert(n, false).unwrap();
        }

        let left = list.left_lookup(&4);
        assert_eq!(*list.element(left).unwrap(), 3);

        let right = list.right_lookup(&4);
        assert_eq!(*list.element(right).unwrap(), 5);

        let three = list.lookup_by_key(&3).unwrap();
        let five = list.lookup_by_key(&5).unwrap();
        assert_eq!(list.next_node(three), five);

        let nine = list.lookup_by_key(&9).unwrap();
        assert_eq!(list.next_node(nine), list.end());
        assert_eq!(list.prev_node(list.end()), nine);
    }

    #[test]
    fn remove_unlinks_node_from_every_level() {
        let mut list = unique_list();
        for n in 0..20 {
            list.insert(n, false).unwrap();
        }
        let removed = list.remove(&10).unwrap();
        assert_eq!(removed, 10);
        assert_eq!(list.len(), 19);
        assert!(list.lookup_by_key(&10).is_none());

        let collected: Vec<i64> = list.iter().copied().collect();
        assert!(!collected.contains(&10));
        let mut sorted = collected.clone();
        sorted.sort_unstable();
        assert_eq!(collected, sorted);
    }

    #[test]
    fn remove_missing_element_returns_none() {
        let mut list = unique_list();
        list.insert(1, false).unwrap();
        assert!(list.remove(&999).is_none());
    }

    #[test]
    fn multi_remove_uses_equal_element_element_to_disambiguate() {
        struct TaggedComparator;
        impl Comparator<i64, (i64, &'static str)> for TaggedComparator {
            fn compare_key_element(&self, key: &i64, element: &(i64, &'static str)) -> KeyComparison {
                match key.cmp(&element.0) {
                    Ordering::Less => KeyComparison::Less,
                    Ordering::Equal => KeyComparison::Equal,
                    Ordering::Greater => KeyComparison::Greater,
                }
            }
            fn compare_element_element(&self, a: &(i64, &'static str), b: &(i64, &'static str)) -> Ordering {
                a.0.cmp(&b.0)
            }
            fn equal_element_element(&self, a: &(i64, &'static str), b: &(i64, &'static str)) -> bool {
                a == b
            }
        }

        let mut list: SkipList<i64, (i64, &'static str), TaggedComparator, Multi> =
            SkipList::new(TaggedComparator, 8, Probability::Half);
        list.insert((1, "a"), false).unwrap();
        list.insert((1, "b"), false).unwrap();
        list.insert((1, "c"), false).unwrap();

        let removed = list.remove(&(1, "b")).unwrap();
        assert_eq!(removed, (1, "b"));
        let remaining: Vec<_> = list.iter().copied().collect();
        assert_eq!(remaining, vec![(1, "a"), (1, "c")]);
    }
}
