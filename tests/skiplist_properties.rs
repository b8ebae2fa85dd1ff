//! Ordering and range-query invariants for the skip-list index
//!.

use std::cmp::Ordering;

use markerstore::{Comparator, KeyComparison, Multi, Probability, SkipList, Unique};

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

#[test]
fn sorted_order_holds_under_random_insertion() {
    let mut list: SkipList<i64, i64, IntComparator, Unique> =
        SkipList::new(IntComparator, 16, Probability::Half);

    let mut keys: Vec<i64> = (0..2000).collect();
    for i in 0..keys.len() {
        keys.swap(i, (i * 7919) % keys.len());
    }
    for key in &keys {
        list.insert(*key, false).unwrap();
    }

    let collected: Vec<i64> = list.iter().copied().collect();
    assert_eq!(collected.len(), 2000);
    let mut sorted = collected.clone();
    sorted.sort_unstable();
    assert_eq!(collected, sorted);
}

#[test]
fn half_open_range_lookup_contract() {
    let mut list: SkipList<i64, i64, IntComparator, Unique> =
        SkipList::new(IntComparator, 8, Probability::Half);
    for n in [1, 3, 5, 7, 9] {
        list.insert(n, false).unwrap();
    }

    assert_eq!(*list.element(list.left_lookup(&4)).unwrap(), 3);
    assert_eq!(*list.element(list.right_lookup(&4)).unwrap(), 5);
    assert!(list.is_start(list.left_lookup(&0)));
    assert!(list.is_end(list.right_lookup(&10)));

    let three = list.lookup_by_key(&3).unwrap();
    let five = list.lookup_by_key(&5).unwrap();
    assert_eq!(list.next_node(three), five);
    assert_eq!(list.prev_node(five), three);
}

#[test]
fn unique_list_rejects_duplicate_key_on_insert() {
    let mut list: SkipList<i64, i64, IntComparator, Unique> =
        SkipList::new(IntComparator, 8, Probability::Half);
    list.insert(5, false).unwrap();
    assert!(list.insert(5, false).is_err());
}

#[test]
fn multi_list_preserves_insertion_order_among_equal_keys() {
    let mut list: SkipList<i64, i64, IntComparator, Multi> =
        SkipList::new(IntComparator, 8, Probability::Third);
    for n in [2, 2, 2, 1, 3] {
        list.insert(n, false).unwrap();
    }
    let collected: Vec<i64> = list.iter().copied().collect();
    assert_eq!(collected, vec![1, 2, 2, 2, 3]);
}

#[test]
fn remove_then_lookup_is_consistently_absent() {
    let mut list: SkipList<i64, i64, IntComparator, Unique> =
        SkipList::new(IntComparator, 8, Probability::Half);
    for n in 0..50 {
        list.insert(n, false).unwrap();
    }
    for n in (0..50).step_by(2) {
        assert!(list.remove(&n).is_some());
    }
    assert_eq!(list.len(), 25);
    for n in (0..50).step_by(2) {
        assert!(list.lookup_by_key(&n).is_none());
    }
    for n in (1..50).step_by(2) {
        assert!(list.lookup_by_key(&n).is_some());
    }
}
