use std::cmp::Ordering;

use criterion::{criterion_group, criterion_main, BatchSize, Criterion};
use markerstore::{Comparator, KeyComparison, Probability, SkipList, Unique};

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

fn bench_insert(c: &mut Criterion) {
    c.bench_function("skiplist_insert_10000_random", |b| {
        b.iter_batched(
            || {
                let list: SkipList<i64, i64, IntComparator, Unique> =
                    SkipList::new(IntComparator, 32, Probability::Half);
                let mut keys: Vec<i64> = (0..10_000).collect();
                // Cheap fixed shuffle so insertion isn't purely ascending.
                for i in 0..keys.len() {
                    keys.swap(i, (i * 2654435761u64 as usize) % keys.len());
                }
                (list, keys)
            },
            |(mut list, keys)| {
                for key in keys {
                    list.insert(key, false).expect("insert");
                }
                criterion::black_box(list.len());
            },
            BatchSize::SmallInput,
        );
    });
}

fn bench_lookup(c: &mut Criterion) {
    let mut list: SkipList<i64, i64, IntComparator, Unique> =
        SkipList::new(IntComparator, 32, Probability::Half);
    for key in 0..10_000 {
        list.insert(key, false).expect("insert");
    }

    c.bench_function("skiplist_lookup_by_key_10000", |b| {
        b.iter(|| {
            for key in (0..10_000).step_by(37) {
                criterion::black_box(list.lookup_by_key(&key));
            }
        });
    });
}

criterion_group!(benches, bench_insert, bench_lookup);
criterion_main!(benches);
