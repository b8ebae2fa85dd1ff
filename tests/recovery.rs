//! Crash-recovery scenarios: a collection
//! reopened after an unclean shutdown must reconstruct its primary index
//! and per-datafile stats purely by replaying markers.

use std::sync::Arc;

use markerstore::{Collection, CollectionKind, Metrics, OperationContext, Parameters, Shaper, TuningProfile};
use serde_json::json;
use tempfile::tempdir;

fn open_fresh(dir: &std::path::Path, max_size: u64) -> Collection {
    let sequence = Arc::new(markerstore::SequenceGenerator::new());
    let shaper = Arc::new(Shaper::create(&dir.join("SHAPES.db"), 1, Arc::clone(&sequence)).unwrap());
    let mut params = Parameters::new(1, "docs", CollectionKind::Document);
    params.max_size = Some(max_size);
    Collection::create(
        &dir.join("collection-1"),
        params,
        shaper,
        sequence,
        1,
        TuningProfile::default(),
        Arc::new(Metrics::new()),
    )
    .unwrap()
}

fn reopen(dir: &std::path::Path) -> Collection {
    let sequence = Arc::new(markerstore::SequenceGenerator::new());
    let shaper = Arc::new(Shaper::open(&dir.join("SHAPES.db"), 1, Arc::clone(&sequence)).unwrap());
    Collection::open(
        &dir.join("collection-1"),
        shaper,
        sequence,
        1,
        TuningProfile::default(),
        Arc::new(Metrics::new()),
    )
    .unwrap()
}

#[test]
fn deletions_survive_reopen() {
    let dir = tempdir().unwrap();
    let key = {
        let mut collection = open_fresh(dir.path(), 4 * 1024 * 1024);
        let outcome = collection
            .create_document(&json!({"keep": false}), None, OperationContext::default())
            .unwrap();
        collection.delete_document(&outcome.key, OperationContext::default()).unwrap();
        outcome.key
    };

    let collection = reopen(dir.path());
    assert!(collection.read_document(&key).unwrap().is_none());
    assert_eq!(collection.document_count(), 0);
}

#[test]
fn updates_survive_reopen_with_latest_value() {
    let dir = tempdir().unwrap();
    let key = {
        let mut collection = open_fresh(dir.path(), 4 * 1024 * 1024);
        let outcome = collection
            .create_document(&json!({"v": 1}), None, OperationContext::default())
            .unwrap();
        collection
            .update_document(&outcome.key, &json!({"v": 2}), OperationContext::default())
            .unwrap();
        collection
            .update_document(&outcome.key, &json!({"v": 3}), OperationContext::default())
            .unwrap();
        outcome.key
    };

    let collection = reopen(dir.path());
    let value = collection.read_document(&key).unwrap().unwrap();
    assert_eq!(value["v"], 3);
}

#[test]
fn journal_rotation_survives_reopen_across_multiple_datafiles() {
    let dir = tempdir().unwrap();
    let mut keys = Vec::new();
    {
        let mut collection = open_fresh(dir.path(), 32 * 1024);
        for i in 0..500 {
            let outcome = collection
                .create_document(&json!({"n": i, "pad": "x".repeat(64)}), None, OperationContext::default())
                .unwrap();
            keys.push(outcome.key);
        }
    }

    let collection = reopen(dir.path());
    assert!(collection.figures().number_datafiles >= 1);
    for key in &keys {
        assert!(collection.read_document(key).unwrap().is_some());
    }
}
