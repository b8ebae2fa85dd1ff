//! End-to-end collection lifecycle scenarios.

use std::sync::Arc;

use markerstore::{Collection, CollectionKind, Metrics, OperationContext, Parameters, Shaper, TuningProfile};
use serde_json::json;
use tempfile::tempdir;

fn open_collection(dir: &std::path::Path, max_size: u64) -> Collection {
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

#[test]
fn create_read_update_delete_round_trip() {
    let dir = tempdir().unwrap();
    let mut collection = open_collection(dir.path(), 4 * 1024 * 1024);

    let created = collection
        .create_document(&json!({"name": "alice", "age": 30}), None, OperationContext::default())
        .unwrap();

    let read_back = collection.read_document(&created.key).unwrap().unwrap();
    assert_eq!(read_back["name"], "alice");
    assert_eq!(read_back["age"], 30);

    let updated = collection
        .update_document(&created.key, &json!({"name": "alice", "age": 31}), OperationContext::default())
        .unwrap();
    assert!(updated.rid > created.rid);
    assert_eq!(updated.previous_rid, created.rid);

    let after_update = collection.read_document(&created.key).unwrap().unwrap();
    assert_eq!(after_update["age"], 31);

    collection.delete_document(&created.key, OperationContext::default()).unwrap();
    assert!(collection.read_document(&created.key).unwrap().is_none());
}

#[test]
fn figures_track_alive_and_dead_markers_across_updates() {
    let dir = tempdir().unwrap();
    let mut collection = open_collection(dir.path(), 4 * 1024 * 1024);

    let outcome = collection
        .create_document(&json!({"v": 1}), None, OperationContext::default())
        .unwrap();
    let before = collection.figures();
    assert_eq!(before.alive_count, 1);

    collection
        .update_document(&outcome.key, &json!({"v": 2}), OperationContext::default())
        .unwrap();
    let after = collection.figures();
    assert_eq!(after.alive_count, 1);
    assert_eq!(after.dead_count, 1);
}

#[test]
fn documents_survive_process_restart() {
    let dir = tempdir().unwrap();
    let mut keys = Vec::new();
    {
        let mut collection = open_collection(dir.path(), 4 * 1024 * 1024);
        for i in 0..10 {
            let outcome = collection
                .create_document(&json!({"n": i}), None, OperationContext::default())
                .unwrap();
            keys.push(outcome.key);
        }
    }

    let sequence = Arc::new(markerstore::SequenceGenerator::new());
    let shaper = Arc::new(Shaper::open(&dir.path().join("SHAPES.db"), 1, Arc::clone(&sequence)).unwrap());
    let collection = Collection::open(
        &dir.path().join("collection-1"),
        shaper,
        sequence,
        1,
        TuningProfile::default(),
        Arc::new(Metrics::new()),
    )
    .unwrap();

    assert_eq!(collection.document_count(), 10);
    for key in keys {
        assert!(collection.read_document(&key).unwrap().is_some());
    }
}
