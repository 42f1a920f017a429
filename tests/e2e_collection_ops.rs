use std::sync::Arc;

use serde_json::json;

use vellumdb::{
    CollectionConfig, CollectionType, DocumentCollection, Error, OperationOptions, StorageEngine,
};

fn engine(dir: &std::path::Path) -> StorageEngine {
    StorageEngine::open(dir, false).unwrap()
}

fn document_collection(engine: &StorageEngine, name: &str) -> Arc<DocumentCollection> {
    engine
        .create_collection(CollectionConfig::new(0, name, CollectionType::Document))
        .unwrap()
}

#[test]
fn insert_then_read_roundtrips() {
    let dir = tempfile::tempdir().unwrap();
    let engine = engine(dir.path());
    let people = document_collection(&engine, "people");

    let result = people
        .insert(&json!({ "_key": "a", "x": 1 }), &OperationOptions::default())
        .unwrap();
    assert_eq!(result.key, "a");
    assert!(result.revision.value() > 0);

    let document = people.read("a", vellumdb::LockPolicy::Lock).unwrap();
    assert_eq!(document.revision, result.revision);
    assert_eq!(document.value["x"], 1);
    assert_eq!(document.value["_key"], "a");
    assert_eq!(document.value["_id"], "people/a");
    assert_eq!(document.value["_rev"], result.revision.to_string());
}

#[test]
fn generated_keys_are_assigned_and_readable() {
    let dir = tempfile::tempdir().unwrap();
    let engine = engine(dir.path());
    let items = document_collection(&engine, "items");

    let result = items
        .insert(&json!({ "v": true }), &OperationOptions::default())
        .unwrap();
    assert!(!result.key.is_empty());
    let document = items.read(&result.key, vellumdb::LockPolicy::Lock).unwrap();
    assert_eq!(document.value["v"], true);
}

#[test]
fn edge_collection_rejects_non_string_vertices() {
    let dir = tempfile::tempdir().unwrap();
    let engine = engine(dir.path());
    let edges = engine
        .create_collection(CollectionConfig::new(0, "edges", CollectionType::Edge))
        .unwrap();

    let result = edges.insert(
        &json!({ "_key": "e", "_from": 42, "_to": "v/2" }),
        &OperationOptions::default(),
    );
    assert!(matches!(result, Err(Error::InvalidEdgeAttribute)));
    assert_eq!(edges.size(), 0);

    edges
        .insert(
            &json!({ "_key": "e", "_from": "v/1", "_to": "v/2" }),
            &OperationOptions::default(),
        )
        .unwrap();
    assert_eq!(edges.size(), 1);

    // Replace re-validates the vertex attributes.
    let result = edges.replace(
        &json!({ "_key": "e", "_from": "v/1" }),
        &OperationOptions::default(),
    );
    assert!(matches!(result, Err(Error::InvalidEdgeAttribute)));
}

#[test]
fn edge_lookups_follow_updates_and_removals() {
    let dir = tempfile::tempdir().unwrap();
    let engine = engine(dir.path());
    let edges = engine
        .create_collection(CollectionConfig::new(0, "likes", CollectionType::Edge))
        .unwrap();

    for (key, from, to) in [("e1", "v/1", "v/2"), ("e2", "v/1", "v/3"), ("e3", "v/2", "v/3")] {
        edges
            .insert(
                &json!({ "_key": key, "_from": from, "_to": to }),
                &OperationOptions::default(),
            )
            .unwrap();
    }

    assert_eq!(edges.edges_from("v/1", vellumdb::LockPolicy::Lock).len(), 2);
    assert_eq!(edges.edges_to("v/3", vellumdb::LockPolicy::Lock).len(), 2);

    // Re-pointing an edge moves it between vertices.
    edges
        .replace(
            &json!({ "_key": "e2", "_from": "v/9", "_to": "v/3" }),
            &OperationOptions::default(),
        )
        .unwrap();
    assert_eq!(edges.edges_from("v/1", vellumdb::LockPolicy::Lock).len(), 1);
    assert_eq!(edges.edges_from("v/9", vellumdb::LockPolicy::Lock).len(), 1);

    edges
        .remove(&json!({ "_key": "e1" }), &OperationOptions::default())
        .unwrap();
    assert!(edges.edges_from("v/1", vellumdb::LockPolicy::Lock).is_empty());
}

#[test]
fn stale_revision_conflicts_and_leaves_state_unchanged() {
    let dir = tempfile::tempdir().unwrap();
    let engine = engine(dir.path());
    let people = document_collection(&engine, "people");

    let first = people
        .insert(&json!({ "_key": "a", "x": 1 }), &OperationOptions::default())
        .unwrap();
    let r0 = first.revision;

    // First update against r0 succeeds.
    people
        .update(
            &json!({ "_key": "a", "_rev": r0.to_string(), "x": 2 }),
            &OperationOptions::default(),
        )
        .unwrap();

    // Second update against the stale r0 conflicts.
    let result = people.update(
        &json!({ "_key": "a", "_rev": r0.to_string(), "x": 3 }),
        &OperationOptions::default(),
    );
    assert!(matches!(result, Err(Error::Conflict { .. })));

    let document = people.read("a", vellumdb::LockPolicy::Lock).unwrap();
    assert_eq!(document.value["x"], 2);

    // Numeric revision values are accepted too.
    let result = people.remove(
        &json!({ "_key": "a", "_rev": r0.value() }),
        &OperationOptions::default(),
    );
    assert!(matches!(result, Err(Error::Conflict { .. })));
    assert_eq!(people.size(), 1);
}

#[test]
fn update_merges_subobjects_with_keep_null_false() {
    let dir = tempfile::tempdir().unwrap();
    let engine = engine(dir.path());
    let people = document_collection(&engine, "people");

    people
        .insert(
            &json!({ "_key": "m", "o": { "a": 1, "b": 2 } }),
            &OperationOptions::default(),
        )
        .unwrap();

    people
        .update(
            &json!({ "_key": "m", "o": { "b": null, "c": 3 } }),
            &OperationOptions {
                merge_objects: true,
                keep_null: false,
                ..OperationOptions::default()
            },
        )
        .unwrap();

    let document = people.read("m", vellumdb::LockPolicy::Lock).unwrap();
    assert_eq!(document.value["o"], json!({ "a": 1, "c": 3 }));
}

#[test]
fn replace_discards_old_attributes() {
    let dir = tempfile::tempdir().unwrap();
    let engine = engine(dir.path());
    let people = document_collection(&engine, "people");

    people
        .insert(
            &json!({ "_key": "r", "a": 1, "b": 2 }),
            &OperationOptions::default(),
        )
        .unwrap();
    let result = people
        .replace(&json!({ "_key": "r", "z": 9 }), &OperationOptions::default())
        .unwrap();
    assert!(result.old_revision.is_some());

    let document = people.read("r", vellumdb::LockPolicy::Lock).unwrap();
    assert_eq!(document.value["z"], 9);
    assert!(document.value.get("a").is_none());
    assert_eq!(document.value["_id"], "people/r");
}

#[test]
fn remove_of_absent_key_is_not_found_and_changes_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let engine = engine(dir.path());
    let people = document_collection(&engine, "people");

    people
        .insert(&json!({ "_key": "a", "x": 1 }), &OperationOptions::default())
        .unwrap();
    let figures_before = people.figures();

    let result = people.remove(&json!({ "_key": "missing" }), &OperationOptions::default());
    assert!(matches!(result, Err(Error::NotFound)));

    let figures_after = people.figures();
    assert_eq!(figures_after.number_documents, 1);
    assert_eq!(figures_after.number_alive, figures_before.number_alive);
    assert_eq!(
        figures_after.number_deletions,
        figures_before.number_deletions
    );
}

#[test]
fn revisions_grow_monotonically_across_operations() {
    let dir = tempfile::tempdir().unwrap();
    let engine = engine(dir.path());
    let people = document_collection(&engine, "people");

    let mut last = 0u64;
    for i in 0..50 {
        let result = people
            .insert(
                &json!({ "_key": format!("k{i}"), "n": i }),
                &OperationOptions::default(),
            )
            .unwrap();
        assert!(result.revision.value() > last);
        last = result.revision.value();
    }

    let updated = people
        .update(&json!({ "_key": "k0", "n": -1 }), &OperationOptions::default())
        .unwrap();
    assert!(updated.revision.value() > last);
}

#[test]
fn duplicate_key_insert_is_rejected_atomically() {
    let dir = tempfile::tempdir().unwrap();
    let engine = engine(dir.path());
    let people = document_collection(&engine, "people");

    people
        .insert(&json!({ "_key": "a", "x": 1 }), &OperationOptions::default())
        .unwrap();
    let result = people.insert(&json!({ "_key": "a", "x": 2 }), &OperationOptions::default());
    assert!(matches!(result, Err(Error::UniqueConstraintViolated)));

    assert_eq!(people.size(), 1);
    let document = people.read("a", vellumdb::LockPolicy::Lock).unwrap();
    assert_eq!(document.value["x"], 1);
}

#[test]
fn wait_for_sync_insert_completes() {
    let dir = tempfile::tempdir().unwrap();
    let engine = engine(dir.path());
    let people = document_collection(&engine, "people");

    let result = people
        .insert(
            &json!({ "_key": "durable", "x": 1 }),
            &OperationOptions {
                wait_for_sync: true,
                ..OperationOptions::default()
            },
        )
        .unwrap();
    assert!(result.revision.value() > 0);
}

#[test]
fn non_object_payloads_are_bad_parameters() {
    let dir = tempfile::tempdir().unwrap();
    let engine = engine(dir.path());
    let people = document_collection(&engine, "people");

    assert!(matches!(
        people.insert(&json!([1, 2, 3]), &OperationOptions::default()),
        Err(Error::BadParameter(_))
    ));
    assert!(matches!(
        people.insert(&json!({ "_key": 5 }), &OperationOptions::default()),
        Err(Error::BadParameter(_))
    ));
}
