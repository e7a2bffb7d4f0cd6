use docsync_crdt::VectorClock;
use docsync_storage::{DeltaRecord, DocumentStore, MemoryStore, OperationType};
use docsync_types::{ClientId, DocumentId};
use pretty_assertions::assert_eq;
use serde_json::json;

fn record(doc: &DocumentId, field: &str, value: serde_json::Value, op: OperationType) -> DeltaRecord {
    let client = ClientId::new("client-a");
    let mut clock = VectorClock::new();
    clock.increment(&client);
    DeltaRecord {
        id: format!("delta-{field}"),
        document_id: doc.clone(),
        client_id: client,
        operation_type: op,
        field_path: field.to_string(),
        value,
        clock_value: 1,
        timestamp: 1000,
        vector_clock: clock,
    }
}

#[tokio::test]
async fn empty_store_has_no_state() {
    let store = MemoryStore::new();
    let doc = DocumentId::new("d1");
    assert!(store.get_document_state(&doc).await.unwrap().is_none());
    assert!(store.get_vector_clock(&doc).await.unwrap().is_none());
    assert!(store.get_text_document(&doc).await.unwrap().is_none());
}

#[tokio::test]
async fn save_delta_materializes_state() {
    let store = MemoryStore::new();
    let doc = DocumentId::new("d1");

    store
        .save_delta(record(&doc, "title", json!("hello"), OperationType::Set))
        .await
        .unwrap();

    let state = store.get_document_state(&doc).await.unwrap().unwrap();
    assert_eq!(state.get("title"), Some(&json!("hello")));
    assert_eq!(store.delta_count(&doc).await, 1);

    let clock = store.get_vector_clock(&doc).await.unwrap().unwrap();
    assert_eq!(clock.get(&ClientId::new("client-a")), 1);
}

#[tokio::test]
async fn delete_removes_from_materialized_state() {
    let store = MemoryStore::new();
    let doc = DocumentId::new("d1");

    store
        .save_delta(record(&doc, "title", json!("hello"), OperationType::Set))
        .await
        .unwrap();
    store
        .save_delta(record(&doc, "title", json!(null), OperationType::Delete))
        .await
        .unwrap();

    // Both rows stay in the log; only the materialized view drops the field.
    assert_eq!(store.delta_count(&doc).await, 2);
    assert!(store.get_document_state(&doc).await.unwrap().is_none());
}

#[tokio::test]
async fn text_document_roundtrip_merges_clocks() {
    let store = MemoryStore::new();
    let doc = DocumentId::new("d1");
    let client_a = ClientId::new("a");
    let client_b = ClientId::new("b");

    let mut clock_a = VectorClock::new();
    clock_a.increment(&client_a);
    store
        .save_text_document(&doc, "v1".into(), json!({"ops": 1}), clock_a)
        .await
        .unwrap();

    let mut clock_b = VectorClock::new();
    clock_b.increment(&client_b);
    let stored = store
        .save_text_document(&doc, "v2".into(), json!({"ops": 2}), clock_b)
        .await
        .unwrap();

    // The echoed blob carries the merged clock from both saves.
    assert_eq!(stored.content, "v2");
    assert_eq!(stored.clock.get(&client_a), 1);
    assert_eq!(stored.clock.get(&client_b), 1);

    let loaded = store.get_text_document(&doc).await.unwrap().unwrap();
    assert_eq!(loaded, stored);
}

#[tokio::test]
async fn snapshot_overwrites_materialized_state() {
    let store = MemoryStore::new();
    let doc = DocumentId::new("d1");

    store
        .save_delta(record(&doc, "old", json!(1), OperationType::Set))
        .await
        .unwrap();
    store
        .save_snapshot(
            &doc,
            [("new".to_string(), json!(2))].into_iter().collect(),
            VectorClock::new(),
        )
        .await
        .unwrap();

    let state = store.get_document_state(&doc).await.unwrap().unwrap();
    assert!(!state.contains_key("old"));
    assert_eq!(state.get("new"), Some(&json!(2)));
}

#[tokio::test]
async fn documents_are_isolated() {
    let store = MemoryStore::new();
    let d1 = DocumentId::new("d1");
    let d2 = DocumentId::new("d2");

    store
        .save_delta(record(&d1, "title", json!("one"), OperationType::Set))
        .await
        .unwrap();

    assert!(store.get_document_state(&d2).await.unwrap().is_none());
    assert_eq!(store.delta_count(&d2).await, 0);
}
