//! Document state-machine tests: LWW apply, clock motion, catch-up.

use docsync_crdt::VectorClock;
use docsync_engine::Document;
use docsync_types::{ClientId, ConnectionId, DocumentId};
use pretty_assertions::assert_eq;
use serde_json::json;
use std::collections::HashMap;

fn doc() -> Document {
    Document::new(DocumentId::new("d1"))
}

fn fields(entries: &[(&str, serde_json::Value)]) -> HashMap<String, serde_json::Value> {
    entries
        .iter()
        .map(|(k, v)| (k.to_string(), v.clone()))
        .collect()
}

fn clock_of(entries: &[(&str, u64)]) -> VectorClock {
    entries
        .iter()
        .map(|(k, v)| (ClientId::new(*k), *v))
        .collect()
}

// ── Apply ────────────────────────────────────────────────────────

#[tokio::test]
async fn apply_installs_fields_and_bumps_clock() {
    let document = doc();
    let result = document
        .apply_delta(
            &ClientId::new("a"),
            fields(&[("title", json!("hello"))]),
            &VectorClock::new(),
            1000,
            "delta-1".into(),
        )
        .await;

    assert_eq!(result.counter, 1);
    assert_eq!(result.clock.get(&ClientId::new("a")), 1);
    assert_eq!(result.authoritative.get("title"), Some(&Some(json!("hello"))));
    assert_eq!(result.changed, vec!["title".to_string()]);

    let state = document.build_state().await;
    assert_eq!(state.get("title"), Some(&json!("hello")));
    assert_eq!(document.delta_count().await, 1);
}

#[tokio::test]
async fn counter_ignores_the_senders_self_declared_entry() {
    let document = doc();
    // The client claims a=4 for itself; the first accepted write on a
    // fresh document still gets counter 1, so a sender cannot raise its
    // own LWW priority through the submitted clock.
    let result = document
        .apply_delta(
            &ClientId::new("a"),
            fields(&[("x", json!(1))]),
            &clock_of(&[("a", 4), ("b", 2)]),
            1000,
            "delta-1".into(),
        )
        .await;

    assert_eq!(result.counter, 1);
    // The incoming clock still merges into the document clock afterwards.
    assert_eq!(result.clock.get(&ClientId::new("b")), 2);

    // The logged delta carries the pre-merge clock with the assigned
    // counter, not the client's claim.
    let logged = document.deltas_since(None).await;
    assert_eq!(logged[0].clock.get(&ClientId::new("a")), 1);
    assert_eq!(logged[0].clock.get(&ClientId::new("b")), 0);
}

#[tokio::test]
async fn inflated_self_clock_does_not_win_the_tiebreak() {
    let document = doc();
    // Writer "b" would win a fair tiebreak at equal stamps. Writer "a"
    // tries to outrank it by self-declaring a large counter.
    document
        .apply_delta(
            &ClientId::new("b"),
            fields(&[("title", json!("honest"))]),
            &VectorClock::new(),
            1000,
            "d-honest".into(),
        )
        .await;
    document
        .apply_delta(
            &ClientId::new("a"),
            fields(&[("title", json!("inflated"))]),
            &clock_of(&[("a", 99)]),
            1000,
            "d-inflated".into(),
        )
        .await;

    let state = document.build_state().await;
    assert_eq!(state.get("title"), Some(&json!("honest")));
}

#[tokio::test]
async fn clock_components_never_decrease() {
    let document = doc();
    document
        .apply_delta(
            &ClientId::new("a"),
            fields(&[("x", json!(1))]),
            &clock_of(&[("b", 9)]),
            1000,
            "d1".into(),
        )
        .await;
    let before = document.clock().await;

    document
        .apply_delta(
            &ClientId::new("a"),
            fields(&[("x", json!(2))]),
            &clock_of(&[("b", 1)]),
            1001,
            "d2".into(),
        )
        .await;
    let after = document.clock().await;

    for (client, counter) in before.entries() {
        assert!(after.get(client) >= *counter);
    }
}

// ── Concurrent writers (same field) ──────────────────────────────

#[tokio::test]
async fn concurrent_same_field_resolves_by_client_id() {
    let document = doc();

    // Both writers at the same wall time; counters end up equal too.
    document
        .apply_delta(
            &ClientId::new("A"),
            fields(&[("title", json!("A"))]),
            &clock_of(&[("A", 1)]),
            1000,
            "dA".into(),
        )
        .await;
    let result_b = document
        .apply_delta(
            &ClientId::new("B"),
            fields(&[("title", json!("B"))]),
            &clock_of(&[("B", 1)]),
            1000,
            "dB".into(),
        )
        .await;

    assert_eq!(result_b.authoritative.get("title"), Some(&Some(json!("B"))));
    let state = document.build_state().await;
    assert_eq!(state.get("title"), Some(&json!("B")));
    assert_eq!(document.delta_count().await, 2);
}

#[tokio::test]
async fn losing_write_reports_the_winner() {
    let document = doc();
    document
        .apply_delta(
            &ClientId::new("a"),
            fields(&[("title", json!("newer"))]),
            &VectorClock::new(),
            2000,
            "d1".into(),
        )
        .await;

    // A stale write arrives afterwards with an older wall time.
    let result = document
        .apply_delta(
            &ClientId::new("b"),
            fields(&[("title", json!("stale"))]),
            &VectorClock::new(),
            1000,
            "d2".into(),
        )
        .await;

    assert!(result.changed.is_empty());
    assert_eq!(
        result.authoritative.get("title"),
        Some(&Some(json!("newer")))
    );
}

// ── Delete/set concurrency ───────────────────────────────────────

#[tokio::test]
async fn later_set_beats_earlier_delete() {
    let document = doc();
    document
        .apply_delta(
            &ClientId::new("seed"),
            fields(&[("x", json!(1))]),
            &VectorClock::new(),
            1000,
            "d0".into(),
        )
        .await;
    document
        .apply_delta(
            &ClientId::new("A"),
            fields(&[("x", json!({"__deleted": true}))]),
            &VectorClock::new(),
            2000,
            "d1".into(),
        )
        .await;
    document
        .apply_delta(
            &ClientId::new("B"),
            fields(&[("x", json!(2))]),
            &VectorClock::new(),
            2001,
            "d2".into(),
        )
        .await;

    let state = document.build_state().await;
    assert_eq!(state.get("x"), Some(&json!(2)));
    assert_eq!(document.delta_count().await, 3);
}

#[tokio::test]
async fn winning_delete_hides_the_field() {
    let document = doc();
    document
        .apply_delta(
            &ClientId::new("a"),
            fields(&[("x", json!(1))]),
            &VectorClock::new(),
            1000,
            "d0".into(),
        )
        .await;
    let result = document
        .apply_delta(
            &ClientId::new("a"),
            fields(&[("x", json!({"__deleted": true}))]),
            &VectorClock::new(),
            2000,
            "d1".into(),
        )
        .await;

    assert_eq!(result.authoritative.get("x"), Some(&None));
    assert!(document.build_state().await.get("x").is_none());
}

// ── Catch-up queries ─────────────────────────────────────────────

#[tokio::test]
async fn deltas_since_none_returns_everything() {
    let document = doc();
    for i in 0..3 {
        document
            .apply_delta(
                &ClientId::new("a"),
                fields(&[("x", json!(i))]),
                &VectorClock::new(),
                1000 + i,
                format!("d{i}"),
            )
            .await;
    }
    assert_eq!(document.deltas_since(None).await.len(), 3);
}

#[tokio::test]
async fn deltas_since_excludes_already_seen() {
    let document = doc();
    let client_a = ClientId::new("A");
    let client_b = ClientId::new("B");

    for i in 0..3 {
        document
            .apply_delta(
                &client_a,
                fields(&[("x", json!(i))]),
                &VectorClock::new(),
                1000 + i,
                format!("a{i}"),
            )
            .await;
    }
    // The reconnecting client saw all of A's writes so far.
    let seen = document.clock().await;

    for i in 0..2 {
        document
            .apply_delta(
                &client_b,
                fields(&[("y", json!(i))]),
                &VectorClock::new(),
                2000 + i,
                format!("b{i}"),
            )
            .await;
    }

    let missed = document.deltas_since(Some(&seen)).await;
    assert_eq!(missed.len(), 2);
    assert!(missed.iter().all(|delta| delta.client_id == client_b));
}

#[tokio::test]
async fn snapshot_is_consistent() {
    let document = doc();
    document
        .apply_delta(
            &ClientId::new("a"),
            fields(&[("title", json!("t"))]),
            &VectorClock::new(),
            1000,
            "d1".into(),
        )
        .await;

    let snapshot = document.snapshot(None).await;
    assert_eq!(snapshot.state.get("title"), Some(&json!("t")));
    assert_eq!(snapshot.deltas.len(), 1);
    assert_eq!(snapshot.clock, document.clock().await);
}

// ── Subscribers ──────────────────────────────────────────────────

#[tokio::test]
async fn subscribe_is_idempotent() {
    let document = doc();
    let conn = ConnectionId::new();

    assert!(document.subscribe(conn).await);
    assert!(!document.subscribe(conn).await);
    assert_eq!(document.subscriber_count().await, 1);

    assert!(document.unsubscribe(&conn).await);
    assert!(!document.unsubscribe(&conn).await);
    assert_eq!(document.subscriber_count().await, 0);
}

// ── Preload ──────────────────────────────────────────────────────

#[tokio::test]
async fn preloaded_state_is_visible_and_overwritable() {
    let document = doc();
    document
        .preload(
            [("title".to_string(), json!("persisted"))].into_iter().collect(),
            Some(clock_of(&[("old-client", 7)])),
        )
        .await;

    assert_eq!(
        document.build_state().await.get("title"),
        Some(&json!("persisted"))
    );
    assert_eq!(document.clock().await.get(&ClientId::new("old-client")), 7);

    // Any live write beats the zero-stamped baseline.
    document
        .apply_delta(
            &ClientId::new("a"),
            fields(&[("title", json!("live"))]),
            &VectorClock::new(),
            1,
            "d1".into(),
        )
        .await;
    assert_eq!(document.build_state().await.get("title"), Some(&json!("live")));
}
