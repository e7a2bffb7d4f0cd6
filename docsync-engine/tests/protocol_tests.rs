//! Message model tests: wire shapes and payload normalization.

use docsync_crdt::VectorClock;
use docsync_engine::protocol::{
    AwarenessUpdatePayload, DeltaPayload, Message, Payload, SyncRequestPayload,
};
use docsync_engine::Permissions;
use docsync_types::{ClientId, DocumentId, MessageId};
use pretty_assertions::assert_eq;
use serde_json::json;

// ── Wire field names ─────────────────────────────────────────────

#[test]
fn payload_fields_are_camel_case() {
    let message = Message::with_parts(
        MessageId::new("m1"),
        9,
        Payload::SyncRequest(SyncRequestPayload {
            document_id: DocumentId::new("d1"),
            vector_clock: Some(
                [(ClientId::new("a"), 3u64)].into_iter().collect(),
            ),
        }),
    );

    let value = serde_json::to_value(&message).unwrap();
    assert_eq!(value["type"], "SYNC_REQUEST");
    assert_eq!(value["documentId"], "d1");
    assert_eq!(value["vectorClock"]["a"], 3);
}

#[test]
fn absent_options_are_omitted() {
    let message = Message::with_parts(
        MessageId::new("m1"),
        9,
        Payload::SyncRequest(SyncRequestPayload {
            document_id: DocumentId::new("d1"),
            vector_clock: None,
        }),
    );

    let value = serde_json::to_value(&message).unwrap();
    assert!(value.get("vectorClock").is_none());
}

#[test]
fn client_json_without_optional_fields_parses() {
    let message: Message = serde_json::from_str(
        r#"{"type":"SUBSCRIBE","id":"m1","timestamp":1000,"documentId":"playground-1"}"#,
    )
    .unwrap();
    match message.payload {
        Payload::Subscribe(subscribe) => {
            assert_eq!(subscribe.document_id, DocumentId::new("playground-1"));
        }
        other => panic!("expected Subscribe, got {other:?}"),
    }
}

#[test]
fn variant_names_match_the_discriminators() {
    assert_eq!(Payload::Ping.type_name(), "PING");
    let delta = Payload::Delta(DeltaPayload {
        document_id: DocumentId::new("d"),
        delta: None,
        field: None,
        value: None,
        clock: VectorClock::new(),
        message_id: None,
    });
    assert_eq!(delta.type_name(), "DELTA");
}

// ── Delta normalization ──────────────────────────────────────────

#[test]
fn delta_map_form_normalizes() {
    let delta = DeltaPayload {
        document_id: DocumentId::new("d"),
        delta: Some(
            [("a".to_string(), json!(1)), ("b".to_string(), json!(2))]
                .into_iter()
                .collect(),
        ),
        field: None,
        value: None,
        clock: VectorClock::new(),
        message_id: None,
    };
    let fields = delta.fields();
    assert_eq!(fields.len(), 2);
    assert_eq!(fields.get("a"), Some(&json!(1)));
}

#[test]
fn delta_single_field_form_normalizes() {
    let delta = DeltaPayload {
        document_id: DocumentId::new("d"),
        delta: None,
        field: Some("title".into()),
        value: Some(json!("x")),
        clock: VectorClock::new(),
        message_id: None,
    };
    let fields = delta.fields();
    assert_eq!(fields.len(), 1);
    assert_eq!(fields.get("title"), Some(&json!("x")));
}

#[test]
fn delta_with_neither_form_is_empty() {
    let delta = DeltaPayload {
        document_id: DocumentId::new("d"),
        delta: None,
        field: Some("title".into()),
        value: None,
        clock: VectorClock::new(),
        message_id: None,
    };
    assert!(delta.fields().is_empty());
}

// ── Awareness departure shape ────────────────────────────────────

#[test]
fn awareness_null_state_roundtrips() {
    let message = Message::with_parts(
        MessageId::new("m1"),
        1,
        Payload::AwarenessUpdate(AwarenessUpdatePayload {
            document_id: DocumentId::new("d"),
            client_id: ClientId::new("c"),
            state: None,
            clock: VectorClock::new(),
        }),
    );

    let text = serde_json::to_string(&message).unwrap();
    let back: Message = serde_json::from_str(&text).unwrap();
    match back.payload {
        Payload::AwarenessUpdate(update) => assert!(update.state.is_none()),
        other => panic!("expected AwarenessUpdate, got {other:?}"),
    }
}

// ── Permission predicates ────────────────────────────────────────

#[test]
fn permissions_match_by_prefix() {
    let permissions = Permissions {
        read: vec!["room:".into(), "playground".into()],
        write: vec!["room:team-".into()],
    };

    assert!(permissions.can_read(&DocumentId::new("room:alpha")));
    assert!(permissions.can_read(&DocumentId::new("playground-7")));
    assert!(!permissions.can_read(&DocumentId::new("secret:x")));

    assert!(permissions.can_write(&DocumentId::new("room:team-alpha")));
    assert!(!permissions.can_write(&DocumentId::new("room:alpha")));
}

#[test]
fn wildcard_permission_matches_everything() {
    let permissions = Permissions::all();
    assert!(permissions.can_read(&DocumentId::new("anything")));
    assert!(permissions.can_write(&DocumentId::new("anything")));
}

// ── Constructors ─────────────────────────────────────────────────

#[test]
fn helper_constructors_fill_the_envelope() {
    let ack = Message::ack(MessageId::new("orig"));
    match &ack.payload {
        Payload::Ack(payload) => assert_eq!(payload.message_id, MessageId::new("orig")),
        other => panic!("expected Ack, got {other:?}"),
    }
    assert!(!ack.id.as_str().is_empty());
    assert!(ack.timestamp_ms > 0);

    let error = Message::error("RATE_LIMIT_EXCEEDED", Some("slow down".into()));
    match &error.payload {
        Payload::Error(payload) => {
            assert_eq!(payload.error, "RATE_LIMIT_EXCEEDED");
            assert_eq!(payload.details.as_deref(), Some("slow down"));
        }
        other => panic!("expected Error, got {other:?}"),
    }
}
