use docsync_types::{now_millis, ClientId, ConnectionId, DocumentId, MessageId};
use std::str::FromStr;

#[test]
fn connection_ids_are_unique() {
    let a = ConnectionId::new();
    let b = ConnectionId::new();
    assert_ne!(a, b);
}

#[test]
fn connection_id_roundtrips_through_display() {
    let id = ConnectionId::new();
    let parsed = ConnectionId::from_str(&id.to_string()).unwrap();
    assert_eq!(id, parsed);
}

#[test]
fn connection_ids_are_time_ordered() {
    // UUID v7 embeds the timestamp, so ids minted later sort later.
    let earlier = ConnectionId::new();
    std::thread::sleep(std::time::Duration::from_millis(2));
    let later = ConnectionId::new();
    assert!(earlier < later);
}

#[test]
fn string_ids_wrap_and_compare() {
    let a = ClientId::new("client-a");
    let b = ClientId::from("client-b");
    assert_eq!(a.as_str(), "client-a");
    assert!(a < b);
}

#[test]
fn document_id_serializes_transparently() {
    let id = DocumentId::new("room:alpha");
    let json = serde_json::to_string(&id).unwrap();
    assert_eq!(json, "\"room:alpha\"");
    let back: DocumentId = serde_json::from_str(&json).unwrap();
    assert_eq!(back, id);
}

#[test]
fn generated_message_ids_are_unique() {
    let a = MessageId::generate();
    let b = MessageId::generate();
    assert_ne!(a, b);
    assert!(!a.as_str().is_empty());
}

#[test]
fn now_millis_is_monotone_enough() {
    let a = now_millis();
    let b = now_millis();
    assert!(b >= a);
    // Sanity: we are well past 2020.
    assert!(a > 1_577_836_800_000);
}
