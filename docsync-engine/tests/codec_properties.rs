//! Property-based codec tests.
//!
//! `decode(encode(m)) == m` must hold for every well-formed message in
//! both framing modes, and the binary header must always agree with the
//! payload it frames.

use docsync_crdt::VectorClock;
use docsync_engine::codec::{
    decode_binary, decode_json, encode_binary, encode_json, type_code, HEADER_LEN,
};
use docsync_engine::protocol::{
    AckPayload, AuthErrorPayload, AuthPayload, AwarenessStatePayload, AwarenessSubscribePayload,
    AwarenessUpdatePayload, ConnectPayload, DeltaBatchChunkPayload, DeltaBatchPayload,
    DeltaPayload, ErrorPayload, Message, Payload, SubscribePayload, SyncRequestPayload,
    UnsubscribePayload,
};
use docsync_types::{ClientId, DocumentId, MessageId};
use proptest::prelude::*;
use serde_json::{json, Value};

// ── Strategies ───────────────────────────────────────────────────

fn document_id_strategy() -> impl Strategy<Value = DocumentId> {
    prop::string::string_regex("[a-zA-Z0-9._:-]{1,32}")
        .unwrap()
        .prop_map(DocumentId::new)
}

fn client_id_strategy() -> impl Strategy<Value = ClientId> {
    prop::string::string_regex("[a-z0-9-]{1,16}")
        .unwrap()
        .prop_map(ClientId::new)
}

fn message_id_strategy() -> impl Strategy<Value = MessageId> {
    prop::string::string_regex("[a-f0-9-]{1,36}")
        .unwrap()
        .prop_map(MessageId::new)
}

fn clock_strategy() -> impl Strategy<Value = VectorClock> {
    prop::collection::vec((client_id_strategy(), 1u64..1000), 0..4)
        .prop_map(|entries| entries.into_iter().collect())
}

/// Arbitrary JSON values, minus null: `null` means "absent" for the
/// optional fields these land in, so it would not survive a round trip.
fn value_strategy() -> impl Strategy<Value = Value> {
    prop_oneof![
        any::<bool>().prop_map(Value::from),
        any::<i32>().prop_map(Value::from),
        prop::string::string_regex("[a-zA-Z0-9 ]{0,24}")
            .unwrap()
            .prop_map(Value::from),
        prop::collection::vec(any::<i32>(), 0..4)
            .prop_map(|items| json!(items)),
    ]
}

fn delta_payload_strategy() -> impl Strategy<Value = DeltaPayload> {
    (
        document_id_strategy(),
        prop::collection::hash_map(
            prop::string::string_regex("[a-z_]{1,12}").unwrap(),
            value_strategy(),
            1..4,
        ),
        clock_strategy(),
        prop::option::of(message_id_strategy()),
    )
        .prop_map(|(document_id, delta, clock, message_id)| DeltaPayload {
            document_id,
            delta: Some(delta),
            field: None,
            value: None,
            clock,
            message_id,
        })
}

fn payload_strategy() -> impl Strategy<Value = Payload> {
    let arms: Vec<BoxedStrategy<Payload>> = vec![
        Just(Payload::Ping).boxed(),
        Just(Payload::Pong).boxed(),
        prop::option::of(client_id_strategy())
            .prop_map(|client_id| Payload::Connect(ConnectPayload { client_id }))
            .boxed(),
        prop::string::string_regex("[a-zA-Z0-9]{4,24}")
            .unwrap()
            .prop_map(|token| {
                Payload::Auth(AuthPayload {
                    token: Some(token),
                    api_key: None,
                })
            })
            .boxed(),
        prop::string::string_regex("[a-z ]{1,24}")
            .unwrap()
            .prop_map(|error| Payload::AuthError(AuthErrorPayload { error }))
            .boxed(),
        document_id_strategy()
            .prop_map(|document_id| Payload::Subscribe(SubscribePayload { document_id }))
            .boxed(),
        document_id_strategy()
            .prop_map(|document_id| Payload::Unsubscribe(UnsubscribePayload { document_id }))
            .boxed(),
        (document_id_strategy(), prop::option::of(clock_strategy()))
            .prop_map(|(document_id, vector_clock)| {
                Payload::SyncRequest(SyncRequestPayload {
                    document_id,
                    vector_clock,
                })
            })
            .boxed(),
        delta_payload_strategy().prop_map(Payload::Delta).boxed(),
        (
            document_id_strategy(),
            prop::collection::vec(delta_payload_strategy(), 1..3),
        )
            .prop_map(|(document_id, deltas)| {
                Payload::DeltaBatch(DeltaBatchPayload {
                    document_id,
                    deltas,
                    message_id: None,
                })
            })
            .boxed(),
        (
            prop::string::string_regex("[a-f0-9]{8}").unwrap(),
            1u32..5,
            prop::string::string_regex("[a-zA-Z0-9{}:,\"]{0,48}").unwrap(),
        )
            .prop_flat_map(|(chunk_id, total_chunks, data)| {
                (0..total_chunks).prop_map(move |chunk_index| {
                    Payload::DeltaBatchChunk(DeltaBatchChunkPayload {
                        chunk_id: chunk_id.clone(),
                        total_chunks,
                        chunk_index,
                        data: data.clone(),
                    })
                })
            })
            .boxed(),
        message_id_strategy()
            .prop_map(|message_id| Payload::Ack(AckPayload { message_id }))
            .boxed(),
        document_id_strategy()
            .prop_map(|document_id| {
                Payload::AwarenessSubscribe(AwarenessSubscribePayload { document_id })
            })
            .boxed(),
        (
            document_id_strategy(),
            client_id_strategy(),
            prop::option::of(value_strategy()),
            clock_strategy(),
        )
            .prop_map(|(document_id, client_id, state, clock)| {
                Payload::AwarenessUpdate(AwarenessUpdatePayload {
                    document_id,
                    client_id,
                    state,
                    clock,
                })
            })
            .boxed(),
        document_id_strategy()
            .prop_map(|document_id| {
                Payload::AwarenessState(AwarenessStatePayload {
                    document_id,
                    states: Vec::new(),
                })
            })
            .boxed(),
        (
            prop::string::string_regex("[A-Z_]{4,24}").unwrap(),
            prop::option::of(prop::string::string_regex("[a-z ]{0,32}").unwrap()),
        )
            .prop_map(|(error, details)| Payload::Error(ErrorPayload { error, details }))
            .boxed(),
    ];
    proptest::strategy::Union::new(arms)
}

fn message_strategy() -> impl Strategy<Value = Message> {
    (message_id_strategy(), 0u64..=u64::from(u32::MAX), payload_strategy())
        .prop_map(|(id, timestamp_ms, payload)| Message::with_parts(id, timestamp_ms, payload))
}

// ── Round-trip properties ────────────────────────────────────────

proptest! {
    #[test]
    fn binary_roundtrip(message in message_strategy()) {
        let frame = encode_binary(&message).unwrap();
        let decoded = decode_binary(&frame).unwrap();
        prop_assert_eq!(decoded, message);
    }

    #[test]
    fn json_roundtrip(message in message_strategy()) {
        let text = encode_json(&message).unwrap();
        let decoded = decode_json(&text).unwrap();
        prop_assert_eq!(decoded, message);
    }

    /// The header always carries the payload's own type code, timestamp
    /// and exact length.
    #[test]
    fn binary_header_agrees_with_the_payload(message in message_strategy()) {
        let frame = encode_binary(&message).unwrap();

        prop_assert_eq!(frame[0], type_code(&message.payload));

        let mut ts = [0u8; 8];
        ts.copy_from_slice(&frame[1..9]);
        prop_assert_eq!(u64::from_be_bytes(ts), message.timestamp_ms);

        let mut len = [0u8; 4];
        len.copy_from_slice(&frame[9..13]);
        prop_assert_eq!(u32::from_be_bytes(len) as usize, frame.len() - HEADER_LEN);
    }

    /// Truncating the payload always fails the length check.
    #[test]
    fn truncated_frames_never_decode(message in message_strategy(), cut in 1usize..8) {
        let frame = encode_binary(&message).unwrap();
        let keep = frame.len().saturating_sub(cut).max(HEADER_LEN);
        prop_assert!(decode_binary(&frame[..keep]).is_err());
    }
}
