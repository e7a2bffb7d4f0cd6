//! Wire protocol messages.
//!
//! The protocol is a closed sum type: every frame decodes to exactly one
//! [`Payload`] variant, discriminated by a one-byte type code in binary
//! mode and by the `"type"` string in JSON mode. Every message carries an
//! id (unique within a connection's stream) and a wall-clock timestamp in
//! milliseconds; the timestamp is only ever an LWW input, monotonicity is
//! not required.

use docsync_crdt::VectorClock;
use docsync_types::{now_millis, ClientId, DocumentId, MessageId, UserId};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

use crate::auth::Permissions;

/// A complete wire message: envelope plus typed payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Unique within the sender's stream.
    pub id: MessageId,
    /// Sender wall time, milliseconds since the Unix epoch.
    #[serde(rename = "timestamp")]
    pub timestamp_ms: u64,
    /// The typed payload.
    #[serde(flatten)]
    pub payload: Payload,
}

impl Message {
    /// Creates a message with a fresh id and the current timestamp.
    #[must_use]
    pub fn new(payload: Payload) -> Self {
        Self {
            id: MessageId::generate(),
            timestamp_ms: now_millis(),
            payload,
        }
    }

    /// Creates a message with an explicit id and timestamp (for replay
    /// and tests).
    #[must_use]
    pub fn with_parts(id: MessageId, timestamp_ms: u64, payload: Payload) -> Self {
        Self {
            id,
            timestamp_ms,
            payload,
        }
    }

    /// A `Pong` answering the given `Ping`.
    #[must_use]
    pub fn pong() -> Self {
        Self::new(Payload::Pong)
    }

    /// An `Ack` for a client-submitted message.
    #[must_use]
    pub fn ack(message_id: MessageId) -> Self {
        Self::new(Payload::Ack(AckPayload { message_id }))
    }

    /// An `Error` frame with a stable code and optional detail text.
    #[must_use]
    pub fn error(code: impl Into<String>, details: Option<String>) -> Self {
        Self::new(Payload::Error(ErrorPayload {
            error: code.into(),
            details,
        }))
    }
}

/// The payload of a wire message.
///
/// JSON mode uses the variant name in SCREAMING_SNAKE_CASE as the
/// `"type"` discriminator; binary mode maps each variant to a one-byte
/// type code in the codec.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Payload {
    /// Client hello; latches the protocol mode.
    Connect(ConnectPayload),
    /// Authentication request carrying a token or an API key.
    Auth(AuthPayload),
    /// Successful authentication reply.
    AuthSuccess(AuthSuccessPayload),
    /// Failed authentication reply; the connection closes afterwards.
    AuthError(AuthErrorPayload),
    /// Subscribe to a document's durable state.
    Subscribe(SubscribePayload),
    /// Unsubscribe from a document.
    Unsubscribe(UnsubscribePayload),
    /// Request a snapshot plus catch-up deltas.
    SyncRequest(SyncRequestPayload),
    /// Snapshot reply to a `SyncRequest` or `Subscribe`.
    SyncResponse(SyncResponsePayload),
    /// One or more field writes to a document.
    Delta(DeltaPayload),
    /// Several deltas submitted or fanned out together.
    DeltaBatch(DeltaBatchPayload),
    /// One chunk of an oversized `DeltaBatch`.
    DeltaBatchChunk(DeltaBatchChunkPayload),
    /// Acknowledgement of a received `Delta`/`DeltaBatch`.
    Ack(AckPayload),
    /// Keepalive probe; answered with `Pong` inside the connection.
    Ping,
    /// Keepalive answer.
    Pong,
    /// Subscribe to a document's ephemeral presence.
    AwarenessSubscribe(AwarenessSubscribePayload),
    /// Presence update (or departure when `state` is null).
    AwarenessUpdate(AwarenessUpdatePayload),
    /// Presence snapshot reply to `AwarenessSubscribe`.
    AwarenessState(AwarenessStatePayload),
    /// Recoverable error with a stable code.
    Error(ErrorPayload),
}

impl Payload {
    /// The JSON-mode discriminator / variant name.
    #[must_use]
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Connect(_) => "CONNECT",
            Self::Auth(_) => "AUTH",
            Self::AuthSuccess(_) => "AUTH_SUCCESS",
            Self::AuthError(_) => "AUTH_ERROR",
            Self::Subscribe(_) => "SUBSCRIBE",
            Self::Unsubscribe(_) => "UNSUBSCRIBE",
            Self::SyncRequest(_) => "SYNC_REQUEST",
            Self::SyncResponse(_) => "SYNC_RESPONSE",
            Self::Delta(_) => "DELTA",
            Self::DeltaBatch(_) => "DELTA_BATCH",
            Self::DeltaBatchChunk(_) => "DELTA_BATCH_CHUNK",
            Self::Ack(_) => "ACK",
            Self::Ping => "PING",
            Self::Pong => "PONG",
            Self::AwarenessSubscribe(_) => "AWARENESS_SUBSCRIBE",
            Self::AwarenessUpdate(_) => "AWARENESS_UPDATE",
            Self::AwarenessState(_) => "AWARENESS_STATE",
            Self::Error(_) => "ERROR",
        }
    }
}

/// Client hello.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectPayload {
    /// The client's self-chosen writer id, if it already has one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<ClientId>,
}

/// Authentication request.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthPayload {
    /// Bearer token, verified by the consumed token predicate.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    /// API key alternative to a token.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
}

/// Successful authentication.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthSuccessPayload {
    /// The authenticated user.
    pub user_id: UserId,
    /// Document permissions granted to this connection.
    pub permissions: Permissions,
}

/// Failed authentication.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthErrorPayload {
    /// Human-readable failure reason.
    pub error: String,
}

/// Subscribe to a document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscribePayload {
    /// The document to subscribe to.
    pub document_id: DocumentId,
}

/// Unsubscribe from a document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnsubscribePayload {
    /// The document to unsubscribe from.
    pub document_id: DocumentId,
}

/// Request the authoritative state and catch-up deltas.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncRequestPayload {
    /// The document to sync.
    pub document_id: DocumentId,
    /// The client's last known clock; absent means "send everything".
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vector_clock: Option<VectorClock>,
}

/// Snapshot plus catch-up deltas.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncResponsePayload {
    /// Id of the request this responds to.
    pub request_id: MessageId,
    /// The document.
    pub document_id: DocumentId,
    /// The resolved state (tombstones excluded).
    pub state: serde_json::Map<String, Value>,
    /// Deltas the requester has not seen, in log order.
    pub deltas: Vec<WireDelta>,
    /// The document's current vector clock.
    pub clock: VectorClock,
    /// Opaque text-CRDT blob, when one is persisted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text_state: Option<Value>,
}

/// A logged delta as it travels in a `SyncResponse`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireDelta {
    /// Delta id.
    pub id: String,
    /// The writing client.
    pub client_id: ClientId,
    /// Sender wall time of the write.
    pub timestamp_ms: u64,
    /// Field → value map (tombstone sentinel for deletions).
    pub data: HashMap<String, Value>,
    /// Document clock immediately after this delta.
    pub clock: VectorClock,
}

/// One or more field writes.
///
/// Two client shapes are accepted: a `delta` map of several fields, or a
/// single `field`/`value` pair. [`DeltaPayload::fields`] normalizes both.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeltaPayload {
    /// The document to mutate.
    pub document_id: DocumentId,
    /// Multi-field form.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delta: Option<HashMap<String, Value>>,
    /// Single-field form: field name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
    /// Single-field form: value.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
    /// The sender's vector clock.
    #[serde(default)]
    pub clock: VectorClock,
    /// Set when the sender expects an `Ack` for this submission.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_id: Option<MessageId>,
}

impl DeltaPayload {
    /// Normalizes both accepted shapes into a field map. Empty when the
    /// message carried neither shape (rejected by validation upstream).
    #[must_use]
    pub fn fields(&self) -> HashMap<String, Value> {
        if let Some(delta) = &self.delta {
            return delta.clone();
        }
        match (&self.field, &self.value) {
            (Some(field), Some(value)) => {
                HashMap::from([(field.clone(), value.clone())])
            }
            _ => HashMap::new(),
        }
    }
}

/// Several deltas in one frame. Inbound from clients that batch locally,
/// outbound as the per-window fan-out (one entry per coalesced field).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeltaBatchPayload {
    /// The document all entries apply to.
    pub document_id: DocumentId,
    /// The batched field writes.
    pub deltas: Vec<DeltaPayload>,
    /// Set when the sender expects an `Ack` for this submission.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_id: Option<MessageId>,
}

/// One chunk of a `DeltaBatch` too large for a single frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeltaBatchChunkPayload {
    /// Groups the chunks of one logical batch.
    pub chunk_id: String,
    /// Total number of chunks in the stream.
    pub total_chunks: u32,
    /// Zero-based position of this chunk.
    pub chunk_index: u32,
    /// This chunk's slice of the serialized batch.
    pub data: String,
}

/// Acknowledgement of a delivered message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AckPayload {
    /// The id being acknowledged.
    pub message_id: MessageId,
}

/// Subscribe to a document's presence channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AwarenessSubscribePayload {
    /// The document whose presence to follow.
    pub document_id: DocumentId,
}

/// Presence update for one client. `state: null` signals departure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AwarenessUpdatePayload {
    /// The document.
    pub document_id: DocumentId,
    /// The client whose presence changed.
    pub client_id: ClientId,
    /// Presence state; `None`/null removes the entry.
    #[serde(default)]
    pub state: Option<Value>,
    /// The sender's vector clock.
    #[serde(default)]
    pub clock: VectorClock,
}

/// Presence snapshot for a document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AwarenessStatePayload {
    /// The document.
    pub document_id: DocumentId,
    /// All currently-present clients.
    pub states: Vec<AwarenessClientState>,
}

/// One client's entry in a presence snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AwarenessClientState {
    /// The present client.
    pub client_id: ClientId,
    /// Its last published state.
    pub state: Value,
    /// The clock attached to that state.
    pub clock: VectorClock,
}

/// Recoverable error with a stable code.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorPayload {
    /// Stable error code, e.g. `RATE_LIMIT_EXCEEDED`.
    pub error: String,
    /// Optional human-readable detail.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}
