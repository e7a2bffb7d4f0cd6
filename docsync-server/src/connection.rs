//! One live client connection.
//!
//! A connection owns its transport endpoint through two tasks in the
//! WebSocket handler: a reader loop and a single writer task fed by the
//! outbound channel (at most one frame in flight, per-connection FIFO).
//! This type is the shared bookkeeping between them: lifecycle state,
//! the latched protocol mode, auth identity, subscriptions, the chunk
//! reassembly buffers and heartbeat liveness.

use docsync_engine::codec::ProtocolMode;
use docsync_engine::protocol::{DeltaBatchChunkPayload, Message};
use docsync_engine::{EngineError, EngineResult, Permissions};
use docsync_types::{ClientId, ConnectionId, DocumentId, UserId};
use std::collections::{HashMap, HashSet};
use std::net::IpAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::{mpsc, RwLock};
use tokio::time::Instant;

/// Connection lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Transport accepted, no hello yet.
    Connecting,
    /// Hello received, waiting for credentials.
    Authenticating,
    /// Fully established.
    Authenticated,
    /// Close initiated, frames draining.
    Disconnecting,
    /// Gone; all structures released.
    Disconnected,
}

/// What the writer task sends next.
#[derive(Debug)]
pub enum OutboundFrame {
    /// An encoded protocol message.
    Message(Message),
    /// A transport-level keepalive probe.
    Ping,
    /// Close the endpoint with a code and reason, then stop.
    Close {
        /// WebSocket close code.
        code: u16,
        /// Human-readable reason.
        reason: String,
    },
}

struct ChunkBuffer {
    chunks: Vec<Option<String>>,
    received: u32,
    created_at: Instant,
}

#[derive(Default)]
struct ConnectionInner {
    user_id: Option<UserId>,
    client_id: Option<ClientId>,
    permissions: Option<Permissions>,
    protocol: Option<ProtocolMode>,
    subscriptions: HashSet<DocumentId>,
    chunk_buffers: HashMap<String, ChunkBuffer>,
}

/// Shared bookkeeping for one live connection.
pub struct Connection {
    id: ConnectionId,
    remote_ip: IpAddr,
    outbound: mpsc::UnboundedSender<OutboundFrame>,
    awaiting_pong: AtomicBool,
    state: RwLock<ConnectionState>,
    inner: RwLock<ConnectionInner>,
}

impl Connection {
    /// Creates a connection and the receiver its writer task consumes.
    #[must_use]
    pub fn new(remote_ip: IpAddr) -> (Self, mpsc::UnboundedReceiver<OutboundFrame>) {
        let (outbound, outbound_rx) = mpsc::unbounded_channel();
        let connection = Self {
            id: ConnectionId::new(),
            remote_ip,
            outbound,
            awaiting_pong: AtomicBool::new(false),
            state: RwLock::new(ConnectionState::Connecting),
            inner: RwLock::new(ConnectionInner::default()),
        };
        (connection, outbound_rx)
    }

    /// The server-assigned connection id.
    #[must_use]
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// The peer address the connection arrived from.
    #[must_use]
    pub fn remote_ip(&self) -> IpAddr {
        self.remote_ip
    }

    /// Queues a message for the writer task.
    pub fn send(&self, message: Message) -> EngineResult<()> {
        self.outbound
            .send(OutboundFrame::Message(message))
            .map_err(|_| EngineError::TransportClosed)
    }

    /// Queues an `Error` frame built from an engine error.
    pub fn send_error(&self, error: &EngineError) {
        let _ = self.send(Message::error(error.code(), Some(error.to_string())));
    }

    /// Queues a transport keepalive probe.
    pub fn send_ping(&self) -> EngineResult<()> {
        self.outbound
            .send(OutboundFrame::Ping)
            .map_err(|_| EngineError::TransportClosed)
    }

    /// Asks the writer task to close the endpoint.
    pub fn close(&self, code: u16, reason: impl Into<String>) {
        let _ = self.outbound.send(OutboundFrame::Close {
            code,
            reason: reason.into(),
        });
    }

    /// Current lifecycle state.
    pub async fn state(&self) -> ConnectionState {
        *self.state.read().await
    }

    /// Moves the connection to a new lifecycle state.
    pub async fn set_state(&self, state: ConnectionState) {
        *self.state.write().await = state;
    }

    /// True once authentication completed.
    pub async fn is_authenticated(&self) -> bool {
        *self.state.read().await == ConnectionState::Authenticated
    }

    /// Latches the protocol mode on first use; afterwards frames of the
    /// other mode are rejected.
    pub async fn latch_protocol(&self, mode: ProtocolMode) -> EngineResult<ProtocolMode> {
        let mut inner = self.inner.write().await;
        match inner.protocol {
            None => {
                inner.protocol = Some(mode);
                Ok(mode)
            }
            Some(latched) if latched == mode => Ok(mode),
            Some(_) => Err(EngineError::FrameMalformed(
                "frame mode does not match the latched protocol".into(),
            )),
        }
    }

    /// The latched mode, defaulting to JSON before the first frame.
    pub async fn protocol_mode(&self) -> ProtocolMode {
        self.inner
            .read()
            .await
            .protocol
            .unwrap_or(ProtocolMode::Json)
    }

    /// Records the identity produced by the token verifier.
    pub async fn set_authenticated(&self, user_id: UserId, permissions: Permissions) {
        {
            let mut inner = self.inner.write().await;
            inner.user_id = Some(user_id);
            inner.permissions = Some(permissions);
        }
        self.set_state(ConnectionState::Authenticated).await;
    }

    /// The authenticated user, if any.
    pub async fn user_id(&self) -> Option<UserId> {
        self.inner.read().await.user_id.clone()
    }

    /// The session permissions, if authenticated.
    pub async fn permissions(&self) -> Option<Permissions> {
        self.inner.read().await.permissions.clone()
    }

    /// Stores the client's writer id from its hello.
    pub async fn set_client_id(&self, client_id: ClientId) {
        self.inner.write().await.client_id = Some(client_id);
    }

    /// The declared writer id, if the client sent one.
    pub async fn client_id(&self) -> Option<ClientId> {
        self.inner.read().await.client_id.clone()
    }

    /// The writer id used for LWW attribution: the declared client id,
    /// or the connection id for clients that never declared one.
    pub async fn effective_client_id(&self) -> ClientId {
        self.inner
            .read()
            .await
            .client_id
            .clone()
            .unwrap_or_else(|| ClientId::new(self.id.to_string()))
    }

    /// Records a document subscription. Returns true if newly added.
    pub async fn add_subscription(&self, document_id: DocumentId) -> bool {
        self.inner.write().await.subscriptions.insert(document_id)
    }

    /// Drops a document subscription.
    pub async fn remove_subscription(&self, document_id: &DocumentId) -> bool {
        self.inner.write().await.subscriptions.remove(document_id)
    }

    /// Snapshot of the current subscriptions.
    pub async fn subscriptions(&self) -> Vec<DocumentId> {
        self.inner.read().await.subscriptions.iter().cloned().collect()
    }

    /// Takes the subscription set for close-time unregistration.
    pub async fn take_subscriptions(&self) -> Vec<DocumentId> {
        self.inner.write().await.subscriptions.drain().collect()
    }

    /// Adds one chunk to its stream. Returns the reassembled data once
    /// all chunks arrived. Partial streams older than `ttl` are dropped.
    pub async fn add_chunk(
        &self,
        chunk: &DeltaBatchChunkPayload,
        ttl: Duration,
    ) -> Option<String> {
        let now = Instant::now();
        let mut inner = self.inner.write().await;
        inner
            .chunk_buffers
            .retain(|_, buffer| now.duration_since(buffer.created_at) <= ttl);

        let total = chunk.total_chunks as usize;
        let buffer = inner
            .chunk_buffers
            .entry(chunk.chunk_id.clone())
            .or_insert_with(|| ChunkBuffer {
                chunks: vec![None; total],
                received: 0,
                created_at: now,
            });
        if buffer.chunks.len() != total {
            // Stream restarted with a different shape; start over.
            *buffer = ChunkBuffer {
                chunks: vec![None; total],
                received: 0,
                created_at: now,
            };
        }

        let index = chunk.chunk_index as usize;
        if index >= buffer.chunks.len() {
            return None;
        }
        if buffer.chunks[index].is_none() {
            buffer.chunks[index] = Some(chunk.data.clone());
            buffer.received += 1;
        }

        if buffer.received as usize == total {
            let assembled = inner
                .chunk_buffers
                .remove(&chunk.chunk_id)
                .map(|buffer| buffer.chunks.into_iter().flatten().collect::<String>());
            return assembled;
        }
        None
    }

    /// Number of partial chunk streams held right now.
    pub async fn pending_chunk_streams(&self) -> usize {
        self.inner.read().await.chunk_buffers.len()
    }

    /// Marks a heartbeat probe sent. Returns false when the previous
    /// probe was never answered; the endpoint should be terminated.
    pub fn begin_ping(&self) -> bool {
        !self.awaiting_pong.swap(true, Ordering::SeqCst)
    }

    /// Records a heartbeat reply.
    pub fn pong_received(&self) {
        self.awaiting_pong.store(false, Ordering::SeqCst);
    }

    /// Releases per-connection structures at close.
    pub async fn release(&self) {
        self.set_state(ConnectionState::Disconnected).await;
        let mut inner = self.inner.write().await;
        inner.chunk_buffers.clear();
        inner.subscriptions.clear();
    }
}
