//! Delivery tracking for fan-out messages.
//!
//! Every fan-out expecting acknowledgement registers here, keyed by
//! `(connection, message id)`. A per-entry timer drives the retry loop:
//! unanswered entries are re-sent through the orchestrator until the
//! retry budget runs out, then dropped silently. Entries for a closed
//! connection are purged wholesale.

use crate::protocol::Message;
use docsync_types::{ConnectionId, DocumentId, MessageId};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::debug;

/// Retry/drop decisions emitted to the orchestrator, which owns all
/// transport I/O.
#[derive(Debug)]
pub enum AckEvent {
    /// Re-send the message to the connection and keep waiting.
    Retry {
        /// Target connection.
        connection_id: ConnectionId,
        /// The message to re-send.
        message: Message,
    },
    /// Retry budget exhausted; the entry was removed.
    Dropped {
        /// Target connection.
        connection_id: ConnectionId,
        /// The unacknowledged message id.
        message_id: MessageId,
        /// Document the message belonged to.
        document_id: DocumentId,
    },
}

struct PendingEntry {
    message: Message,
    document_id: DocumentId,
    attempts: u32,
    timer: JoinHandle<()>,
}

/// Tracker metrics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AckMetrics {
    /// Entries currently awaiting acknowledgement.
    pub pending: usize,
    /// Distinct connections with pending entries.
    pub connections: usize,
    /// Distinct documents with pending entries.
    pub documents: usize,
}

/// Tracks outbound messages awaiting acknowledgement.
pub struct AckTracker {
    timeout: Duration,
    max_retries: u32,
    pending: Mutex<HashMap<(ConnectionId, MessageId), PendingEntry>>,
    event_tx: mpsc::UnboundedSender<AckEvent>,
}

impl AckTracker {
    /// Creates a tracker emitting retry/drop events into `event_tx`.
    #[must_use]
    pub fn new(
        timeout: Duration,
        max_retries: u32,
        event_tx: mpsc::UnboundedSender<AckEvent>,
    ) -> Self {
        Self {
            timeout,
            max_retries,
            pending: Mutex::new(HashMap::new()),
            event_tx,
        }
    }

    /// Registers a just-sent message and arms its retry timer.
    pub async fn track(
        self: &Arc<Self>,
        connection_id: ConnectionId,
        document_id: DocumentId,
        message: Message,
    ) {
        let key = (connection_id, message.id.clone());
        let timer = self.spawn_timer(key.clone());
        let entry = PendingEntry {
            message,
            document_id,
            attempts: 1,
            timer,
        };
        if let Some(replaced) = self.pending.lock().await.insert(key, entry) {
            replaced.timer.abort();
        }
    }

    /// Clears a pending entry. Duplicate or foreign ACKs return false
    /// and have no effect.
    pub async fn acknowledge(&self, connection_id: &ConnectionId, message_id: &MessageId) -> bool {
        let key = (*connection_id, message_id.clone());
        match self.pending.lock().await.remove(&key) {
            Some(entry) => {
                entry.timer.abort();
                true
            }
            None => false,
        }
    }

    /// Purges every pending entry for a closed connection.
    pub async fn purge_connection(&self, connection_id: &ConnectionId) {
        let mut pending = self.pending.lock().await;
        let keys: Vec<_> = pending
            .keys()
            .filter(|(conn, _)| conn == connection_id)
            .cloned()
            .collect();
        for key in keys {
            if let Some(entry) = pending.remove(&key) {
                entry.timer.abort();
            }
        }
    }

    /// Current tracker metrics.
    pub async fn metrics(&self) -> AckMetrics {
        let pending = self.pending.lock().await;
        let connections: HashSet<_> = pending.keys().map(|(conn, _)| *conn).collect();
        let documents: HashSet<_> = pending
            .values()
            .map(|entry| entry.document_id.clone())
            .collect();
        AckMetrics {
            pending: pending.len(),
            connections: connections.len(),
            documents: documents.len(),
        }
    }

    fn spawn_timer(self: &Arc<Self>, key: (ConnectionId, MessageId)) -> JoinHandle<()> {
        let tracker = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(tracker.timeout).await;
                let mut pending = tracker.pending.lock().await;
                let Some(entry) = pending.get_mut(&key) else {
                    return;
                };
                if entry.attempts <= tracker.max_retries {
                    entry.attempts += 1;
                    debug!(
                        "retrying unacknowledged message {} to {} (attempt {})",
                        key.1, key.0, entry.attempts
                    );
                    let event = AckEvent::Retry {
                        connection_id: key.0,
                        message: entry.message.clone(),
                    };
                    if tracker.event_tx.send(event).is_err() {
                        return;
                    }
                } else if let Some(entry) = pending.remove(&key) {
                    debug!("dropping unacknowledged message {} to {}", key.1, key.0);
                    let _ = tracker.event_tx.send(AckEvent::Dropped {
                        connection_id: key.0,
                        message_id: key.1.clone(),
                        document_id: entry.document_id,
                    });
                    return;
                } else {
                    return;
                }
            }
        })
    }
}
