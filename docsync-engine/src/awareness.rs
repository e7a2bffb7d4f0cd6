//! Ephemeral per-document presence.
//!
//! Awareness state (cursors, selections, identity) lives entirely in
//! memory, keyed `(document, client)`, with a subscriber set separate
//! from the document's durable-state subscribers. A background reaper
//! removes entries that have gone quiet and broadcasts their departure.

use crate::config::EngineConfig;
use crate::protocol::AwarenessClientState;
use docsync_crdt::VectorClock;
use docsync_types::{ClientId, ConnectionId, DocumentId};
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::debug;

/// One client's presence entry.
#[derive(Debug, Clone)]
struct AwarenessEntry {
    state: Value,
    clock: VectorClock,
    last_seen: Instant,
}

#[derive(Debug, Default)]
struct DocumentAwareness {
    entries: HashMap<ClientId, AwarenessEntry>,
    subscribers: HashSet<ConnectionId>,
}

/// A departure detected by the reaper, to be broadcast as a
/// `state: null` update by the orchestrator.
#[derive(Debug, Clone)]
pub struct AwarenessDeparture {
    /// The document the client was present in.
    pub document_id: DocumentId,
    /// The departed client.
    pub client_id: ClientId,
    /// Awareness subscribers to notify.
    pub subscribers: Vec<ConnectionId>,
}

/// In-memory presence manager with a periodic stale-entry reaper.
pub struct AwarenessManager {
    documents: Mutex<HashMap<DocumentId, DocumentAwareness>>,
    timeout: Duration,
}

impl AwarenessManager {
    /// Creates a manager with the configured idle timeout.
    #[must_use]
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            documents: Mutex::new(HashMap::new()),
            timeout: config.awareness_timeout,
        }
    }

    /// Subscribes a connection and returns the current presence snapshot.
    pub async fn subscribe(
        &self,
        document_id: &DocumentId,
        connection_id: ConnectionId,
    ) -> Vec<AwarenessClientState> {
        let mut documents = self.documents.lock().await;
        let doc = documents.entry(document_id.clone()).or_default();
        doc.subscribers.insert(connection_id);
        doc.entries
            .iter()
            .map(|(client_id, entry)| AwarenessClientState {
                client_id: client_id.clone(),
                state: entry.state.clone(),
                clock: entry.clock.clone(),
            })
            .collect()
    }

    /// Unsubscribes a connection from one document.
    pub async fn unsubscribe(&self, document_id: &DocumentId, connection_id: &ConnectionId) {
        let mut documents = self.documents.lock().await;
        if let Some(doc) = documents.get_mut(document_id) {
            doc.subscribers.remove(connection_id);
            if doc.subscribers.is_empty() && doc.entries.is_empty() {
                documents.remove(document_id);
            }
        }
    }

    /// Applies a presence update (`None` removes the entry) and returns
    /// the subscribers to broadcast to, the sender included.
    pub async fn update(
        &self,
        document_id: &DocumentId,
        client_id: &ClientId,
        state: Option<Value>,
        clock: VectorClock,
    ) -> Vec<ConnectionId> {
        let mut documents = self.documents.lock().await;
        let doc = documents.entry(document_id.clone()).or_default();

        match state {
            Some(state) => {
                doc.entries.insert(
                    client_id.clone(),
                    AwarenessEntry {
                        state,
                        clock,
                        last_seen: Instant::now(),
                    },
                );
            }
            None => {
                doc.entries.remove(client_id);
            }
        }

        doc.subscribers.iter().copied().collect()
    }

    /// Drops a closed connection from every subscriber set.
    pub async fn remove_connection(&self, connection_id: &ConnectionId) {
        let mut documents = self.documents.lock().await;
        documents.retain(|_, doc| {
            doc.subscribers.remove(connection_id);
            !(doc.subscribers.is_empty() && doc.entries.is_empty())
        });
    }

    /// Number of present clients in one document.
    pub async fn presence_count(&self, document_id: &DocumentId) -> usize {
        self.documents
            .lock()
            .await
            .get(document_id)
            .map_or(0, |doc| doc.entries.len())
    }

    /// Removes every entry idle longer than the timeout and returns the
    /// departures to broadcast.
    pub async fn reap(&self) -> Vec<AwarenessDeparture> {
        let now = Instant::now();
        let mut departures = Vec::new();
        let mut documents = self.documents.lock().await;

        for (document_id, doc) in documents.iter_mut() {
            let stale: Vec<ClientId> = doc
                .entries
                .iter()
                .filter(|(_, entry)| now.duration_since(entry.last_seen) > self.timeout)
                .map(|(client_id, _)| client_id.clone())
                .collect();

            for client_id in stale {
                doc.entries.remove(&client_id);
                debug!("reaped awareness entry {client_id} in {document_id}");
                departures.push(AwarenessDeparture {
                    document_id: document_id.clone(),
                    client_id,
                    subscribers: doc.subscribers.iter().copied().collect(),
                });
            }
        }
        documents.retain(|_, doc| !(doc.subscribers.is_empty() && doc.entries.is_empty()));

        departures
    }

    /// Spawns the periodic reaper; departures flow to the orchestrator
    /// through the returned channel's sender counterpart.
    pub fn spawn_reaper(
        self: &Arc<Self>,
        interval: Duration,
        departures_tx: mpsc::UnboundedSender<AwarenessDeparture>,
    ) -> JoinHandle<()> {
        let manager = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            // The first tick completes immediately.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                for departure in manager.reap().await {
                    if departures_tx.send(departure).is_err() {
                        return;
                    }
                }
            }
        })
    }
}
