//! Sync coordinator: the document-id → document map.
//!
//! Documents are constructed lazily on first reference. Concurrent first
//! references for the same id are deduplicated behind a per-id init cell,
//! so the storage backend is asked exactly once. After every successful
//! apply a persistence job is queued fire-and-forget; jobs for one
//! document drain in order through a dedicated writer task. Storage
//! failures anywhere are logged and swallowed; the in-memory state is
//! authoritative for the live session.

use crate::awareness::AwarenessManager;
use crate::document::{ApplyResult, Document};
use crate::protocol::{AwarenessClientState, DeltaPayload, Message, Payload};
use crate::pubsub::PubSub;
use docsync_crdt::{is_tombstone_value, VectorClock, TOMBSTONE_KEY};
use docsync_storage::{DeltaRecord, DocumentStore, OperationType, TextDocument};
use docsync_types::{ClientId, ConnectionId, DocumentId};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, OnceCell, RwLock};
use tracing::warn;
use uuid::Uuid;

#[derive(Clone)]
struct DocumentEntry {
    cell: Arc<OnceCell<Arc<Document>>>,
    persist_tx: mpsc::UnboundedSender<DeltaRecord>,
}

/// Owns every loaded document and the storage/pubsub collaborators.
pub struct SyncCoordinator {
    store: Arc<dyn DocumentStore>,
    pubsub: Option<Arc<dyn PubSub>>,
    awareness: Arc<AwarenessManager>,
    documents: RwLock<HashMap<DocumentId, DocumentEntry>>,
}

impl SyncCoordinator {
    /// Creates a coordinator over the given collaborators.
    #[must_use]
    pub fn new(
        store: Arc<dyn DocumentStore>,
        awareness: Arc<AwarenessManager>,
        pubsub: Option<Arc<dyn PubSub>>,
    ) -> Self {
        Self {
            store,
            pubsub,
            awareness,
            documents: RwLock::new(HashMap::new()),
        }
    }

    /// The awareness manager serving this coordinator's documents.
    #[must_use]
    pub fn awareness(&self) -> &Arc<AwarenessManager> {
        &self.awareness
    }

    /// Returns the document, loading persisted state on first reference.
    pub async fn get_document(&self, id: &DocumentId) -> Arc<Document> {
        let entry = {
            let documents = self.documents.read().await;
            documents.get(id).cloned()
        };
        let entry = match entry {
            Some(entry) => entry,
            None => {
                let mut documents = self.documents.write().await;
                documents
                    .entry(id.clone())
                    .or_insert_with(|| self.new_entry())
                    .clone()
            }
        };

        entry
            .cell
            .get_or_init(|| self.load_document(id))
            .await
            .clone()
    }

    async fn load_document(&self, id: &DocumentId) -> Arc<Document> {
        let document = Document::new(id.clone());

        match self.store.get_document_state(id).await {
            Ok(Some(state)) => {
                let clock = match self.store.get_vector_clock(id).await {
                    Ok(clock) => clock,
                    Err(e) => {
                        warn!("failed to load vector clock for {id}: {e}");
                        None
                    }
                };
                document.preload(state, clock).await;
            }
            Ok(None) => {}
            Err(e) => {
                warn!("failed to load persisted state for {id}: {e}");
            }
        }

        Arc::new(document)
    }

    fn new_entry(&self) -> DocumentEntry {
        let (persist_tx, mut persist_rx) = mpsc::unbounded_channel::<DeltaRecord>();
        let store = Arc::clone(&self.store);
        tokio::spawn(async move {
            while let Some(record) = persist_rx.recv().await {
                let document_id = record.document_id.clone();
                if let Err(e) = store.save_delta(record).await {
                    warn!("failed to persist delta for {document_id}: {e}");
                }
            }
        });
        DocumentEntry {
            cell: Arc::new(OnceCell::new()),
            persist_tx,
        }
    }

    /// Applies a multi-field delta and queues persistence. Returns the
    /// apply outcome (authoritative values + post-apply clock).
    pub async fn apply_fields(
        &self,
        id: &DocumentId,
        client_id: &ClientId,
        fields: HashMap<String, Value>,
        incoming_clock: &VectorClock,
        timestamp_ms: u64,
    ) -> ApplyResult {
        let document = self.get_document(id).await;
        let delta_id = Uuid::new_v4().to_string();
        let result = document
            .apply_delta(client_id, fields.clone(), incoming_clock, timestamp_ms, delta_id.clone())
            .await;

        self.queue_persistence(id, client_id, &fields, &result, timestamp_ms, &delta_id)
            .await;
        self.publish_fields(id, &fields, &result);

        result
    }

    /// Applies a single-field write; returns the post-LWW value.
    pub async fn set_field(
        &self,
        id: &DocumentId,
        field: &str,
        value: Value,
        client_id: &ClientId,
        timestamp_ms: u64,
    ) -> Option<Value> {
        let fields = HashMap::from([(field.to_string(), value)]);
        let result = self
            .apply_fields(id, client_id, fields, &VectorClock::new(), timestamp_ms)
            .await;
        result.authoritative.get(field).cloned().flatten()
    }

    /// Applies a tombstone write; returns the post-LWW value (`None`
    /// when the deletion won).
    pub async fn delete_field(
        &self,
        id: &DocumentId,
        field: &str,
        client_id: &ClientId,
        timestamp_ms: u64,
    ) -> Option<Value> {
        let tombstone = json!({ TOMBSTONE_KEY: true });
        let fields = HashMap::from([(field.to_string(), tombstone)]);
        let result = self
            .apply_fields(id, client_id, fields, &VectorClock::new(), timestamp_ms)
            .await;
        result.authoritative.get(field).cloned().flatten()
    }

    /// Merges an externally observed clock into the document clock.
    pub async fn merge_vector_clock(&self, id: &DocumentId, clock: &VectorClock) {
        self.get_document(id).await.merge_clock(clock).await;
    }

    /// The resolved state projection for one document.
    pub async fn get_document_state(&self, id: &DocumentId) -> serde_json::Map<String, Value> {
        self.get_document(id).await.build_state().await
    }

    /// The current clock of one document.
    pub async fn get_vector_clock(&self, id: &DocumentId) -> VectorClock {
        self.get_document(id).await.clock().await
    }

    /// Subscribes a connection to a document's durable state.
    pub async fn subscribe(&self, id: &DocumentId, connection_id: ConnectionId) -> bool {
        self.get_document(id).await.subscribe(connection_id).await
    }

    /// Unsubscribes a connection from a document.
    pub async fn unsubscribe(&self, id: &DocumentId, connection_id: &ConnectionId) -> bool {
        self.get_document(id).await.unsubscribe(connection_id).await
    }

    /// Subscribes to a document's presence; returns the snapshot.
    pub async fn subscribe_awareness(
        &self,
        id: &DocumentId,
        connection_id: ConnectionId,
    ) -> Vec<AwarenessClientState> {
        self.awareness.subscribe(id, connection_id).await
    }

    /// Unsubscribes from a document's presence.
    pub async fn unsubscribe_awareness(&self, id: &DocumentId, connection_id: &ConnectionId) {
        self.awareness.unsubscribe(id, connection_id).await;
    }

    /// Persists an opaque text-CRDT blob and echoes the stored version.
    /// On storage failure the input is echoed unchanged; the live
    /// session stays available.
    pub async fn save_text_state(
        &self,
        id: &DocumentId,
        content: String,
        crdt_state: Value,
        clock: VectorClock,
    ) -> TextDocument {
        match self
            .store
            .save_text_document(id, content.clone(), crdt_state.clone(), clock.clone())
            .await
        {
            Ok(stored) => stored,
            Err(e) => {
                warn!("failed to persist text state for {id}: {e}");
                TextDocument {
                    content,
                    crdt_state,
                    clock,
                }
            }
        }
    }

    /// The latest persisted text-CRDT blob, if any.
    pub async fn get_text_state(&self, id: &DocumentId) -> Option<TextDocument> {
        match self.store.get_text_document(id).await {
            Ok(text) => text,
            Err(e) => {
                warn!("failed to load text state for {id}: {e}");
                None
            }
        }
    }

    /// Number of documents currently loaded.
    pub async fn loaded_count(&self) -> usize {
        self.documents.read().await.len()
    }

    /// Drops the document cache and closes the persistence queues.
    pub async fn shutdown(&self) {
        self.documents.write().await.clear();
    }

    async fn queue_persistence(
        &self,
        id: &DocumentId,
        client_id: &ClientId,
        fields: &HashMap<String, Value>,
        result: &ApplyResult,
        timestamp_ms: u64,
        delta_id: &str,
    ) {
        let persist_tx = {
            let documents = self.documents.read().await;
            documents.get(id).map(|entry| entry.persist_tx.clone())
        };
        let Some(persist_tx) = persist_tx else {
            return;
        };

        for (field, value) in fields {
            let (operation_type, value) = if is_tombstone_value(value) {
                (OperationType::Delete, Value::Null)
            } else {
                (OperationType::Set, value.clone())
            };
            let record = DeltaRecord {
                id: delta_id.to_string(),
                document_id: id.clone(),
                client_id: client_id.clone(),
                operation_type,
                field_path: field.clone(),
                value,
                clock_value: result.counter,
                timestamp: timestamp_ms,
                vector_clock: result.clock.clone(),
            };
            if persist_tx.send(record).is_err() {
                warn!("persistence queue closed for {id}");
                return;
            }
        }
    }

    fn publish_fields(
        &self,
        id: &DocumentId,
        fields: &HashMap<String, Value>,
        result: &ApplyResult,
    ) {
        let Some(pubsub) = &self.pubsub else {
            return;
        };
        let message = Message::new(Payload::Delta(DeltaPayload {
            document_id: id.clone(),
            delta: Some(fields.clone()),
            field: None,
            value: None,
            clock: result.clock.clone(),
            message_id: None,
        }));
        let pubsub = Arc::clone(pubsub);
        let document_id = id.clone();
        tokio::spawn(async move {
            if let Err(e) = pubsub.publish_delta(&document_id, &message).await {
                warn!("pubsub publish failed for {document_id}: {e}");
            }
        });
    }
}
