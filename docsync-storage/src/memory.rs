//! In-memory implementation of the storage interface.
//!
//! Backs single-instance deployments and tests. State lives for the
//! process lifetime only.

use crate::{DeltaRecord, DocumentStore, StorageResult, TextDocument};
use async_trait::async_trait;
use docsync_crdt::VectorClock;
use docsync_types::DocumentId;
use serde_json::Value;
use std::collections::HashMap;
use tokio::sync::RwLock;

#[derive(Default)]
struct StoredDocument {
    state: HashMap<String, Value>,
    clock: VectorClock,
    deltas: Vec<DeltaRecord>,
    text: Option<TextDocument>,
}

/// A [`DocumentStore`] holding everything in process memory.
#[derive(Default)]
pub struct MemoryStore {
    documents: RwLock<HashMap<DocumentId, StoredDocument>>,
}

impl MemoryStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of persisted deltas for a document (test helper).
    pub async fn delta_count(&self, id: &DocumentId) -> usize {
        self.documents
            .read()
            .await
            .get(id)
            .map_or(0, |doc| doc.deltas.len())
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn get_document_state(
        &self,
        id: &DocumentId,
    ) -> StorageResult<Option<HashMap<String, Value>>> {
        let documents = self.documents.read().await;
        Ok(documents
            .get(id)
            .filter(|doc| !doc.state.is_empty())
            .map(|doc| doc.state.clone()))
    }

    async fn save_delta(&self, delta: DeltaRecord) -> StorageResult<()> {
        let mut documents = self.documents.write().await;
        let doc = documents.entry(delta.document_id.clone()).or_default();

        match delta.operation_type {
            crate::OperationType::Set => {
                doc.state
                    .insert(delta.field_path.clone(), delta.value.clone());
            }
            crate::OperationType::Delete => {
                doc.state.remove(&delta.field_path);
            }
        }
        doc.clock.merge(&delta.vector_clock);
        doc.deltas.push(delta);
        Ok(())
    }

    async fn get_text_document(&self, id: &DocumentId) -> StorageResult<Option<TextDocument>> {
        let documents = self.documents.read().await;
        Ok(documents.get(id).and_then(|doc| doc.text.clone()))
    }

    async fn save_text_document(
        &self,
        id: &DocumentId,
        content: String,
        crdt_state: Value,
        clock: VectorClock,
    ) -> StorageResult<TextDocument> {
        let mut documents = self.documents.write().await;
        let doc = documents.entry(id.clone()).or_default();

        let merged_clock = doc
            .text
            .as_ref()
            .map_or_else(|| clock.clone(), |text| text.clock.merged(&clock));

        let stored = TextDocument {
            content,
            crdt_state,
            clock: merged_clock,
        };
        doc.text = Some(stored.clone());
        Ok(stored)
    }

    async fn get_vector_clock(&self, id: &DocumentId) -> StorageResult<Option<VectorClock>> {
        let documents = self.documents.read().await;
        Ok(documents
            .get(id)
            .filter(|doc| !doc.clock.is_empty())
            .map(|doc| doc.clock.clone()))
    }

    async fn save_snapshot(
        &self,
        id: &DocumentId,
        state: HashMap<String, Value>,
        clock: VectorClock,
    ) -> StorageResult<()> {
        let mut documents = self.documents.write().await;
        let doc = documents.entry(id.clone()).or_default();
        doc.state = state;
        doc.clock.merge(&clock);
        Ok(())
    }
}
