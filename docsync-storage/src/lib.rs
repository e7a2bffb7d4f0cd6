//! Storage interface consumed by the docsync server.
//!
//! Durable persistence is an external collaborator: the server talks to it
//! through the narrow [`DocumentStore`] trait and never depends on a
//! concrete backend. All methods are fallible and all failures are
//! best-effort from the server's point of view; the in-memory document
//! state remains authoritative for the live session.
//!
//! [`MemoryStore`] is the in-process implementation used by
//! single-instance deployments and tests.

mod error;
mod memory;

pub use error::{StorageError, StorageResult};
pub use memory::MemoryStore;

use async_trait::async_trait;
use docsync_crdt::VectorClock;
use docsync_types::{ClientId, DocumentId};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// The kind of field operation a delta row records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationType {
    /// A field was set to a value.
    Set,
    /// A field was deleted (tombstone write).
    Delete,
}

/// One persisted field write.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeltaRecord {
    /// Identifier of the delta this write belongs to.
    pub id: String,
    /// Document the write applies to.
    pub document_id: DocumentId,
    /// Client that performed the write.
    pub client_id: ClientId,
    /// Whether the field was set or deleted.
    pub operation_type: OperationType,
    /// Name of the written field.
    pub field_path: String,
    /// The written value (`Null` for deletions).
    pub value: Value,
    /// The writer's vector-clock counter at write time.
    pub clock_value: u64,
    /// Sender wall time in milliseconds.
    pub timestamp: u64,
    /// The document clock after the write.
    pub vector_clock: VectorClock,
}

/// A persisted opaque text-CRDT document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TextDocument {
    /// Rendered text content, as supplied by the last writer.
    pub content: String,
    /// Opaque CRDT state blob. The server never inspects it.
    pub crdt_state: Value,
    /// Clock attached to the last save.
    pub clock: VectorClock,
}

/// Narrow persistence interface the sync coordinator writes through.
///
/// `get_vector_clock` and `save_snapshot` are optional extensions;
/// backends that do not support them inherit the default no-ops.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Loads the persisted resolved state for a document, if any.
    async fn get_document_state(&self, id: &DocumentId)
        -> StorageResult<Option<HashMap<String, Value>>>;

    /// Appends one field write. Ordered per document by the caller.
    async fn save_delta(&self, delta: DeltaRecord) -> StorageResult<()>;

    /// Loads the latest persisted text-CRDT document, if any.
    async fn get_text_document(&self, id: &DocumentId) -> StorageResult<Option<TextDocument>>;

    /// Persists a text-CRDT document and returns the stored version.
    async fn save_text_document(
        &self,
        id: &DocumentId,
        content: String,
        crdt_state: Value,
        clock: VectorClock,
    ) -> StorageResult<TextDocument>;

    /// Loads the persisted vector clock for a document. Optional extension.
    async fn get_vector_clock(&self, _id: &DocumentId) -> StorageResult<Option<VectorClock>> {
        Ok(None)
    }

    /// Persists a resolved-state snapshot. Optional extension.
    async fn save_snapshot(
        &self,
        _id: &DocumentId,
        _state: HashMap<String, Value>,
        _clock: VectorClock,
    ) -> StorageResult<()> {
        Ok(())
    }
}
