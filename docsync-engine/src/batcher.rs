//! Delta batching scheduler.
//!
//! Coalesces rapid writes to the same document inside a fixed window
//! before fan-out. The first write after an empty window opens a
//! `PendingBatch` and arms a one-shot timer; writes landing inside the
//! window merge into it (last write wins per field; safe because LWW already
//! ran in the document). When the timer fires the batch drains into the
//! flush channel as a single fan-out unit.

use docsync_crdt::VectorClock;
use docsync_types::DocumentId;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::debug;

/// One drained batch, ready for fan-out.
#[derive(Debug, Clone)]
pub struct FlushedBatch {
    /// The document the batch belongs to.
    pub document_id: DocumentId,
    /// Final coalesced value per field (tombstone sentinel for deletes).
    pub fields: HashMap<String, Value>,
    /// Pointwise max of the clocks seen during the window.
    pub clock: VectorClock,
}

struct PendingBatch {
    fields: HashMap<String, Value>,
    clock: VectorClock,
    timer: JoinHandle<()>,
}

/// Per-document coalescing scheduler.
pub struct DeltaBatcher {
    window: Duration,
    pending: Mutex<HashMap<DocumentId, PendingBatch>>,
    flush_tx: mpsc::UnboundedSender<FlushedBatch>,
}

impl DeltaBatcher {
    /// Creates a batcher that emits flushed batches into `flush_tx`.
    #[must_use]
    pub fn new(window: Duration, flush_tx: mpsc::UnboundedSender<FlushedBatch>) -> Self {
        Self {
            window,
            pending: Mutex::new(HashMap::new()),
            flush_tx,
        }
    }

    /// Enqueues one field write. Opens a window for the document if none
    /// is pending, otherwise merges into the existing batch.
    pub async fn enqueue(
        self: &Arc<Self>,
        document_id: &DocumentId,
        field: impl Into<String>,
        value: Value,
        clock: &VectorClock,
    ) {
        let mut pending = self.pending.lock().await;
        match pending.get_mut(document_id) {
            Some(batch) => {
                batch.fields.insert(field.into(), value);
                batch.clock.merge(clock);
            }
            None => {
                let batcher = Arc::clone(self);
                let doc = document_id.clone();
                let window = self.window;
                let timer = tokio::spawn(async move {
                    tokio::time::sleep(window).await;
                    batcher.flush(&doc).await;
                });
                pending.insert(
                    document_id.clone(),
                    PendingBatch {
                        fields: HashMap::from([(field.into(), value)]),
                        clock: clock.clone(),
                        timer,
                    },
                );
            }
        }
    }

    /// Drains the pending batch for one document into the flush channel.
    pub async fn flush(&self, document_id: &DocumentId) {
        let batch = self.pending.lock().await.remove(document_id);
        if let Some(batch) = batch {
            self.emit(document_id.clone(), batch);
        }
    }

    /// Drains every pending batch at shutdown. The batches are returned
    /// to the caller instead of emitted, so the final fan-out can happen
    /// before connections close.
    pub async fn flush_all(&self) -> Vec<FlushedBatch> {
        let drained: Vec<(DocumentId, PendingBatch)> =
            self.pending.lock().await.drain().collect();
        drained
            .into_iter()
            .filter(|(_, batch)| !batch.fields.is_empty())
            .map(|(document_id, batch)| {
                batch.timer.abort();
                FlushedBatch {
                    document_id,
                    fields: batch.fields,
                    clock: batch.clock,
                }
            })
            .collect()
    }

    /// Number of documents with an open window.
    pub async fn pending_count(&self) -> usize {
        self.pending.lock().await.len()
    }

    fn emit(&self, document_id: DocumentId, batch: PendingBatch) {
        if batch.fields.is_empty() {
            return;
        }
        debug!(
            "flushing batch for {}: {} fields",
            document_id,
            batch.fields.len()
        );
        let _ = self.flush_tx.send(FlushedBatch {
            document_id,
            fields: batch.fields,
            clock: batch.clock,
        });
    }
}
