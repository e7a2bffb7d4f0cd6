//! Per-document state machine.
//!
//! Each document owns a delta log, a LWW-resolved field map, a vector
//! clock and its subscriber set. All mutations go through one write lock,
//! so the three structures move atomically together; readers take
//! consistent snapshots under the read lock.

use docsync_crdt::{is_tombstone_value, FieldEntry, LwwMap, VectorClock};
use docsync_types::{now_millis, ClientId, ConnectionId, DocumentId};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use tokio::sync::RwLock;
use tracing::debug;

/// A delta as appended to the log. Immutable once appended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredDelta {
    /// Delta id.
    pub id: String,
    /// The writing client.
    pub client_id: ClientId,
    /// Sender wall time of the write.
    pub timestamp_ms: u64,
    /// Field → value map; deletions carry the tombstone sentinel.
    pub fields: HashMap<String, Value>,
    /// Document clock at acceptance: the writer's counter already
    /// bumped, the sender's submitted clock not yet merged.
    pub clock: VectorClock,
}

/// Outcome of applying a delta.
#[derive(Debug, Clone)]
pub struct ApplyResult {
    /// Document clock after the apply.
    pub clock: VectorClock,
    /// The server-assigned counter for the writing client.
    pub counter: u64,
    /// Post-LWW value per touched field; `None` when a tombstone won.
    pub authoritative: HashMap<String, Option<Value>>,
    /// Fields where the incoming write won.
    pub changed: Vec<String>,
}

/// A read snapshot for building a `SyncResponse`.
#[derive(Debug, Clone)]
pub struct DocumentSnapshot {
    /// Resolved live fields.
    pub state: serde_json::Map<String, Value>,
    /// Current document clock.
    pub clock: VectorClock,
    /// Deltas the requester has not seen, in log order.
    pub deltas: Vec<StoredDelta>,
}

#[derive(Debug, Default)]
struct DocumentState {
    clock: VectorClock,
    deltas: Vec<StoredDelta>,
    resolved: LwwMap,
    /// Entries installed from persisted state before any live delta.
    baseline: LwwMap,
    subscribers: HashSet<ConnectionId>,
    created_at: u64,
    updated_at: u64,
}

/// One synchronized document.
pub struct Document {
    id: DocumentId,
    state: RwLock<DocumentState>,
}

impl Document {
    /// Creates an empty document.
    #[must_use]
    pub fn new(id: DocumentId) -> Self {
        let now = now_millis();
        Self {
            id,
            state: RwLock::new(DocumentState {
                created_at: now,
                updated_at: now,
                ..DocumentState::default()
            }),
        }
    }

    /// The document id.
    #[must_use]
    pub fn id(&self) -> &DocumentId {
        &self.id
    }

    /// Installs persisted state as the pre-delta baseline. Baseline
    /// entries carry zero stamps, so any live write beats them.
    pub async fn preload(&self, state: HashMap<String, Value>, clock: Option<VectorClock>) {
        let mut doc = self.state.write().await;
        for (field, value) in state {
            let entry = FieldEntry::set(value, 0, 0, ClientId::new(""));
            doc.baseline.apply(field.clone(), entry.clone());
            doc.resolved.apply(field, entry);
        }
        if let Some(clock) = clock {
            doc.clock.merge(&clock);
        }
    }

    /// Applies a delta: bumps the writer's counter, appends to the log,
    /// merges the incoming clock and resolves each field by LWW.
    ///
    /// The counter is server-authoritative: it comes from the document
    /// clock as it stood before the sender's clock is merged, so a
    /// client cannot raise its own LWW priority by inflating its entry
    /// in the submitted clock.
    pub async fn apply_delta(
        &self,
        client_id: &ClientId,
        fields: HashMap<String, Value>,
        incoming_clock: &VectorClock,
        timestamp_ms: u64,
        delta_id: String,
    ) -> ApplyResult {
        let mut doc = self.state.write().await;

        let counter = doc.clock.increment(client_id);
        let delta_clock = doc.clock.clone();
        doc.deltas.push(StoredDelta {
            id: delta_id,
            client_id: client_id.clone(),
            timestamp_ms,
            fields: fields.clone(),
            clock: delta_clock,
        });
        doc.clock.merge(incoming_clock);
        let new_clock = doc.clock.clone();

        let mut authoritative = HashMap::new();
        let mut changed = Vec::new();
        for (field, value) in fields {
            let entry = if is_tombstone_value(&value) {
                FieldEntry::tombstone(timestamp_ms, counter, client_id.clone())
            } else {
                FieldEntry::set(value, timestamp_ms, counter, client_id.clone())
            };
            if doc.resolved.apply(field.clone(), entry) {
                changed.push(field.clone());
            }
            authoritative.insert(
                field.clone(),
                doc.resolved.value(&field).cloned(),
            );
        }

        doc.updated_at = now_millis();

        #[cfg(debug_assertions)]
        Self::verify_resolved(&doc);

        debug!(
            "applied delta to {}: client={} counter={} changed={}",
            self.id,
            client_id,
            counter,
            changed.len()
        );

        ApplyResult {
            clock: new_clock,
            counter,
            authoritative,
            changed,
        }
    }

    /// Merges an externally observed clock into the document clock.
    pub async fn merge_clock(&self, clock: &VectorClock) {
        self.state.write().await.clock.merge(clock);
    }

    /// The resolved state projection (tombstones excluded).
    pub async fn build_state(&self) -> serde_json::Map<String, Value> {
        self.state.read().await.resolved.build_state()
    }

    /// The current document clock.
    pub async fn clock(&self) -> VectorClock {
        self.state.read().await.clock.clone()
    }

    /// The number of deltas in the log.
    pub async fn delta_count(&self) -> usize {
        self.state.read().await.deltas.len()
    }

    /// Deltas the holder of `since` has not seen: every logged delta whose
    /// clock is neither dominated by nor equal to `since`.
    pub async fn deltas_since(&self, since: Option<&VectorClock>) -> Vec<StoredDelta> {
        let doc = self.state.read().await;
        match since {
            None => doc.deltas.clone(),
            Some(clock) => doc
                .deltas
                .iter()
                .filter(|delta| !clock.dominates(&delta.clock))
                .cloned()
                .collect(),
        }
    }

    /// One consistent read of state, clock and catch-up deltas.
    pub async fn snapshot(&self, since: Option<&VectorClock>) -> DocumentSnapshot {
        let doc = self.state.read().await;
        let deltas = match since {
            None => doc.deltas.clone(),
            Some(clock) => doc
                .deltas
                .iter()
                .filter(|delta| !clock.dominates(&delta.clock))
                .cloned()
                .collect(),
        };
        DocumentSnapshot {
            state: doc.resolved.build_state(),
            clock: doc.clock.clone(),
            deltas,
        }
    }

    /// Adds a subscriber. Idempotent; returns true if newly added.
    pub async fn subscribe(&self, connection_id: ConnectionId) -> bool {
        self.state.write().await.subscribers.insert(connection_id)
    }

    /// Removes a subscriber. Idempotent; returns true if it was present.
    pub async fn unsubscribe(&self, connection_id: &ConnectionId) -> bool {
        self.state.write().await.subscribers.remove(connection_id)
    }

    /// The current subscriber set.
    pub async fn subscribers(&self) -> Vec<ConnectionId> {
        self.state.read().await.subscribers.iter().copied().collect()
    }

    /// Number of current subscribers.
    pub async fn subscriber_count(&self) -> usize {
        self.state.read().await.subscribers.len()
    }

    /// Re-derives the resolved map from baseline + delta log and compares
    /// it with the live map. Divergence is a fatal invariant violation.
    #[cfg(debug_assertions)]
    fn verify_resolved(doc: &DocumentState) {
        let mut rederived = doc.baseline.clone();
        for delta in &doc.deltas {
            let counter = delta.clock.get(&delta.client_id);
            for (field, value) in &delta.fields {
                let entry = if is_tombstone_value(value) {
                    FieldEntry::tombstone(delta.timestamp_ms, counter, delta.client_id.clone())
                } else {
                    FieldEntry::set(
                        value.clone(),
                        delta.timestamp_ms,
                        counter,
                        delta.client_id.clone(),
                    )
                };
                rederived.apply(field.clone(), entry);
            }
        }
        assert!(
            rederived == doc.resolved,
            "resolved map diverged from delta log re-derivation"
        );
    }
}
