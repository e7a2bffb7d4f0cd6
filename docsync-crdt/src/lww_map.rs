//! Last-Writer-Wins field map.
//!
//! Resolves concurrent writes to named fields of a document. Each field
//! keeps the winning write's value together with the metadata needed to
//! compare it against future writes. Deletions are writes of a tombstone
//! and participate in the same order, so a concurrent set/delete pair
//! resolves deterministically on every replica.

use docsync_types::ClientId;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::cmp::Ordering;
use std::collections::HashMap;

/// Key of the tombstone sentinel object on the wire: `{"__deleted": true}`.
pub const TOMBSTONE_KEY: &str = "__deleted";

/// The LWW total order over writes: wall-clock timestamp, then vector-clock
/// counter, then client id under byte comparison. Later in this order wins.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WriteStamp {
    /// Sender-supplied wall time in milliseconds since the Unix epoch.
    pub timestamp_ms: u64,
    /// The writer's vector-clock counter captured at write time.
    pub clock_counter: u64,
    /// The writing client.
    pub client_id: ClientId,
}

impl WriteStamp {
    /// Creates a write stamp from its components.
    #[must_use]
    pub fn new(timestamp_ms: u64, clock_counter: u64, client_id: ClientId) -> Self {
        Self {
            timestamp_ms,
            clock_counter,
            client_id,
        }
    }
}

impl PartialOrd for WriteStamp {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for WriteStamp {
    fn cmp(&self, other: &Self) -> Ordering {
        self.timestamp_ms
            .cmp(&other.timestamp_ms)
            .then_with(|| self.clock_counter.cmp(&other.clock_counter))
            .then_with(|| self.client_id.as_str().cmp(other.client_id.as_str()))
    }
}

/// The resolved entry for a single field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldEntry {
    /// The winning value (`Value::Null` for tombstones).
    pub value: Value,
    /// Wall time of the winning write.
    pub timestamp_ms: u64,
    /// Vector-clock counter of the winning write.
    pub clock_counter: u64,
    /// Client that performed the winning write.
    pub client_id: ClientId,
    /// True when the winning write was a deletion.
    pub tombstone: bool,
}

impl FieldEntry {
    /// Creates an entry for a value write.
    #[must_use]
    pub fn set(value: Value, timestamp_ms: u64, clock_counter: u64, client_id: ClientId) -> Self {
        Self {
            value,
            timestamp_ms,
            clock_counter,
            client_id,
            tombstone: false,
        }
    }

    /// Creates a tombstone entry for a deletion.
    #[must_use]
    pub fn tombstone(timestamp_ms: u64, clock_counter: u64, client_id: ClientId) -> Self {
        Self {
            value: Value::Null,
            timestamp_ms,
            clock_counter,
            client_id,
            tombstone: true,
        }
    }

    /// The write stamp of this entry in the LWW order.
    #[must_use]
    pub fn stamp(&self) -> WriteStamp {
        WriteStamp::new(self.timestamp_ms, self.clock_counter, self.client_id.clone())
    }
}

/// Returns true if a wire value is the tombstone sentinel `{"__deleted": true}`.
#[must_use]
pub fn is_tombstone_value(value: &Value) -> bool {
    value
        .as_object()
        .and_then(|obj| obj.get(TOMBSTONE_KEY))
        .and_then(Value::as_bool)
        .unwrap_or(false)
}

/// A map from field name to its LWW-resolved entry.
///
/// Applying the same set of writes in any order yields the same map,
/// because [`WriteStamp`] is a total order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LwwMap {
    fields: HashMap<String, FieldEntry>,
}

impl LwwMap {
    /// Creates an empty map.
    #[must_use]
    pub fn new() -> Self {
        Self {
            fields: HashMap::new(),
        }
    }

    /// Returns the resolved entry for a field, tombstoned or not.
    #[must_use]
    pub fn entry(&self, field: &str) -> Option<&FieldEntry> {
        self.fields.get(field)
    }

    /// Returns the live value for a field (`None` when absent or deleted).
    #[must_use]
    pub fn value(&self, field: &str) -> Option<&Value> {
        self.fields
            .get(field)
            .filter(|entry| !entry.tombstone)
            .map(|entry| &entry.value)
    }

    /// Number of fields with entries, including tombstones.
    #[must_use]
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Returns true when no field has ever been written.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Applies a write, installing it if it wins the LWW comparison
    /// against the current entry. Returns true if the write was installed.
    pub fn apply(&mut self, field: impl Into<String>, incoming: FieldEntry) -> bool {
        let field = field.into();
        match self.fields.get(&field) {
            None => {
                self.fields.insert(field, incoming);
                true
            }
            Some(current) => {
                if incoming.stamp() > current.stamp() {
                    self.fields.insert(field, incoming);
                    true
                } else {
                    false
                }
            }
        }
    }

    /// Iterates over all entries, including tombstones.
    pub fn entries(&self) -> impl Iterator<Item = (&String, &FieldEntry)> {
        self.fields.iter()
    }

    /// Projects the resolved state: every live field mapped to its value.
    /// Tombstoned fields are excluded. O(number of fields).
    #[must_use]
    pub fn build_state(&self) -> serde_json::Map<String, Value> {
        self.fields
            .iter()
            .filter(|(_, entry)| !entry.tombstone)
            .map(|(field, entry)| (field.clone(), entry.value.clone()))
            .collect()
    }
}
