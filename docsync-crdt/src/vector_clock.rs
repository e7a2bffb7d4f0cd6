//! Vector clock over writing clients.
//!
//! Every accepted write bumps the writer's counter; comparing two clocks
//! tells whether one write happened before another or whether they were
//! concurrent. The server leans on this for the per-field LWW tiebreak
//! and for reconnect catch-up (which logged deltas a client has not seen).

use docsync_types::ClientId;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Causality relationship between two vector clocks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CausalOrder {
    /// First clock happened before second.
    Before,
    /// First clock happened after second.
    After,
    /// Clocks are concurrent (neither happened before the other).
    Concurrent,
    /// Clocks are identical.
    Equal,
}

/// A map from client id to a monotonically increasing write counter.
///
/// Absent clients count as zero. Merging is a pointwise maximum, so it
/// is commutative, associative and idempotent and replicas converge no
/// matter the order merges arrive in.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VectorClock {
    clocks: HashMap<ClientId, u64>,
}

impl VectorClock {
    /// Creates a new empty vector clock.
    #[must_use]
    pub fn new() -> Self {
        Self {
            clocks: HashMap::new(),
        }
    }

    /// The counter for a client, zero when absent.
    #[must_use]
    pub fn get(&self, client_id: &ClientId) -> u64 {
        self.clocks.get(client_id).copied().unwrap_or(0)
    }

    /// All clients and their counters.
    pub fn entries(&self) -> impl Iterator<Item = (&ClientId, &u64)> {
        self.clocks.iter()
    }

    /// Number of clients with a counter.
    #[must_use]
    pub fn len(&self) -> usize {
        self.clocks.len()
    }

    /// True when no client has written yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.clocks.is_empty()
    }

    /// Bumps a client's counter by one and returns the new value.
    pub fn increment(&mut self, client_id: &ClientId) -> u64 {
        let next = self.get(client_id) + 1;
        self.clocks.insert(client_id.clone(), next);
        next
    }

    /// Raises a client's counter to `counter`; lower values are ignored,
    /// counters never move backwards.
    pub fn update(&mut self, client_id: &ClientId, counter: u64) {
        if counter > self.get(client_id) {
            self.clocks.insert(client_id.clone(), counter);
        }
    }

    /// Merges another clock into this one, raising each counter to the
    /// pointwise maximum.
    pub fn merge(&mut self, other: &Self) {
        for (client_id, &counter) in &other.clocks {
            self.update(client_id, counter);
        }
    }

    /// The merge of this clock and another, as a new clock.
    #[must_use]
    pub fn merged(&self, other: &Self) -> Self {
        let mut result = self.clone();
        result.merge(other);
        result
    }

    /// True when every counter in `other` is matched or exceeded here.
    /// Zero-valued entries on either side are irrelevant, so one
    /// directional scan over `other` suffices.
    fn covers(&self, other: &Self) -> bool {
        other
            .clocks
            .iter()
            .all(|(client_id, &counter)| self.get(client_id) >= counter)
    }

    /// The causal relationship between this clock and another, derived
    /// from the two directional coverage checks.
    #[must_use]
    pub fn compare(&self, other: &Self) -> CausalOrder {
        match (self.covers(other), other.covers(self)) {
            (true, true) => CausalOrder::Equal,
            (true, false) => CausalOrder::After,
            (false, true) => CausalOrder::Before,
            (false, false) => CausalOrder::Concurrent,
        }
    }

    /// True when this clock is causally before the other.
    #[must_use]
    pub fn happens_before(&self, other: &Self) -> bool {
        self.compare(other) == CausalOrder::Before
    }

    /// True when neither clock happened before the other.
    #[must_use]
    pub fn is_concurrent(&self, other: &Self) -> bool {
        self.compare(other) == CausalOrder::Concurrent
    }

    /// True when this clock has seen everything the other has.
    #[must_use]
    pub fn dominates(&self, other: &Self) -> bool {
        self.covers(other)
    }
}

impl PartialEq for VectorClock {
    fn eq(&self, other: &Self) -> bool {
        // Structural equality would distinguish an explicit zero entry
        // from an absent one; causal equality must not.
        self.covers(other) && other.covers(self)
    }
}

impl Eq for VectorClock {}

impl FromIterator<(ClientId, u64)> for VectorClock {
    fn from_iter<I: IntoIterator<Item = (ClientId, u64)>>(iter: I) -> Self {
        Self {
            clocks: iter.into_iter().collect(),
        }
    }
}
