//! Conflict resolution primitives for docsync.
//!
//! This crate provides the two pieces the document state machine is built
//! from:
//!
//! - [`VectorClock`]: causality tracking across writing clients
//! - [`LwwMap`]: per-field Last-Writer-Wins resolution with tombstones
//!
//! The LWW order is a total order over [`WriteStamp`]s: larger wall-clock
//! timestamp wins, ties break by larger vector-clock counter, remaining
//! ties by larger client id under byte comparison. Because the order is
//! total, the resolved map is a deterministic function of the set of
//! applied writes regardless of arrival order.

mod lww_map;
mod vector_clock;

pub use lww_map::{is_tombstone_value, FieldEntry, LwwMap, WriteStamp, TOMBSTONE_KEY};
pub use vector_clock::{CausalOrder, VectorClock};
