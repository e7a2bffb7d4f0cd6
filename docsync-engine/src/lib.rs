//! Core engine of the docsync server.
//!
//! Everything between the transport and the storage backend lives here:
//!
//! - **Protocol**: the closed message sum type exchanged with clients
//! - **Codec**: bit-exact binary framing and the JSON text mode
//! - **Document**: per-document delta log, LWW resolver and vector clock
//! - **Coordinator**: lazy document loading and best-effort persistence
//! - **Batcher**: per-document coalescing window before fan-out
//! - **Ack tracker**: retry/timeout bookkeeping for fan-out delivery
//! - **Awareness**: ephemeral presence with a stale-entry reaper
//!
//! The engine performs no transport I/O. Timer-driven components emit
//! events through channels; the server orchestrator consumes them and
//! owns every socket.

pub mod ack;
pub mod auth;
pub mod awareness;
pub mod batcher;
pub mod codec;
mod config;
pub mod coordinator;
pub mod document;
mod error;
pub mod protocol;
pub mod pubsub;

pub use ack::{AckEvent, AckMetrics, AckTracker};
pub use auth::{AuthClaims, Permissions, StaticTokenVerifier, TokenVerifier};
pub use awareness::{AwarenessDeparture, AwarenessManager};
pub use batcher::{DeltaBatcher, FlushedBatch};
pub use codec::{CodecError, Frame, ProtocolMode, HEADER_LEN, MAX_PAYLOAD_SIZE};
pub use config::EngineConfig;
pub use coordinator::SyncCoordinator;
pub use document::{ApplyResult, Document, DocumentSnapshot, StoredDelta};
pub use error::{EngineError, EngineResult};
pub use protocol::{Message, Payload};
pub use pubsub::{NoopPubSub, PubSub};
