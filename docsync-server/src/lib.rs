//! WebSocket synchronization server for docsync.
//!
//! Clients connect over one duplex path (`/ws`), subscribe to named
//! documents, push field-level deltas and receive the authoritative
//! merged view plus incremental changes from peers. Concurrent writers
//! are reconciled with a vector-clock-indexed last-writer-wins field
//! model; rapid updates coalesce in a batching window before fan-out;
//! delivery is tracked with ACK/retry; ephemeral presence runs on a
//! separate awareness channel.

pub mod config;
pub mod connection;
pub mod orchestrator;
pub mod registry;
pub mod security;
pub mod ws;

pub use config::ServerConfig;
pub use connection::{Connection, ConnectionState, OutboundFrame};
pub use orchestrator::{Orchestrator, CLOSE_GOING_AWAY, CLOSE_POLICY};
pub use registry::{ConnectionRegistry, RegistryMetrics};
pub use security::{ConnectionLimiter, RateLimiter};

use axum::routing::any;
use axum::Router;
use std::sync::Arc;

/// Builds the router exposing the sync endpoint.
pub fn build_router(orchestrator: Arc<Orchestrator>) -> Router {
    Router::new()
        .route("/ws", any(ws::ws_handler))
        .with_state(orchestrator)
}
