//! Server configuration.

use std::time::Duration;

/// Tunables for the transport-facing side of the server.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Global live-connection cap.
    pub max_connections: usize,
    /// Per-IP live-connection cap.
    pub max_connections_per_ip: usize,
    /// Heartbeat interval; a missed reply terminates the endpoint.
    pub heartbeat_interval: Duration,
    /// Token-bucket refill rate, messages per second.
    pub rate_limit_per_sec: f64,
    /// Token-bucket burst capacity.
    pub rate_limit_burst: f64,
    /// Maximum accepted document-id length.
    pub document_id_max_len: usize,
    /// How long partial chunk streams are held before discarding.
    pub chunk_ttl: Duration,
    /// Whether clients must authenticate before document operations.
    pub auth_required: bool,
    /// Document-id prefixes readable without authentication.
    pub open_namespaces: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            max_connections: 10_000,
            max_connections_per_ip: 32,
            heartbeat_interval: Duration::from_secs(30),
            rate_limit_per_sec: 100.0,
            rate_limit_burst: 200.0,
            document_id_max_len: 128,
            chunk_ttl: Duration::from_secs(30),
            auth_required: false,
            open_namespaces: vec!["playground".to_string()],
        }
    }
}
