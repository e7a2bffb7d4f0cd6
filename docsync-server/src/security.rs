//! Security filter: message validation, document-id policy, limiters.
//!
//! The validators are pure functions; the two limiters are the only
//! stateful pieces. Rate-limit violations never close the connection;
//! they surface as `Error` frames with a stable code.

use crate::config::ServerConfig;
use docsync_engine::protocol::{Message, Payload};
use docsync_engine::{EngineError, EngineResult};
use docsync_types::{ConnectionId, DocumentId};
use std::collections::HashMap;
use std::net::IpAddr;
use tokio::sync::Mutex;
use tokio::time::Instant;

/// Validates a decoded message's shape beyond what serde enforces.
pub fn validate_message(message: &Message) -> EngineResult<()> {
    if message.id.as_str().is_empty() {
        return Err(EngineError::MessageInvalid("empty message id".into()));
    }
    match &message.payload {
        Payload::Delta(delta) => {
            if delta.fields().is_empty() {
                return Err(EngineError::MessageInvalid(
                    "delta carries neither a delta map nor a field/value pair".into(),
                ));
            }
            Ok(())
        }
        Payload::DeltaBatch(batch) => {
            if batch.deltas.is_empty() {
                return Err(EngineError::MessageInvalid("empty delta batch".into()));
            }
            if batch.deltas.iter().any(|delta| delta.fields().is_empty()) {
                return Err(EngineError::MessageInvalid(
                    "delta batch entry carries no fields".into(),
                ));
            }
            Ok(())
        }
        Payload::DeltaBatchChunk(chunk) => {
            if chunk.total_chunks == 0 || chunk.chunk_index >= chunk.total_chunks {
                return Err(EngineError::MessageInvalid(
                    "chunk index outside the declared stream".into(),
                ));
            }
            Ok(())
        }
        Payload::Auth(auth) => {
            if auth.token.is_none() && auth.api_key.is_none() {
                return Err(EngineError::MessageInvalid(
                    "auth carries neither token nor api key".into(),
                ));
            }
            Ok(())
        }
        _ => Ok(()),
    }
}

/// Validates a document id: charset whitelist and length cap.
pub fn validate_document_id(id: &DocumentId, max_len: usize) -> EngineResult<()> {
    let s = id.as_str();
    if s.is_empty() || s.len() > max_len {
        return Err(EngineError::DocumentIdInvalid(s.to_string()));
    }
    let valid = s
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | ':' | '-'));
    if !valid {
        return Err(EngineError::DocumentIdInvalid(s.to_string()));
    }
    Ok(())
}

/// Namespace predicate: open namespaces are reachable without
/// authentication, everything else requires an authenticated connection.
pub fn can_access_document(
    id: &DocumentId,
    authenticated: bool,
    open_namespaces: &[String],
) -> bool {
    if open_namespaces
        .iter()
        .any(|ns| id.as_str().starts_with(ns.as_str()))
    {
        return true;
    }
    authenticated
}

/// Per-IP live-connection limiter.
#[derive(Debug)]
pub struct ConnectionLimiter {
    per_ip_cap: usize,
    counts: Mutex<HashMap<IpAddr, usize>>,
}

impl ConnectionLimiter {
    /// Creates a limiter with the configured per-IP cap.
    #[must_use]
    pub fn new(config: &ServerConfig) -> Self {
        Self {
            per_ip_cap: config.max_connections_per_ip,
            counts: Mutex::new(HashMap::new()),
        }
    }

    /// True when the IP is under its cap.
    pub async fn can_connect(&self, ip: IpAddr) -> bool {
        let counts = self.counts.lock().await;
        counts.get(&ip).copied().unwrap_or(0) < self.per_ip_cap
    }

    /// Records an accepted connection.
    pub async fn add_connection(&self, ip: IpAddr) {
        let mut counts = self.counts.lock().await;
        *counts.entry(ip).or_insert(0) += 1;
    }

    /// Records a closed connection.
    pub async fn remove_connection(&self, ip: IpAddr) {
        let mut counts = self.counts.lock().await;
        if let Some(count) = counts.get_mut(&ip) {
            *count = count.saturating_sub(1);
            if *count == 0 {
                counts.remove(&ip);
            }
        }
    }

    /// Number of IPs with live connections.
    pub async fn tracked_ips(&self) -> usize {
        self.counts.lock().await.len()
    }
}

#[derive(Debug)]
struct TokenBucket {
    tokens: f64,
    last_refill: Instant,
}

/// Per-connection token-bucket message rate limiter.
///
/// Each connection holds its own bucket, so exhausting one budget never
/// delays another connection's messages.
#[derive(Debug)]
pub struct RateLimiter {
    rate_per_sec: f64,
    burst: f64,
    buckets: Mutex<HashMap<ConnectionId, TokenBucket>>,
}

impl RateLimiter {
    /// Creates a limiter with the configured rate and burst.
    #[must_use]
    pub fn new(config: &ServerConfig) -> Self {
        Self {
            rate_per_sec: config.rate_limit_per_sec,
            burst: config.rate_limit_burst,
            buckets: Mutex::new(HashMap::new()),
        }
    }

    /// Takes one token for an inbound message; false means over budget.
    pub async fn can_send_message(&self, connection_id: &ConnectionId) -> bool {
        let now = Instant::now();
        let mut buckets = self.buckets.lock().await;
        let bucket = buckets.entry(*connection_id).or_insert(TokenBucket {
            tokens: self.burst,
            last_refill: now,
        });

        let elapsed = now.duration_since(bucket.last_refill).as_secs_f64();
        bucket.tokens = (bucket.tokens + elapsed * self.rate_per_sec).min(self.burst);
        bucket.last_refill = now;

        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    /// Drops a closed connection's bucket.
    pub async fn remove_connection(&self, connection_id: &ConnectionId) {
        self.buckets.lock().await.remove(connection_id);
    }

    /// Number of tracked connections.
    pub async fn tracked_connections(&self) -> usize {
        self.buckets.lock().await.len()
    }
}
