//! Connection registry.
//!
//! Indexes live connections by connection id, user id and client id.
//! Documents hold only connection ids; the registry is the single place
//! that maps an id back to its connection, which keeps the
//! connection ↔ document relationship cycle-free.

use crate::connection::Connection;
use docsync_types::{ClientId, ConnectionId, UserId};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::info;

/// Registry counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegistryMetrics {
    /// Live connections.
    pub connections: usize,
    /// Distinct authenticated users.
    pub users: usize,
    /// Distinct declared client ids.
    pub clients: usize,
}

#[derive(Default)]
struct RegistryInner {
    by_id: HashMap<ConnectionId, Arc<Connection>>,
    by_user: HashMap<UserId, HashSet<ConnectionId>>,
    by_client: HashMap<ClientId, HashSet<ConnectionId>>,
}

/// Indexes live connections and enforces the global cap.
pub struct ConnectionRegistry {
    max_connections: usize,
    inner: RwLock<RegistryInner>,
}

impl ConnectionRegistry {
    /// Creates a registry with the given global connection cap.
    #[must_use]
    pub fn new(max_connections: usize) -> Self {
        Self {
            max_connections,
            inner: RwLock::new(RegistryInner::default()),
        }
    }

    /// Adds a connection. Returns false when the global cap is reached;
    /// the caller closes the endpoint with policy code 1008.
    pub async fn add(&self, connection: Arc<Connection>) -> bool {
        let mut inner = self.inner.write().await;
        if inner.by_id.len() >= self.max_connections {
            return false;
        }
        inner.by_id.insert(connection.id(), connection);
        true
    }

    /// Looks up a connection by id.
    pub async fn get(&self, id: &ConnectionId) -> Option<Arc<Connection>> {
        self.inner.read().await.by_id.get(id).cloned()
    }

    /// Looks up several connections at once, skipping unknown ids.
    pub async fn get_many(&self, ids: &[ConnectionId]) -> Vec<Arc<Connection>> {
        let inner = self.inner.read().await;
        ids.iter()
            .filter_map(|id| inner.by_id.get(id).cloned())
            .collect()
    }

    /// Removes a connection and every index entry pointing at it.
    /// A removed connection is not observable in any index.
    pub async fn remove(&self, id: &ConnectionId) -> Option<Arc<Connection>> {
        let mut inner = self.inner.write().await;
        let connection = inner.by_id.remove(id)?;
        inner.by_user.retain(|_, conns| {
            conns.remove(id);
            !conns.is_empty()
        });
        inner.by_client.retain(|_, conns| {
            conns.remove(id);
            !conns.is_empty()
        });
        Some(connection)
    }

    /// Indexes a connection under its authenticated user.
    pub async fn link_user(&self, id: ConnectionId, user_id: UserId) {
        let mut inner = self.inner.write().await;
        if inner.by_id.contains_key(&id) {
            inner.by_user.entry(user_id).or_default().insert(id);
        }
    }

    /// Indexes a connection under its declared client id.
    pub async fn link_client(&self, id: ConnectionId, client_id: ClientId) {
        let mut inner = self.inner.write().await;
        if inner.by_id.contains_key(&id) {
            inner.by_client.entry(client_id).or_default().insert(id);
        }
    }

    /// All connections of one user.
    pub async fn get_by_user(&self, user_id: &UserId) -> Vec<Arc<Connection>> {
        let inner = self.inner.read().await;
        inner
            .by_user
            .get(user_id)
            .map(|ids| {
                ids.iter()
                    .filter_map(|id| inner.by_id.get(id).cloned())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// All connections of one client id.
    pub async fn get_by_client(&self, client_id: &ClientId) -> Vec<Arc<Connection>> {
        let inner = self.inner.read().await;
        inner
            .by_client
            .get(client_id)
            .map(|ids| {
                ids.iter()
                    .filter_map(|id| inner.by_id.get(id).cloned())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Asks every live connection to close, then clears all indexes.
    pub async fn close_all(&self, code: u16, reason: &str) {
        let mut inner = self.inner.write().await;
        info!("closing {} connections: {}", inner.by_id.len(), reason);
        for connection in inner.by_id.values() {
            connection.close(code, reason.to_string());
        }
        inner.by_id.clear();
        inner.by_user.clear();
        inner.by_client.clear();
    }

    /// Current registry counters.
    pub async fn metrics(&self) -> RegistryMetrics {
        let inner = self.inner.read().await;
        RegistryMetrics {
            connections: inner.by_id.len(),
            users: inner.by_user.len(),
            clients: inner.by_client.len(),
        }
    }
}
