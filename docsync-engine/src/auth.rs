//! Authentication predicates consumed by the server.
//!
//! Token verification and policy evaluation live outside the server core;
//! they are consumed through [`TokenVerifier`] and the two pure
//! [`Permissions`] predicates. [`StaticTokenVerifier`] is the in-process
//! implementation used by dev deployments and tests.

use async_trait::async_trait;
use docsync_types::{DocumentId, UserId};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Document permissions attached to an authenticated connection.
///
/// Entries are document-id prefixes; `"*"` grants everything.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Permissions {
    /// Prefixes of readable document ids.
    pub read: Vec<String>,
    /// Prefixes of writable document ids.
    pub write: Vec<String>,
}

impl Permissions {
    /// Grants read and write access to everything.
    #[must_use]
    pub fn all() -> Self {
        Self {
            read: vec!["*".to_string()],
            write: vec!["*".to_string()],
        }
    }

    /// True if this set of permissions allows reading the document.
    #[must_use]
    pub fn can_read(&self, id: &DocumentId) -> bool {
        Self::matches(&self.read, id)
    }

    /// True if this set of permissions allows writing the document.
    #[must_use]
    pub fn can_write(&self, id: &DocumentId) -> bool {
        Self::matches(&self.write, id)
    }

    fn matches(prefixes: &[String], id: &DocumentId) -> bool {
        prefixes
            .iter()
            .any(|prefix| prefix == "*" || id.as_str().starts_with(prefix.as_str()))
    }
}

/// The result of a successful token verification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthClaims {
    /// The authenticated user.
    pub user_id: UserId,
    /// The permissions granted to this session.
    pub permissions: Permissions,
}

/// Verifies bearer tokens and API keys. `None` means rejection.
#[async_trait]
pub trait TokenVerifier: Send + Sync {
    /// Verifies a bearer token.
    async fn verify_token(&self, token: &str) -> Option<AuthClaims>;

    /// Verifies an API key. Backends without API keys inherit the default
    /// rejection.
    async fn verify_api_key(&self, _api_key: &str) -> Option<AuthClaims> {
        None
    }
}

/// Verifier backed by a static token map. Dev and test use only.
#[derive(Debug, Default)]
pub struct StaticTokenVerifier {
    tokens: HashMap<String, AuthClaims>,
    api_keys: HashMap<String, AuthClaims>,
}

impl StaticTokenVerifier {
    /// Creates an empty verifier that rejects everything.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a token with its claims.
    pub fn add_token(&mut self, token: impl Into<String>, claims: AuthClaims) {
        self.tokens.insert(token.into(), claims);
    }

    /// Registers an API key with its claims.
    pub fn add_api_key(&mut self, api_key: impl Into<String>, claims: AuthClaims) {
        self.api_keys.insert(api_key.into(), claims);
    }
}

#[async_trait]
impl TokenVerifier for StaticTokenVerifier {
    async fn verify_token(&self, token: &str) -> Option<AuthClaims> {
        self.tokens.get(token).cloned()
    }

    async fn verify_api_key(&self, api_key: &str) -> Option<AuthClaims> {
        self.api_keys.get(api_key).cloned()
    }
}
