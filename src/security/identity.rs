//! Caller identity and resolution from inbound requests.
//!
//! Credential verification lives outside this crate. An [`IdentityResolver`]
//! only answers "who is the authenticated principal for this request, if any".

use std::fmt;

use axum::http::{header::AUTHORIZATION, HeaderMap};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

/// Opaque, stable identifier of an authenticated principal.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Identity(String);

impl Identity {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Capability answering who the authenticated caller is.
pub trait IdentityResolver: Send + Sync {
    /// Returns `None` for unauthenticated requests.
    fn resolve(&self, headers: &HeaderMap) -> Option<Identity>;
}

/// Trusts an identity header set by the upstream authentication proxy.
#[derive(Debug, Clone)]
pub struct TrustedHeaderResolver {
    header: String,
}

impl TrustedHeaderResolver {
    pub fn new(header: impl Into<String>) -> Self {
        Self {
            header: header.into().to_ascii_lowercase(),
        }
    }
}

impl IdentityResolver for TrustedHeaderResolver {
    fn resolve(&self, headers: &HeaderMap) -> Option<Identity> {
        let value = headers.get(self.header.as_str())?.to_str().ok()?.trim();
        if value.is_empty() || !is_safe_identity(value) {
            return None;
        }
        Some(Identity::new(value))
    }
}

/// Bearer-token table populated by the session collaborator.
#[derive(Debug, Default)]
pub struct SessionTable {
    sessions: DashMap<String, Identity>,
}

impl SessionTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, token: impl Into<String>, identity: Identity) {
        self.sessions.insert(token.into(), identity);
    }

    pub fn revoke(&self, token: &str) -> bool {
        self.sessions.remove(token).is_some()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

impl IdentityResolver for SessionTable {
    fn resolve(&self, headers: &HeaderMap) -> Option<Identity> {
        let token = headers
            .get(AUTHORIZATION)?
            .to_str()
            .ok()?
            .strip_prefix("Bearer ")?
            .trim();
        self.sessions.get(token).map(|entry| entry.value().clone())
    }
}

/// Tries each resolver in order and returns the first identity found.
pub struct ChainResolver {
    resolvers: Vec<Box<dyn IdentityResolver>>,
}

impl ChainResolver {
    pub fn new(resolvers: Vec<Box<dyn IdentityResolver>>) -> Self {
        Self { resolvers }
    }
}

impl IdentityResolver for ChainResolver {
    fn resolve(&self, headers: &HeaderMap) -> Option<Identity> {
        self.resolvers.iter().find_map(|r| r.resolve(headers))
    }
}

// Identities end up in audit records and log lines.
fn is_safe_identity(value: &str) -> bool {
    value.len() <= 128
        && value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | '@' | ':'))
}
