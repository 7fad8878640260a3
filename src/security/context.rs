//! Per-request security context.
//!
//! Built once by the request guard and passed explicitly into every access
//! check and scoped query. Fields are private; a context cannot be altered
//! after construction.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::security::identity::Identity;

/// Operation a request intends to perform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Operation {
    Create,
    Read,
    Update,
    Delete,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Create => "CREATE",
            Operation::Read => "READ",
            Operation::Update => "UPDATE",
            Operation::Delete => "DELETE",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Closed set of tenant-owned resource kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceKind {
    Video,
    Upload,
    Job,
}

impl ResourceKind {
    pub const ALL: [ResourceKind; 3] = [ResourceKind::Video, ResourceKind::Upload, ResourceKind::Job];

    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceKind::Video => "video",
            ResourceKind::Upload => "upload",
            ResourceKind::Job => "job",
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ResourceKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ResourceKind::ALL
            .into_iter()
            .find(|k| k.as_str() == s)
            .ok_or_else(|| format!("unknown resource kind: {}", s))
    }
}

/// Request correlation id joining log lines and audit records.
///
/// UUID v7: millisecond timestamp prefix plus random suffix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CorrelationId(Uuid);

impl CorrelationId {
    pub fn generate() -> Self {
        Self(Uuid::now_v7())
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for CorrelationId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

/// Immutable authorization and audit context for one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecurityContext {
    identity: Identity,
    operation: Operation,
    resource_kind: ResourceKind,
    correlation_id: CorrelationId,
}

impl SecurityContext {
    pub fn new(
        identity: Identity,
        operation: Operation,
        resource_kind: ResourceKind,
        correlation_id: CorrelationId,
    ) -> Self {
        Self {
            identity,
            operation,
            resource_kind,
            correlation_id,
        }
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    pub fn operation(&self) -> Operation {
        self.operation
    }

    pub fn resource_kind(&self) -> ResourceKind {
        self.resource_kind
    }

    pub fn correlation_id(&self) -> CorrelationId {
        self.correlation_id
    }

    /// Same identity and correlation id, different operation and kind.
    ///
    /// Used when one request legitimately touches a second kind, such as
    /// the jobs view reading the caller's uploads.
    pub fn for_scope(&self, operation: Operation, resource_kind: ResourceKind) -> Self {
        Self {
            identity: self.identity.clone(),
            operation,
            resource_kind,
            correlation_id: self.correlation_id,
        }
    }
}
