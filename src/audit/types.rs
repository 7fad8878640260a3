//! Audit record types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::security::context::{CorrelationId, Operation, ResourceKind, SecurityContext};
use crate::security::identity::Identity;

/// Kind of security violation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ViolationKind {
    Unauthenticated,
    RateLimited,
    AccessDenied,
    SuspiciousActivity,
    InvalidSignature,
}

impl ViolationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ViolationKind::Unauthenticated => "UNAUTHENTICATED",
            ViolationKind::RateLimited => "RATE_LIMITED",
            ViolationKind::AccessDenied => "ACCESS_DENIED",
            ViolationKind::SuspiciousActivity => "SUSPICIOUS_ACTIVITY",
            ViolationKind::InvalidSignature => "INVALID_SIGNATURE",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", content = "violation", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditOutcome {
    Success,
    Violation(ViolationKind),
}

impl AuditOutcome {
    pub fn is_violation(&self) -> bool {
        matches!(self, AuditOutcome::Violation(_))
    }

    pub fn label(&self) -> &'static str {
        match self {
            AuditOutcome::Success => "SUCCESS",
            AuditOutcome::Violation(kind) => kind.as_str(),
        }
    }
}

/// One append-only audit entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditRecord {
    pub id: Uuid,
    /// Position in the sink, assigned by the writer at append time.
    #[serde(default)]
    pub sequence: u64,
    pub identity: Option<Identity>,
    pub operation: Operation,
    pub resource_kind: ResourceKind,
    pub resource_id: Option<String>,
    pub correlation_id: CorrelationId,
    pub outcome: AuditOutcome,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default)]
    pub detail: Value,
    pub timestamp: DateTime<Utc>,
}

impl AuditRecord {
    pub fn success(
        identity: Identity,
        operation: Operation,
        resource_kind: ResourceKind,
        resource_id: Option<String>,
        correlation_id: CorrelationId,
        detail: Value,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            sequence: 0,
            identity: Some(identity),
            operation,
            resource_kind,
            resource_id,
            correlation_id,
            outcome: AuditOutcome::Success,
            reason: None,
            detail,
            timestamp: Utc::now(),
        }
    }

    #[allow(clippy::too_many_arguments)]
    pub fn violation(
        kind: ViolationKind,
        operation: Operation,
        resource_kind: ResourceKind,
        reason: impl Into<String>,
        identity: Option<Identity>,
        resource_id: Option<String>,
        correlation_id: CorrelationId,
        detail: Value,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            sequence: 0,
            identity,
            operation,
            resource_kind,
            resource_id,
            correlation_id,
            outcome: AuditOutcome::Violation(kind),
            reason: Some(reason.into()),
            detail,
            timestamp: Utc::now(),
        }
    }

    /// Success entry for the operation described by `ctx`.
    pub fn success_for(ctx: &SecurityContext, resource_id: Option<String>, detail: Value) -> Self {
        Self::success(
            ctx.identity().clone(),
            ctx.operation(),
            ctx.resource_kind(),
            resource_id,
            ctx.correlation_id(),
            detail,
        )
    }

    /// Violation entry attributed to the identity in `ctx`.
    pub fn violation_for(
        ctx: &SecurityContext,
        kind: ViolationKind,
        reason: impl Into<String>,
        resource_id: Option<String>,
        detail: Value,
    ) -> Self {
        Self::violation(
            kind,
            ctx.operation(),
            ctx.resource_kind(),
            reason,
            Some(ctx.identity().clone()),
            resource_id,
            ctx.correlation_id(),
            detail,
        )
    }
}

/// Query over stored audit records. Empty filter matches everything.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuditFilter {
    pub identity: Option<Identity>,
    pub correlation_id: Option<CorrelationId>,
    pub violations_only: bool,
    /// Keep only the most recent `limit` matches.
    pub limit: Option<usize>,
}

impl AuditFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn identity(mut self, identity: Identity) -> Self {
        self.identity = Some(identity);
        self
    }

    pub fn correlation_id(mut self, correlation_id: CorrelationId) -> Self {
        self.correlation_id = Some(correlation_id);
        self
    }

    pub fn violations_only(mut self) -> Self {
        self.violations_only = true;
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn matches(&self, record: &AuditRecord) -> bool {
        if let Some(identity) = &self.identity {
            if record.identity.as_ref() != Some(identity) {
                return false;
            }
        }
        if let Some(cid) = self.correlation_id {
            if record.correlation_id != cid {
                return false;
            }
        }
        !self.violations_only || record.outcome.is_violation()
    }

    /// Filters `records` (in append order) and applies the limit.
    pub fn apply<'a, I>(&self, records: I) -> Vec<AuditRecord>
    where
        I: IntoIterator<Item = &'a AuditRecord>,
    {
        let mut matched: Vec<AuditRecord> = records
            .into_iter()
            .filter(|r| self.matches(r))
            .cloned()
            .collect();
        if let Some(limit) = self.limit {
            let skip = matched.len().saturating_sub(limit);
            matched.drain(..skip);
        }
        matched
    }
}
