//! Resource-level authorization.
//!
//! The owner lookup goes through [`SecureStore`], so the check itself is
//! tenant-filtered: a resource owned by someone else simply does not exist
//! from the caller's point of view. There is no administrative bypass.

use serde_json::json;

use crate::audit::types::ViolationKind;
use crate::observability::metrics;
use crate::security::context::{Operation, SecurityContext};
use crate::security::identity::Identity;
use crate::store::resource::{Resource, ResourceId};
use crate::store::secure::{QueryError, SecureStore, NOT_FOUND_REASON};

/// Outcome of an access check. Not persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessDecision {
    pub allowed: bool,
    pub reason: Option<String>,
    /// Set when the denial came from a transient store failure.
    pub retryable: bool,
}

impl AccessDecision {
    pub fn allow() -> Self {
        Self {
            allowed: true,
            reason: None,
            retryable: false,
        }
    }

    fn deny(reason: impl Into<String>, retryable: bool) -> Self {
        Self {
            allowed: false,
            reason: Some(reason.into()),
            retryable,
        }
    }
}

#[derive(Clone)]
pub struct AccessGuard {
    store: SecureStore,
}

impl AccessGuard {
    pub fn new(store: SecureStore) -> Self {
        Self { store }
    }

    /// Decides whether `identity` may perform `operation` on resource
    /// `resource_id` of kind `R`.
    ///
    /// The arguments must agree with `ctx`; a disagreement means the caller
    /// is asking about a different principal or action than the request it
    /// is serving, which is denied and audited as suspicious. Store outages
    /// fail closed.
    pub async fn can_access<R: Resource>(
        &self,
        identity: &Identity,
        resource_id: &ResourceId,
        operation: Operation,
        ctx: &SecurityContext,
    ) -> AccessDecision {
        if identity != ctx.identity() || operation != ctx.operation() || R::KIND != ctx.resource_kind() {
            metrics::record_access_denied(R::KIND.as_str());
            tracing::warn!(
                correlation_id = %ctx.correlation_id(),
                context_identity = %ctx.identity(),
                claimed_identity = %identity,
                claimed_operation = %operation,
                claimed_kind = %R::KIND,
                "Access check does not match request context"
            );
            self.store
                .audit()
                .violation_for(
                    ctx,
                    ViolationKind::SuspiciousActivity,
                    "access check does not match request context",
                    Some(resource_id.as_str()),
                    json!({
                        "claimed_identity": identity,
                        "claimed_operation": operation,
                        "claimed_kind": R::KIND,
                    }),
                )
                .await;
            return AccessDecision::deny(NOT_FOUND_REASON, false);
        }

        match self.store.check_owned::<R>(ctx, resource_id).await {
            Ok(()) => AccessDecision::allow(),
            Err(QueryError::StoreUnavailable(_)) => AccessDecision::deny("store unavailable", true),
            Err(_) => AccessDecision::deny(NOT_FOUND_REASON, false),
        }
    }

    /// `can_access` for the identity and operation already in `ctx`.
    pub async fn authorize<R: Resource>(&self, ctx: &SecurityContext, resource_id: &ResourceId) -> Result<(), QueryError> {
        let decision = self
            .can_access::<R>(ctx.identity(), resource_id, ctx.operation(), ctx)
            .await;
        match decision {
            AccessDecision { allowed: true, .. } => Ok(()),
            AccessDecision { retryable: true, .. } => {
                Err(QueryError::StoreUnavailable("ownership lookup failed".into()))
            }
            _ => Err(QueryError::NotFound),
        }
    }
}
