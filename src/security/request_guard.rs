//! Per-request entry point: authenticate, rate-limit, build the context.
//!
//! Steps run in order and stop at the first failure. Failures come back as
//! a ready [`Rejection`]; nothing here panics or escapes as an error type
//! the handler would have to translate.

use std::sync::Arc;

use axum::http::HeaderMap;
use serde_json::json;

use crate::audit::logger::AuditLogger;
use crate::audit::types::ViolationKind;
use crate::config::{RateLimitConfig, WindowConfig};
use crate::http::response::{ApiError, Rejection};
use crate::security::context::{CorrelationId, Operation, ResourceKind, SecurityContext};
use crate::security::identity::{Identity, IdentityResolver};
use crate::security::rate_limit::{RateLimiter, RouteClass};

/// What a route does, and which limit applies to it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RoutePolicy {
    pub class: RouteClass,
    pub operation: Operation,
    pub resource_kind: ResourceKind,
}

impl RoutePolicy {
    pub const fn new(class: RouteClass, operation: Operation, resource_kind: ResourceKind) -> Self {
        Self {
            class,
            operation,
            resource_kind,
        }
    }
}

/// A request that passed the guard.
#[derive(Debug, Clone)]
pub struct Authenticated {
    pub context: SecurityContext,
    pub identity: Identity,
    pub correlation_id: CorrelationId,
}

#[derive(Clone)]
pub struct RequestGuard {
    resolver: Arc<dyn IdentityResolver>,
    limiter: Arc<RateLimiter>,
    limits: Arc<RateLimitConfig>,
    audit: AuditLogger,
}

impl RequestGuard {
    pub fn new(
        resolver: Arc<dyn IdentityResolver>,
        limiter: Arc<RateLimiter>,
        limits: RateLimitConfig,
        audit: AuditLogger,
    ) -> Self {
        Self {
            resolver,
            limiter,
            limits: Arc::new(limits),
            audit,
        }
    }

    /// Authenticates the caller and counts the request against its window.
    ///
    /// `rate_limit` overrides the configured window for `policy.class`.
    /// Anonymous callers are rejected without an audit entry. Rate-limit
    /// denials on strict routes are audited; on other routes they only
    /// show up in logs and metrics.
    pub async fn authenticate(
        &self,
        headers: &HeaderMap,
        correlation_id: CorrelationId,
        policy: RoutePolicy,
        rate_limit: Option<&WindowConfig>,
    ) -> Result<Authenticated, Rejection> {
        let Some(identity) = self.resolver.resolve(headers) else {
            tracing::info!(
                correlation_id = %correlation_id,
                resource_kind = %policy.resource_kind,
                "Rejected unauthenticated request"
            );
            return Err(Rejection::new(ApiError::Unauthenticated, correlation_id));
        };

        let window = rate_limit.unwrap_or_else(|| self.limits.for_class(policy.class));
        let decision = self
            .limiter
            .check_and_consume(identity.as_str(), policy.class, window);

        if !decision.allowed {
            let retry_after_ms = decision.retry_after_ms.unwrap_or(window.window_ms);
            if policy.class == RouteClass::Strict {
                self.audit
                    .log_violation(
                        ViolationKind::RateLimited,
                        policy.operation,
                        policy.resource_kind,
                        "too many requests",
                        Some(&identity),
                        None,
                        correlation_id,
                        json!({
                            "route_class": policy.class.as_str(),
                            "retry_after_ms": retry_after_ms,
                        }),
                    )
                    .await;
            }
            return Err(Rejection::new(ApiError::RateLimited { retry_after_ms }, correlation_id));
        }

        let context = SecurityContext::new(identity.clone(), policy.operation, policy.resource_kind, correlation_id);
        Ok(Authenticated {
            context,
            identity,
            correlation_id,
        })
    }
}
