//! Owner-scoped data access.
//!
//! Every read attaches the caller's identity as a mandatory predicate and
//! every mutation names the owner in the same store call that changes the
//! row. A record that is missing and a record owned by someone else both
//! surface as [`QueryError::NotFound`]; the difference is kept in the audit
//! entry only.

use std::future::Future;
use std::sync::Arc;

use chrono::Utc;
use serde_json::json;

use crate::audit::logger::AuditLogger;
use crate::audit::types::ViolationKind;
use crate::observability::metrics;
use crate::security::context::{Operation, SecurityContext};
use crate::store::query::{Filter, Patch, ScopedQuery};
use crate::store::resource::{Resource, ResourceId, StoreRegistry};
use crate::store::StoreError;

/// Reason string shared by every not-found denial.
pub const NOT_FOUND_REASON: &str = "not found or access denied";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum QueryError {
    #[error("not found or access denied")]
    NotFound,

    /// Transient backend failure; the caller may retry.
    #[error("store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("invalid patch: {0}")]
    InvalidPatch(String),

    #[error("security context does not cover this operation")]
    ContextMismatch,
}

impl QueryError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, QueryError::StoreUnavailable(_))
    }
}

impl From<StoreError> for QueryError {
    fn from(error: StoreError) -> Self {
        match error {
            StoreError::Unavailable(msg) => QueryError::StoreUnavailable(msg),
            StoreError::Conflict(id) => QueryError::StoreUnavailable(format!("id collision on {id}")),
            StoreError::InvalidRecord(msg) => QueryError::InvalidPatch(msg),
        }
    }
}

/// The only path from request handlers to tenant data.
#[derive(Clone)]
pub struct SecureStore {
    registry: Arc<StoreRegistry>,
    audit: AuditLogger,
}

impl SecureStore {
    pub fn new(registry: Arc<StoreRegistry>, audit: AuditLogger) -> Self {
        Self { registry, audit }
    }

    pub fn audit(&self) -> &AuditLogger {
        &self.audit
    }

    /// Records of kind `R` owned by the caller and matching `filter`.
    pub async fn find<R: Resource>(&self, ctx: &SecurityContext, filter: &Filter) -> Result<Vec<R>, QueryError> {
        ensure_scope::<R>(ctx, None)?;

        let query = ScopedQuery::new(ctx.identity(), R::KIND, filter);
        let rows = R::store(&self.registry)
            .select(query)
            .await
            .map_err(|e| store_failure::<R>(ctx, e))?;

        self.audit
            .success_for(ctx, None, json!({ "count": rows.len() }))
            .await;
        Ok(rows)
    }

    /// A single owned record, or `NotFound` (audited as a denial).
    pub async fn find_one<R: Resource>(&self, ctx: &SecurityContext, id: &ResourceId) -> Result<R, QueryError> {
        ensure_scope::<R>(ctx, None)?;

        match R::store(&self.registry)
            .select_one(ctx.identity(), id)
            .await
            .map_err(|e| store_failure::<R>(ctx, e))?
        {
            Some(record) => {
                self.audit.success_for(ctx, Some(id.as_str()), json!({})).await;
                Ok(record)
            }
            None => Err(self.deny::<R>(ctx, id).await),
        }
    }

    /// Confirms ownership without producing a success entry.
    pub async fn check_owned<R: Resource>(&self, ctx: &SecurityContext, id: &ResourceId) -> Result<(), QueryError> {
        ensure_scope::<R>(ctx, None)?;

        match R::store(&self.registry)
            .select_one(ctx.identity(), id)
            .await
            .map_err(|e| store_failure::<R>(ctx, e))?
        {
            Some(_) => Ok(()),
            None => Err(self.deny::<R>(ctx, id).await),
        }
    }

    /// Creates a record owned by the caller. The owner is always the
    /// context identity; drafts carry no owner field.
    ///
    /// Mutations wait for their audit record to be persisted, bounded by the
    /// logger's confirmation timeout, and return the store result either way.
    pub async fn insert<R: Resource>(&self, ctx: &SecurityContext, draft: R::Draft) -> Result<R, QueryError> {
        ensure_scope::<R>(ctx, Some(Operation::Create))?;

        let this = self.clone();
        let ctx = ctx.clone();
        detached(async move {
            let record = R::from_draft(ResourceId::generate(), ctx.identity().clone(), draft, Utc::now());
            R::store(&this.registry)
                .insert(record.clone())
                .await
                .map_err(|e| store_failure::<R>(&ctx, e))?;
            this.audit
                .confirm_success_for(&ctx, Some(record.id().as_str()), json!({}))
                .await;
            Ok(record)
        })
        .await
    }

    /// Applies `patch` to an owned record. Ownership is checked inside the
    /// store's update, never in a separate read beforehand.
    pub async fn update<R: Resource>(
        &self,
        ctx: &SecurityContext,
        id: &ResourceId,
        patch: Patch,
    ) -> Result<R, QueryError> {
        ensure_scope::<R>(ctx, Some(Operation::Update))?;
        if patch.is_empty() {
            return Err(QueryError::InvalidPatch("no fields to update".into()));
        }
        if let Some(field) = patch.first_disallowed(R::MUTABLE_FIELDS) {
            return Err(QueryError::InvalidPatch(format!("field `{field}` cannot be changed")));
        }

        let this = self.clone();
        let ctx = ctx.clone();
        let id = id.clone();
        detached(async move {
            let updated = R::store(&this.registry)
                .update_owned(ctx.identity(), &id, &patch, Utc::now())
                .await
                .map_err(|e| store_failure::<R>(&ctx, e))?;
            match updated {
                Some(record) => {
                    let fields: Vec<&String> = patch.fields().map(|(k, _)| k).collect();
                    this.audit
                        .confirm_success_for(&ctx, Some(id.as_str()), json!({ "fields": fields }))
                        .await;
                    Ok(record)
                }
                None => Err(this.deny::<R>(&ctx, &id).await),
            }
        })
        .await
    }

    /// Removes an owned record and returns it.
    pub async fn delete<R: Resource>(&self, ctx: &SecurityContext, id: &ResourceId) -> Result<R, QueryError> {
        ensure_scope::<R>(ctx, Some(Operation::Delete))?;

        let this = self.clone();
        let ctx = ctx.clone();
        let id = id.clone();
        detached(async move {
            let removed = R::store(&this.registry)
                .delete_owned(ctx.identity(), &id)
                .await
                .map_err(|e| store_failure::<R>(&ctx, e))?;
            match removed {
                Some(record) => {
                    this.audit
                        .confirm_success_for(&ctx, Some(id.as_str()), json!({}))
                        .await;
                    Ok(record)
                }
                None => Err(this.deny::<R>(&ctx, &id).await),
            }
        })
        .await
    }

    /// Audits a not-found outcome and returns the uniform error.
    async fn deny<R: Resource>(&self, ctx: &SecurityContext, id: &ResourceId) -> QueryError {
        let cause = match R::store(&self.registry).owner_of(id).await {
            Ok(None) => "missing",
            Ok(Some(owner)) if &owner == ctx.identity() => "changed_concurrently",
            Ok(Some(_)) => "foreign_owner",
            Err(_) => "unknown",
        };

        metrics::record_access_denied(R::KIND.as_str());
        tracing::warn!(
            identity = %ctx.identity(),
            operation = %ctx.operation(),
            resource_kind = %R::KIND,
            resource_id = %id,
            correlation_id = %ctx.correlation_id(),
            cause,
            "Access denied"
        );
        self.audit
            .violation_for(
                ctx,
                ViolationKind::AccessDenied,
                NOT_FOUND_REASON,
                Some(id.as_str()),
                json!({ "cause": cause }),
            )
            .await;
        QueryError::NotFound
    }
}

fn ensure_scope<R: Resource>(ctx: &SecurityContext, operation: Option<Operation>) -> Result<(), QueryError> {
    let kind_ok = ctx.resource_kind() == R::KIND;
    let op_ok = operation.map_or(true, |op| ctx.operation() == op);
    if kind_ok && op_ok {
        return Ok(());
    }
    tracing::error!(
        correlation_id = %ctx.correlation_id(),
        context_operation = %ctx.operation(),
        context_kind = %ctx.resource_kind(),
        requested_kind = %R::KIND,
        "Security context does not match data access"
    );
    Err(QueryError::ContextMismatch)
}

fn store_failure<R: Resource>(ctx: &SecurityContext, error: StoreError) -> QueryError {
    tracing::warn!(
        correlation_id = %ctx.correlation_id(),
        resource_kind = %R::KIND,
        error = %error,
        "Store call failed"
    );
    error.into()
}

/// Runs a mutation on its own task so it finishes even if the request is dropped.
async fn detached<T, F>(mutation: F) -> Result<T, QueryError>
where
    T: Send + 'static,
    F: Future<Output = Result<T, QueryError>> + Send + 'static,
{
    tokio::spawn(mutation)
        .await
        .map_err(|e| QueryError::StoreUnavailable(format!("mutation task failed: {e}")))?
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use crate::audit::sink::MemoryAuditSink;
    use crate::audit::types::AuditOutcome;
    use crate::resilience::RetryPolicy;
    use crate::security::context::{CorrelationId, ResourceKind};
    use crate::security::identity::Identity;
    use crate::store::memory::InMemoryStore;
    use crate::store::resource::{ProcessingJob, Upload, Video, VideoDraft};

    struct Fixture {
        store: SecureStore,
        sink: MemoryAuditSink,
        videos: Arc<InMemoryStore<Video>>,
    }

    fn fixture() -> Fixture {
        let sink = MemoryAuditSink::new();
        let (audit, _writer) = AuditLogger::spawn(Arc::new(sink.clone()), 64, RetryPolicy::new(1, 1, 1));
        fixture_with(sink, audit)
    }

    fn fixture_with(sink: MemoryAuditSink, audit: AuditLogger) -> Fixture {
        let videos = Arc::new(InMemoryStore::<Video>::new());
        let registry = StoreRegistry {
            videos: videos.clone(),
            uploads: Arc::new(InMemoryStore::<Upload>::new()),
            jobs: Arc::new(InMemoryStore::<ProcessingJob>::new()),
        };
        Fixture {
            store: SecureStore::new(Arc::new(registry), audit),
            sink,
            videos,
        }
    }

    fn ctx(user: &str, operation: Operation) -> SecurityContext {
        SecurityContext::new(Identity::new(user), operation, ResourceKind::Video, CorrelationId::generate())
    }

    fn draft(title: &str) -> VideoDraft {
        VideoDraft {
            title: title.into(),
            description: None,
            source_url: None,
            duration_secs: None,
        }
    }

    #[tokio::test]
    async fn test_find_only_returns_own_records() {
        let f = fixture();
        f.store.insert::<Video>(&ctx("alice", Operation::Create), draft("a1")).await.unwrap();
        f.store.insert::<Video>(&ctx("alice", Operation::Create), draft("a2")).await.unwrap();
        f.store.insert::<Video>(&ctx("bob", Operation::Create), draft("b1")).await.unwrap();

        let mine: Vec<Video> = f.store.find(&ctx("alice", Operation::Read), &Filter::new()).await.unwrap();
        assert_eq!(mine.len(), 2);
        assert!(mine.iter().all(|v| v.owner.as_str() == "alice"));
    }

    #[tokio::test]
    async fn test_missing_and_foreign_are_indistinguishable() {
        let f = fixture();
        let bobs: Video = f.store.insert(&ctx("bob", Operation::Create), draft("b1")).await.unwrap();

        let foreign = f.store.find_one::<Video>(&ctx("alice", Operation::Read), &bobs.id).await;
        let missing = f
            .store
            .find_one::<Video>(&ctx("alice", Operation::Read), &ResourceId::new("nope"))
            .await;
        assert_eq!(foreign.unwrap_err(), QueryError::NotFound);
        assert_eq!(missing.unwrap_err(), QueryError::NotFound);

        f.store.audit().flush().await;
        let causes: Vec<_> = f
            .sink
            .records()
            .into_iter()
            .filter(|r| r.outcome == AuditOutcome::Violation(ViolationKind::AccessDenied))
            .map(|r| r.detail["cause"].clone())
            .collect();
        assert_eq!(causes, vec![json!("foreign_owner"), json!("missing")]);
    }

    #[tokio::test]
    async fn test_foreign_update_and_delete_leave_record_untouched() {
        let f = fixture();
        let bobs: Video = f.store.insert(&ctx("bob", Operation::Create), draft("keep")).await.unwrap();

        let patch = Patch::new().set("title", json!("hijacked"));
        let updated = f.store.update::<Video>(&ctx("alice", Operation::Update), &bobs.id, patch).await;
        let deleted = f.store.delete::<Video>(&ctx("alice", Operation::Delete), &bobs.id).await;

        assert_eq!(updated.unwrap_err(), QueryError::NotFound);
        assert_eq!(deleted.unwrap_err(), QueryError::NotFound);
        let rows = f.videos.snapshot();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].title, "keep");
    }

    #[tokio::test]
    async fn test_patch_cannot_reassign_owner() {
        let f = fixture();
        let mine: Video = f.store.insert(&ctx("alice", Operation::Create), draft("a")).await.unwrap();

        let patch = Patch::new().set("owner_id", json!("bob"));
        let result = f.store.update::<Video>(&ctx("alice", Operation::Update), &mine.id, patch).await;
        assert!(matches!(result, Err(QueryError::InvalidPatch(_))));
        assert_eq!(f.videos.snapshot()[0].owner.as_str(), "alice");
    }

    #[tokio::test]
    async fn test_context_must_match_kind_and_operation() {
        let f = fixture();
        let read_ctx = ctx("alice", Operation::Read);
        assert_eq!(
            f.store.insert::<Video>(&read_ctx, draft("x")).await.unwrap_err(),
            QueryError::ContextMismatch
        );

        let upload_ctx =
            SecurityContext::new(Identity::new("alice"), Operation::Read, ResourceKind::Upload, CorrelationId::generate());
        assert_eq!(
            f.store.find::<Video>(&upload_ctx, &Filter::new()).await.unwrap_err(),
            QueryError::ContextMismatch
        );
    }

    #[tokio::test]
    async fn test_store_outage_is_retryable() {
        let f = fixture();
        f.videos.set_available(false);
        let err = f
            .store
            .find::<Video>(&ctx("alice", Operation::Read), &Filter::new())
            .await
            .unwrap_err();
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_successful_mutation_is_audited() {
        let f = fixture();
        let c = ctx("alice", Operation::Create);
        let video: Video = f.store.insert(&c, draft("a")).await.unwrap();
        f.store.audit().flush().await;

        let records = f.sink.records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].outcome, AuditOutcome::Success);
        assert_eq!(records[0].correlation_id, c.correlation_id());
        assert_eq!(records[0].resource_id.as_deref(), Some(video.id.as_str()));
    }

    #[tokio::test]
    async fn test_mutation_returns_after_audit_is_persisted() {
        let f = fixture();
        let video: Video = f.store.insert(&ctx("alice", Operation::Create), draft("a")).await.unwrap();

        let records = f.sink.records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].resource_id.as_deref(), Some(video.id.as_str()));
    }

    #[tokio::test]
    async fn test_stalled_audit_writer_does_not_block_or_lose_count() {
        let sink = MemoryAuditSink::new();
        let (audit, writer) = AuditLogger::new(Arc::new(sink.clone()), 64, RetryPolicy::new(1, 1, 1));
        let audit = audit.with_confirm_timeout(Duration::from_millis(20));
        let f = fixture_with(sink, audit);

        let video: Video = f.store.insert(&ctx("alice", Operation::Create), draft("a")).await.unwrap();
        assert_eq!(f.videos.snapshot()[0].id, video.id);
        assert_eq!(f.store.audit().failed_writes(), 1);
        assert!(f.sink.is_empty());

        drop(writer);
        assert_eq!(f.store.audit().failed_writes(), 1);
    }
}
