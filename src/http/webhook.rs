//! Transcode callback endpoint.
//!
//! The workflow engine has no user session, so callbacks are limited per
//! source address on the webhook window and authenticated by signature.
//! Once verified, the job update still goes through the secure store under
//! the owner named in the payload, so a callback can only touch a job that
//! owner actually has.

use axum::{
    body::{to_bytes, Body},
    extract::State,
    http::Request,
    Extension, Json,
};
use serde::Deserialize;
use serde_json::json;

use crate::audit::types::ViolationKind;
use crate::http::request::client_ip;
use crate::http::response::{ApiError, ApiResult, WithCorrelation};
use crate::http::server::AppState;
use crate::security::context::{CorrelationId, Operation, ResourceKind, SecurityContext};
use crate::security::identity::Identity;
use crate::security::rate_limit::RouteClass;
use crate::store::query::Patch;
use crate::store::resource::{JobStatus, ProcessingJob, ResourceId};

#[derive(Debug, Clone, Deserialize)]
pub struct TranscodeCallback {
    pub job_id: ResourceId,
    pub owner_id: Identity,
    pub status: JobStatus,
    #[serde(default)]
    pub output_url: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
}

impl TranscodeCallback {
    fn patch(&self) -> Patch {
        let mut patch = Patch::new().set("status", json!(self.status));
        if let Some(url) = &self.output_url {
            patch = patch.set("output_url", json!(url));
        }
        if let Some(error) = &self.error {
            patch = patch.set("error", json!(error));
        }
        patch
    }
}

pub async fn transcode_callback(
    State(state): State<AppState>,
    Extension(cid): Extension<CorrelationId>,
    request: Request<Body>,
) -> ApiResult<Json<ProcessingJob>> {
    let Some(verifier) = state.webhook.clone() else {
        return Err(ApiError::NotFound.with(cid));
    };

    let source = client_ip(&request);
    let window = state.config.rate_limit.for_class(RouteClass::Webhook);
    let decision = state
        .limiter
        .check_and_consume(&format!("webhook:{source}"), RouteClass::Webhook, window);
    if !decision.allowed {
        let retry_after_ms = decision.retry_after_ms.unwrap_or(window.window_ms);
        return Err(ApiError::RateLimited { retry_after_ms }.with(cid));
    }

    let (parts, body) = request.into_parts();
    let body = to_bytes(body, state.config.limits.max_body_bytes)
        .await
        .map_err(|_| ApiError::BadRequest("body too large".into()).with(cid))?;

    if let Err(e) = verifier.verify(&parts.headers, &body) {
        let (kind, error) = if e.is_stale() {
            (ViolationKind::SuspiciousActivity, ApiError::StaleTimestamp)
        } else {
            (ViolationKind::InvalidSignature, ApiError::InvalidSignature)
        };
        tracing::warn!(correlation_id = %cid, source = %source, error = %e, "Webhook verification failed");
        state
            .audit
            .log_violation(
                kind,
                Operation::Update,
                ResourceKind::Job,
                &e.to_string(),
                None,
                None,
                cid,
                json!({ "source": source }),
            )
            .await;
        return Err(error.with(cid));
    }

    let callback: TranscodeCallback = serde_json::from_slice(&body)
        .map_err(|e| ApiError::BadRequest(format!("invalid callback: {e}")).with(cid))?;

    let ctx = SecurityContext::new(callback.owner_id.clone(), Operation::Update, ResourceKind::Job, cid);
    let job = state
        .store
        .update::<ProcessingJob>(&ctx, &callback.job_id, callback.patch())
        .await
        .correlated(cid)?;

    tracing::info!(
        correlation_id = %cid,
        job_id = %job.id,
        status = ?job.status,
        "Transcode callback applied"
    );
    Ok(Json(job))
}
