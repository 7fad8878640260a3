use axum::{
    extract::{Query, State},
    Extension, Json,
};
use serde::Serialize;

use crate::audit::types::{AuditFilter, AuditRecord};
use crate::http::response::{ApiError, ApiResult};
use crate::http::server::AppState;
use crate::security::context::CorrelationId;

const DEFAULT_AUDIT_LIMIT: usize = 100;
const MAX_AUDIT_LIMIT: usize = 1000;

#[derive(Serialize)]
pub struct SystemStatus {
    pub version: &'static str,
    pub status: &'static str,
    pub audit_sink: String,
    pub audit_enqueued: u64,
    pub audit_written: u64,
    pub audit_failed_writes: u64,
    pub rate_limit_windows: usize,
}

pub async fn get_status(State(state): State<AppState>) -> Json<SystemStatus> {
    Json(SystemStatus {
        version: env!("CARGO_PKG_VERSION"),
        status: "operational",
        audit_sink: state.audit.sink_name().to_string(),
        audit_enqueued: state.audit.enqueued(),
        audit_written: state.audit.written(),
        audit_failed_writes: state.audit.failed_writes(),
        rate_limit_windows: state.limiter.tracked_windows(),
    })
}

/// Audit records matching the query string, most recent last.
pub async fn get_audit(
    State(state): State<AppState>,
    Extension(cid): Extension<CorrelationId>,
    Query(mut filter): Query<AuditFilter>,
) -> ApiResult<Json<Vec<AuditRecord>>> {
    let limit = filter.limit.unwrap_or(DEFAULT_AUDIT_LIMIT).min(MAX_AUDIT_LIMIT);
    filter.limit = Some(limit);

    // Records enqueued by earlier requests should be visible.
    state.audit.flush().await;
    match state.audit.query(&filter).await {
        Ok(records) => Ok(Json(records)),
        Err(e) => {
            tracing::error!(correlation_id = %cid, error = %e, "Audit query failed");
            Err(ApiError::StoreUnavailable.with(cid))
        }
    }
}
