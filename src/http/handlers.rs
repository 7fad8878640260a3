//! Resource handlers.
//!
//! One generic handler per verb, instantiated per resource kind in the
//! router. Each handler runs the same sequence: request guard, optional
//! access guard, secure store call. Bodies and query strings are parsed only
//! after the guard so an anonymous caller never learns anything from a 400.

use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode, Uri},
    Extension, Json,
};
use chrono::Duration;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::http::response::{ApiError, ApiResult, WithCorrelation};
use crate::http::server::AppState;
use crate::media::{match_jobs_to_uploads, MATCH_WINDOW_SECS};
use crate::security::context::{CorrelationId, Operation, ResourceKind};
use crate::security::rate_limit::RouteClass;
use crate::security::request_guard::RoutePolicy;
use crate::store::query::{Direction, Filter, Patch};
use crate::store::resource::{ProcessingJob, Resource, ResourceId, Upload};

const MAX_PAGE: usize = 500;

/// Deletes and upload creation are high-risk and use the strict window.
pub fn policy_for<R: Resource>(operation: Operation) -> RoutePolicy {
    let class = match (operation, R::KIND) {
        (Operation::Delete, _) | (Operation::Create, ResourceKind::Upload) => RouteClass::Strict,
        _ => RouteClass::Default,
    };
    RoutePolicy::new(class, operation, R::KIND)
}

#[derive(Debug, Default, Deserialize)]
pub struct ListParams {
    pub status: Option<String>,
    /// Sort by `created_at`.
    pub order: Option<Direction>,
    pub limit: Option<usize>,
}

impl ListParams {
    fn from_uri(uri: &Uri) -> Result<Self, ApiError> {
        Query::<Self>::try_from_uri(uri)
            .map(|Query(params)| params)
            .map_err(|e| ApiError::BadRequest(format!("invalid query: {}", e.body_text())))
    }

    pub fn filter(&self) -> Filter {
        let mut filter = Filter::new().limit(self.limit.unwrap_or(MAX_PAGE).min(MAX_PAGE));
        if let Some(status) = &self.status {
            filter = filter.eq("status", json!(status));
        }
        if let Some(direction) = self.order {
            filter = filter.order_by("created_at", direction);
        }
        filter
    }
}

fn parse_body<T: serde::de::DeserializeOwned>(body: &Bytes) -> Result<T, ApiError> {
    serde_json::from_slice(body).map_err(|e| ApiError::BadRequest(format!("invalid body: {e}")))
}

pub async fn health() -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

pub async fn list<R: Resource>(
    State(state): State<AppState>,
    Extension(cid): Extension<CorrelationId>,
    headers: HeaderMap,
    uri: Uri,
) -> ApiResult<Json<Vec<R>>> {
    let auth = state
        .guard
        .authenticate(&headers, cid, policy_for::<R>(Operation::Read), None)
        .await?;
    let params = ListParams::from_uri(&uri).correlated(cid)?;
    let rows = state
        .store
        .find::<R>(&auth.context, &params.filter())
        .await
        .correlated(cid)?;
    Ok(Json(rows))
}

pub async fn create<R: Resource>(
    State(state): State<AppState>,
    Extension(cid): Extension<CorrelationId>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<(StatusCode, Json<R>)> {
    let auth = state
        .guard
        .authenticate(&headers, cid, policy_for::<R>(Operation::Create), None)
        .await?;
    let draft: R::Draft = parse_body(&body).correlated(cid)?;
    let record = state.store.insert::<R>(&auth.context, draft).await.correlated(cid)?;
    Ok((StatusCode::CREATED, Json(record)))
}

pub async fn get_one<R: Resource>(
    State(state): State<AppState>,
    Extension(cid): Extension<CorrelationId>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> ApiResult<Json<R>> {
    let auth = state
        .guard
        .authenticate(&headers, cid, policy_for::<R>(Operation::Read), None)
        .await?;
    let record = state
        .store
        .find_one::<R>(&auth.context, &ResourceId::new(id))
        .await
        .correlated(cid)?;
    Ok(Json(record))
}

pub async fn update<R: Resource>(
    State(state): State<AppState>,
    Extension(cid): Extension<CorrelationId>,
    headers: HeaderMap,
    Path(id): Path<String>,
    body: Bytes,
) -> ApiResult<Json<R>> {
    let auth = state
        .guard
        .authenticate(&headers, cid, policy_for::<R>(Operation::Update), None)
        .await?;
    let id = ResourceId::new(id);
    state.access.authorize::<R>(&auth.context, &id).await.correlated(cid)?;

    let patch: Patch = parse_body(&body).correlated(cid)?;
    let record = state
        .store
        .update::<R>(&auth.context, &id, patch)
        .await
        .correlated(cid)?;
    Ok(Json(record))
}

pub async fn delete<R: Resource>(
    State(state): State<AppState>,
    Extension(cid): Extension<CorrelationId>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> ApiResult<StatusCode> {
    let auth = state
        .guard
        .authenticate(&headers, cid, policy_for::<R>(Operation::Delete), None)
        .await?;
    let id = ResourceId::new(id);
    state.access.authorize::<R>(&auth.context, &id).await.correlated(cid)?;

    state.store.delete::<R>(&auth.context, &id).await.correlated(cid)?;
    Ok(StatusCode::NO_CONTENT)
}

/// A job plus the upload it most likely came from.
#[derive(Debug, Serialize)]
pub struct JobView {
    #[serde(flatten)]
    pub job: ProcessingJob,
    pub upload_id: Option<ResourceId>,
}

/// Lists the caller's jobs, each annotated with a best-effort `upload_id`.
pub async fn list_jobs(
    State(state): State<AppState>,
    Extension(cid): Extension<CorrelationId>,
    headers: HeaderMap,
    uri: Uri,
) -> ApiResult<Json<Vec<JobView>>> {
    let auth = state
        .guard
        .authenticate(&headers, cid, policy_for::<ProcessingJob>(Operation::Read), None)
        .await?;
    let params = ListParams::from_uri(&uri).correlated(cid)?;

    let jobs = state
        .store
        .find::<ProcessingJob>(&auth.context, &params.filter())
        .await
        .correlated(cid)?;
    let upload_ctx = auth.context.for_scope(Operation::Read, ResourceKind::Upload);
    let uploads = state
        .store
        .find::<Upload>(&upload_ctx, &Filter::new())
        .await
        .correlated(cid)?;

    let views = match_jobs_to_uploads(&jobs, &uploads, Duration::seconds(MATCH_WINDOW_SECS))
        .into_iter()
        .map(|m| JobView {
            job: m.job.clone(),
            upload_id: m.upload.map(|u| u.id.clone()),
        })
        .collect();
    Ok(Json(views))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::resource::Video;

    #[test]
    fn test_route_classes() {
        assert_eq!(policy_for::<Video>(Operation::Delete).class, RouteClass::Strict);
        assert_eq!(policy_for::<Upload>(Operation::Create).class, RouteClass::Strict);
        assert_eq!(policy_for::<Video>(Operation::Create).class, RouteClass::Default);
        assert_eq!(policy_for::<ProcessingJob>(Operation::Read).resource_kind, ResourceKind::Job);
    }

    #[test]
    fn test_list_params_cap_limit() {
        let params = ListParams {
            status: Some("ready".into()),
            order: Some(Direction::Desc),
            limit: Some(10_000),
        };
        let filter = params.filter();
        assert_eq!(filter.limit, Some(MAX_PAGE));
        assert_eq!(filter.conditions[0].value, json!("ready"));
        assert_eq!(filter.order.unwrap().direction, Direction::Desc);
    }

    #[test]
    fn test_list_params_from_uri() {
        let params = ListParams::from_uri(&"/api/videos?status=ready&limit=5".parse().unwrap()).unwrap();
        assert_eq!(params.status.as_deref(), Some("ready"));
        assert_eq!(params.limit, Some(5));

        let err = ListParams::from_uri(&"/api/videos?order=sideways".parse().unwrap()).unwrap_err();
        assert!(matches!(err, ApiError::BadRequest(_)));
    }
}
