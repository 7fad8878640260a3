use axum::{
    body::Body,
    extract::State,
    http::{header, Request},
    middleware::Next,
    response::{IntoResponse, Response},
};
use sha2::{Digest, Sha256};

use crate::http::response::ApiError;
use crate::http::server::AppState;
use crate::security::context::CorrelationId;

/// Requires `Authorization: Bearer <admin.api_key>`.
///
/// Keys are compared as SHA-256 digests so the comparison time does not
/// depend on how many leading bytes match.
pub async fn admin_auth_middleware(State(state): State<AppState>, request: Request<Body>, next: Next) -> Response {
    let presented = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "));

    if let Some(key) = presented {
        if Sha256::digest(key.as_bytes()) == Sha256::digest(state.config.admin.api_key.as_bytes()) {
            return next.run(request).await;
        }
    }

    let correlation_id = request
        .extensions()
        .get::<CorrelationId>()
        .copied()
        .unwrap_or_else(CorrelationId::generate);
    tracing::warn!(correlation_id = %correlation_id, "Rejected admin request");
    ApiError::Unauthenticated.with(correlation_id).into_response()
}
