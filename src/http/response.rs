//! Client-facing error taxonomy.
//!
//! Rejection bodies are stable and generic: a code, a fixed message and the
//! correlation id. Nothing here reveals whether a resource exists for
//! another tenant or what failed internally.

use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use crate::observability::metrics;
use crate::security::context::CorrelationId;
use crate::store::secure::{QueryError, NOT_FOUND_REASON};

pub const CORRELATION_HEADER: &str = "x-correlation-id";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ApiError {
    #[error("authentication required")]
    Unauthenticated,

    #[error("too many requests")]
    RateLimited { retry_after_ms: u64 },

    #[error("not found or access denied")]
    AccessDenied,

    #[error("not found or access denied")]
    NotFound,

    #[error("service temporarily unavailable")]
    StoreUnavailable,

    #[error("invalid signature")]
    InvalidSignature,

    #[error("stale timestamp")]
    StaleTimestamp,

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("internal error")]
    Internal,
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Unauthenticated | ApiError::InvalidSignature | ApiError::StaleTimestamp => {
                StatusCode::UNAUTHORIZED
            }
            ApiError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            ApiError::AccessDenied | ApiError::NotFound => StatusCode::NOT_FOUND,
            ApiError::StoreUnavailable => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Stable machine-readable code. Denials and misses share one code.
    pub fn code(&self) -> &'static str {
        match self {
            ApiError::Unauthenticated => "unauthenticated",
            ApiError::RateLimited { .. } => "rate_limited",
            ApiError::AccessDenied | ApiError::NotFound => "not_found",
            ApiError::StoreUnavailable => "store_unavailable",
            ApiError::InvalidSignature => "invalid_signature",
            ApiError::StaleTimestamp => "stale_timestamp",
            ApiError::BadRequest(_) => "bad_request",
            ApiError::Internal => "internal",
        }
    }

    fn message(&self) -> String {
        match self {
            ApiError::AccessDenied | ApiError::NotFound => NOT_FOUND_REASON.to_string(),
            ApiError::Unauthenticated | ApiError::InvalidSignature | ApiError::StaleTimestamp => {
                "unauthorized".to_string()
            }
            other => other.to_string(),
        }
    }

    pub fn with(self, correlation_id: CorrelationId) -> Rejection {
        Rejection::new(self, correlation_id)
    }
}

impl From<QueryError> for ApiError {
    fn from(error: QueryError) -> Self {
        match error {
            QueryError::NotFound => ApiError::NotFound,
            QueryError::StoreUnavailable(_) => ApiError::StoreUnavailable,
            QueryError::InvalidPatch(reason) => ApiError::BadRequest(reason),
            QueryError::ContextMismatch => ApiError::Internal,
        }
    }
}

/// Terminal response for a rejected request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rejection {
    pub error: ApiError,
    pub correlation_id: CorrelationId,
}

impl Rejection {
    pub fn new(error: ApiError, correlation_id: CorrelationId) -> Self {
        Self { error, correlation_id }
    }

    pub fn status(&self) -> StatusCode {
        self.error.status()
    }
}

#[derive(Serialize)]
struct RejectionBody {
    error: &'static str,
    message: String,
    correlation_id: CorrelationId,
    #[serde(skip_serializing_if = "Option::is_none")]
    retry_after_ms: Option<u64>,
}

impl IntoResponse for Rejection {
    fn into_response(self) -> Response {
        let code = self.error.code();
        metrics::record_rejection(code);

        let retry_after_ms = match self.error {
            ApiError::RateLimited { retry_after_ms } => Some(retry_after_ms),
            _ => None,
        };
        let body = RejectionBody {
            error: code,
            message: self.error.message(),
            correlation_id: self.correlation_id,
            retry_after_ms,
        };

        let mut response = (self.error.status(), Json(body)).into_response();
        if let Some(ms) = retry_after_ms {
            let secs = ms.div_ceil(1000).max(1);
            response
                .headers_mut()
                .insert(header::RETRY_AFTER, HeaderValue::from(secs));
        }
        response
    }
}

/// Result type for handlers.
pub type ApiResult<T> = Result<T, Rejection>;

/// Attaches a correlation id to fallible results.
pub trait WithCorrelation<T> {
    fn correlated(self, correlation_id: CorrelationId) -> ApiResult<T>;
}

impl<T, E: Into<ApiError>> WithCorrelation<T> for Result<T, E> {
    fn correlated(self, correlation_id: CorrelationId) -> ApiResult<T> {
        self.map_err(|e| Rejection::new(e.into(), correlation_id))
    }
}
