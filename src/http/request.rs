//! Request preparation.
//!
//! # Responsibilities
//! - Assign every request a fresh correlation id before anything else runs
//! - Echo it back as `x-correlation-id` on every response, rejections included
//! - Resolve the peer address used to rate-limit unauthenticated callers
//!
//! # Design Decisions
//! - Client-supplied correlation ids are ignored; the audit trail joins on
//!   ids this service minted
//! - The request span carries the id so every log line inside it is joinable

use std::net::SocketAddr;

use axum::{
    body::Body,
    extract::ConnectInfo,
    http::{HeaderValue, Request},
    middleware::Next,
    response::Response,
};
use tracing::Instrument;

use crate::http::response::CORRELATION_HEADER;
use crate::security::context::CorrelationId;

pub async fn correlation_middleware(mut request: Request<Body>, next: Next) -> Response {
    let correlation_id = CorrelationId::generate();
    request.extensions_mut().insert(correlation_id);

    let span = tracing::info_span!(
        "request",
        correlation_id = %correlation_id,
        method = %request.method(),
        path = %request.uri().path(),
    );

    let mut response = next.run(request).instrument(span).await;
    if let Ok(value) = HeaderValue::from_str(&correlation_id.to_string()) {
        response.headers_mut().insert(CORRELATION_HEADER, value);
    }
    response
}

/// Peer address recorded by `into_make_service_with_connect_info`, or
/// `"unknown"` when the router is driven without a socket (tests).
pub fn client_ip<B>(request: &Request<B>) -> String {
    request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}
