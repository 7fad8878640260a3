//! Metrics collection and exposition.
//!
//! # Metrics
//! - `reel_guard_requests_rejected_total` (counter): rejections by reason
//! - `reel_guard_rate_limited_total` (counter): denials by route class
//! - `reel_guard_access_denied_total` (counter): not-found denials by kind
//! - `reel_guard_audit_records_total` (counter): enqueued records by outcome
//! - `reel_guard_audit_write_failures_total` (counter): records lost after retries
//!
//! Recording is a no-op until [`init_metrics`] installs the Prometheus
//! recorder, so library users and tests pay nothing.

use std::net::SocketAddr;

use metrics::{counter, describe_counter};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

pub const METRIC_REQUESTS_REJECTED: &str = "reel_guard_requests_rejected_total";
pub const METRIC_RATE_LIMITED: &str = "reel_guard_rate_limited_total";
pub const METRIC_ACCESS_DENIED: &str = "reel_guard_access_denied_total";
pub const METRIC_AUDIT_RECORDS: &str = "reel_guard_audit_records_total";
pub const METRIC_AUDIT_WRITE_FAILURES: &str = "reel_guard_audit_write_failures_total";

/// Installs the Prometheus recorder and its scrape listener.
pub fn init_metrics(addr: SocketAddr) -> Result<(), BuildError> {
    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;

    describe_counter!(METRIC_REQUESTS_REJECTED, "Requests rejected before reaching a handler");
    describe_counter!(METRIC_RATE_LIMITED, "Requests denied by the rate limiter");
    describe_counter!(METRIC_ACCESS_DENIED, "Data accesses denied as not found");
    describe_counter!(METRIC_AUDIT_RECORDS, "Audit records enqueued");
    describe_counter!(METRIC_AUDIT_WRITE_FAILURES, "Audit records that could not be persisted");

    tracing::info!(address = %addr, "Metrics endpoint listening on /metrics");
    Ok(())
}

pub fn record_rejection(reason: &'static str) {
    counter!(METRIC_REQUESTS_REJECTED, "reason" => reason).increment(1);
}

pub fn record_rate_limited(route_class: &'static str) {
    counter!(METRIC_RATE_LIMITED, "route_class" => route_class).increment(1);
}

pub fn record_access_denied(resource_kind: &'static str) {
    counter!(METRIC_ACCESS_DENIED, "resource_kind" => resource_kind).increment(1);
}

pub fn record_audit_record(outcome: &'static str) {
    counter!(METRIC_AUDIT_RECORDS, "outcome" => outcome).increment(1);
}

pub fn record_audit_write_failure() {
    counter!(METRIC_AUDIT_WRITE_FAILURES).increment(1);
}
