//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! All subsystems produce:
//!     → logging.rs (structured log events, correlation id on the request span)
//!     → metrics.rs (rejection and audit counters)
//!
//! Consumers:
//!     → Log aggregation (stdout, pretty or JSON)
//!     → Metrics endpoint (Prometheus scrape)
//! ```
//!
//! # Design Decisions
//! - Operational logs are separate from the audit trail; losing a log
//!   line is acceptable, losing an audit record is counted
//! - Metric labels are closed enums, never identities or ids

pub mod logging;
pub mod metrics;
