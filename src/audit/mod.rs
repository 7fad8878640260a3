//! Security audit trail.
//!
//! # Data Flow
//! ```text
//! guards / secure store
//!     → logger.rs (AuditLogger::record, bounded queue)
//!     → writer task (sequence number, retry with backoff)
//!     → sink.rs (MemoryAuditSink | JsonLinesAuditSink)
//! ```
//!
//! # Design Decisions
//! - Records are append-only; no update or delete API exists
//! - A write that fails after retries is counted and logged at error
//!   level but never fails the business operation that produced it
//! - One writer task preserves enqueue order in the sink

pub mod logger;
pub mod sink;
pub mod types;

pub use logger::{AuditLogger, AuditWriter};
pub use sink::{AuditError, AuditSink, JsonLinesAuditSink, MemoryAuditSink};
pub use types::{AuditFilter, AuditOutcome, AuditRecord, ViolationKind};
