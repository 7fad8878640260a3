//! Resilience helpers.
//!
//! The audit writer is the only component that retries on its own: store
//! errors propagate to callers untouched, but an audit append is retried
//! with jittered backoff before it is reported as failed.

pub mod backoff;

pub use backoff::RetryPolicy;
