//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Startup (main.rs):
//!     Load config → Validate → Logging/metrics → AppState (spawns audit writer) → Listen
//!
//! Shutdown (shutdown.rs):
//!     Signal received → Stop accepting → Drain connections → Drain audit queue → Exit
//!
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → Trigger graceful shutdown
//! ```
//!
//! # Design Decisions
//! - The audit queue drains after the server stops, so every request that
//!   got a response has its records handed to the sink
//! - Draining has a deadline: forced exit after it

pub mod shutdown;
pub mod signals;

pub use shutdown::{drain_audit, Shutdown};
pub use signals::wait_for_signal;
