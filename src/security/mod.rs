//! Security subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming request (correlation id already assigned):
//!     → identity.rs (resolve the authenticated principal, or none)
//!     → rate_limit.rs (fixed window per identity and route class)
//!     → request_guard.rs (compose the two, build SecurityContext)
//!     → access_control.rs (owner check for a concrete resource id)
//!     → store::secure (owner-scoped data access)
//!
//! Signed callbacks:
//!     → webhook.rs (timestamp window, then HMAC over `{timestamp}.{body}`)
//! ```
//!
//! # Design Decisions
//! - Fail closed: a store outage during an access check denies
//! - No administrative bypass of ownership checks
//! - Time is read through `Clock` so windows and replay checks are testable

pub mod access_control;
pub mod clock;
pub mod context;
pub mod identity;
pub mod rate_limit;
pub mod request_guard;
pub mod webhook;

pub use access_control::{AccessDecision, AccessGuard};
pub use clock::{Clock, ManualClock, SystemClock};
pub use context::{CorrelationId, Operation, ResourceKind, SecurityContext};
pub use identity::{ChainResolver, Identity, IdentityResolver, SessionTable, TrustedHeaderResolver};
pub use rate_limit::{InMemoryWindowStore, RateDecision, RateLimiter, RouteClass, WindowStore};
pub use request_guard::{Authenticated, RequestGuard, RoutePolicy};
pub use webhook::{sign, SignatureError, WebhookVerifier};
