//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! optional TOML file (REEL_GUARD_CONFIG)
//!     → loader.rs (parse & deserialize)
//!     → REEL_GUARD_* environment overrides
//!     → validation.rs (semantic checks)
//!     → AppConfig (validated, immutable)
//!     → shared via Arc to all subsystems
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded; changes require a restart
//! - All fields have defaults to allow minimal configs
//! - Secrets (webhook secret, admin key) are expected from the environment

pub mod loader;
pub mod schema;
pub mod validation;

pub use loader::{load_config, load_from_env, ConfigError};
pub use schema::{
    AdminConfig, AppConfig, AuditConfig, AuditSinkKind, AuthConfig, LimitsConfig, ListenerConfig,
    LogFormat, ObservabilityConfig, RateLimitConfig, TimeoutConfig, WebhookConfig, WindowConfig,
};
