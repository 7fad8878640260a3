//! Configuration schema definitions.
//!
//! Every section is defaulted so a bare environment produces a runnable
//! development setup; production values come from a TOML file and
//! `REEL_GUARD_*` environment overrides (see `loader.rs`).

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::security::rate_limit::RouteClass;

/// Root configuration for the service.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct AppConfig {
    /// Listener configuration (bind address).
    pub listener: ListenerConfig,

    /// Timeout configuration.
    pub timeouts: TimeoutConfig,

    /// Request size limits.
    pub limits: LimitsConfig,

    /// Rate-limit presets per route class.
    pub rate_limit: RateLimitConfig,

    /// Identity resolution settings.
    pub auth: AuthConfig,

    /// Transcode callback verification.
    pub webhook: WebhookConfig,

    /// Audit pipeline settings.
    pub audit: AuditConfig,

    /// Admin endpoints.
    pub admin: AdminConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    pub bind_address: String,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Request timeout (total time for request/response) in seconds.
    pub request_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self { request_secs: 30 }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LimitsConfig {
    /// Maximum accepted request body in bytes.
    pub max_body_bytes: usize,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_body_bytes: 1024 * 1024,
        }
    }
}

/// One fixed-window preset.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct WindowConfig {
    /// Window length in milliseconds.
    pub window_ms: u64,
    /// Requests allowed per window.
    pub max_requests: u32,
}

/// Rate-limit presets.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Ordinary API routes.
    pub default: WindowConfig,

    /// High-risk routes (deletes, upload creation).
    pub strict: WindowConfig,

    /// Inbound transcode callbacks, keyed by source address.
    pub webhook: WindowConfig,

    /// How often expired windows are purged, in seconds.
    pub sweep_interval_secs: u64,
}

impl RateLimitConfig {
    pub fn for_class(&self, class: RouteClass) -> &WindowConfig {
        match class {
            RouteClass::Default => &self.default,
            RouteClass::Strict => &self.strict,
            RouteClass::Webhook => &self.webhook,
        }
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            default: WindowConfig {
                window_ms: 60_000,
                max_requests: 60,
            },
            strict: WindowConfig {
                window_ms: 300_000,
                max_requests: 3,
            },
            webhook: WindowConfig {
                window_ms: 60_000,
                max_requests: 5,
            },
            sweep_interval_secs: 60,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AuthConfig {
    /// Trust the identity header set by the upstream auth proxy.
    pub trust_identity_header: bool,

    /// Header carrying the resolved identity.
    pub identity_header: String,

    /// Static bearer tokens mapped to identities, for development.
    pub sessions: HashMap<String, String>,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            trust_identity_header: true,
            identity_header: "x-user-id".to_string(),
            sessions: HashMap::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct WebhookConfig {
    /// Mount the transcode callback route.
    pub enabled: bool,

    /// Shared HMAC secret.
    pub secret: String,

    /// Maximum accepted clock skew of the timestamp header, in seconds.
    pub tolerance_secs: u64,
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            secret: String::new(),
            tolerance_secs: 300,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AuditSinkKind {
    Memory,
    File,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AuditConfig {
    pub sink: AuditSinkKind,

    /// JSON-lines file used by the `file` sink.
    pub path: String,

    /// Records buffered between request handlers and the writer task.
    pub queue_capacity: usize,

    /// Append attempts before a record is reported as failed.
    pub max_write_attempts: u32,

    /// Base delay for exponential backoff in milliseconds.
    pub base_delay_ms: u64,

    /// Maximum delay for exponential backoff in milliseconds.
    pub max_delay_ms: u64,

    /// How long a mutation waits for its audit record to be persisted.
    pub confirm_timeout_ms: u64,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            sink: AuditSinkKind::Memory,
            path: "audit.jsonl".to_string(),
            queue_capacity: 4096,
            max_write_attempts: 3,
            base_delay_ms: 50,
            max_delay_ms: 1000,
            confirm_timeout_ms: 5000,
        }
    }
}

/// Admin endpoint configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AdminConfig {
    /// Mount the admin routes.
    pub enabled: bool,

    /// API key for authentication (Bearer token).
    pub api_key: String,
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            // WARNING: This is a placeholder! Change this in production.
            api_key: "CHANGE_ME_IN_PRODUCTION".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Pretty,
    Json,
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    pub log_format: LogFormat,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
            metrics_enabled: false,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}
