//! Configuration validation.
//!
//! Serde handles syntax; this checks value ranges and cross-field rules and
//! returns every problem found, not just the first.

use std::net::SocketAddr;

use crate::config::schema::{AppConfig, AuditSinkKind, WindowConfig};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("{field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

impl ValidationError {
    fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        ValidationError::Invalid {
            field,
            reason: reason.into(),
        }
    }

    pub fn field(&self) -> &'static str {
        match self {
            ValidationError::Invalid { field, .. } => field,
        }
    }
}

pub fn validate_config(config: &AppConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.listener.bind_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::invalid(
            "listener.bind_address",
            format!("not a socket address: {}", config.listener.bind_address),
        ));
    }
    if config.timeouts.request_secs == 0 {
        errors.push(ValidationError::invalid("timeouts.request_secs", "must be > 0"));
    }

    check_window("rate_limit.default", &config.rate_limit.default, &mut errors);
    check_window("rate_limit.strict", &config.rate_limit.strict, &mut errors);
    check_window("rate_limit.webhook", &config.rate_limit.webhook, &mut errors);
    if config.rate_limit.sweep_interval_secs == 0 {
        errors.push(ValidationError::invalid("rate_limit.sweep_interval_secs", "must be > 0"));
    }

    if config.auth.trust_identity_header && config.auth.identity_header.trim().is_empty() {
        errors.push(ValidationError::invalid("auth.identity_header", "must not be empty"));
    }

    if config.webhook.enabled {
        if config.webhook.secret.len() < 16 {
            errors.push(ValidationError::invalid("webhook.secret", "must be at least 16 bytes"));
        }
        if config.webhook.tolerance_secs == 0 {
            errors.push(ValidationError::invalid("webhook.tolerance_secs", "must be > 0"));
        }
    }

    if config.audit.queue_capacity == 0 {
        errors.push(ValidationError::invalid("audit.queue_capacity", "must be > 0"));
    }
    if config.audit.max_write_attempts == 0 {
        errors.push(ValidationError::invalid("audit.max_write_attempts", "must be > 0"));
    }
    if config.audit.confirm_timeout_ms == 0 {
        errors.push(ValidationError::invalid("audit.confirm_timeout_ms", "must be > 0"));
    }
    if config.audit.sink == AuditSinkKind::File && config.audit.path.trim().is_empty() {
        errors.push(ValidationError::invalid("audit.path", "required for the file sink"));
    }

    if config.admin.enabled
        && (config.admin.api_key.len() < 16 || config.admin.api_key == "CHANGE_ME_IN_PRODUCTION")
    {
        errors.push(ValidationError::invalid(
            "admin.api_key",
            "set a real key of at least 16 characters",
        ));
    }

    if config.observability.metrics_enabled
        && config.observability.metrics_address.parse::<SocketAddr>().is_err()
    {
        errors.push(ValidationError::invalid(
            "observability.metrics_address",
            format!("not a socket address: {}", config.observability.metrics_address),
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn check_window(field: &'static str, window: &WindowConfig, errors: &mut Vec<ValidationError>) {
    if window.window_ms == 0 || window.max_requests == 0 {
        errors.push(ValidationError::invalid(
            field,
            "window_ms and max_requests must both be > 0",
        ));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert_eq!(validate_config(&AppConfig::default()), Ok(()));
    }

    #[test]
    fn test_collects_all_errors() {
        let mut config = AppConfig::default();
        config.rate_limit.strict.max_requests = 0;
        config.webhook.enabled = true;
        config.webhook.secret = "short".into();
        config.admin.enabled = true;

        let errors = validate_config(&config).unwrap_err();
        let fields: Vec<_> = errors.iter().map(ValidationError::field).collect();
        assert_eq!(fields, vec!["rate_limit.strict", "webhook.secret", "admin.api_key"]);
    }

    #[test]
    fn test_bad_bind_address() {
        let mut config = AppConfig::default();
        config.listener.bind_address = "localhost".into();
        let errors = validate_config(&config).unwrap_err();
        assert_eq!(errors[0].field(), "listener.bind_address");
    }

    #[test]
    fn test_zero_audit_confirm_timeout_rejected() {
        let mut config = AppConfig::default();
        config.audit.confirm_timeout_ms = 0;
        let errors = validate_config(&config).unwrap_err();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].field(), "audit.confirm_timeout_ms");
    }
}
