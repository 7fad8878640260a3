//! Configuration loading from disk and environment.

use std::fs;
use std::path::Path;
use std::str::FromStr;

use crate::config::schema::{AppConfig, AuditSinkKind, LogFormat};
use crate::config::validation::{validate_config, ValidationError};

/// Prefix of every recognised environment variable.
pub const ENV_PREFIX: &str = "REEL_GUARD_";

/// Error type for configuration loading.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid value for {key}: {value:?}")]
    Env { key: String, value: String },

    #[error("Validation failed: {}", format_errors(.0))]
    Validation(Vec<ValidationError>),
}

fn format_errors(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Load configuration: optional TOML file, then environment overrides, then validation.
pub fn load_config(path: Option<&Path>) -> Result<AppConfig, ConfigError> {
    let mut config = match path {
        Some(path) => {
            let content = fs::read_to_string(path)?;
            toml::from_str(&content)?
        }
        None => AppConfig::default(),
    };

    apply_env_overrides(&mut config, std::env::vars())?;
    validate_config(&config).map_err(ConfigError::Validation)?;

    Ok(config)
}

/// Load using `REEL_GUARD_CONFIG` as the optional file path.
pub fn load_from_env() -> Result<AppConfig, ConfigError> {
    let path = std::env::var(format!("{}CONFIG", ENV_PREFIX)).ok();
    load_config(path.as_deref().map(Path::new))
}

/// Applies `REEL_GUARD_*` variables on top of `config`. Unknown keys are ignored.
pub fn apply_env_overrides<I>(config: &mut AppConfig, vars: I) -> Result<(), ConfigError>
where
    I: IntoIterator<Item = (String, String)>,
{
    for (key, value) in vars {
        let Some(name) = key.strip_prefix(ENV_PREFIX) else {
            continue;
        };

        match name {
            "BIND_ADDRESS" => config.listener.bind_address = value,
            "REQUEST_TIMEOUT_SECS" => config.timeouts.request_secs = parse(&key, &value)?,
            "MAX_BODY_BYTES" => config.limits.max_body_bytes = parse(&key, &value)?,

            "RATE_LIMIT_DEFAULT_WINDOW_MS" => config.rate_limit.default.window_ms = parse(&key, &value)?,
            "RATE_LIMIT_DEFAULT_MAX_REQUESTS" => config.rate_limit.default.max_requests = parse(&key, &value)?,
            "RATE_LIMIT_STRICT_WINDOW_MS" => config.rate_limit.strict.window_ms = parse(&key, &value)?,
            "RATE_LIMIT_STRICT_MAX_REQUESTS" => config.rate_limit.strict.max_requests = parse(&key, &value)?,
            "RATE_LIMIT_WEBHOOK_WINDOW_MS" => config.rate_limit.webhook.window_ms = parse(&key, &value)?,
            "RATE_LIMIT_WEBHOOK_MAX_REQUESTS" => config.rate_limit.webhook.max_requests = parse(&key, &value)?,
            "RATE_LIMIT_SWEEP_INTERVAL_SECS" => config.rate_limit.sweep_interval_secs = parse(&key, &value)?,

            "TRUST_IDENTITY_HEADER" => config.auth.trust_identity_header = parse(&key, &value)?,
            "IDENTITY_HEADER" => config.auth.identity_header = value,

            "WEBHOOK_ENABLED" => config.webhook.enabled = parse(&key, &value)?,
            "WEBHOOK_SECRET" => config.webhook.secret = value,
            "WEBHOOK_TOLERANCE_SECS" => config.webhook.tolerance_secs = parse(&key, &value)?,

            "AUDIT_SINK" => {
                config.audit.sink = match value.as_str() {
                    "memory" => AuditSinkKind::Memory,
                    "file" => AuditSinkKind::File,
                    _ => return Err(ConfigError::Env { key, value }),
                }
            }
            "AUDIT_PATH" => config.audit.path = value,
            "AUDIT_QUEUE_CAPACITY" => config.audit.queue_capacity = parse(&key, &value)?,
            "AUDIT_MAX_WRITE_ATTEMPTS" => config.audit.max_write_attempts = parse(&key, &value)?,
            "AUDIT_BASE_DELAY_MS" => config.audit.base_delay_ms = parse(&key, &value)?,
            "AUDIT_MAX_DELAY_MS" => config.audit.max_delay_ms = parse(&key, &value)?,
            "AUDIT_CONFIRM_TIMEOUT_MS" => config.audit.confirm_timeout_ms = parse(&key, &value)?,

            "ADMIN_ENABLED" => config.admin.enabled = parse(&key, &value)?,
            "ADMIN_API_KEY" => config.admin.api_key = value,

            "LOG_LEVEL" => config.observability.log_level = value,
            "LOG_FORMAT" => {
                config.observability.log_format = match value.as_str() {
                    "pretty" => LogFormat::Pretty,
                    "json" => LogFormat::Json,
                    _ => return Err(ConfigError::Env { key, value }),
                }
            }
            "METRICS_ENABLED" => config.observability.metrics_enabled = parse(&key, &value)?,
            "METRICS_ADDRESS" => config.observability.metrics_address = value,

            _ => {}
        }
    }
    Ok(())
}

fn parse<T: FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::Env {
        key: key.to_string(),
        value: value.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn vars(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_env_overrides() {
        let mut config = AppConfig::default();
        apply_env_overrides(
            &mut config,
            vars(&[
                ("REEL_GUARD_RATE_LIMIT_STRICT_MAX_REQUESTS", "5"),
                ("REEL_GUARD_RATE_LIMIT_STRICT_WINDOW_MS", "120000"),
                ("REEL_GUARD_WEBHOOK_SECRET", "whsec"),
                ("REEL_GUARD_AUDIT_SINK", "file"),
                ("REEL_GUARD_LOG_FORMAT", "json"),
                ("PATH", "/usr/bin"),
            ]),
        )
        .unwrap();

        assert_eq!(config.rate_limit.strict.max_requests, 5);
        assert_eq!(config.rate_limit.strict.window_ms, 120_000);
        assert_eq!(config.webhook.secret, "whsec");
        assert_eq!(config.audit.sink, AuditSinkKind::File);
        assert_eq!(config.observability.log_format, LogFormat::Json);
    }

    #[test]
    fn test_env_overrides_audit_timings() {
        let mut config = AppConfig::default();
        apply_env_overrides(
            &mut config,
            vars(&[
                ("REEL_GUARD_AUDIT_BASE_DELAY_MS", "10"),
                ("REEL_GUARD_AUDIT_MAX_DELAY_MS", "250"),
                ("REEL_GUARD_AUDIT_CONFIRM_TIMEOUT_MS", "1500"),
            ]),
        )
        .unwrap();

        assert_eq!(config.audit.base_delay_ms, 10);
        assert_eq!(config.audit.max_delay_ms, 250);
        assert_eq!(config.audit.confirm_timeout_ms, 1500);
    }

    #[test]
    fn test_env_override_rejects_garbage() {
        let mut config = AppConfig::default();
        let err = apply_env_overrides(
            &mut config,
            vars(&[("REEL_GUARD_RATE_LIMIT_DEFAULT_MAX_REQUESTS", "lots")]),
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::Env { .. }));
    }

    #[test]
    fn test_load_config_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
            [listener]
            bind_address = "127.0.0.1:9999"

            [rate_limit.default]
            window_ms = 1000
            max_requests = 10
            "#
        )
        .unwrap();

        let config = load_config(Some(file.path())).unwrap();
        assert_eq!(config.listener.bind_address, "127.0.0.1:9999");
        assert_eq!(config.rate_limit.default.max_requests, 10);
    }

    #[test]
    fn test_load_config_reports_parse_errors() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[listener\nbind_address = ").unwrap();
        assert!(matches!(load_config(Some(file.path())), Err(ConfigError::Parse(_))));
    }
}
