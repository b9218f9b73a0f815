//! Configuration loading from disk and environment.

use std::fs;
use std::path::Path;
use std::str::FromStr;
use thiserror::Error;

use crate::config::schema::{AuditFailurePolicy, GuardConfig, StoreFailurePolicy};
use crate::config::validation::{validate_config, ConfigIssue};

/// Error type for configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid value for {var}: '{value}'")]
    Env { var: &'static str, value: String },

    #[error("Validation failed: {}", join_issues(.0))]
    Validation(Vec<ConfigIssue>),
}

fn join_issues(issues: &[ConfigIssue]) -> String {
    issues
        .iter()
        .map(|i| i.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Load a TOML file, apply `GUARD_*` overrides, then validate.
pub fn load_config(path: &Path) -> Result<GuardConfig, ConfigError> {
    let content = fs::read_to_string(path)?;
    let mut config: GuardConfig = toml::from_str(&content)?;

    apply_env_overrides(&mut config, |name| std::env::var(name).ok())?;
    validate_config(&config).map_err(ConfigError::Validation)?;

    Ok(config)
}

/// Defaults plus environment overrides, for running without a file.
pub fn load_from_env() -> Result<GuardConfig, ConfigError> {
    let mut config = GuardConfig::default();
    apply_env_overrides(&mut config, |name| std::env::var(name).ok())?;
    validate_config(&config).map_err(ConfigError::Validation)?;
    Ok(config)
}

/// Apply process-start overrides. `lookup` is injected so tests need not
/// touch the real environment.
pub fn apply_env_overrides<F>(config: &mut GuardConfig, lookup: F) -> Result<(), ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(v) = lookup("GUARD_BIND_ADDRESS") {
        config.listener.bind_address = v;
    }
    override_parsed(&lookup, "GUARD_RATE_LIMIT_REQUESTS", &mut config.rate_limit.requests_per_window)?;
    override_parsed(&lookup, "GUARD_RATE_LIMIT_WINDOW_SECS", &mut config.rate_limit.window_secs)?;
    override_parsed(&lookup, "GUARD_BURST_LIMIT", &mut config.rate_limit.burst_limit)?;
    if let Some(v) = lookup("GUARD_RATE_LIMIT_FAILURE_POLICY") {
        config.rate_limit.failure_policy = match v.as_str() {
            "fail_open" => StoreFailurePolicy::FailOpen,
            "fail_closed" => StoreFailurePolicy::FailClosed,
            _ => {
                return Err(ConfigError::Env {
                    var: "GUARD_RATE_LIMIT_FAILURE_POLICY",
                    value: v,
                })
            }
        };
    }
    override_parsed(&lookup, "GUARD_MAX_TEXT_LENGTH", &mut config.validation.max_text_length)?;
    override_parsed(&lookup, "GUARD_MAX_FILE_SIZE", &mut config.validation.max_file_size)?;
    if let Some(v) = lookup("GUARD_ALLOWED_FILE_TYPES") {
        config.validation.allowed_file_types = split_list(&v);
    }
    if let Some(v) = lookup("GUARD_ALLOWED_IPS") {
        config.network.allowed_ips = split_list(&v);
    }
    if let Some(v) = lookup("GUARD_BLOCKED_IPS") {
        config.network.blocked_ips = split_list(&v);
    }
    if let Some(v) = lookup("GUARD_AUDIT_LOG_PATH") {
        config.audit.log_path = v;
    }
    override_parsed(&lookup, "GUARD_AUDIT_RETENTION_DAYS", &mut config.audit.retention_days)?;
    if let Some(v) = lookup("GUARD_AUDIT_FAILURE_POLICY") {
        config.audit.failure_policy = match v.as_str() {
            "buffer_locally" => AuditFailurePolicy::BufferLocally,
            "fail_request" => AuditFailurePolicy::FailRequest,
            _ => {
                return Err(ConfigError::Env {
                    var: "GUARD_AUDIT_FAILURE_POLICY",
                    value: v,
                })
            }
        };
    }
    if let Some(v) = lookup("GUARD_ENCRYPTION_KEY") {
        config.encryption.key = Some(v);
    }
    if let Some(v) = lookup("GUARD_MAC_KEY") {
        config.encryption.mac_key = Some(v);
    }
    override_parsed(&lookup, "GUARD_KEY_ROTATION_DAYS", &mut config.encryption.key_rotation_days)?;
    if let Some(v) = lookup("GUARD_LOG_LEVEL") {
        config.observability.log_level = v;
    }
    Ok(())
}

fn override_parsed<F, T>(lookup: &F, var: &'static str, target: &mut T) -> Result<(), ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    if let Some(value) = lookup(var) {
        *target = value
            .trim()
            .parse()
            .map_err(|_| ConfigError::Env { var, value })?;
    }
    Ok(())
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn test_env_overrides() {
        let mut config = GuardConfig::default();
        apply_env_overrides(
            &mut config,
            env(&[
                ("GUARD_RATE_LIMIT_REQUESTS", "10"),
                ("GUARD_BURST_LIMIT", "20"),
                ("GUARD_BLOCKED_IPS", "203.0.113.5, 198.51.100.7"),
                ("GUARD_RATE_LIMIT_FAILURE_POLICY", "fail_open"),
            ]),
        )
        .unwrap();

        assert_eq!(config.rate_limit.requests_per_window, 10);
        assert_eq!(config.rate_limit.burst_limit, 20);
        assert_eq!(config.network.blocked_ips, vec!["203.0.113.5", "198.51.100.7"]);
        assert_eq!(config.rate_limit.failure_policy, StoreFailurePolicy::FailOpen);
    }

    #[test]
    fn test_bad_env_value_rejected() {
        let mut config = GuardConfig::default();
        let err = apply_env_overrides(&mut config, env(&[("GUARD_BURST_LIMIT", "lots")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::Env { var: "GUARD_BURST_LIMIT", .. }));
    }

    #[test]
    fn test_load_config_validates() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[rate_limit]\nrequests_per_window = 300\nburst_limit = 10").unwrap();

        match load_config(file.path()) {
            Err(ConfigError::Validation(issues)) => {
                assert!(issues.contains(&ConfigIssue::BurstBelowRate { burst: 10, rate: 300 }));
            }
            other => panic!("expected validation failure, got {:?}", other.map(|_| ())),
        }
    }
}
