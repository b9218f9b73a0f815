//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (windows > 0, burst >= rate)
//! - Check address lists and key material parse
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: GuardConfig → Result<(), Vec<ConfigIssue>>
//! - Runs before config is accepted into the system

use base64::Engine;
use thiserror::Error;

use crate::config::schema::GuardConfig;
use crate::security::validator::IpList;

/// A single semantic problem in a configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigIssue {
    #[error("{field} must be greater than zero")]
    NotPositive { field: &'static str },

    #[error("burst_limit ({burst}) must be >= requests_per_window ({rate})")]
    BurstBelowRate { burst: u32, rate: u32 },

    #[error("threat thresholds must satisfy block >= monitor >= log")]
    ThresholdOrder,

    #[error("{field}: invalid address entry '{entry}'")]
    InvalidAddress { field: &'static str, entry: String },

    #[error("{field}: CIDR entry '{entry}' requires network.allow_cidr")]
    CidrNotEnabled { field: &'static str, entry: String },

    #[error("{field} must be base64 encoding of exactly 32 bytes")]
    InvalidKey { field: &'static str },

    #[error("allowed file type '{0}' must start with '.'")]
    InvalidFileType(String),
}

/// Validate a configuration, collecting every issue.
pub fn validate_config(config: &GuardConfig) -> Result<(), Vec<ConfigIssue>> {
    let mut issues = Vec::new();

    let rl = &config.rate_limit;
    for (field, value) in [
        ("rate_limit.requests_per_window", u64::from(rl.requests_per_window)),
        ("rate_limit.burst_limit", u64::from(rl.burst_limit)),
        ("rate_limit.window_secs", rl.window_secs),
        ("rate_limit.store_timeout_ms", rl.store_timeout_ms),
        ("rate_limit.purge_interval_secs", rl.purge_interval_secs),
        ("audit.retention_days", u64::from(config.audit.retention_days)),
        ("audit.write_timeout_ms", config.audit.write_timeout_ms),
        ("audit.channel_capacity", config.audit.channel_capacity as u64),
        ("audit.cleanup_interval_secs", config.audit.cleanup_interval_secs),
        ("encryption.key_rotation_days", u64::from(config.encryption.key_rotation_days)),
        ("validation.max_text_length", config.validation.max_text_length as u64),
        ("validation.max_file_size", config.validation.max_file_size as u64),
        ("listener.request_timeout_secs", config.listener.request_timeout_secs),
    ] {
        if value == 0 {
            issues.push(ConfigIssue::NotPositive { field });
        }
    }

    if rl.burst_limit < rl.requests_per_window {
        issues.push(ConfigIssue::BurstBelowRate {
            burst: rl.burst_limit,
            rate: rl.requests_per_window,
        });
    }

    let t = &config.threat;
    if !(t.block_threshold >= t.monitor_threshold && t.monitor_threshold >= t.log_threshold) {
        issues.push(ConfigIssue::ThresholdOrder);
    }

    let allow_cidr = config.network.allow_cidr;
    check_addresses("network.allowed_ips", &config.network.allowed_ips, allow_cidr, &mut issues);
    check_addresses("network.blocked_ips", &config.network.blocked_ips, allow_cidr, &mut issues);
    check_addresses("threat.suspicious_ips", &t.suspicious_ips, allow_cidr, &mut issues);

    for (field, key) in [
        ("encryption.key", &config.encryption.key),
        ("encryption.mac_key", &config.encryption.mac_key),
    ] {
        if let Some(encoded) = key {
            let decoded = base64::engine::general_purpose::STANDARD.decode(encoded.trim());
            if !matches!(decoded, Ok(ref bytes) if bytes.len() == 32) {
                issues.push(ConfigIssue::InvalidKey { field });
            }
        }
    }

    for ext in &config.validation.allowed_file_types {
        if !ext.starts_with('.') {
            issues.push(ConfigIssue::InvalidFileType(ext.clone()));
        }
    }

    if issues.is_empty() {
        Ok(())
    } else {
        Err(issues)
    }
}

fn check_addresses(
    field: &'static str,
    entries: &[String],
    allow_cidr: bool,
    issues: &mut Vec<ConfigIssue>,
) {
    for entry in entries {
        if entry.contains('/') && !allow_cidr {
            issues.push(ConfigIssue::CidrNotEnabled {
                field,
                entry: entry.clone(),
            });
        } else if IpList::parse_entry(entry, allow_cidr).is_none() {
            issues.push(ConfigIssue::InvalidAddress {
                field,
                entry: entry.clone(),
            });
        }
    }
}
