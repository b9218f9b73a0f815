//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the guard.
//! All types derive Serde traits for deserialization from config files.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Root configuration for the request guard.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct GuardConfig {
    /// Listener configuration (bind address, TLS).
    pub listener: ListenerConfig,

    /// Sliding-window rate limiting.
    pub rate_limit: RateLimitConfig,

    /// Input validation limits.
    pub validation: ValidationConfig,

    /// IP allow/block lists.
    pub network: NetworkConfig,

    /// Audit trail storage and retention.
    pub audit: AuditConfig,

    /// Symmetric key material and rotation.
    pub encryption: EncryptionConfig,

    /// Threat scoring weights and thresholds.
    pub threat: ThreatConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    pub bind_address: String,

    /// Optional TLS configuration.
    pub tls: Option<TlsConfig>,

    /// Whole-request timeout in seconds.
    pub request_timeout_secs: u64,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
            tls: None,
            request_timeout_secs: 30,
        }
    }
}

/// TLS configuration for the listener.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TlsConfig {
    /// Path to certificate file (PEM).
    pub cert_path: String,

    /// Path to private key file (PEM).
    pub key_path: String,
}

/// What to do when a backing store cannot answer in time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StoreFailurePolicy {
    /// Admit the request; availability wins.
    FailOpen,
    /// Reject the request; safety wins.
    FailClosed,
}

/// Rate limiting configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Sustained requests allowed per window.
    pub requests_per_window: u32,

    /// Transient upper bound; must be >= `requests_per_window`.
    pub burst_limit: u32,

    /// Sliding window length in seconds.
    pub window_secs: u64,

    /// Deadline for a single store round-trip in milliseconds.
    pub store_timeout_ms: u64,

    /// Behavior when the window store is unreachable.
    pub failure_policy: StoreFailurePolicy,

    /// How often idle windows are purged, in seconds.
    pub purge_interval_secs: u64,
}

impl RateLimitConfig {
    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_secs)
    }

    pub fn store_timeout(&self) -> Duration {
        Duration::from_millis(self.store_timeout_ms)
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            requests_per_window: 100,
            burst_limit: 200,
            window_secs: 60,
            store_timeout_ms: 100,
            failure_policy: StoreFailurePolicy::FailClosed,
            purge_interval_secs: 60,
        }
    }
}

/// Input validation limits.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ValidationConfig {
    /// Maximum text length in characters.
    pub max_text_length: usize,

    /// Maximum upload size in bytes.
    pub max_file_size: usize,

    /// Allowed upload extensions, with leading dot.
    pub allowed_file_types: Vec<String>,

    /// Domains rejected by email validation.
    pub disposable_email_domains: Vec<String>,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            max_text_length: 10_000,
            max_file_size: 50 * 1024 * 1024, // 50MB
            allowed_file_types: [".pdf", ".docx", ".xlsx", ".txt", ".csv"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            disposable_email_domains: ["tempmail.com", "throwaway.com", "10minutemail.com"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }
}

/// Network access lists.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct NetworkConfig {
    /// If non-empty, only these addresses are admitted.
    pub allowed_ips: Vec<String>,

    /// Addresses always rejected.
    pub blocked_ips: Vec<String>,

    /// Accept CIDR ranges (e.g. "10.0.0.0/8") in the lists above.
    pub allow_cidr: bool,
}

/// What to do when the audit sink rejects or times out a write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditFailurePolicy {
    /// Hold events in an ordered local buffer and retry before the next write.
    BufferLocally,
    /// Surface the failure to the caller, failing the enclosing request.
    FailRequest,
}

/// Audit logging configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AuditConfig {
    /// JSON-lines audit file.
    pub log_path: String,

    /// Events older than this are removed by the retention sweep.
    pub retention_days: u32,

    /// Deadline for one audit write in milliseconds.
    pub write_timeout_ms: u64,

    /// Behavior when the sink is unavailable.
    pub failure_policy: AuditFailurePolicy,

    /// Capacity of the writer queue.
    pub channel_capacity: usize,

    /// Upper bound of the local fallback buffer.
    pub max_buffered_events: usize,

    /// Retention sweep interval in seconds.
    pub cleanup_interval_secs: u64,
}

impl AuditConfig {
    pub fn write_timeout(&self) -> Duration {
        Duration::from_millis(self.write_timeout_ms)
    }

    pub fn retention(&self) -> chrono::Duration {
        chrono::Duration::days(i64::from(self.retention_days))
    }
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            log_path: "audit.log".to_string(),
            retention_days: 365,
            write_timeout_ms: 1000,
            failure_policy: AuditFailurePolicy::BufferLocally,
            channel_capacity: 1024,
            max_buffered_events: 10_000,
            cleanup_interval_secs: 3600,
        }
    }
}

/// Encryption configuration.
#[derive(Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct EncryptionConfig {
    /// Base64 32-byte symmetric key. Generated at startup when absent.
    pub key: Option<String>,

    /// Base64 32-byte HMAC key. Generated at startup when absent.
    pub mac_key: Option<String>,

    /// Key age after which rotation is due.
    pub key_rotation_days: u32,

    /// Retired keys kept for decrypting older ciphertext.
    pub max_retired_keys: usize,
}

impl EncryptionConfig {
    pub fn rotation_interval(&self) -> chrono::Duration {
        chrono::Duration::days(i64::from(self.key_rotation_days))
    }
}

impl std::fmt::Debug for EncryptionConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EncryptionConfig")
            .field("key", &self.key.as_ref().map(|_| "<redacted>"))
            .field("mac_key", &self.mac_key.as_ref().map(|_| "<redacted>"))
            .field("key_rotation_days", &self.key_rotation_days)
            .field("max_retired_keys", &self.max_retired_keys)
            .finish()
    }
}

impl Default for EncryptionConfig {
    fn default() -> Self {
        Self {
            key: None,
            mac_key: None,
            key_rotation_days: 90,
            max_retired_keys: 4,
        }
    }
}

/// Threat scoring configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ThreatConfig {
    /// Score per distinct pattern category matched.
    pub pattern_weight: u32,
    pub suspicious_ip_weight: u32,
    pub automation_agent_weight: u32,
    pub high_frequency_weight: u32,

    /// Score at or above which the request is blocked.
    pub block_threshold: u32,
    pub monitor_threshold: u32,
    pub log_threshold: u32,

    /// Reputation list of known-bad addresses.
    pub suspicious_ips: Vec<String>,

    /// Case-insensitive user-agent fragments of automation clients.
    pub automation_agents: Vec<String>,

    /// Window count at which a caller is treated as a high-frequency burst.
    pub high_frequency_threshold: u32,
}

impl Default for ThreatConfig {
    fn default() -> Self {
        Self {
            pattern_weight: 10,
            suspicious_ip_weight: 20,
            automation_agent_weight: 15,
            high_frequency_weight: 25,
            block_threshold: 50,
            monitor_threshold: 30,
            log_threshold: 15,
            suspicious_ips: Vec::new(),
            automation_agents: ["bot", "crawler", "scraper", "curl", "wget", "python-requests"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            high_frequency_threshold: 50,
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// "pretty" or "compact".
    pub log_format: String,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: "compact".to_string(),
            metrics_enabled: true,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}
