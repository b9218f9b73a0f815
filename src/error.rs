//! Crate-level error taxonomy.
//!
//! Subsystems keep their own narrow error enums; `GuardError` is what crosses
//! the boundary to collaborators and the HTTP adapter.

use thiserror::Error;

use crate::audit::sink::SinkError;
use crate::config::loader::ConfigError;
use crate::crypto::{CryptoError, DecryptionError};
use crate::security::patterns::ThreatCategory;
use crate::security::store::StoreError;

/// Errors surfaced by the request-security subsystem.
#[derive(Debug, Error)]
pub enum GuardError {
    /// Malformed, oversized or malicious input. Always recoverable.
    #[error("{reason}")]
    Validation {
        reason: String,
        category: Option<ThreatCategory>,
    },

    /// Caller exceeded its request budget.
    #[error("{reason}")]
    RateLimitExceeded {
        reason: String,
        limit: u32,
        retry_after_secs: u64,
    },

    /// Request scored above the block threshold.
    #[error("{reason}")]
    Blocked { reason: String, risk_score: u32 },

    /// Ciphertext cannot be recovered; do not retry.
    #[error("decryption failed: {0}")]
    Decryption(#[from] DecryptionError),

    #[error(transparent)]
    Crypto(#[from] CryptoError),

    #[error("audit sink unavailable: {0}")]
    AuditSinkUnavailable(#[source] SinkError),

    #[error("rate limiter store unavailable: {0}")]
    StoreUnavailable(#[source] StoreError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl GuardError {
    /// True for errors the caller may retry later without changing the request.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            GuardError::RateLimitExceeded { .. }
                | GuardError::AuditSinkUnavailable(_)
                | GuardError::StoreUnavailable(_)
        )
    }
}

/// Result type for guard operations.
pub type GuardResult<T> = Result<T, GuardError>;
