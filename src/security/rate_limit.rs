//! Sliding-window rate limiting.
//!
//! # Responsibilities
//! - Count requests per `identity:endpoint` over a rolling window
//! - Enforce the burst ceiling, then the per-window limit
//! - Apply the configured failure policy when the store misbehaves
//!
//! # Design Decisions
//! - Rejected requests are still recorded; hammering a closed door keeps it closed
//! - Every store call carries a timeout; a slow store is a failed store
//! - The limiter never decides who the caller is; it gets an identity string

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::sync::Arc;

use crate::clock::Clock;
use crate::config::{RateLimitConfig, StoreFailurePolicy};
use crate::error::GuardError;
use crate::observability::metrics::{MetricsSink, INTERNAL_ERRORS, RATE_LIMIT_VIOLATIONS};
use crate::security::store::{StoreError, WindowStore};

pub const BURST_EXCEEDED: &str = "Burst limit exceeded";
pub const RATE_EXCEEDED: &str = "Rate limit exceeded";
pub const LIMITER_UNAVAILABLE: &str = "Rate limiter unavailable";

/// Outcome of one rate-limit check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RateLimitDecision {
    pub allowed: bool,
    pub limit: u32,
    pub remaining: u32,
    pub reset_at: DateTime<Utc>,
    pub retry_after_secs: u64,
    /// Requests in the window including this one. Zero when the store failed.
    pub count: usize,
    pub reason: Option<String>,
    /// Set when the store could not be consulted and the policy decided.
    pub degraded: bool,
}

impl RateLimitDecision {
    pub fn to_error(&self) -> Option<GuardError> {
        if self.allowed {
            return None;
        }
        Some(GuardError::RateLimitExceeded {
            reason: self.reason.clone().unwrap_or_else(|| RATE_EXCEEDED.to_string()),
            limit: self.limit,
            retry_after_secs: self.retry_after_secs,
        })
    }
}

pub struct RateLimiter {
    store: Arc<dyn WindowStore>,
    config: RateLimitConfig,
    clock: Arc<dyn Clock>,
    metrics: Arc<dyn MetricsSink>,
}

impl RateLimiter {
    pub fn new(
        store: Arc<dyn WindowStore>,
        config: RateLimitConfig,
        clock: Arc<dyn Clock>,
        metrics: Arc<dyn MetricsSink>,
    ) -> Self {
        Self {
            store,
            config,
            clock,
            metrics,
        }
    }

    pub fn config(&self) -> &RateLimitConfig {
        &self.config
    }

    /// Record one request for `identity` on `endpoint` and decide.
    pub async fn is_allowed(&self, identity: &str, endpoint: &str) -> RateLimitDecision {
        let now = self.clock.now();
        let window_ms = (self.config.window_secs as i64).saturating_mul(1000);
        let key = format!("{}:{}", identity, endpoint);
        let reset_at = now + Duration::milliseconds(window_ms);

        let recorded = tokio::time::timeout(
            self.config.store_timeout(),
            self.store.record(&key, now.timestamp_millis(), window_ms),
        )
        .await
        .unwrap_or(Err(StoreError::Timeout(self.config.store_timeout_ms)));

        let count = match recorded {
            Ok(count) => count,
            Err(e) => return self.on_store_failure(e, endpoint, reset_at),
        };

        let rate = self.config.requests_per_window;
        let burst = self.config.burst_limit;

        let denial = if count > burst as usize {
            Some((BURST_EXCEEDED, burst))
        } else if count > rate as usize {
            Some((RATE_EXCEEDED, rate))
        } else {
            None
        };

        match denial {
            Some((reason, limit)) => {
                tracing::warn!(
                    identity = %identity,
                    endpoint = %endpoint,
                    count,
                    limit,
                    reason,
                    "Rate limit exceeded"
                );
                self.metrics
                    .increment(RATE_LIMIT_VIOLATIONS, &[("endpoint", endpoint)]);
                RateLimitDecision {
                    allowed: false,
                    limit,
                    remaining: 0,
                    reset_at,
                    retry_after_secs: self.config.window_secs,
                    count,
                    reason: Some(reason.to_string()),
                    degraded: false,
                }
            }
            None => RateLimitDecision {
                allowed: true,
                limit: rate,
                remaining: rate.saturating_sub(count as u32),
                reset_at,
                retry_after_secs: 0,
                count,
                reason: None,
                degraded: false,
            },
        }
    }

    fn on_store_failure(
        &self,
        error: StoreError,
        endpoint: &str,
        reset_at: DateTime<Utc>,
    ) -> RateLimitDecision {
        self.metrics
            .increment(INTERNAL_ERRORS, &[("component", "rate_limiter")]);
        let rate = self.config.requests_per_window;

        match self.config.failure_policy {
            StoreFailurePolicy::FailOpen => {
                tracing::warn!(error = %error, endpoint = %endpoint, "Rate limiter store failed, allowing");
                RateLimitDecision {
                    allowed: true,
                    limit: rate,
                    remaining: rate,
                    reset_at,
                    retry_after_secs: 0,
                    count: 0,
                    reason: None,
                    degraded: true,
                }
            }
            StoreFailurePolicy::FailClosed => {
                tracing::error!(error = %error, endpoint = %endpoint, "Rate limiter store failed, denying");
                RateLimitDecision {
                    allowed: false,
                    limit: rate,
                    remaining: 0,
                    reset_at,
                    retry_after_secs: 1,
                    count: 0,
                    reason: Some(LIMITER_UNAVAILABLE.to_string()),
                    degraded: true,
                }
            }
        }
    }
}
