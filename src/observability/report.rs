//! Point-in-time security posture report built from process counters.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::observability::metrics::{
    SecurityMetrics, AUTHENTICATION_ATTEMPTS, ENCRYPTION_OPERATIONS, RATE_LIMIT_VIOLATIONS,
    SECURITY_EVENTS,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ThreatLevel {
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, Serialize)]
pub struct AuthenticationSummary {
    pub success: u64,
    pub failure: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct SecurityReport {
    pub timestamp: DateTime<Utc>,
    pub total_events: u64,
    pub authentication_attempts: AuthenticationSummary,
    pub rate_limit_violations: u64,
    pub encryption_operations: u64,
    pub threat_level: ThreatLevel,
    pub recommendations: Vec<String>,
}

impl SecurityReport {
    pub fn from_metrics(metrics: &SecurityMetrics, now: DateTime<Utc>) -> Self {
        let failure = metrics.counter(AUTHENTICATION_ATTEMPTS, &[("status", "failure")]);
        let success = metrics.counter(AUTHENTICATION_ATTEMPTS, &[("status", "success")]);
        let violations = metrics.total(RATE_LIMIT_VIOLATIONS);

        Self {
            timestamp: now,
            total_events: metrics.total(SECURITY_EVENTS),
            authentication_attempts: AuthenticationSummary { success, failure },
            rate_limit_violations: violations,
            encryption_operations: metrics.total(ENCRYPTION_OPERATIONS),
            threat_level: threat_level(violations, failure),
            recommendations: recommendations(violations, failure),
        }
    }
}

fn threat_level(violations: u64, failed_auths: u64) -> ThreatLevel {
    if violations > 100 || failed_auths > 50 {
        ThreatLevel::High
    } else if violations > 50 || failed_auths > 20 {
        ThreatLevel::Medium
    } else {
        ThreatLevel::Low
    }
}

fn recommendations(violations: u64, failed_auths: u64) -> Vec<String> {
    let mut out = Vec::new();
    if failed_auths > 20 {
        out.push("Consider implementing account lockout after failed attempts".to_string());
    }
    if violations > 50 {
        out.push("Review and potentially tighten rate limiting policies".to_string());
    }
    if out.is_empty() {
        out.push("Current security posture appears adequate".to_string());
    }
    out
}
