//! Metrics collection and exposition.
//!
//! # Responsibilities
//! - Define security metrics (events, auth attempts, rate-limit violations,
//!   encryption operations, internal errors)
//! - Keep per-process counters readable for reports and tests
//! - Forward to the `metrics` facade for Prometheus scraping
//!
//! # Metrics
//! - `security_events_total` (counter): audit events by event_type, severity
//! - `authentication_attempts_total` (counter): by status
//! - `rate_limit_violations_total` (counter): by endpoint
//! - `encryption_operations_total` (counter): by operation
//! - `validation_rejections_total` (counter): by category
//! - `audit_events_buffered_total` (counter): writes parked in the local buffer
//! - `guard_internal_errors_total` (counter): by component
//!
//! # Design Decisions
//! - Components receive an `Arc<dyn MetricsSink>`; no global counters
//! - Low-overhead metric updates (sharded map, atomic increments)

use dashmap::DashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};

pub const SECURITY_EVENTS: &str = "security_events_total";
pub const AUTHENTICATION_ATTEMPTS: &str = "authentication_attempts_total";
pub const RATE_LIMIT_VIOLATIONS: &str = "rate_limit_violations_total";
pub const ENCRYPTION_OPERATIONS: &str = "encryption_operations_total";
pub const VALIDATION_REJECTIONS: &str = "validation_rejections_total";
pub const AUDIT_EVENTS_BUFFERED: &str = "audit_events_buffered_total";
pub const INTERNAL_ERRORS: &str = "guard_internal_errors_total";

/// Labeled counter sink injected into every component.
pub trait MetricsSink: Send + Sync {
    fn increment(&self, name: &'static str, labels: &[(&'static str, &str)]);
}

/// Discards everything. Handy where a component is used standalone.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopMetrics;

impl MetricsSink for NoopMetrics {
    fn increment(&self, _name: &'static str, _labels: &[(&'static str, &str)]) {}
}

/// Counters kept in-process, optionally mirrored to the `metrics` facade.
#[derive(Debug, Default)]
pub struct SecurityMetrics {
    counters: DashMap<String, AtomicU64>,
    export: bool,
}

impl SecurityMetrics {
    /// In-process counters only.
    pub fn new() -> Self {
        Self::default()
    }

    /// Also forward every increment to the installed `metrics` recorder.
    pub fn exporting() -> Self {
        Self {
            counters: DashMap::new(),
            export: true,
        }
    }

    /// Value of one labeled series. Label order does not matter.
    pub fn counter(&self, name: &str, labels: &[(&str, &str)]) -> u64 {
        self.counters
            .get(&series_key(name, labels))
            .map(|c| c.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    /// Sum over every series of a metric.
    pub fn total(&self, name: &str) -> u64 {
        let prefix = format!("{}{{", name);
        self.counters
            .iter()
            .filter(|entry| entry.key() == name || entry.key().starts_with(&prefix))
            .map(|entry| entry.value().load(Ordering::Relaxed))
            .sum()
    }
}

impl MetricsSink for SecurityMetrics {
    fn increment(&self, name: &'static str, labels: &[(&'static str, &str)]) {
        self.counters
            .entry(series_key(name, labels))
            .or_insert_with(|| AtomicU64::new(0))
            .fetch_add(1, Ordering::Relaxed);

        if self.export {
            let labels: Vec<metrics::Label> = labels
                .iter()
                .map(|(k, v)| metrics::Label::new(*k, v.to_string()))
                .collect();
            metrics::counter!(name, labels).increment(1);
        }
    }
}

fn series_key(name: &str, labels: &[(&str, &str)]) -> String {
    if labels.is_empty() {
        return name.to_string();
    }
    let mut sorted: Vec<_> = labels.to_vec();
    sorted.sort_unstable();
    let body = sorted
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join(",");
    format!("{}{{{}}}", name, body)
}

/// Install the Prometheus exporter with an HTTP scrape listener.
pub fn init_metrics(addr: SocketAddr) {
    match metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
    {
        Ok(()) => tracing::info!(address = %addr, "Prometheus exporter listening"),
        Err(e) => tracing::error!(error = %e, "Failed to install Prometheus exporter"),
    }
}
