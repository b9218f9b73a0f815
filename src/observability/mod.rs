//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! All subsystems produce:
//!     → logging.rs (structured log events)
//!     → metrics.rs (labeled counters via an injected MetricsSink)
//!
//! Consumers:
//!     → Log aggregation (stdout)
//!     → Metrics endpoint (Prometheus scrape)
//!     → report.rs (security posture summary for operators)
//! ```
//!
//! # Design Decisions
//! - Structured logging for machine parsing
//! - Request ID flows into audit details
//! - Metrics are cheap (atomic increments)

pub mod logging;
pub mod metrics;
pub mod report;

pub use metrics::{MetricsSink, NoopMetrics, SecurityMetrics};
pub use report::SecurityReport;
