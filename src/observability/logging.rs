//! Structured logging.
//!
//! Uses the tracing crate; the filter comes from `RUST_LOG` when set and from
//! the configured level otherwise.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::ObservabilityConfig;

/// Install the global subscriber. Safe to call once per process.
pub fn init_logging(config: &ObservabilityConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| format!("request_guard={0},tower_http={0}", config.log_level).into());

    let registry = tracing_subscriber::registry().with(filter);
    let result = if config.log_format == "pretty" {
        registry.with(tracing_subscriber::fmt::layer().pretty()).try_init()
    } else {
        registry.with(tracing_subscriber::fmt::layer().compact()).try_init()
    };

    if let Err(e) = result {
        eprintln!("logging already initialized: {}", e);
    }
}
