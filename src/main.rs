//! request-guard service.
//!
//! Loads configuration (path from the first argument or `GUARD_CONFIG`,
//! defaults plus `GUARD_*` overrides otherwise), builds the guard and serves
//! it behind the HTTP adapter until SIGINT/SIGTERM.

use std::path::PathBuf;
use std::sync::Arc;

use request_guard::audit::FileAuditSink;
use request_guard::clock::{Clock, SystemClock};
use request_guard::config::{self, GuardConfig};
use request_guard::guard::{GuardDeps, SecurityGuard};
use request_guard::http::{AppState, GuardServer};
use request_guard::lifecycle::{shutdown_signal, spawn_maintenance, Shutdown};
use request_guard::observability::{logging, metrics, SecurityMetrics};
use request_guard::security::MemoryWindowStore;

fn load() -> Result<GuardConfig, config::ConfigError> {
    let path = std::env::args()
        .nth(1)
        .or_else(|| std::env::var("GUARD_CONFIG").ok())
        .map(PathBuf::from);
    match path {
        Some(path) => config::load_config(&path),
        None => config::loader::load_from_env(),
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = match load() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("request-guard: {}", e);
            std::process::exit(2);
        }
    };

    logging::init_logging(&config.observability);
    tracing::info!("request-guard v{} starting", env!("CARGO_PKG_VERSION"));
    tracing::info!(
        bind_address = %config.listener.bind_address,
        requests_per_window = config.rate_limit.requests_per_window,
        window_secs = config.rate_limit.window_secs,
        audit_log = %config.audit.log_path,
        "Configuration loaded"
    );

    let security_metrics = if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
        Arc::new(SecurityMetrics::exporting())
    } else {
        Arc::new(SecurityMetrics::new())
    };

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let store = Arc::new(MemoryWindowStore::new());
    let sink = Arc::new(FileAuditSink::open(&config.audit.log_path).await?);

    let guard = Arc::new(SecurityGuard::from_config(
        &config,
        GuardDeps {
            clock: clock.clone(),
            metrics: security_metrics.clone(),
            audit_sink: sink,
            window_store: store.clone(),
        },
    )?);

    let shutdown = Arc::new(Shutdown::new());
    let maintenance = spawn_maintenance(
        guard.clone(),
        Some(store),
        clock.clone(),
        &config,
        &shutdown,
    );

    let signal_shutdown = shutdown.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        signal_shutdown.trigger();
    });

    let state = AppState {
        guard: guard.clone(),
        metrics: security_metrics,
        clock,
    };
    GuardServer::new(state, config.listener.clone())
        .run(&shutdown)
        .await?;

    shutdown.trigger();
    maintenance.join().await;
    if let Err(e) = guard.audit().flush().await {
        tracing::error!(error = %e, "Audit events left unwritten at exit");
    }

    tracing::info!("Shutdown complete");
    Ok(())
}
