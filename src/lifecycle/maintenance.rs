//! Periodic housekeeping.
//!
//! Two loops, both stopped by the shutdown broadcast:
//! - window purge: drops idle rate-limit keys from the in-memory store
//! - housekeeping: audit retention sweep, then the key rotation check

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant};

use crate::clock::Clock;
use crate::config::GuardConfig;
use crate::guard::SecurityGuard;
use crate::lifecycle::Shutdown;
use crate::security::store::MemoryWindowStore;

pub struct MaintenanceHandles {
    pub purge: Option<JoinHandle<()>>,
    pub housekeeping: JoinHandle<()>,
}

impl MaintenanceHandles {
    /// Wait for both loops to exit.
    pub async fn join(self) {
        if let Some(purge) = self.purge {
            let _ = purge.await;
        }
        let _ = self.housekeeping.await;
    }
}

/// Start the background loops. `store` is only needed for the in-memory
/// window store; external stores expire keys themselves.
pub fn spawn_maintenance(
    guard: Arc<SecurityGuard>,
    store: Option<Arc<MemoryWindowStore>>,
    clock: Arc<dyn Clock>,
    config: &GuardConfig,
    shutdown: &Shutdown,
) -> MaintenanceHandles {
    let purge = store.map(|store| {
        let period = Duration::from_secs(config.rate_limit.purge_interval_secs.max(1));
        let clock = clock.clone();
        tokio::spawn(purge_loop(store, clock, period, shutdown.subscribe()))
    });

    let period = Duration::from_secs(config.audit.cleanup_interval_secs.max(1));
    let housekeeping = tokio::spawn(housekeeping_loop(guard, period, shutdown.subscribe()));

    MaintenanceHandles {
        purge,
        housekeeping,
    }
}

async fn purge_loop(
    store: Arc<MemoryWindowStore>,
    clock: Arc<dyn Clock>,
    period: Duration,
    mut shutdown: broadcast::Receiver<()>,
) {
    let mut ticker = time::interval_at(Instant::now() + period, period);
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                store.purge_expired(clock.now().timestamp_millis());
            }
            _ = shutdown.recv() => {
                tracing::debug!("Window purge loop exiting");
                break;
            }
        }
    }
}

async fn housekeeping_loop(
    guard: Arc<SecurityGuard>,
    period: Duration,
    mut shutdown: broadcast::Receiver<()>,
) {
    tracing::info!(interval_secs = period.as_secs(), "Housekeeping loop starting");
    let mut ticker = time::interval_at(Instant::now() + period, period);
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                run_housekeeping(&guard).await;
            }
            _ = shutdown.recv() => {
                tracing::debug!("Housekeeping loop exiting");
                break;
            }
        }
    }
}

/// One housekeeping pass. Public so operators can run it on demand. Sweep
/// and audit failures are counted by the audit logger.
pub async fn run_housekeeping(guard: &SecurityGuard) {
    if let Err(e) = guard.audit().cleanup_old_logs().await {
        tracing::error!(error = %e, "Audit retention sweep failed");
    }

    if let Some(version) = guard.encryption().rotate_if_due() {
        let details = crate::audit::details(serde_json::json!({ "key_version": version }));
        let context = crate::audit::AuditContext::default();
        if let Err(e) = guard
            .audit()
            .log_admin_action("system", "rotate_encryption_key", "encryption", details, &context)
            .await
        {
            tracing::error!(error = %e, "Failed to audit key rotation");
        }
    }
}
