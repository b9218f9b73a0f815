//! Shared utilities for integration tests.

#![allow(dead_code)]

use axum::extract::connect_info::MockConnectInfo;
use axum::Router;
use std::net::SocketAddr;
use std::sync::Arc;

use request_guard::audit::{AuditEvent, AuditEventType, MemoryAuditSink};
use request_guard::clock::ManualClock;
use request_guard::config::GuardConfig;
use request_guard::guard::{GuardDeps, SecurityGuard};
use request_guard::http::{AppState, GuardServer};
use request_guard::observability::SecurityMetrics;
use request_guard::security::MemoryWindowStore;

/// A guard wired to in-memory collaborators the test can inspect.
pub struct TestGuard {
    pub guard: Arc<SecurityGuard>,
    pub sink: Arc<MemoryAuditSink>,
    pub metrics: Arc<SecurityMetrics>,
    pub clock: Arc<ManualClock>,
    pub store: Arc<MemoryWindowStore>,
}

impl TestGuard {
    pub fn new(config: GuardConfig) -> Self {
        let sink = Arc::new(MemoryAuditSink::new());
        let metrics = Arc::new(SecurityMetrics::new());
        let clock = Arc::new(ManualClock::starting_now());
        let store = Arc::new(MemoryWindowStore::new());
        let guard = SecurityGuard::from_config(
            &config,
            GuardDeps {
                clock: clock.clone(),
                metrics: metrics.clone(),
                audit_sink: sink.clone(),
                window_store: store.clone(),
            },
        )
        .expect("guard should build from test config");

        Self {
            guard: Arc::new(guard),
            sink,
            metrics,
            clock,
            store,
        }
    }

    pub async fn events(&self) -> Vec<AuditEvent> {
        self.guard.audit().events().await.expect("audit events readable")
    }

    pub async fn events_of(&self, event_type: AuditEventType) -> Vec<AuditEvent> {
        self.events()
            .await
            .into_iter()
            .filter(|e| e.event_type == event_type)
            .collect()
    }

    /// The full HTTP stack, with every request appearing to come from `peer`.
    pub fn router(&self, peer: SocketAddr) -> Router {
        let state = AppState {
            guard: self.guard.clone(),
            metrics: self.metrics.clone(),
            clock: self.clock.clone(),
        };
        GuardServer::build_router(state, std::time::Duration::from_secs(5))
            .layer(MockConnectInfo(peer))
    }
}

pub fn peer(ip: &str) -> SocketAddr {
    format!("{}:40000", ip).parse().expect("valid test address")
}

pub fn config_with_blocked(ips: &[&str]) -> GuardConfig {
    let mut config = GuardConfig::default();
    config.network.blocked_ips = ips.iter().map(|s| s.to_string()).collect();
    config
}
