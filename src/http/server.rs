//! HTTP server setup.
//!
//! # Responsibilities
//! - Create the Axum router: health, security report, audit cleanup, guarded fallback
//! - Wire up middleware (request ID, tracing, timeout, guard)
//! - Bind plain TCP or TLS and serve until shutdown

use axum::{
    extract::{Extension, State},
    middleware,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use axum_server::tls_rustls::RustlsConfig;
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tower_http::{
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};

use crate::clock::Clock;
use crate::config::{ListenerConfig, TlsConfig};
use crate::error::GuardError;
use crate::guard::{Decision, SecurityGuard};
use crate::http::middleware::guard_middleware;
use crate::lifecycle::Shutdown;
use crate::observability::{SecurityMetrics, SecurityReport};

/// Shared handler state.
#[derive(Clone)]
pub struct AppState {
    pub guard: Arc<SecurityGuard>,
    pub metrics: Arc<SecurityMetrics>,
    pub clock: Arc<dyn Clock>,
}

pub struct GuardServer {
    router: Router,
    config: ListenerConfig,
}

impl GuardServer {
    pub fn new(state: AppState, config: ListenerConfig) -> Self {
        let router = Self::build_router(state, Duration::from_secs(config.request_timeout_secs));
        Self { router, config }
    }

    /// The fully layered router, for serving or for in-process tests.
    pub fn router(&self) -> Router {
        self.router.clone()
    }

    #[allow(deprecated)]
    pub fn build_router(state: AppState, timeout: Duration) -> Router {
        let guarded = Router::new()
            .route("/security/report", get(report_handler))
            .route("/audit/cleanup", post(audit_cleanup_handler))
            .fallback(guarded_handler)
            .layer(middleware::from_fn_with_state(
                state.guard.clone(),
                guard_middleware,
            ));

        Router::new()
            .route("/health", get(health_handler))
            .merge(guarded)
            .with_state(state)
            .layer(PropagateRequestIdLayer::x_request_id())
            .layer(TimeoutLayer::new(timeout))
            .layer(TraceLayer::new_for_http())
            .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
    }

    /// Serve until `shutdown` fires, then drain in-flight requests.
    pub async fn run(self, shutdown: &Shutdown) -> Result<(), std::io::Error> {
        let addr: SocketAddr = self.config.bind_address.parse().map_err(|e| {
            std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("invalid bind address {}: {}", self.config.bind_address, e),
            )
        })?;
        let app = self
            .router
            .into_make_service_with_connect_info::<SocketAddr>();
        let mut stop = shutdown.subscribe();

        match &self.config.tls {
            Some(tls) => {
                let rustls = load_tls_config(tls).await?;
                let handle = axum_server::Handle::new();
                let drain = handle.clone();
                tokio::spawn(async move {
                    let _ = stop.recv().await;
                    drain.graceful_shutdown(Some(Duration::from_secs(10)));
                });

                tracing::info!(address = %addr, "HTTPS server starting");
                axum_server::bind_rustls(addr, rustls)
                    .handle(handle)
                    .serve(app)
                    .await?;
            }
            None => {
                let listener = TcpListener::bind(addr).await?;
                tracing::info!(address = %listener.local_addr()?, "HTTP server starting");
                axum::serve(listener, app)
                    .with_graceful_shutdown(async move {
                        let _ = stop.recv().await;
                    })
                    .await?;
            }
        }

        tracing::info!("HTTP server stopped");
        Ok(())
    }
}

/// Load certificate and key PEM files.
pub async fn load_tls_config(tls: &TlsConfig) -> Result<RustlsConfig, std::io::Error> {
    for (what, path) in [("Certificate", &tls.cert_path), ("Private key", &tls.key_path)] {
        if !Path::new(path).exists() {
            return Err(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("{} file not found: {}", what, path),
            ));
        }
    }
    RustlsConfig::from_pem_file(&tls.cert_path, &tls.key_path).await
}

async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "key_version": state.guard.encryption().current_key_version(),
    }))
}

async fn report_handler(State(state): State<AppState>) -> impl IntoResponse {
    Json(SecurityReport::from_metrics(&state.metrics, state.clock.now()))
}

/// Retention sweep on demand. It runs here, next to the writer, because the
/// sink serializes appends and rewrites only within one process.
async fn audit_cleanup_handler(State(state): State<AppState>) -> Result<Json<Value>, GuardError> {
    let removed = state.guard.audit().cleanup_old_logs().await?;
    Ok(Json(json!({ "removed": removed })))
}

/// Stand-in for business routes: echoes what the guard let through.
async fn guarded_handler(Extension(decision): Extension<Decision>) -> impl IntoResponse {
    Json(json!({
        "allowed": decision.allowed,
        "risk_score": decision.risk_score,
        "fields": decision.sanitized_fields,
    }))
}
