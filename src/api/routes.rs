//! Router, shared state and server loop.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{extract::State, response::Json, routing::get, Router};
use serde::Serialize;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::scheduler::{Scheduler, StatusReport};

use super::agents;

/// Shared application state.
pub struct AppState {
    pub scheduler: Arc<Scheduler>,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub scheduler_running: bool,
    pub jobs: usize,
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/health", get(health))
        .route("/api/status", get(status))
        .nest("/api/agents", agents::routes())
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serve until Ctrl+C or SIGTERM, then stop the scheduler.
pub async fn serve(state: Arc<AppState>, addr: SocketAddr) -> anyhow::Result<()> {
    let app = router(Arc::clone(&state));
    let listener = tokio::net::TcpListener::bind(addr).await?;

    tracing::info!("Server listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            state.scheduler.stop();
        })
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::warn!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received, stopping scheduler...");
}

/// Liveness probe.
async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        scheduler_running: state.scheduler.is_running(),
        jobs: state.scheduler.job_names().len(),
    })
}

/// Global configuration, re-read on every call.
async fn status(State(state): State<Arc<AppState>>) -> Json<StatusReport> {
    Json(state.scheduler.status())
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::agent::AgentContext;
    use crate::config::ConfigStore;
    use crate::registry;

    pub(crate) fn state(vars: &[(&str, &str)]) -> Arc<AppState> {
        let config = ConfigStore::from_vars(vars.iter().copied(), &registry::agent_names());
        let ctx = AgentContext::new(Arc::new(config));
        Arc::new(AppState {
            scheduler: Arc::new(Scheduler::new(ctx)),
        })
    }

    #[tokio::test]
    async fn test_health_and_status() {
        let state = state(&[("AGENT_HEALTH_MONITOR_ENABLED", "true")]);
        state.scheduler.start();

        let Json(h) = health(State(Arc::clone(&state))).await;
        assert_eq!(h.status, "ok");
        assert!(h.scheduler_running);
        assert_eq!(h.jobs, 1);

        let Json(s) = status(State(Arc::clone(&state))).await;
        assert!(s.simulation_mode);
        assert_eq!(s.enabled_agents, vec!["health-monitor".to_string()]);
        state.scheduler.stop();
    }
}
