//! Agent listing and manual triggers.

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};

use crate::agent::RunReport;
use crate::error::{AgentError, TriggerError};
use crate::scheduler::AgentInfo;

use super::routes::AppState;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", get(list_agents))
        .route("/:name/run", post(run_agent))
        .route("/:name/ops/:op/:id", post(invoke_operation))
}

fn error_status(e: &TriggerError) -> StatusCode {
    match e {
        TriggerError::UnknownAgent(_) => StatusCode::NOT_FOUND,
        TriggerError::Run { source, .. } => match source {
            AgentError::UnknownOperation { .. } | AgentError::NotFound(_) => StatusCode::NOT_FOUND,
            AgentError::External(_) => StatusCode::BAD_GATEWAY,
            AgentError::Data(_) | AgentError::Failed(_) => StatusCode::INTERNAL_SERVER_ERROR,
        },
    }
}

fn into_response(
    result: Result<RunReport, TriggerError>,
) -> Result<Json<RunReport>, (StatusCode, String)> {
    result.map(Json).map_err(|e| {
        tracing::warn!("Manual trigger failed: {}", e);
        (error_status(&e), e.to_string())
    })
}

/// GET /api/agents - Every known agent with schedule, flags and status.
async fn list_agents(State(state): State<Arc<AppState>>) -> Json<Vec<AgentInfo>> {
    Json(state.scheduler.agent_statuses())
}

/// POST /api/agents/:name/run - Run an agent once.
async fn run_agent(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> Result<Json<RunReport>, (StatusCode, String)> {
    into_response(state.scheduler.trigger(&name).await)
}

/// POST /api/agents/:name/ops/:op/:id - Run a named sub-operation.
async fn invoke_operation(
    State(state): State<Arc<AppState>>,
    Path((name, op, id)): Path<(String, String, String)>,
) -> Result<Json<RunReport>, (StatusCode, String)> {
    into_response(state.scheduler.invoke(&name, &op, &id).await)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::routes::tests::state;

    #[tokio::test]
    async fn test_list_agents() {
        let state = state(&[]);
        let Json(agents) = list_agents(State(state)).await;
        assert_eq!(agents.len(), crate::registry::DEFINITIONS.len());
        assert!(agents.iter().all(|a| !a.enabled && !a.scheduled));
    }

    #[tokio::test]
    async fn test_unknown_agent_is_404() {
        let state = state(&[]);
        let err = run_agent(State(state), Path("ghost".to_string()))
            .await
            .unwrap_err();
        assert_eq!(err.0, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_unknown_operation_is_404() {
        let state = state(&[]);
        let err = invoke_operation(
            State(state),
            Path(("outreach".to_string(), "briefing".to_string(), "1".to_string())),
        )
        .await
        .unwrap_err();
        assert_eq!(err.0, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_run_without_data_source_is_500() {
        let state = state(&[]);
        let err = run_agent(State(state), Path("claims-watch".to_string()))
            .await
            .unwrap_err();
        assert_eq!(err.0, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(err.1.contains("no data source configured"));
    }
}
