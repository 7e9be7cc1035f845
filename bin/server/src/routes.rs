//! HTTP surface: the three debug operations, each authenticated by a Bearer
//! JWT and ownership-checked by the engine itself.

use crate::auth::AuthenticatedUser;
use crate::error::ApiError;
use adgraph_core::{ExecutionId, NodeId, WorkflowId};
use adgraph_engine::{supervisor, DebugController, ExecutionRepository, ExecutionStatus};
use axum::extract::{Path, State};
use axum::routing::post;
use axum::{Json, Router};
use serde::Serialize;
use std::str::FromStr;
use std::sync::Arc;

/// Shared router state, cloneable into every handler.
///
/// Cloned manually rather than derived: `#[derive(Clone)]` would require
/// `R: Clone`, but only the `Arc<R>` needs to be — `PgExecutionRepository`
/// itself never is.
pub struct AppState<R: ExecutionRepository> {
    pub repository: Arc<R>,
    pub controller: Arc<DebugController<R>>,
    pub jwt: crate::auth::JwtVerifier,
}

impl<R: ExecutionRepository> Clone for AppState<R> {
    fn clone(&self) -> Self {
        Self {
            repository: self.repository.clone(),
            controller: self.controller.clone(),
            jwt: self.jwt.clone(),
        }
    }
}

impl<R: ExecutionRepository> axum::extract::FromRef<AppState<R>> for crate::auth::JwtVerifier {
    fn from_ref(state: &AppState<R>) -> Self {
        state.jwt.clone()
    }
}

#[derive(Serialize)]
struct ExecuteResponse {
    execution_id: ExecutionId,
    status: ExecutionStatus,
}

#[derive(Serialize)]
struct StepResponse {
    execution_id: ExecutionId,
    status: ExecutionStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    current_node_id: Option<NodeId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error_message: Option<String>,
}

/// `POST /api/workflows/{workflow_id}/execute`
///
/// Starts a new execution in the background and returns immediately with its
/// id in `PENDING`/`RUNNING` status; the client polls `step`/the execution's
/// own status to observe progress.
async fn execute_workflow<R: ExecutionRepository + 'static>(
    State(state): State<AppState<R>>,
    AuthenticatedUser(user_id): AuthenticatedUser,
    Path(workflow_id): Path<String>,
) -> Result<Json<ExecuteResponse>, ApiError> {
    let workflow_id = WorkflowId::from_str(&workflow_id)
        .map_err(|_| ApiError::Engine(adgraph_engine::EngineError::NotFound { what: "workflow" }))?;

    let execution_id =
        supervisor::spawn_start(state.controller.clone(), state.repository.clone(), workflow_id, user_id).await?;

    Ok(Json(ExecuteResponse {
        execution_id,
        status: ExecutionStatus::Running,
    }))
}

/// `POST /api/executions/{execution_id}/step`
///
/// Advances a paused execution by exactly one node and returns the outcome:
/// the node it paused at next, or the terminal status it reached.
async fn step_execution<R: ExecutionRepository + 'static>(
    State(state): State<AppState<R>>,
    AuthenticatedUser(user_id): AuthenticatedUser,
    Path(execution_id): Path<String>,
) -> Result<Json<StepResponse>, ApiError> {
    let execution_id = ExecutionId::from_str(&execution_id)
        .map_err(|_| ApiError::Engine(adgraph_engine::EngineError::NotFound { what: "execution" }))?;
    let outcome = state.controller.step(execution_id, user_id).await?;

    Ok(Json(StepResponse {
        execution_id: outcome.execution_id,
        status: outcome.status,
        current_node_id: outcome.current_node_id,
        error_message: outcome.error_message,
    }))
}

/// `POST /api/executions/{execution_id}/cancel`
async fn cancel_execution<R: ExecutionRepository + 'static>(
    State(state): State<AppState<R>>,
    AuthenticatedUser(user_id): AuthenticatedUser,
    Path(execution_id): Path<String>,
) -> Result<Json<ExecuteResponse>, ApiError> {
    let execution_id = ExecutionId::from_str(&execution_id)
        .map_err(|_| ApiError::Engine(adgraph_engine::EngineError::NotFound { what: "execution" }))?;
    state.controller.cancel(execution_id, user_id).await?;
    let execution = state.repository.fetch_execution_for_user(execution_id, user_id).await?;

    Ok(Json(ExecuteResponse {
        execution_id,
        status: execution.status,
    }))
}

/// Builds the router for the three debug endpoints.
pub fn router<R: ExecutionRepository + 'static>(state: AppState<R>) -> Router {
    Router::new()
        .route("/api/workflows/{workflow_id}/execute", post(execute_workflow::<R>))
        .route("/api/executions/{execution_id}/step", post(step_execution::<R>))
        .route("/api/executions/{execution_id}/cancel", post(cancel_execution::<R>))
        .with_state(state)
}
