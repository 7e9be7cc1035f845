//! Debug Controller (C6): the three user-facing operations — `start`,
//! `step`, and `cancel` — each ownership-checked against the repository
//! before touching the Runner.

use crate::error::EngineError;
use crate::execution::ExecutionStatus;
use crate::graph::analyze;
use crate::repository::{ExecutionRepository, ExecutionUpdate};
use crate::runner::{find_paused_index, ExecutionRunner, RunOutcome};
use adgraph_core::{ExecutionId, UserId, WorkflowId};
use std::sync::Arc;
use tracing::info;

use crate::executor::ExecutorRegistry;

/// Orchestrates the three debug operations against a repository and
/// executor registry. Holds no state of its own beyond those two handles.
pub struct DebugController<R: ExecutionRepository> {
    repository: Arc<R>,
    runner: ExecutionRunner<R>,
}

impl<R: ExecutionRepository> DebugController<R> {
    #[must_use]
    pub fn new(repository: Arc<R>, registry: Arc<ExecutorRegistry>) -> Self {
        let runner = ExecutionRunner::new(repository.clone(), registry);
        Self { repository, runner }
    }

    /// Creates a new Execution for `workflow_id` and runs it to completion,
    /// the first pause, cancellation, or failure — whichever comes first.
    ///
    /// `pause_on_breakpoints` lets callers start a run that ignores
    /// breakpoints entirely (a "run to completion" mode some clients want),
    /// though the default debug workflow always passes `true`.
    pub async fn start(
        &self,
        workflow_id: WorkflowId,
        user_id: UserId,
        pause_on_breakpoints: bool,
    ) -> Result<RunOutcome, EngineError> {
        let (nodes, edges) = self.repository.fetch_workflow(workflow_id, user_id).await?;
        let sorted = analyze(&nodes, &edges)?;

        let execution_id = self.repository.create_execution(workflow_id).await?;
        self.repository.create_node_executions(execution_id, &sorted).await?;
        info!(%execution_id, %workflow_id, node_count = sorted.len(), "execution started");

        Ok(self
            .runner
            .run(execution_id, user_id, &nodes, &edges, &sorted, 0, pause_on_breakpoints)
            .await)
    }

    /// Runs an Execution that a caller already created via
    /// `repository.create_execution`/`create_node_executions`, instead of
    /// minting a fresh one the way [`Self::start`] does.
    ///
    /// Exists for callers like the Background Task Supervisor, which must
    /// hand the caller an `execution_id` *before* the run itself begins —
    /// if `start` were used there instead, the id returned up front and the
    /// id the run actually advances would be two different executions.
    pub async fn start_existing(
        &self,
        execution_id: ExecutionId,
        workflow_id: WorkflowId,
        user_id: UserId,
        pause_on_breakpoints: bool,
    ) -> Result<RunOutcome, EngineError> {
        let (nodes, edges) = self.repository.fetch_workflow(workflow_id, user_id).await?;
        let sorted = analyze(&nodes, &edges)?;
        info!(%execution_id, %workflow_id, node_count = sorted.len(), "execution started");

        Ok(self
            .runner
            .run(execution_id, user_id, &nodes, &edges, &sorted, 0, pause_on_breakpoints)
            .await)
    }

    /// Advances a `PAUSED` execution by exactly one node.
    ///
    /// Fails with [`EngineError::NotFound`] if the execution is not owned by
    /// `user_id`. If it is not currently `PAUSED`, this is a no-op: the
    /// current status is returned unchanged rather than treated as an error.
    pub async fn step(&self, execution_id: ExecutionId, user_id: UserId) -> Result<RunOutcome, EngineError> {
        let execution = self.repository.fetch_execution_for_user(execution_id, user_id).await?;
        if execution.status != ExecutionStatus::Paused {
            return Ok(RunOutcome {
                execution_id,
                status: execution.status,
                current_node_id: None,
                error_message: execution.error_message,
            });
        }

        let (nodes, edges) = self.repository.fetch_workflow(execution.workflow_id, user_id).await?;
        let sorted = analyze(&nodes, &edges)?;
        let node_executions = self.repository.fetch_node_executions(execution_id).await?;
        let start_index = find_paused_index(&node_executions, &sorted)
            .ok_or(EngineError::NotFound { what: "paused node" })?;

        Ok(self
            .runner
            .step(execution_id, user_id, &nodes, &edges, &sorted, start_index)
            .await)
    }

    /// Cooperatively cancels an execution: marks it `CANCELLED` so the next
    /// poll inside the Runner's loop (or the next `step`) observes it and
    /// stops. Does not interrupt a dispatch already in flight.
    pub async fn cancel(&self, execution_id: ExecutionId, user_id: UserId) -> Result<(), EngineError> {
        let execution = self.repository.fetch_execution_for_user(execution_id, user_id).await?;
        if execution.status.is_terminal() {
            return Ok(());
        }
        info!(%execution_id, "cancellation requested");
        self.repository
            .update_execution(
                execution_id,
                ExecutionUpdate {
                    status: Some(ExecutionStatus::Cancelled),
                    ..Default::default()
                },
            )
            .await
    }
}
