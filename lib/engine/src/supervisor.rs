//! Background Task Supervisor (C7): detaches a `start` or `step` invocation
//! onto its own `tokio` task so the HTTP handler that triggered it can
//! return immediately, and makes sure an uncaught panic or error in that
//! task still leaves the Execution in a terminal state rather than stuck
//! `RUNNING` forever.

use crate::controller::DebugController;
use crate::error::EngineError;
use crate::execution::ExecutionStatus;
use crate::repository::{ExecutionRepository, ExecutionUpdate};
use adgraph_core::{ExecutionId, UserId, WorkflowId};
use std::future::Future;
use std::sync::Arc;
use tracing::{error, warn};

/// Spawns `start` as a detached task and returns the `ExecutionId` of the
/// execution it created, without waiting for the run to reach a pause or
/// completion.
///
/// The caller learns the outcome later by polling the repository (or, in
/// `bin/server`, by the client re-fetching execution state) — this mirrors
/// the fire-and-forget dispatch the out-of-scope real scheduler uses.
pub async fn spawn_start<R: ExecutionRepository + 'static>(
    controller: Arc<DebugController<R>>,
    repository: Arc<R>,
    workflow_id: WorkflowId,
    user_id: UserId,
) -> Result<ExecutionId, EngineError> {
    let (nodes, edges) = repository.fetch_workflow(workflow_id, user_id).await?;
    let sorted = crate::graph::analyze(&nodes, &edges)?;
    let execution_id = repository.create_execution(workflow_id).await?;
    repository.create_node_executions(execution_id, &sorted).await?;

    spawn_supervised(repository.clone(), execution_id, async move {
        controller
            .start_existing(execution_id, workflow_id, user_id, true)
            .await
            .map(|_| ())
    });

    Ok(execution_id)
}

/// Spawns `step` as a detached task.
pub fn spawn_step<R: ExecutionRepository + 'static>(
    controller: Arc<DebugController<R>>,
    repository: Arc<R>,
    execution_id: ExecutionId,
    user_id: UserId,
) {
    spawn_supervised(repository, execution_id, async move {
        controller.step(execution_id, user_id).await.map(|_| ())
    });
}

/// Runs `task` on a new `tokio` task, wrapped with [`std::panic::AssertUnwindSafe`]-free
/// error handling: any `Err` the future resolves to, or any panic it unwinds
/// with, is caught here and translated into a best-effort `FAILED` write.
/// The write itself is allowed to fail silently (logged, not propagated) —
/// there is no caller left to propagate it to.
fn spawn_supervised<R, F>(repository: Arc<R>, execution_id: ExecutionId, task: F)
where
    R: ExecutionRepository + 'static,
    F: Future<Output = Result<(), EngineError>> + Send + 'static,
{
    tokio::spawn(async move {
        let result = tokio::spawn(task).await;
        match result {
            Ok(Ok(())) => {}
            Ok(Err(err)) => {
                warn!(%execution_id, %err, "background execution task returned an error");
                mark_failed(&repository, execution_id, err.to_string()).await;
            }
            Err(join_err) => {
                error!(%execution_id, %join_err, "background execution task panicked");
                mark_failed(&repository, execution_id, "background task panicked".to_string()).await;
            }
        }
    });
}

async fn mark_failed<R: ExecutionRepository>(repository: &Arc<R>, execution_id: ExecutionId, message: String) {
    if let Err(err) = repository
        .update_execution(
            execution_id,
            ExecutionUpdate {
                status: Some(ExecutionStatus::Failed),
                error_message: Some(message),
                ..Default::default()
            },
        )
        .await
    {
        error!(%execution_id, %err, "failed to record supervisor-observed failure");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::edge::Edge;
    use crate::executor::ExecutorRegistry;
    use crate::node::{Node, NodeType};
    use crate::repository::InMemoryRepository;
    use serde_json::json;
    use std::time::Duration;

    #[tokio::test]
    async fn spawn_start_runs_to_pause_eventually() {
        let repo = Arc::new(InMemoryRepository::new());
        let registry = Arc::new(ExecutorRegistry::with_defaults());
        let user_id = UserId::new();
        let workflow_id = WorkflowId::new();

        let mut a = Node::new("a", NodeType::TextInput);
        a.config.insert("value".to_string(), json!("hi"));
        let b = Node::new("b", NodeType::Prompt).with_breakpoint(true);
        let c = Node::new("c", NodeType::Output);
        repo.seed_workflow(
            workflow_id,
            user_id,
            vec![a, b, c],
            vec![Edge::new("e1", "a", "b"), Edge::new("e2", "b", "c")],
        )
        .await;

        let controller = Arc::new(DebugController::new(repo.clone(), registry));
        let execution_id = spawn_start(controller, repo.clone(), workflow_id, user_id)
            .await
            .unwrap();

        // The spawned task races the assertion below; poll until it settles.
        let mut status = repo.execution_status(execution_id).await.unwrap();
        for _ in 0..50 {
            if matches!(status, ExecutionStatus::Paused | ExecutionStatus::Completed | ExecutionStatus::Failed) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
            status = repo.execution_status(execution_id).await.unwrap();
        }

        assert!(matches!(status, ExecutionStatus::Paused | ExecutionStatus::Completed));
    }
}
