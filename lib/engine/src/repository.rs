//! Execution Repository (C4): the persistence contract.
//!
//! This module only defines the trait; `bin/server` supplies the concrete
//! `sqlx`/Postgres implementation. An in-memory test double lives here too,
//! since every other engine component is unit-tested against it instead of
//! a live database.

use crate::edge::Edge;
use crate::error::EngineError;
use crate::execution::{Execution, NodeExecution};
use crate::generation::Generation;
use crate::node::Node;
use adgraph_core::{ExecutionId, NodeId, UserId, WorkflowId};
use async_trait::async_trait;
use serde_json::Value as JsonValue;
use std::collections::HashMap;

/// Partial update to an `Execution` record.
#[derive(Debug, Clone, Default)]
pub struct ExecutionUpdate {
    pub status: Option<crate::execution::ExecutionStatus>,
    pub error_message: Option<String>,
    pub total_cost: Option<f64>,
}

/// Partial update to a `NodeExecution` record.
#[derive(Debug, Clone, Default)]
pub struct NodeExecutionUpdate {
    pub status: Option<crate::execution::NodeExecutionStatus>,
    pub input_data: Option<HashMap<NodeId, JsonValue>>,
    pub output_data: Option<JsonValue>,
    pub error_message: Option<String>,
}

/// Persistence contract for executions and node executions.
///
/// Every method is a suspension point (it performs I/O); the Runner relies
/// on `fetch_execution_for_user` being cheap enough to poll repeatedly for
/// cancellation (see the concurrency model this crate implements).
#[async_trait]
pub trait ExecutionRepository: Send + Sync {
    /// Fails with `EngineError::NotFound` if the workflow does not exist or
    /// is not owned by `requesting_user_id`.
    async fn fetch_workflow(
        &self,
        workflow_id: WorkflowId,
        requesting_user_id: UserId,
    ) -> Result<(Vec<Node>, Vec<Edge>), EngineError>;

    /// Creates a new Execution in `RUNNING` status (callers that want a
    /// deferred background start overwrite it to `PENDING` immediately
    /// after, via `update_execution`).
    async fn create_execution(&self, workflow_id: WorkflowId) -> Result<ExecutionId, EngineError>;

    /// Creates one `PENDING` NodeExecution per node in `ordered_nodes`.
    async fn create_node_executions(
        &self,
        execution_id: ExecutionId,
        ordered_nodes: &[NodeId],
    ) -> Result<(), EngineError>;

    async fn update_execution(
        &self,
        execution_id: ExecutionId,
        update: ExecutionUpdate,
    ) -> Result<(), EngineError>;

    async fn update_node_execution(
        &self,
        execution_id: ExecutionId,
        node_id: &NodeId,
        update: NodeExecutionUpdate,
    ) -> Result<(), EngineError>;

    /// Fails with `EngineError::NotFound` if the execution does not exist or
    /// is not owned by `user_id`.
    async fn fetch_execution_for_user(
        &self,
        execution_id: ExecutionId,
        user_id: UserId,
    ) -> Result<Execution, EngineError>;

    async fn fetch_node_executions(
        &self,
        execution_id: ExecutionId,
    ) -> Result<Vec<NodeExecution>, EngineError>;

    /// Ambient-stack addition: appends a `Generation` audit row. Never read
    /// back by the engine.
    async fn record_generation(&self, generation: Generation) -> Result<(), EngineError>;
}

/// An in-memory `ExecutionRepository`, used by unit and integration tests in
/// this workspace instead of standing up a live Postgres instance.
#[derive(Default)]
pub struct InMemoryRepository {
    inner: tokio::sync::Mutex<InMemoryState>,
}

#[derive(Default)]
struct InMemoryState {
    workflows: HashMap<WorkflowId, (UserId, Vec<Node>, Vec<Edge>)>,
    executions: HashMap<ExecutionId, (WorkflowId, Execution)>,
    node_executions: HashMap<ExecutionId, Vec<NodeExecution>>,
    generations: Vec<Generation>,
}

impl InMemoryRepository {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn seed_workflow(&self, workflow_id: WorkflowId, user_id: UserId, nodes: Vec<Node>, edges: Vec<Edge>) {
        self.inner
            .lock()
            .await
            .workflows
            .insert(workflow_id, (user_id, nodes, edges));
    }

    /// Test helper: snapshot the execution's current status.
    pub async fn execution_status(&self, execution_id: ExecutionId) -> Option<crate::execution::ExecutionStatus> {
        self.inner
            .lock()
            .await
            .executions
            .get(&execution_id)
            .map(|(_, execution)| execution.status)
    }

    /// Test helper: snapshot the node execution's current status.
    pub async fn node_execution_status(
        &self,
        execution_id: ExecutionId,
        node_id: &NodeId,
    ) -> Option<crate::execution::NodeExecutionStatus> {
        self.inner
            .lock()
            .await
            .node_executions
            .get(&execution_id)
            .and_then(|records| records.iter().find(|r| &r.node_id == node_id))
            .map(|r| r.status)
    }

    pub async fn generation_count(&self) -> usize {
        self.inner.lock().await.generations.len()
    }
}

#[async_trait]
impl ExecutionRepository for InMemoryRepository {
    async fn fetch_workflow(
        &self,
        workflow_id: WorkflowId,
        requesting_user_id: UserId,
    ) -> Result<(Vec<Node>, Vec<Edge>), EngineError> {
        let state = self.inner.lock().await;
        let (owner, nodes, edges) = state
            .workflows
            .get(&workflow_id)
            .ok_or(EngineError::NotFound { what: "workflow" })?;
        if *owner != requesting_user_id {
            return Err(EngineError::NotFound { what: "workflow" });
        }
        Ok((nodes.clone(), edges.clone()))
    }

    async fn create_execution(&self, workflow_id: WorkflowId) -> Result<ExecutionId, EngineError> {
        let mut state = self.inner.lock().await;
        let execution_id = ExecutionId::new();
        let mut execution = Execution::new(execution_id, workflow_id);
        execution.start();
        state.executions.insert(execution_id, (workflow_id, execution));
        state.node_executions.insert(execution_id, Vec::new());
        Ok(execution_id)
    }

    async fn create_node_executions(
        &self,
        execution_id: ExecutionId,
        ordered_nodes: &[NodeId],
    ) -> Result<(), EngineError> {
        let mut state = self.inner.lock().await;
        let records = ordered_nodes
            .iter()
            .map(|node_id| NodeExecution::new(execution_id, node_id.clone()))
            .collect();
        state.node_executions.insert(execution_id, records);
        Ok(())
    }

    async fn update_execution(
        &self,
        execution_id: ExecutionId,
        update: ExecutionUpdate,
    ) -> Result<(), EngineError> {
        let mut state = self.inner.lock().await;
        let (_, execution) = state
            .executions
            .get_mut(&execution_id)
            .ok_or(EngineError::NotFound { what: "execution" })?;

        if execution.status.is_terminal() {
            return Ok(());
        }

        if let Some(status) = update.status {
            execution.status = status;
            if status.is_terminal() {
                execution.finished_at = Some(chrono::Utc::now());
            }
        }
        if let Some(error_message) = update.error_message {
            execution.error_message = Some(error_message);
        }
        if let Some(total_cost) = update.total_cost {
            execution.total_cost = total_cost;
        }
        Ok(())
    }

    async fn update_node_execution(
        &self,
        execution_id: ExecutionId,
        node_id: &NodeId,
        update: NodeExecutionUpdate,
    ) -> Result<(), EngineError> {
        let mut state = self.inner.lock().await;
        let records = state
            .node_executions
            .get_mut(&execution_id)
            .ok_or(EngineError::NotFound { what: "execution" })?;
        let record = records
            .iter_mut()
            .find(|r| &r.node_id == node_id)
            .ok_or(EngineError::NotFound { what: "node execution" })?;

        if let Some(status) = update.status {
            record.status = status;
            if status == crate::execution::NodeExecutionStatus::Running {
                record.started_at.get_or_insert_with(chrono::Utc::now);
            } else if status.is_terminal() {
                record.finished_at = Some(chrono::Utc::now());
            }
        }
        if let Some(input_data) = update.input_data {
            record.input_data = Some(input_data);
        }
        if let Some(output_data) = update.output_data {
            record.output_data = Some(output_data);
        }
        if let Some(error_message) = update.error_message {
            record.error_message = Some(error_message);
        }
        Ok(())
    }

    async fn fetch_execution_for_user(
        &self,
        execution_id: ExecutionId,
        user_id: UserId,
    ) -> Result<Execution, EngineError> {
        let state = self.inner.lock().await;
        let (workflow_id, execution) = state
            .executions
            .get(&execution_id)
            .ok_or(EngineError::NotFound { what: "execution" })?;
        let (owner, _, _) = state
            .workflows
            .get(workflow_id)
            .ok_or(EngineError::NotFound { what: "execution" })?;
        if *owner != user_id {
            return Err(EngineError::NotFound { what: "execution" });
        }
        Ok(execution.clone())
    }

    async fn fetch_node_executions(&self, execution_id: ExecutionId) -> Result<Vec<NodeExecution>, EngineError> {
        let state = self.inner.lock().await;
        state
            .node_executions
            .get(&execution_id)
            .cloned()
            .ok_or(EngineError::NotFound { what: "execution" })
    }

    async fn record_generation(&self, generation: Generation) -> Result<(), EngineError> {
        self.inner.lock().await.generations.push(generation);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::NodeType;

    #[tokio::test]
    async fn fetch_workflow_enforces_ownership() {
        let repo = InMemoryRepository::new();
        let owner = UserId::new();
        let stranger = UserId::new();
        let workflow_id = WorkflowId::new();
        repo.seed_workflow(workflow_id, owner, vec![Node::new("a", NodeType::Output)], vec![])
            .await;

        assert!(repo.fetch_workflow(workflow_id, owner).await.is_ok());
        assert!(matches!(
            repo.fetch_workflow(workflow_id, stranger).await,
            Err(EngineError::NotFound { what: "workflow" })
        ));
    }

    #[tokio::test]
    async fn terminal_execution_rejects_further_writes() {
        let repo = InMemoryRepository::new();
        let execution_id = repo.create_execution(WorkflowId::new()).await.unwrap();

        repo.update_execution(
            execution_id,
            ExecutionUpdate {
                status: Some(crate::execution::ExecutionStatus::Cancelled),
                ..Default::default()
            },
        )
        .await
        .unwrap();

        repo.update_execution(
            execution_id,
            ExecutionUpdate {
                status: Some(crate::execution::ExecutionStatus::Completed),
                ..Default::default()
            },
        )
        .await
        .unwrap();

        let user_id = UserId::new();
        let workflow_id = WorkflowId::new();
        repo.seed_workflow(workflow_id, user_id, vec![], vec![]).await;
        // Directly inspect via the test helper instead, since fetch_execution_for_user
        // requires workflow ownership wiring not exercised by this unit test.
        let status = repo.execution_status(execution_id).await.unwrap();
        assert_eq!(status, crate::execution::ExecutionStatus::Cancelled);
    }
}
