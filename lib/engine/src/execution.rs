//! Execution lifecycle: the per-run and per-node status state machines.
//!
//! `Execution` and `NodeExecution` are pure data — mutated only by the
//! [`crate::runner`] and read by the [`crate::controller`]; see the
//! invariants in the data model this crate implements (I1-I5).

use adgraph_core::{ExecutionId, NodeId, WorkflowId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::HashMap;

/// Lifecycle status of an Execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExecutionStatus {
    Pending,
    Running,
    Paused,
    Completed,
    Failed,
    Cancelled,
}

impl ExecutionStatus {
    /// Terminal statuses are absorbing: once reached, the Runner performs no
    /// further writes for this Execution.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

/// Lifecycle status of a single NodeExecution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NodeExecutionStatus {
    Pending,
    Running,
    Paused,
    Completed,
    Failed,
    Skipped,
}

impl NodeExecutionStatus {
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Skipped)
    }
}

/// One run of a workflow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Execution {
    pub execution_id: ExecutionId,
    pub workflow_id: WorkflowId,
    pub status: ExecutionStatus,
    pub total_cost: f64,
    pub error_message: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl Execution {
    /// Creates a new Execution in `PENDING` status.
    #[must_use]
    pub fn new(execution_id: ExecutionId, workflow_id: WorkflowId) -> Self {
        Self {
            execution_id,
            workflow_id,
            status: ExecutionStatus::Pending,
            total_cost: 0.0,
            error_message: None,
            started_at: None,
            finished_at: None,
        }
    }

    pub fn start(&mut self) {
        self.status = ExecutionStatus::Running;
        self.started_at.get_or_insert_with(Utc::now);
    }

    pub fn pause(&mut self) {
        self.status = ExecutionStatus::Paused;
    }

    pub fn complete(&mut self, total_cost: f64) {
        self.status = ExecutionStatus::Completed;
        self.total_cost = total_cost;
        self.finished_at = Some(Utc::now());
    }

    pub fn fail(&mut self, error_message: impl Into<String>) {
        self.status = ExecutionStatus::Failed;
        self.error_message = Some(error_message.into());
        self.finished_at = Some(Utc::now());
    }

    pub fn cancel(&mut self) {
        self.status = ExecutionStatus::Cancelled;
        self.finished_at = Some(Utc::now());
    }
}

/// Per-node execution record, keyed by `(execution_id, node_id)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeExecution {
    pub execution_id: ExecutionId,
    pub node_id: NodeId,
    pub status: NodeExecutionStatus,
    pub input_data: Option<HashMap<NodeId, JsonValue>>,
    pub output_data: Option<JsonValue>,
    pub error_message: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl NodeExecution {
    /// Creates a new NodeExecution in `PENDING` status.
    #[must_use]
    pub fn new(execution_id: ExecutionId, node_id: NodeId) -> Self {
        Self {
            execution_id,
            node_id,
            status: NodeExecutionStatus::Pending,
            input_data: None,
            output_data: None,
            error_message: None,
            started_at: None,
            finished_at: None,
        }
    }

    pub fn start(&mut self, input_data: HashMap<NodeId, JsonValue>) {
        self.status = NodeExecutionStatus::Running;
        self.input_data = Some(input_data);
        self.started_at.get_or_insert_with(Utc::now);
    }

    pub fn pause(&mut self) {
        self.status = NodeExecutionStatus::Paused;
    }

    pub fn complete(&mut self, output_data: JsonValue) {
        self.status = NodeExecutionStatus::Completed;
        self.output_data = Some(output_data);
        self.finished_at = Some(Utc::now());
    }

    pub fn fail(&mut self, error_message: impl Into<String>) {
        self.status = NodeExecutionStatus::Failed;
        self.error_message = Some(error_message.into());
        self.finished_at = Some(Utc::now());
    }

    /// Extracts the numeric `cost` key from `output_data`, if present.
    #[must_use]
    pub fn cost(&self) -> f64 {
        self.output_data
            .as_ref()
            .and_then(|output| output.get("cost"))
            .and_then(JsonValue::as_f64)
            .unwrap_or(0.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn execution_status_terminal() {
        assert!(!ExecutionStatus::Pending.is_terminal());
        assert!(!ExecutionStatus::Running.is_terminal());
        assert!(!ExecutionStatus::Paused.is_terminal());
        assert!(ExecutionStatus::Completed.is_terminal());
        assert!(ExecutionStatus::Failed.is_terminal());
        assert!(ExecutionStatus::Cancelled.is_terminal());
    }

    #[test]
    fn execution_lifecycle() {
        let mut execution = Execution::new(ExecutionId::new(), WorkflowId::new());
        assert_eq!(execution.status, ExecutionStatus::Pending);

        execution.start();
        assert_eq!(execution.status, ExecutionStatus::Running);
        assert!(execution.started_at.is_some());

        execution.complete(1.5);
        assert_eq!(execution.status, ExecutionStatus::Completed);
        assert_eq!(execution.total_cost, 1.5);
        assert!(execution.finished_at.is_some());
    }

    #[test]
    fn execution_failure_records_message() {
        let mut execution = Execution::new(ExecutionId::new(), WorkflowId::new());
        execution.fail("boom");
        assert_eq!(execution.status, ExecutionStatus::Failed);
        assert_eq!(execution.error_message.as_deref(), Some("boom"));
    }

    #[test]
    fn node_execution_cost_extraction() {
        let mut node_exec = NodeExecution::new(ExecutionId::new(), NodeId::new("a"));
        node_exec.complete(serde_json::json!({"cost": 0.25, "image_urls": []}));
        assert_eq!(node_exec.cost(), 0.25);
    }

    #[test]
    fn node_execution_cost_defaults_to_zero() {
        let mut node_exec = NodeExecution::new(ExecutionId::new(), NodeId::new("a"));
        node_exec.complete(serde_json::json!({"text": "hi"}));
        assert_eq!(node_exec.cost(), 0.0);
    }

    #[test]
    fn node_execution_serde_roundtrip() {
        let node_exec = NodeExecution::new(ExecutionId::new(), NodeId::new("a"));
        let json = serde_json::to_string(&node_exec).unwrap();
        let parsed: NodeExecution = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.node_id, node_exec.node_id);
        assert_eq!(parsed.status, NodeExecutionStatus::Pending);
    }
}
