//! Execution Runner (C5): the scheduler state machine.
//!
//! Two entry points, [`ExecutionRunner::run`] (full run) and
//! [`ExecutionRunner::step`] (single step), mirror the two ways the
//! out-of-scope node executor bodies aside, this is the one component in
//! the engine whose control flow is load-bearing: every invariant in the
//! data model this crate implements (I1-I5) is enforced here.

use crate::aggregator::{gather_inputs, merge_inputs};
use crate::edge::Edge;
use crate::error::EngineError;
use crate::execution::{ExecutionStatus, NodeExecution, NodeExecutionStatus};
use crate::executor::{ExecutionContext, ExecutorRegistry};
use crate::generation::Generation;
use crate::node::{Node, NodeType};
use crate::repository::{ExecutionRepository, ExecutionUpdate, NodeExecutionUpdate};
use adgraph_core::{ExecutionId, NodeId, UserId};
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{error, info, warn};

/// The observable result of a run or step invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct RunOutcome {
    pub execution_id: ExecutionId,
    pub status: ExecutionStatus,
    pub current_node_id: Option<NodeId>,
    pub error_message: Option<String>,
}

impl RunOutcome {
    fn cancelled(execution_id: ExecutionId) -> Self {
        Self {
            execution_id,
            status: ExecutionStatus::Cancelled,
            current_node_id: None,
            error_message: None,
        }
    }

    fn paused(execution_id: ExecutionId, current_node_id: NodeId) -> Self {
        Self {
            execution_id,
            status: ExecutionStatus::Paused,
            current_node_id: Some(current_node_id),
            error_message: None,
        }
    }

    fn completed(execution_id: ExecutionId) -> Self {
        Self {
            execution_id,
            status: ExecutionStatus::Completed,
            current_node_id: None,
            error_message: None,
        }
    }

    fn failed(execution_id: ExecutionId, current_node_id: Option<NodeId>, error_message: String) -> Self {
        Self {
            execution_id,
            status: ExecutionStatus::Failed,
            current_node_id,
            error_message: Some(error_message),
        }
    }
}

/// Reconstructs `outputs` and `total_cost` from already-`COMPLETED`
/// NodeExecutions, so a run resumed after a pause doesn't re-execute prior
/// nodes.
fn load_previous_outputs(node_executions: &[NodeExecution]) -> (HashMap<NodeId, JsonValue>, f64) {
    let mut outputs = HashMap::new();
    let mut total_cost = 0.0;
    for record in node_executions {
        if record.status != NodeExecutionStatus::Completed {
            continue;
        }
        if let Some(output) = &record.output_data {
            total_cost += record.cost();
            outputs.insert(record.node_id.clone(), output.clone());
        }
    }
    (outputs, total_cost)
}

/// Scans forward edges for a single `OUTPUT` successor of `node_id` and
/// returns its config, for the `IMAGE_MODEL` `output_config` passthrough.
fn find_output_config(node_id: &NodeId, nodes: &[Node], edges: &[Edge]) -> Option<HashMap<String, JsonValue>> {
    let node_map: HashMap<&NodeId, &Node> = nodes.iter().map(|n| (&n.node_id, n)).collect();
    let mut output_successors = edges
        .iter()
        .filter(|e| &e.source_node_id == node_id)
        .filter_map(|e| node_map.get(&e.target_node_id))
        .filter(|n| n.node_type.is_output());

    let first = output_successors.next()?;
    if output_successors.next().is_some() {
        // More than one OUTPUT successor: ambiguous, no single config to pass through.
        return None;
    }
    Some(first.config.clone())
}

/// Scans NodeExecutions for the unique `PAUSED` record (invariant I5) and
/// returns its position in `sorted`.
#[must_use]
pub fn find_paused_index(node_executions: &[NodeExecution], sorted: &[NodeId]) -> Option<usize> {
    let paused = node_executions
        .iter()
        .find(|r| r.status == NodeExecutionStatus::Paused)?;
    sorted.iter().position(|id| id == &paused.node_id)
}

/// The scheduler state machine. Generic over the repository so tests run
/// against [`crate::repository::InMemoryRepository`] without a database.
pub struct ExecutionRunner<R: ExecutionRepository> {
    repository: Arc<R>,
    registry: Arc<ExecutorRegistry>,
}

impl<R: ExecutionRepository> ExecutionRunner<R> {
    #[must_use]
    pub fn new(repository: Arc<R>, registry: Arc<ExecutorRegistry>) -> Self {
        Self { repository, registry }
    }

    async fn poll_cancelled(&self, execution_id: ExecutionId, user_id: UserId) -> Result<bool, EngineError> {
        let execution = self.repository.fetch_execution_for_user(execution_id, user_id).await?;
        Ok(execution.status == ExecutionStatus::Cancelled)
    }

    fn build_context(
        &self,
        execution_id: ExecutionId,
        user_id: UserId,
        node: &Node,
        nodes: &[Node],
        edges: &[Edge],
        sorted: &[NodeId],
    ) -> ExecutionContext {
        let output_config = if node.node_type == NodeType::ImageModel {
            find_output_config(&node.node_id, nodes, edges)
        } else {
            None
        };
        ExecutionContext {
            execution_id,
            user_id,
            output_config,
            sorted_order: sorted.to_vec(),
        }
    }

    /// Records a `Generation` audit row for an `IMAGE_MODEL` node's output.
    /// Best-effort: a failure here is logged, never surfaced to the caller,
    /// since `Generation` is never read back by the engine.
    async fn record_generation_if_applicable(
        &self,
        execution_id: ExecutionId,
        node: &Node,
        inputs: &HashMap<NodeId, JsonValue>,
        sorted: &[NodeId],
        output: &JsonValue,
    ) {
        if node.node_type != NodeType::ImageModel {
            return;
        }
        let merged = merge_inputs(inputs, sorted);
        let prompt = merged
            .get("prompt")
            .and_then(JsonValue::as_str)
            .unwrap_or_default()
            .to_string();
        let model = node
            .config
            .get("model")
            .and_then(JsonValue::as_str)
            .unwrap_or("stub-diffusion-v1")
            .to_string();
        let artifact_urls = output
            .get("image_urls")
            .and_then(JsonValue::as_array)
            .map(|urls| urls.iter().filter_map(|u| u.as_str().map(str::to_string)).collect())
            .unwrap_or_default();
        let cost = output.get("cost").and_then(JsonValue::as_f64).unwrap_or(0.0);
        let parameters = node.config.get("parameters").cloned().unwrap_or(JsonValue::Null);

        let generation = Generation::new(
            execution_id,
            node.node_id.clone(),
            model,
            prompt,
            parameters,
            artifact_urls,
            cost,
        );
        if let Err(err) = self.repository.record_generation(generation).await {
            warn!(%execution_id, node_id = %node.node_id, error = %err, "failed to record generation");
        }
    }

    async fn handle_failure(
        &self,
        execution_id: ExecutionId,
        node_id: Option<NodeId>,
        message: String,
    ) -> RunOutcome {
        if let Some(node_id) = &node_id {
            if let Err(err) = self
                .repository
                .update_node_execution(
                    execution_id,
                    node_id,
                    NodeExecutionUpdate {
                        status: Some(NodeExecutionStatus::Failed),
                        error_message: Some(message.clone()),
                        ..Default::default()
                    },
                )
                .await
            {
                error!(%execution_id, %err, "failed to record node failure");
            }
        }
        if let Err(err) = self
            .repository
            .update_execution(
                execution_id,
                ExecutionUpdate {
                    status: Some(ExecutionStatus::Failed),
                    error_message: Some(message.clone()),
                    ..Default::default()
                },
            )
            .await
        {
            error!(%execution_id, %err, "failed to record execution failure");
        }
        error!(%execution_id, node_id = ?node_id, %message, "execution failed");
        RunOutcome::failed(execution_id, node_id, message)
    }

    /// Executes one node at `sorted[idx]`. Returns `Ok(output)` with the
    /// resolved inputs bundle, or the error the executor raised.
    async fn execute_one(
        &self,
        execution_id: ExecutionId,
        user_id: UserId,
        node: &Node,
        nodes: &[Node],
        edges: &[Edge],
        sorted: &[NodeId],
        outputs: &HashMap<NodeId, JsonValue>,
    ) -> Result<(HashMap<NodeId, JsonValue>, JsonValue), EngineError> {
        let inputs = gather_inputs(&node.node_id, edges, outputs);

        self.repository
            .update_node_execution(
                execution_id,
                &node.node_id,
                NodeExecutionUpdate {
                    status: Some(NodeExecutionStatus::Running),
                    input_data: Some(inputs.clone()),
                    ..Default::default()
                },
            )
            .await?;

        let context = self.build_context(execution_id, user_id, node, nodes, edges, sorted);
        info!(%execution_id, node_id = %node.node_id, node_type = ?node.node_type, "dispatching node");

        let output_map = self
            .registry
            .dispatch(node.node_type, &node.node_id, &inputs, &node.config, &context)
            .await?;
        let output = JsonValue::Object(output_map);

        self.record_generation_if_applicable(execution_id, node, &inputs, sorted, &output)
            .await;

        self.repository
            .update_node_execution(
                execution_id,
                &node.node_id,
                NodeExecutionUpdate {
                    status: Some(NodeExecutionStatus::Completed),
                    output_data: Some(output.clone()),
                    ..Default::default()
                },
            )
            .await?;

        Ok((inputs, output))
    }

    /// Full-run entry point: walks `sorted[start_index..]`, honoring
    /// breakpoints when `pause_on_breakpoints` and the cancellation poll at
    /// every suspension boundary.
    pub async fn run(
        &self,
        execution_id: ExecutionId,
        user_id: UserId,
        nodes: &[Node],
        edges: &[Edge],
        sorted: &[NodeId],
        start_index: usize,
        pause_on_breakpoints: bool,
    ) -> RunOutcome {
        let node_map: HashMap<&NodeId, &Node> = nodes.iter().map(|n| (&n.node_id, n)).collect();

        let node_executions = match self.repository.fetch_node_executions(execution_id).await {
            Ok(records) => records,
            Err(err) => return self.handle_failure(execution_id, None, err.to_string()).await,
        };
        let (mut outputs, mut total_cost) = load_previous_outputs(&node_executions);
        let mut current_node_id: Option<NodeId> = None;

        for idx in start_index..sorted.len() {
            match self.poll_cancelled(execution_id, user_id).await {
                Ok(true) => {
                    info!(%execution_id, "cancellation observed, stopping run");
                    return RunOutcome::cancelled(execution_id);
                }
                Ok(false) => {}
                Err(err) => return self.handle_failure(execution_id, current_node_id, err.to_string()).await,
            }

            let node_id = &sorted[idx];
            let Some(&node) = node_map.get(node_id) else {
                return self
                    .handle_failure(execution_id, Some(node_id.clone()), "node missing from workflow".to_string())
                    .await;
            };
            current_node_id = Some(node_id.clone());

            if pause_on_breakpoints && node.has_breakpoint {
                if let Err(err) = self
                    .repository
                    .update_node_execution(
                        execution_id,
                        node_id,
                        NodeExecutionUpdate {
                            status: Some(NodeExecutionStatus::Paused),
                            ..Default::default()
                        },
                    )
                    .await
                {
                    return self.handle_failure(execution_id, current_node_id, err.to_string()).await;
                }
                if let Err(err) = self
                    .repository
                    .update_execution(
                        execution_id,
                        ExecutionUpdate {
                            status: Some(ExecutionStatus::Paused),
                            ..Default::default()
                        },
                    )
                    .await
                {
                    return self.handle_failure(execution_id, current_node_id, err.to_string()).await;
                }
                info!(%execution_id, node_id = %node_id, "paused at breakpoint");
                return RunOutcome::paused(execution_id, node_id.clone());
            }

            let (_, output) = match self
                .execute_one(execution_id, user_id, node, nodes, edges, sorted, &outputs)
                .await
            {
                Ok(result) => result,
                Err(err) => return self.handle_failure(execution_id, current_node_id, err.to_string()).await,
            };

            total_cost += output.get("cost").and_then(JsonValue::as_f64).unwrap_or(0.0);
            outputs.insert(node_id.clone(), output);

            match self.poll_cancelled(execution_id, user_id).await {
                Ok(true) => {
                    info!(%execution_id, "cancellation observed after node completion, stopping run");
                    return RunOutcome::cancelled(execution_id);
                }
                Ok(false) => {}
                Err(err) => return self.handle_failure(execution_id, current_node_id, err.to_string()).await,
            }
        }

        match self.poll_cancelled(execution_id, user_id).await {
            Ok(true) => return RunOutcome::cancelled(execution_id),
            Ok(false) => {}
            Err(err) => return self.handle_failure(execution_id, current_node_id, err.to_string()).await,
        }

        if let Err(err) = self
            .repository
            .update_execution(
                execution_id,
                ExecutionUpdate {
                    status: Some(ExecutionStatus::Completed),
                    total_cost: Some(total_cost),
                    ..Default::default()
                },
            )
            .await
        {
            return self.handle_failure(execution_id, None, err.to_string()).await;
        }
        info!(%execution_id, total_cost, "execution completed");
        RunOutcome::completed(execution_id)
    }

    /// Single-step entry point: executes exactly the node at
    /// `sorted[start_index]` — the step *consumes* that node's own
    /// breakpoint rather than re-pausing on it — then re-pauses at the next
    /// index, or completes if there is none.
    pub async fn step(
        &self,
        execution_id: ExecutionId,
        user_id: UserId,
        nodes: &[Node],
        edges: &[Edge],
        sorted: &[NodeId],
        start_index: usize,
    ) -> RunOutcome {
        let node_map: HashMap<&NodeId, &Node> = nodes.iter().map(|n| (&n.node_id, n)).collect();

        let node_executions = match self.repository.fetch_node_executions(execution_id).await {
            Ok(records) => records,
            Err(err) => return self.handle_failure(execution_id, None, err.to_string()).await,
        };
        let (mut outputs, mut total_cost) = load_previous_outputs(&node_executions);

        let Some(node_id) = sorted.get(start_index) else {
            return self
                .handle_failure(execution_id, None, "step index out of range".to_string())
                .await;
        };
        let Some(&node) = node_map.get(node_id) else {
            return self
                .handle_failure(execution_id, Some(node_id.clone()), "node missing from workflow".to_string())
                .await;
        };

        match self.poll_cancelled(execution_id, user_id).await {
            Ok(true) => return RunOutcome::cancelled(execution_id),
            Ok(false) => {}
            Err(err) => return self.handle_failure(execution_id, Some(node_id.clone()), err.to_string()).await,
        }

        if let Err(err) = self
            .repository
            .update_execution(
                execution_id,
                ExecutionUpdate {
                    status: Some(ExecutionStatus::Running),
                    ..Default::default()
                },
            )
            .await
        {
            return self.handle_failure(execution_id, Some(node_id.clone()), err.to_string()).await;
        }

        let (_, output) = match self
            .execute_one(execution_id, user_id, node, nodes, edges, sorted, &outputs)
            .await
        {
            Ok(result) => result,
            Err(err) => return self.handle_failure(execution_id, Some(node_id.clone()), err.to_string()).await,
        };

        total_cost += output.get("cost").and_then(JsonValue::as_f64).unwrap_or(0.0);
        outputs.insert(node_id.clone(), output);

        match self.poll_cancelled(execution_id, user_id).await {
            Ok(true) => return RunOutcome::cancelled(execution_id),
            Ok(false) => {}
            Err(err) => return self.handle_failure(execution_id, Some(node_id.clone()), err.to_string()).await,
        }

        let next_index = start_index + 1;
        if next_index >= sorted.len() {
            match self.poll_cancelled(execution_id, user_id).await {
                Ok(true) => return RunOutcome::cancelled(execution_id),
                Ok(false) => {}
                Err(err) => return self.handle_failure(execution_id, None, err.to_string()).await,
            }
            if let Err(err) = self
                .repository
                .update_execution(
                    execution_id,
                    ExecutionUpdate {
                        status: Some(ExecutionStatus::Completed),
                        total_cost: Some(total_cost),
                        ..Default::default()
                    },
                )
                .await
            {
                return self.handle_failure(execution_id, None, err.to_string()).await;
            }
            return RunOutcome::completed(execution_id);
        }

        let next_node_id = &sorted[next_index];
        if let Err(err) = self
            .repository
            .update_node_execution(
                execution_id,
                next_node_id,
                NodeExecutionUpdate {
                    status: Some(NodeExecutionStatus::Paused),
                    ..Default::default()
                },
            )
            .await
        {
            return self.handle_failure(execution_id, Some(next_node_id.clone()), err.to_string()).await;
        }
        if let Err(err) = self
            .repository
            .update_execution(
                execution_id,
                ExecutionUpdate {
                    status: Some(ExecutionStatus::Paused),
                    ..Default::default()
                },
            )
            .await
        {
            return self.handle_failure(execution_id, Some(next_node_id.clone()), err.to_string()).await;
        }

        RunOutcome::paused(execution_id, next_node_id.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::edge::Edge;
    use crate::node::NodeType;
    use crate::repository::InMemoryRepository;
    use adgraph_core::WorkflowId;
    use serde_json::json;

    fn node(id: &str, node_type: NodeType) -> Node {
        Node::new(id, node_type)
    }

    fn edge(id: &str, source: &str, target: &str) -> Edge {
        Edge::new(id, source, target)
    }

    async fn setup() -> (Arc<InMemoryRepository>, Arc<ExecutorRegistry>, ExecutionId, UserId, WorkflowId) {
        let repo = Arc::new(InMemoryRepository::new());
        let registry = Arc::new(ExecutorRegistry::with_defaults());
        let user_id = UserId::new();
        let workflow_id = adgraph_core::WorkflowId::new();
        let execution_id = repo.create_execution(workflow_id).await.unwrap();
        (repo, registry, execution_id, user_id, workflow_id)
    }

    /// S1 — linear run, no breakpoints.
    #[tokio::test]
    async fn scenario_s1_linear_run() {
        let (repo, registry, execution_id, user_id, _workflow_id) = setup().await;

        let mut a = node("a", NodeType::TextInput);
        a.config.insert("value".to_string(), json!("hi"));
        let mut b = node("b", NodeType::Prompt);
        b.config.insert("template".to_string(), json!("{{text}}!"));
        let c = node("c", NodeType::Output);

        let nodes = vec![a, b, c];
        let edges = vec![edge("e1", "a", "b"), edge("e2", "b", "c")];
        let sorted = crate::graph::analyze(&nodes, &edges).unwrap();

        repo.create_node_executions(execution_id, &sorted).await.unwrap();

        let runner = ExecutionRunner::new(repo.clone(), registry);
        let outcome = runner
            .run(execution_id, user_id, &nodes, &edges, &sorted, 0, true)
            .await;

        assert_eq!(outcome.status, ExecutionStatus::Completed);

        let b_status = repo
            .node_execution_status(execution_id, &NodeId::new("b"))
            .await
            .unwrap();
        assert_eq!(b_status, NodeExecutionStatus::Completed);
    }

    /// S2 — breakpoint and step.
    #[tokio::test]
    async fn scenario_s2_breakpoint_and_step() {
        let (repo, registry, execution_id, user_id, _workflow_id) = setup().await;

        let mut a = node("a", NodeType::TextInput);
        a.config.insert("value".to_string(), json!("hi"));
        let mut b = node("b", NodeType::Prompt).with_breakpoint(true);
        b.config.insert("template".to_string(), json!("{{text}}!"));
        let c = node("c", NodeType::Output);

        let nodes = vec![a, b, c];
        let edges = vec![edge("e1", "a", "b"), edge("e2", "b", "c")];
        let sorted = crate::graph::analyze(&nodes, &edges).unwrap();
        repo.create_node_executions(execution_id, &sorted).await.unwrap();

        let runner = ExecutionRunner::new(repo.clone(), registry);
        let outcome = runner
            .run(execution_id, user_id, &nodes, &edges, &sorted, 0, true)
            .await;

        assert_eq!(outcome.status, ExecutionStatus::Paused);
        assert_eq!(outcome.current_node_id, Some(NodeId::new("b")));
        assert_eq!(
            repo.node_execution_status(execution_id, &NodeId::new("a")).await.unwrap(),
            NodeExecutionStatus::Completed
        );
        assert_eq!(
            repo.node_execution_status(execution_id, &NodeId::new("b")).await.unwrap(),
            NodeExecutionStatus::Paused
        );

        let paused_index = find_paused_index(
            &repo.fetch_node_executions(execution_id).await.unwrap(),
            &sorted,
        )
        .unwrap();
        let outcome = runner
            .step(execution_id, user_id, &nodes, &edges, &sorted, paused_index)
            .await;

        assert_eq!(outcome.status, ExecutionStatus::Completed);
        assert_eq!(
            repo.node_execution_status(execution_id, &NodeId::new("b")).await.unwrap(),
            NodeExecutionStatus::Completed
        );
        assert_eq!(
            repo.node_execution_status(execution_id, &NodeId::new("c")).await.unwrap(),
            NodeExecutionStatus::Completed
        );
    }

    /// S5 — unreachable node skipped.
    #[tokio::test]
    async fn scenario_s5_unreachable_node_has_no_execution() {
        let (repo, registry, execution_id, user_id, _workflow_id) = setup().await;

        let a = node("a", NodeType::TextInput);
        let b = node("b", NodeType::TextInput);
        let c = node("c", NodeType::Output);
        let nodes = vec![a, b, c];
        let edges = vec![edge("e1", "b", "c")];
        let sorted = crate::graph::analyze(&nodes, &edges).unwrap();
        assert_eq!(sorted.len(), 2);

        repo.create_node_executions(execution_id, &sorted).await.unwrap();

        let runner = ExecutionRunner::new(repo.clone(), registry);
        let outcome = runner
            .run(execution_id, user_id, &nodes, &edges, &sorted, 0, true)
            .await;

        assert_eq!(outcome.status, ExecutionStatus::Completed);
        let records = repo.fetch_node_executions(execution_id).await.unwrap();
        assert_eq!(records.len(), 2);
        assert!(!records.iter().any(|r| r.node_id == NodeId::new("a")));
    }

    /// S6 — executor failure halts downstream.
    #[tokio::test]
    async fn scenario_s6_executor_failure_halts_downstream() {
        let (repo, registry, execution_id, user_id, _workflow_id) = setup().await;

        let a = node("a", NodeType::TextInput);
        let mut bad = node("bad", NodeType::SocialMedia);
        bad.config.insert("platform".to_string(), json!("myspace"));
        let c = node("c", NodeType::Output);

        let nodes = vec![a, bad, c];
        let edges = vec![edge("e1", "a", "bad"), edge("e2", "bad", "c")];
        let sorted = crate::graph::analyze(&nodes, &edges).unwrap();
        repo.create_node_executions(execution_id, &sorted).await.unwrap();

        let runner = ExecutionRunner::new(repo.clone(), registry);
        let outcome = runner
            .run(execution_id, user_id, &nodes, &edges, &sorted, 0, true)
            .await;

        assert_eq!(outcome.status, ExecutionStatus::Failed);
        assert!(outcome.error_message.unwrap().contains("unsupported platform"));
        assert_eq!(
            repo.node_execution_status(execution_id, &NodeId::new("bad")).await.unwrap(),
            NodeExecutionStatus::Failed
        );
        assert_eq!(
            repo.node_execution_status(execution_id, &NodeId::new("c")).await.unwrap(),
            NodeExecutionStatus::Pending
        );
    }

    #[test]
    fn find_output_config_requires_single_output_successor() {
        let image_model = node("m", NodeType::ImageModel);
        let mut output = node("o", NodeType::Output);
        output.config.insert("num_images".to_string(), json!(2));
        let nodes = vec![image_model, output];
        let edges = vec![edge("e1", "m", "o")];

        let config = find_output_config(&NodeId::new("m"), &nodes, &edges).unwrap();
        assert_eq!(config.get("num_images"), Some(&json!(2)));
    }

    #[test]
    fn find_output_config_none_when_no_successor() {
        let image_model = node("m", NodeType::ImageModel);
        let nodes = vec![image_model];
        let config = find_output_config(&NodeId::new("m"), &nodes, &[]);
        assert!(config.is_none());
    }
}
