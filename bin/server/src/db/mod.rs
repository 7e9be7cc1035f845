//! Postgres-backed [`ExecutionRepository`].
//!
//! Row structs carry string-typed IDs and status; conversion back to the
//! engine's domain types happens in `try_into_*`, matching a row/record
//! split for run history (manual `FromStr` parsing, errors wrapped as
//! `sqlx::Error::Decode` rather than panicking on malformed data).

use adgraph_core::{EdgeId, ExecutionId, NodeId, UserId, WorkflowId};
use adgraph_engine::{
    EngineError, Execution, ExecutionRepository, ExecutionStatus, ExecutionUpdate, Generation, Node, NodeExecution,
    NodeExecutionStatus, NodeExecutionUpdate, NodeType, RepositoryError,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use sqlx::{FromRow, PgPool};
use std::collections::HashMap;
use std::str::FromStr;

fn decode_err(field: &str, raw: &str, reason: impl std::fmt::Display) -> sqlx::Error {
    sqlx::Error::Decode(Box::new(std::io::Error::new(
        std::io::ErrorKind::InvalidData,
        format!("invalid {field} '{raw}': {reason}"),
    )))
}

fn parse_node_type(raw: &str) -> Result<NodeType, sqlx::Error> {
    serde_json::from_value(JsonValue::String(raw.to_string())).map_err(|e| decode_err("node_type", raw, e))
}

fn parse_execution_status(raw: &str) -> Result<ExecutionStatus, sqlx::Error> {
    serde_json::from_value(JsonValue::String(raw.to_string())).map_err(|e| decode_err("execution status", raw, e))
}

fn parse_node_execution_status(raw: &str) -> Result<NodeExecutionStatus, sqlx::Error> {
    serde_json::from_value(JsonValue::String(raw.to_string())).map_err(|e| decode_err("node execution status", raw, e))
}

#[derive(FromRow)]
struct NodeRow {
    node_id: String,
    node_type: String,
    config: JsonValue,
    has_breakpoint: bool,
}

impl NodeRow {
    fn try_into_node(self) -> Result<Node, sqlx::Error> {
        let config: HashMap<String, JsonValue> = match self.config {
            JsonValue::Object(map) => map.into_iter().collect(),
            _ => HashMap::new(),
        };
        Ok(Node {
            node_id: NodeId::new(self.node_id),
            node_type: parse_node_type(&self.node_type)?,
            config,
            has_breakpoint: self.has_breakpoint,
        })
    }
}

#[derive(FromRow)]
struct EdgeRow {
    edge_id: String,
    source_node_id: String,
    target_node_id: String,
}

#[derive(FromRow)]
struct ExecutionRow {
    id: String,
    workflow_id: String,
    status: String,
    total_cost: f64,
    error_message: Option<String>,
    started_at: Option<DateTime<Utc>>,
    finished_at: Option<DateTime<Utc>>,
}

impl ExecutionRow {
    fn try_into_execution(self) -> Result<Execution, sqlx::Error> {
        let execution_id =
            ExecutionId::from_str(&self.id).map_err(|e| decode_err("execution id", &self.id, e))?;
        let workflow_id = WorkflowId::from_str(&self.workflow_id)
            .map_err(|e| decode_err("workflow id", &self.workflow_id, e))?;
        Ok(Execution {
            execution_id,
            workflow_id,
            status: parse_execution_status(&self.status)?,
            total_cost: self.total_cost,
            error_message: self.error_message,
            started_at: self.started_at,
            finished_at: self.finished_at,
        })
    }
}

#[derive(FromRow)]
struct NodeExecutionRow {
    node_id: String,
    status: String,
    input_data: Option<JsonValue>,
    output_data: Option<JsonValue>,
    error_message: Option<String>,
    started_at: Option<DateTime<Utc>>,
    finished_at: Option<DateTime<Utc>>,
}

impl NodeExecutionRow {
    fn try_into_node_execution(self, execution_id: ExecutionId) -> Result<NodeExecution, sqlx::Error> {
        let input_data = match self.input_data {
            Some(JsonValue::Object(map)) => Some(
                map.into_iter()
                    .map(|(k, v)| (NodeId::new(k), v))
                    .collect::<HashMap<NodeId, JsonValue>>(),
            ),
            _ => None,
        };
        Ok(NodeExecution {
            execution_id,
            node_id: NodeId::new(self.node_id),
            status: parse_node_execution_status(&self.status)?,
            input_data,
            output_data: self.output_data,
            error_message: self.error_message,
            started_at: self.started_at,
            finished_at: self.finished_at,
        })
    }
}

/// Postgres-backed implementation of [`ExecutionRepository`].
pub struct PgExecutionRepository {
    pool: PgPool,
}

impl PgExecutionRepository {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn repo_err(err: sqlx::Error) -> EngineError {
    EngineError::Repository(RepositoryError::new(err.to_string()))
}

#[async_trait]
impl ExecutionRepository for PgExecutionRepository {
    async fn fetch_workflow(
        &self,
        workflow_id: WorkflowId,
        requesting_user_id: UserId,
    ) -> Result<(Vec<Node>, Vec<adgraph_engine::Edge>), EngineError> {
        let owner: Option<String> = sqlx::query_scalar("SELECT user_id FROM workflows WHERE id = $1")
            .bind(workflow_id.to_string())
            .fetch_optional(&self.pool)
            .await
            .map_err(repo_err)?;

        let Some(owner) = owner else {
            return Err(EngineError::NotFound { what: "workflow" });
        };
        if owner != requesting_user_id.to_string() {
            return Err(EngineError::NotFound { what: "workflow" });
        }

        let node_rows: Vec<NodeRow> = sqlx::query_as(
            "SELECT node_id, node_type, config, has_breakpoint FROM nodes WHERE workflow_id = $1",
        )
        .bind(workflow_id.to_string())
        .fetch_all(&self.pool)
        .await
        .map_err(repo_err)?;
        let nodes = node_rows
            .into_iter()
            .map(NodeRow::try_into_node)
            .collect::<Result<Vec<_>, _>>()
            .map_err(repo_err)?;

        let edge_rows: Vec<EdgeRow> = sqlx::query_as(
            "SELECT edge_id, source_node_id, target_node_id FROM edges WHERE workflow_id = $1",
        )
        .bind(workflow_id.to_string())
        .fetch_all(&self.pool)
        .await
        .map_err(repo_err)?;
        let edges = edge_rows
            .into_iter()
            .map(|row| {
                adgraph_engine::Edge::new(
                    EdgeId::new(row.edge_id),
                    NodeId::new(row.source_node_id),
                    NodeId::new(row.target_node_id),
                )
            })
            .collect();

        Ok((nodes, edges))
    }

    async fn create_execution(&self, workflow_id: WorkflowId) -> Result<ExecutionId, EngineError> {
        let execution_id = ExecutionId::new();
        sqlx::query(
            "INSERT INTO executions (id, workflow_id, status, total_cost, started_at) VALUES ($1, $2, 'RUNNING', 0, $3)",
        )
        .bind(execution_id.to_string())
        .bind(workflow_id.to_string())
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .map_err(repo_err)?;
        Ok(execution_id)
    }

    async fn create_node_executions(
        &self,
        execution_id: ExecutionId,
        ordered_nodes: &[NodeId],
    ) -> Result<(), EngineError> {
        let mut tx = self.pool.begin().await.map_err(repo_err)?;
        for node_id in ordered_nodes {
            sqlx::query("INSERT INTO node_executions (execution_id, node_id, status) VALUES ($1, $2, 'PENDING')")
                .bind(execution_id.to_string())
                .bind(node_id.as_str())
                .execute(&mut *tx)
                .await
                .map_err(repo_err)?;
        }
        tx.commit().await.map_err(repo_err)?;
        Ok(())
    }

    async fn update_execution(&self, execution_id: ExecutionId, update: ExecutionUpdate) -> Result<(), EngineError> {
        let current_status: Option<String> =
            sqlx::query_scalar("SELECT status FROM executions WHERE id = $1")
                .bind(execution_id.to_string())
                .fetch_optional(&self.pool)
                .await
                .map_err(repo_err)?;
        let Some(current_status) = current_status else {
            return Err(EngineError::NotFound { what: "execution" });
        };
        if parse_execution_status(&current_status).map_err(repo_err)?.is_terminal() {
            return Ok(());
        }

        let status = update.status.map(|s| serde_json::to_value(s).unwrap().as_str().unwrap().to_string());
        let finished_at = update.status.filter(|s| s.is_terminal()).map(|_| Utc::now());

        sqlx::query(
            r"
            UPDATE executions SET
                status = COALESCE($2, status),
                error_message = COALESCE($3, error_message),
                total_cost = COALESCE($4, total_cost),
                finished_at = COALESCE($5, finished_at)
            WHERE id = $1
            ",
        )
        .bind(execution_id.to_string())
        .bind(status)
        .bind(update.error_message)
        .bind(update.total_cost)
        .bind(finished_at)
        .execute(&self.pool)
        .await
        .map_err(repo_err)?;
        Ok(())
    }

    async fn update_node_execution(
        &self,
        execution_id: ExecutionId,
        node_id: &NodeId,
        update: NodeExecutionUpdate,
    ) -> Result<(), EngineError> {
        let status = update
            .status
            .map(|s| serde_json::to_value(s).unwrap().as_str().unwrap().to_string());
        let input_data = update
            .input_data
            .map(|inputs| JsonValue::Object(inputs.into_iter().map(|(k, v)| (k.to_string(), v)).collect()));
        let started_at = update.status.filter(|s| *s == NodeExecutionStatus::Running).map(|_| Utc::now());
        let finished_at = update.status.filter(|s| s.is_terminal()).map(|_| Utc::now());

        let result = sqlx::query(
            r"
            UPDATE node_executions SET
                status = COALESCE($3, status),
                input_data = COALESCE($4, input_data),
                output_data = COALESCE($5, output_data),
                error_message = COALESCE($6, error_message),
                started_at = COALESCE(started_at, $7),
                finished_at = COALESCE($8, finished_at)
            WHERE execution_id = $1 AND node_id = $2
            ",
        )
        .bind(execution_id.to_string())
        .bind(node_id.as_str())
        .bind(status)
        .bind(input_data)
        .bind(update.output_data)
        .bind(update.error_message)
        .bind(started_at)
        .bind(finished_at)
        .execute(&self.pool)
        .await
        .map_err(repo_err)?;

        if result.rows_affected() == 0 {
            return Err(EngineError::NotFound { what: "node execution" });
        }
        Ok(())
    }

    async fn fetch_execution_for_user(
        &self,
        execution_id: ExecutionId,
        user_id: UserId,
    ) -> Result<Execution, EngineError> {
        let row: Option<ExecutionRow> = sqlx::query_as(
            r"
            SELECT e.id, e.workflow_id, e.status, e.total_cost, e.error_message, e.started_at, e.finished_at
            FROM executions e
            JOIN workflows w ON w.id = e.workflow_id
            WHERE e.id = $1 AND w.user_id = $2
            ",
        )
        .bind(execution_id.to_string())
        .bind(user_id.to_string())
        .fetch_optional(&self.pool)
        .await
        .map_err(repo_err)?;

        match row {
            Some(row) => row.try_into_execution().map_err(repo_err),
            None => Err(EngineError::NotFound { what: "execution" }),
        }
    }

    async fn fetch_node_executions(&self, execution_id: ExecutionId) -> Result<Vec<NodeExecution>, EngineError> {
        let rows: Vec<NodeExecutionRow> = sqlx::query_as(
            "SELECT node_id, status, input_data, output_data, error_message, started_at, finished_at \
             FROM node_executions WHERE execution_id = $1",
        )
        .bind(execution_id.to_string())
        .fetch_all(&self.pool)
        .await
        .map_err(repo_err)?;

        rows.into_iter()
            .map(|row| row.try_into_node_execution(execution_id))
            .collect::<Result<Vec<_>, _>>()
            .map_err(repo_err)
    }

    async fn record_generation(&self, generation: Generation) -> Result<(), EngineError> {
        sqlx::query(
            r"
            INSERT INTO generations (execution_id, node_id, model, prompt, parameters, artifact_urls, cost, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ",
        )
        .bind(generation.execution_id.to_string())
        .bind(generation.node_id.as_str())
        .bind(generation.model)
        .bind(generation.prompt)
        .bind(generation.parameters)
        .bind(JsonValue::from(generation.artifact_urls))
        .bind(generation.cost)
        .bind(generation.created_at)
        .execute(&self.pool)
        .await
        .map_err(repo_err)?;
        Ok(())
    }
}
