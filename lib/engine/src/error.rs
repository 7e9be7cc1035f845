//! Error taxonomy for the workflow engine.
//!
//! - [`GraphError`]: Graph Analyzer failures (no `OUTPUT` node, or a cycle).
//! - [`ExecutorError`]: A single node executor invocation failing.
//! - [`RepositoryError`]: Transient persistence I/O failures.
//! - [`EngineError`]: The umbrella the Runner and Debug Controller surface,
//!   unifying the above plus `NotFound`/`UnknownNodeType`.
//!
//! Each layer implements `std::error::Error` so callers can match on
//! structure rather than string contents; the HTTP layer maps these to
//! status codes without string-matching (see `bin/server`).

use adgraph_core::NodeId;
use std::fmt;

/// Errors from the Graph Analyzer (C1).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GraphError {
    /// No node of type `OUTPUT` exists in the workflow.
    NoOutputNode,
    /// The reachable subgraph contains a cycle.
    CycleDetected,
}

impl fmt::Display for GraphError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoOutputNode => write!(f, "workflow has no OUTPUT node"),
            Self::CycleDetected => write!(f, "workflow graph contains a cycle"),
        }
    }
}

impl std::error::Error for GraphError {}

/// Errors raised by a [`crate::executor::NodeExecutor`] invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutorError {
    pub message: String,
}

impl ExecutorError {
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl fmt::Display for ExecutorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for ExecutorError {}

/// Transient I/O failure against the `ExecutionRepository`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepositoryError {
    pub message: String,
}

impl RepositoryError {
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl fmt::Display for RepositoryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "repository error: {}", self.message)
    }
}

impl std::error::Error for RepositoryError {}

/// The umbrella error surfaced by the Execution Runner and Debug Controller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    /// The workflow graph failed analysis.
    InvalidGraph(GraphError),
    /// A workflow or execution does not exist, or is not owned by the caller.
    NotFound { what: &'static str },
    /// A node's `type` has no registered executor.
    UnknownNodeType { node_id: NodeId },
    /// A node executor raised during dispatch.
    Executor(ExecutorError),
    /// The repository failed to persist or load state.
    Repository(RepositoryError),
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidGraph(inner) => write!(f, "invalid graph: {inner}"),
            Self::NotFound { what } => write!(f, "{what} not found"),
            Self::UnknownNodeType { node_id } => {
                write!(f, "no executor registered for node {node_id}")
            }
            Self::Executor(inner) => write!(f, "{inner}"),
            Self::Repository(inner) => write!(f, "{inner}"),
        }
    }
}

impl std::error::Error for EngineError {}

impl From<GraphError> for EngineError {
    fn from(err: GraphError) -> Self {
        Self::InvalidGraph(err)
    }
}

impl From<ExecutorError> for EngineError {
    fn from(err: ExecutorError) -> Self {
        Self::Executor(err)
    }
}

impl From<RepositoryError> for EngineError {
    fn from(err: RepositoryError) -> Self {
        Self::Repository(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn graph_error_display() {
        assert_eq!(GraphError::NoOutputNode.to_string(), "workflow has no OUTPUT node");
        assert_eq!(GraphError::CycleDetected.to_string(), "workflow graph contains a cycle");
    }

    #[test]
    fn executor_error_preserves_message() {
        let err = ExecutorError::new("boom");
        assert_eq!(err.to_string(), "boom");
    }

    #[test]
    fn engine_error_wraps_graph_error() {
        let engine_err: EngineError = GraphError::NoOutputNode.into();
        assert!(matches!(engine_err, EngineError::InvalidGraph(GraphError::NoOutputNode)));
    }

    #[test]
    fn engine_error_wraps_executor_error() {
        let engine_err: EngineError = ExecutorError::new("boom").into();
        assert!(engine_err.to_string().contains("boom"));
    }
}
