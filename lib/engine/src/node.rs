//! Node types for the workflow graph.
//!
//! A node's `config` is an opaque, executor-specific key-value map; the engine
//! itself never inspects it except to pass it through to the registered
//! [`crate::executor::NodeExecutor`] for the node's `type`.

use adgraph_core::NodeId;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::HashMap;

/// The six node types a workflow graph may contain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NodeType {
    TextInput,
    ImageInput,
    SocialMedia,
    Prompt,
    ImageModel,
    Output,
}

impl NodeType {
    /// Whether this node type is a terminal sink for the graph.
    ///
    /// The Graph Analyzer treats `OUTPUT` nodes as the roots of reverse BFS.
    #[must_use]
    pub const fn is_output(self) -> bool {
        matches!(self, NodeType::Output)
    }
}

/// A single node in a workflow graph.
///
/// Immutable for the lifetime of an Execution: the Runner never mutates a
/// `Node`, only the `NodeExecution` record tracking its run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Node {
    pub node_id: NodeId,
    pub node_type: NodeType,
    /// Opaque, executor-specific configuration.
    #[serde(default)]
    pub config: HashMap<String, JsonValue>,
    #[serde(default)]
    pub has_breakpoint: bool,
}

impl Node {
    #[must_use]
    pub fn new(node_id: impl Into<NodeId>, node_type: NodeType) -> Self {
        Self {
            node_id: node_id.into(),
            node_type,
            config: HashMap::new(),
            has_breakpoint: false,
        }
    }

    #[must_use]
    pub fn with_config(mut self, config: HashMap<String, JsonValue>) -> Self {
        self.config = config;
        self
    }

    #[must_use]
    pub fn with_breakpoint(mut self, has_breakpoint: bool) -> Self {
        self.has_breakpoint = has_breakpoint;
        self
    }
}
