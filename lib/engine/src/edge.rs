//! Edge types for workflow graphs.
//!
//! Edges are plain node-to-node dependencies: `source_node_id -> target_node_id`.
//! Multiple parallel edges between the same pair are permitted and collapse to
//! a single logical dependency, since outputs are keyed by source node, not edge.

use adgraph_core::{EdgeId, NodeId};
use serde::{Deserialize, Serialize};

/// A directed edge between two nodes in the same workflow.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Edge {
    pub edge_id: EdgeId,
    pub source_node_id: NodeId,
    pub target_node_id: NodeId,
}

impl Edge {
    #[must_use]
    pub fn new(
        edge_id: impl Into<EdgeId>,
        source_node_id: impl Into<NodeId>,
        target_node_id: impl Into<NodeId>,
    ) -> Self {
        Self {
            edge_id: edge_id.into(),
            source_node_id: source_node_id.into(),
            target_node_id: target_node_id.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn edge_construction() {
        let edge = Edge::new("e1", "a", "b");
        assert_eq!(edge.source_node_id.as_str(), "a");
        assert_eq!(edge.target_node_id.as_str(), "b");
    }

    #[test]
    fn edge_serde_roundtrip() {
        let edge = Edge::new("e1", "a", "b");
        let json = serde_json::to_string(&edge).expect("serialize");
        let parsed: Edge = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(edge, parsed);
    }
}
