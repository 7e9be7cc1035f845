//! Graph Analyzer: validates the DAG, computes the OUTPUT-reachable subgraph,
//! and produces a topological order over it.
//!
//! Built on petgraph, matching the rest of the workspace's graph modeling
//! choice, but the algorithm itself (reverse-BFS reachability followed by
//! Kahn's algorithm over the induced subgraph) is specific to this engine:
//! nodes that cannot reach an `OUTPUT` node are dead code and never appear
//! in the returned order.

use crate::edge::Edge;
use crate::error::GraphError;
use crate::node::Node;
use adgraph_core::NodeId;
use petgraph::Direction;
use petgraph::graph::{DiGraph, NodeIndex};
use std::collections::{HashMap, HashSet, VecDeque};

/// Computes the topological execution order over the subgraph reachable
/// from any `OUTPUT` node.
///
/// # Errors
///
/// Returns [`GraphError::NoOutputNode`] if no node has type `OUTPUT`, or
/// [`GraphError::CycleDetected`] if the reachable subgraph contains a cycle.
pub fn analyze(nodes: &[Node], edges: &[Edge]) -> Result<Vec<NodeId>, GraphError> {
    let node_ids: HashSet<&NodeId> = nodes.iter().map(|n| &n.node_id).collect();

    let mut graph: DiGraph<NodeId, ()> = DiGraph::with_capacity(nodes.len(), edges.len());
    let mut index_of: HashMap<NodeId, NodeIndex> = HashMap::with_capacity(nodes.len());
    for node in nodes {
        let idx = graph.add_node(node.node_id.clone());
        index_of.insert(node.node_id.clone(), idx);
    }
    for edge in edges {
        if !node_ids.contains(&edge.source_node_id) || !node_ids.contains(&edge.target_node_id) {
            continue;
        }
        let source = index_of[&edge.source_node_id];
        let target = index_of[&edge.target_node_id];
        graph.add_edge(source, target, ());
    }

    let output_indices: Vec<NodeIndex> = nodes
        .iter()
        .filter(|n| n.node_type.is_output())
        .map(|n| index_of[&n.node_id])
        .collect();
    if output_indices.is_empty() {
        return Err(GraphError::NoOutputNode);
    }

    let reachable = reverse_reachable(&graph, &output_indices);

    let sorted = kahn_topological_sort(&graph, &reachable);
    if sorted.len() < reachable.len() {
        return Err(GraphError::CycleDetected);
    }

    Ok(sorted
        .into_iter()
        .map(|idx| graph[idx].clone())
        .collect())
}

/// Breadth-first search over reverse (incoming) edges, starting from `roots`.
fn reverse_reachable(graph: &DiGraph<NodeId, ()>, roots: &[NodeIndex]) -> HashSet<NodeIndex> {
    let mut visited: HashSet<NodeIndex> = HashSet::new();
    let mut queue: VecDeque<NodeIndex> = VecDeque::new();
    for &root in roots {
        if visited.insert(root) {
            queue.push_back(root);
        }
    }
    while let Some(current) = queue.pop_front() {
        for predecessor in graph.neighbors_directed(current, Direction::Incoming) {
            if visited.insert(predecessor) {
                queue.push_back(predecessor);
            }
        }
    }
    visited
}

/// Kahn's algorithm restricted to the nodes in `subset`, breaking ties by
/// insertion (graph index) order for determinism.
fn kahn_topological_sort(
    graph: &DiGraph<NodeId, ()>,
    subset: &HashSet<NodeIndex>,
) -> Vec<NodeIndex> {
    let mut in_degree: HashMap<NodeIndex, usize> = HashMap::with_capacity(subset.len());
    for &idx in subset {
        let degree = graph
            .neighbors_directed(idx, Direction::Incoming)
            .filter(|p| subset.contains(p))
            .count();
        in_degree.insert(idx, degree);
    }

    let mut queue: VecDeque<NodeIndex> = graph
        .node_indices()
        .filter(|idx| subset.contains(idx) && in_degree.get(idx).copied() == Some(0))
        .collect();

    let mut order = Vec::with_capacity(subset.len());
    while let Some(current) = queue.pop_front() {
        order.push(current);
        for successor in graph.neighbors_directed(current, Direction::Outgoing) {
            if !subset.contains(&successor) {
                continue;
            }
            let degree = in_degree.get_mut(&successor).expect("tracked in subset");
            *degree -= 1;
            if *degree == 0 {
                queue.push_back(successor);
            }
        }
    }

    order
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::NodeType;

    fn node(id: &str, node_type: NodeType) -> Node {
        Node::new(id, node_type)
    }

    fn edge(id: &str, source: &str, target: &str) -> Edge {
        Edge::new(id, source, target)
    }

    #[test]
    fn linear_graph_orders_by_dependency() {
        let nodes = vec![
            node("a", NodeType::TextInput),
            node("b", NodeType::Prompt),
            node("c", NodeType::Output),
        ];
        let edges = vec![edge("e1", "a", "b"), edge("e2", "b", "c")];

        let order = analyze(&nodes, &edges).unwrap();
        let positions: HashMap<&str, usize> = order
            .iter()
            .enumerate()
            .map(|(i, id)| (id.as_str(), i))
            .collect();

        assert_eq!(order.len(), 3);
        assert!(positions["a"] < positions["b"]);
        assert!(positions["b"] < positions["c"]);
    }

    #[test]
    fn unreachable_node_is_excluded() {
        let nodes = vec![
            node("a", NodeType::TextInput),
            node("b", NodeType::TextInput),
            node("c", NodeType::Output),
        ];
        let edges = vec![edge("e1", "b", "c")];

        let order = analyze(&nodes, &edges).unwrap();
        let ids: Vec<&str> = order.iter().map(NodeId::as_str).collect();

        assert_eq!(ids.len(), 2);
        assert!(!ids.contains(&"a"));
        assert!(ids.contains(&"b"));
        assert!(ids.contains(&"c"));
    }

    #[test]
    fn missing_output_node_fails() {
        let nodes = vec![node("a", NodeType::TextInput)];
        let err = analyze(&nodes, &[]).unwrap_err();
        assert!(matches!(err, GraphError::NoOutputNode));
    }

    #[test]
    fn cycle_in_reachable_subgraph_fails() {
        let nodes = vec![
            node("a", NodeType::TextInput),
            node("b", NodeType::Prompt),
            node("c", NodeType::Output),
        ];
        let edges = vec![
            edge("e1", "a", "b"),
            edge("e2", "b", "a"),
            edge("e3", "b", "c"),
        ];

        let err = analyze(&nodes, &edges).unwrap_err();
        assert!(matches!(err, GraphError::CycleDetected));
    }

    #[test]
    fn edges_with_dangling_endpoints_are_dropped() {
        let nodes = vec![node("a", NodeType::TextInput), node("c", NodeType::Output)];
        let edges = vec![edge("e1", "a", "ghost"), edge("e2", "a", "c")];

        let order = analyze(&nodes, &edges).unwrap();
        assert_eq!(order.len(), 2);
    }

    #[test]
    fn parallel_edges_collapse_to_one_dependency() {
        let nodes = vec![node("a", NodeType::TextInput), node("c", NodeType::Output)];
        let edges = vec![edge("e1", "a", "c"), edge("e2", "a", "c")];

        let order = analyze(&nodes, &edges).unwrap();
        assert_eq!(order.len(), 2);
    }
}
