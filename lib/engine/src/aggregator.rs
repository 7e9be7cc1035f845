//! Input Aggregator (C3): fan-in collection of predecessor outputs.

use crate::edge::Edge;
use adgraph_core::NodeId;
use serde_json::{Map, Value as JsonValue};
use std::collections::HashMap;

/// For `target_node_id`, collects the outputs of every predecessor that has
/// already produced one, keyed by source node id.
///
/// A predecessor with no edge to `target_node_id`, or one whose output isn't
/// yet in `outputs` (shouldn't happen given topological scheduling, but is
/// tolerated rather than treated as an error), is simply absent from the
/// result.
#[must_use]
pub fn gather_inputs(
    target_node_id: &NodeId,
    edges: &[Edge],
    outputs: &HashMap<NodeId, JsonValue>,
) -> HashMap<NodeId, JsonValue> {
    let mut inputs = HashMap::new();
    for edge in edges {
        if &edge.target_node_id != target_node_id {
            continue;
        }
        if let Some(output) = outputs.get(&edge.source_node_id) {
            inputs.insert(edge.source_node_id.clone(), output.clone());
        }
    }
    inputs
}

/// Flattens a fan-in bundle into a single merged map.
///
/// Each source's output is shallow-merged in when it is itself a JSON object;
/// non-object outputs contribute nothing to the merged view. On duplicate
/// keys, **last writer wins**, where iteration proceeds in `sorted_order`
/// (topological position) rather than map/hash order — this is the resolved
/// policy for the otherwise-nondeterministic fan-in ordering.
#[must_use]
pub fn merge_inputs(
    inputs: &HashMap<NodeId, JsonValue>,
    sorted_order: &[NodeId],
) -> Map<String, JsonValue> {
    let mut merged = Map::new();
    for source_id in sorted_order {
        let Some(JsonValue::Object(source_output)) = inputs.get(source_id) else {
            continue;
        };
        for (key, value) in source_output {
            merged.insert(key.clone(), value.clone());
        }
    }
    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn edge(source: &str, target: &str) -> Edge {
        Edge::new("e", source, target)
    }

    #[test]
    fn gather_inputs_collects_only_direct_predecessors() {
        let edges = vec![edge("a", "b"), edge("x", "y")];
        let mut outputs = HashMap::new();
        outputs.insert(NodeId::new("a"), json!({"text": "hi"}));
        outputs.insert(NodeId::new("x"), json!({"text": "unrelated"}));

        let inputs = gather_inputs(&NodeId::new("b"), &edges, &outputs);

        assert_eq!(inputs.len(), 1);
        assert_eq!(inputs.get(&NodeId::new("a")), Some(&json!({"text": "hi"})));
    }

    #[test]
    fn gather_inputs_omits_sources_without_output_yet() {
        let edges = vec![edge("a", "b")];
        let outputs = HashMap::new();

        let inputs = gather_inputs(&NodeId::new("b"), &edges, &outputs);
        assert!(inputs.is_empty());
    }

    #[test]
    fn merge_inputs_last_writer_wins_by_topological_order() {
        let mut inputs = HashMap::new();
        inputs.insert(NodeId::new("a"), json!({"key": "from_a"}));
        inputs.insert(NodeId::new("b"), json!({"key": "from_b"}));

        let order = vec![NodeId::new("a"), NodeId::new("b")];
        let merged = merge_inputs(&inputs, &order);
        assert_eq!(merged.get("key"), Some(&json!("from_b")));

        let reverse_order = vec![NodeId::new("b"), NodeId::new("a")];
        let merged_reverse = merge_inputs(&inputs, &reverse_order);
        assert_eq!(merged_reverse.get("key"), Some(&json!("from_a")));
    }

    #[test]
    fn merge_inputs_ignores_non_object_outputs() {
        let mut inputs = HashMap::new();
        inputs.insert(NodeId::new("a"), json!("just a string"));

        let merged = merge_inputs(&inputs, &[NodeId::new("a")]);
        assert!(merged.is_empty());
    }

    #[test]
    fn merge_inputs_combines_distinct_keys() {
        let mut inputs = HashMap::new();
        inputs.insert(NodeId::new("a"), json!({"text": "hi"}));
        inputs.insert(NodeId::new("b"), json!({"image_url": "https://example.test/x.png"}));

        let order = vec![NodeId::new("a"), NodeId::new("b")];
        let merged = merge_inputs(&inputs, &order);
        assert_eq!(merged.get("text"), Some(&json!("hi")));
        assert_eq!(merged.get("image_url"), Some(&json!("https://example.test/x.png")));
    }
}
