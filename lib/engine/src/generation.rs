//! `Generation`: an append-only audit record written by the `IMAGE_MODEL`
//! executor. The engine never reads these back; they exist purely so the
//! repository has somewhere to persist the side-effect of an image-model
//! invocation (model id, prompt, parameters, resulting artifact URLs, cost).

use adgraph_core::{ExecutionId, NodeId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Generation {
    pub execution_id: ExecutionId,
    pub node_id: NodeId,
    pub model: String,
    pub prompt: String,
    pub parameters: JsonValue,
    pub artifact_urls: Vec<String>,
    pub cost: f64,
    pub created_at: DateTime<Utc>,
}

impl Generation {
    #[must_use]
    pub fn new(
        execution_id: ExecutionId,
        node_id: NodeId,
        model: impl Into<String>,
        prompt: impl Into<String>,
        parameters: JsonValue,
        artifact_urls: Vec<String>,
        cost: f64,
    ) -> Self {
        Self {
            execution_id,
            node_id,
            model: model.into(),
            prompt: prompt.into(),
            parameters,
            artifact_urls,
            cost,
            created_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generation_serde_roundtrip() {
        let generation = Generation::new(
            ExecutionId::new(),
            NodeId::new("model"),
            "stable-diffusion-xl",
            "a cat",
            serde_json::json!({"num_images": 1}),
            vec!["https://example.test/a.png".to_string()],
            0.04,
        );

        let json = serde_json::to_string(&generation).unwrap();
        let parsed: Generation = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.node_id, generation.node_id);
        assert_eq!(parsed.cost, generation.cost);
    }
}
