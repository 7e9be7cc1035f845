//! Node Executor Registry (C2) and the reference executor implementations.
//!
//! Executors are stateless value objects keyed by [`NodeType`], matching the
//! "closed tagged union plus registry map" design this workspace already
//! favors for dispatch over node kinds — no inheritance hierarchy, one
//! capability per type.
//!
//! The bodies implemented here (text substitution, a single social platform,
//! a stub image model) stand in for the real, out-of-scope integrations;
//! they exist to make the registry's dispatch contract exercisable end to
//! end and to satisfy the literal scenarios in the testable-properties
//! section this crate implements.

use crate::aggregator::merge_inputs;
use crate::error::{EngineError, ExecutorError};
use crate::node::NodeType;
use adgraph_core::{ExecutionId, NodeId, UserId};
use async_trait::async_trait;
use regex::Regex;
use serde_json::{Map, Value as JsonValue};
use std::collections::HashMap;
use std::sync::{Arc, LazyLock};

/// Context passed to every executor invocation.
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    pub execution_id: ExecutionId,
    pub user_id: UserId,
    /// Populated only for `IMAGE_MODEL` nodes with a single downstream
    /// `OUTPUT` successor; carries that node's config for `num_images` /
    /// `aspect_ratio` overrides.
    pub output_config: Option<HashMap<String, JsonValue>>,
    /// The Execution's full topological order, so executors that need a
    /// deterministic fan-in merge (`merge_inputs`) can order by schedule
    /// position instead of map iteration order.
    pub sorted_order: Vec<NodeId>,
}

/// A single node type's execution capability.
#[async_trait]
pub trait NodeExecutor: Send + Sync {
    /// Runs the node, given the raw (unmerged) fan-in bundle, the node's own
    /// config, and the execution context.
    async fn execute(
        &self,
        inputs: &HashMap<NodeId, JsonValue>,
        config: &HashMap<String, JsonValue>,
        context: &ExecutionContext,
    ) -> Result<Map<String, JsonValue>, ExecutorError>;

    /// Cheap, synchronous sanity check of a node's config, independent of
    /// inputs. Defaults to accepting everything; executors with required
    /// config keys override it.
    fn validate_config(&self, _config: &HashMap<String, JsonValue>) -> bool {
        true
    }
}

/// Maps [`NodeType`] to its registered [`NodeExecutor`].
pub struct ExecutorRegistry {
    executors: HashMap<NodeType, Arc<dyn NodeExecutor>>,
}

impl ExecutorRegistry {
    /// An empty registry; see [`ExecutorRegistry::with_defaults`] for the
    /// reference implementations of all six node types.
    #[must_use]
    pub fn new() -> Self {
        Self {
            executors: HashMap::new(),
        }
    }

    pub fn register(&mut self, node_type: NodeType, executor: Arc<dyn NodeExecutor>) {
        self.executors.insert(node_type, executor);
    }

    /// A registry pre-populated with the reference executor for every
    /// `NodeType` variant.
    #[must_use]
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(NodeType::TextInput, Arc::new(TextInputExecutor));
        registry.register(NodeType::ImageInput, Arc::new(ImageInputExecutor));
        registry.register(NodeType::SocialMedia, Arc::new(SocialMediaExecutor));
        registry.register(NodeType::Prompt, Arc::new(PromptExecutor));
        registry.register(NodeType::ImageModel, Arc::new(ImageModelExecutor));
        registry.register(NodeType::Output, Arc::new(OutputExecutor));
        registry
    }

    /// Dispatches a single node run. Fails with [`EngineError::UnknownNodeType`]
    /// if no executor is registered for `node_type`.
    pub async fn dispatch(
        &self,
        node_type: NodeType,
        node_id: &NodeId,
        inputs: &HashMap<NodeId, JsonValue>,
        config: &HashMap<String, JsonValue>,
        context: &ExecutionContext,
    ) -> Result<Map<String, JsonValue>, EngineError> {
        let executor = self
            .executors
            .get(&node_type)
            .ok_or_else(|| EngineError::UnknownNodeType {
                node_id: node_id.clone(),
            })?;
        executor
            .execute(inputs, config, context)
            .await
            .map_err(EngineError::from)
    }
}

impl Default for ExecutorRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

fn config_str<'a>(config: &'a HashMap<String, JsonValue>, key: &str) -> &'a str {
    config.get(key).and_then(JsonValue::as_str).unwrap_or("")
}

/// `TEXT_INPUT` — returns the configured literal value verbatim.
pub struct TextInputExecutor;

#[async_trait]
impl NodeExecutor for TextInputExecutor {
    async fn execute(
        &self,
        _inputs: &HashMap<NodeId, JsonValue>,
        config: &HashMap<String, JsonValue>,
        _context: &ExecutionContext,
    ) -> Result<Map<String, JsonValue>, ExecutorError> {
        let mut output = Map::new();
        output.insert("text".to_string(), JsonValue::String(config_str(config, "value").to_string()));
        Ok(output)
    }
}

/// `IMAGE_INPUT` — returns the configured image URL verbatim.
pub struct ImageInputExecutor;

#[async_trait]
impl NodeExecutor for ImageInputExecutor {
    async fn execute(
        &self,
        _inputs: &HashMap<NodeId, JsonValue>,
        config: &HashMap<String, JsonValue>,
        _context: &ExecutionContext,
    ) -> Result<Map<String, JsonValue>, ExecutorError> {
        let mut output = Map::new();
        output.insert(
            "image_url".to_string(),
            JsonValue::String(config_str(config, "image_url").to_string()),
        );
        Ok(output)
    }
}

/// `SOCIAL_MEDIA` — fetches a (stubbed) social trend. Only the `reddit`
/// platform is implemented, matching the out-of-scope real integration's
/// current provider coverage.
pub struct SocialMediaExecutor;

#[async_trait]
impl NodeExecutor for SocialMediaExecutor {
    async fn execute(
        &self,
        _inputs: &HashMap<NodeId, JsonValue>,
        config: &HashMap<String, JsonValue>,
        _context: &ExecutionContext,
    ) -> Result<Map<String, JsonValue>, ExecutorError> {
        let platform = config_str(config, "platform");
        if platform != "reddit" {
            return Err(ExecutorError::new(format!("unsupported platform: {platform}")));
        }
        let subreddit = config.get("subreddit").and_then(JsonValue::as_str);
        let Some(subreddit) = subreddit else {
            return Err(ExecutorError::new("missing required config key: subreddit"));
        };

        let mut output = Map::new();
        output.insert("platform".to_string(), JsonValue::String("reddit".to_string()));
        output.insert("subreddit".to_string(), JsonValue::String(subreddit.to_string()));
        output.insert("trend".to_string(), JsonValue::String(format!("top post in r/{subreddit}")));
        Ok(output)
    }
}

static TEMPLATE_VAR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{\{(\w+)\}\}").expect("static pattern is valid"));

fn render_template(template: &str, values: &Map<String, JsonValue>) -> String {
    TEMPLATE_VAR
        .replace_all(template, |caps: &regex::Captures| {
            let key = &caps[1];
            match values.get(key) {
                Some(JsonValue::String(s)) => s.clone(),
                Some(JsonValue::Array(items)) => items
                    .iter()
                    .map(|item| match item {
                        JsonValue::String(s) => s.clone(),
                        other => other.to_string(),
                    })
                    .collect::<Vec<_>>()
                    .join(", "),
                Some(other) => other.to_string(),
                None => String::new(),
            }
        })
        .into_owned()
}

/// `PROMPT` — `{{variable}}` substitution against the merged fan-in bundle.
pub struct PromptExecutor;

#[async_trait]
impl NodeExecutor for PromptExecutor {
    async fn execute(
        &self,
        inputs: &HashMap<NodeId, JsonValue>,
        config: &HashMap<String, JsonValue>,
        context: &ExecutionContext,
    ) -> Result<Map<String, JsonValue>, ExecutorError> {
        let merged = merge_inputs(inputs, &context.sorted_order);
        let template = config_str(config, "template");
        let rendered = render_template(template, &merged);

        let mut output = Map::new();
        output.insert("prompt".to_string(), JsonValue::String(rendered));
        Ok(output)
    }
}

/// `IMAGE_MODEL` — the core paid step. Resolves a prompt from the merged
/// inputs (falling back to the node's own `config.prompt`), applies the
/// downstream `OUTPUT` node's `num_images`/`aspect_ratio` overrides, and
/// takes an image-to-image path when a merged `image_url` is present.
pub struct ImageModelExecutor;

#[async_trait]
impl NodeExecutor for ImageModelExecutor {
    async fn execute(
        &self,
        inputs: &HashMap<NodeId, JsonValue>,
        config: &HashMap<String, JsonValue>,
        context: &ExecutionContext,
    ) -> Result<Map<String, JsonValue>, ExecutorError> {
        let merged = merge_inputs(inputs, &context.sorted_order);

        let prompt = merged
            .get("prompt")
            .and_then(JsonValue::as_str)
            .map(str::to_string)
            .or_else(|| config.get("prompt").and_then(JsonValue::as_str).map(str::to_string))
            .unwrap_or_default();
        if prompt.is_empty() {
            return Err(ExecutorError::new("image model node has no prompt input"));
        }

        let model = config_str(config, "model");
        let model = if model.is_empty() { "stub-diffusion-v1" } else { model };

        let mut num_images: u64 = config
            .get("parameters")
            .and_then(|p| p.get("num_images"))
            .and_then(JsonValue::as_u64)
            .unwrap_or(1);
        let mut aspect_ratio = config
            .get("parameters")
            .and_then(|p| p.get("aspect_ratio"))
            .and_then(JsonValue::as_str)
            .unwrap_or("1:1")
            .to_string();

        if let Some(output_config) = &context.output_config {
            if let Some(n) = output_config.get("num_images").and_then(JsonValue::as_u64) {
                num_images = n;
            }
            if let Some(ar) = output_config.get("aspect_ratio").and_then(JsonValue::as_str) {
                aspect_ratio = ar.to_string();
            }
        }

        let image_to_image = merged.get("image_url").and_then(JsonValue::as_str);
        let prefix = if image_to_image.is_some() { "i2i" } else { "t2i" };

        let image_urls: Vec<JsonValue> = (0..num_images.max(1))
            .map(|i| {
                JsonValue::String(format!(
                    "https://stub-images.test/{prefix}/{model}/{aspect_ratio}/{i}.png"
                ))
            })
            .collect();
        let cost = 0.02 * image_urls.len() as f64;

        let mut output = Map::new();
        output.insert("image_urls".to_string(), JsonValue::Array(image_urls));
        output.insert("cost".to_string(), JsonValue::from(cost));
        Ok(output)
    }
}

/// `OUTPUT` — collects the merged `image_urls` and slices to the configured
/// `num_images` (defaulting to the full list).
pub struct OutputExecutor;

#[async_trait]
impl NodeExecutor for OutputExecutor {
    async fn execute(
        &self,
        inputs: &HashMap<NodeId, JsonValue>,
        config: &HashMap<String, JsonValue>,
        context: &ExecutionContext,
    ) -> Result<Map<String, JsonValue>, ExecutorError> {
        let merged = merge_inputs(inputs, &context.sorted_order);
        let image_urls: Vec<JsonValue> = merged
            .get("image_urls")
            .and_then(JsonValue::as_array)
            .cloned()
            .unwrap_or_default();

        let limit = config
            .get("num_images")
            .and_then(JsonValue::as_u64)
            .map(|n| n as usize)
            .unwrap_or(image_urls.len());

        let final_images: Vec<JsonValue> = image_urls.into_iter().take(limit).collect();

        let mut output = Map::new();
        output.insert("final_images".to_string(), JsonValue::Array(final_images));
        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn context() -> ExecutionContext {
        ExecutionContext {
            execution_id: ExecutionId::new(),
            user_id: UserId::new(),
            output_config: None,
            sorted_order: vec![NodeId::new("a"), NodeId::new("b")],
        }
    }

    #[tokio::test]
    async fn text_input_returns_configured_value() {
        let mut config = HashMap::new();
        config.insert("value".to_string(), JsonValue::String("hi".to_string()));
        let output = TextInputExecutor
            .execute(&HashMap::new(), &config, &context())
            .await
            .unwrap();
        assert_eq!(output.get("text"), Some(&JsonValue::String("hi".to_string())));
    }

    #[tokio::test]
    async fn social_media_rejects_unsupported_platform() {
        let mut config = HashMap::new();
        config.insert("platform".to_string(), JsonValue::String("tiktok".to_string()));
        let err = SocialMediaExecutor
            .execute(&HashMap::new(), &config, &context())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("unsupported platform"));
    }

    #[tokio::test]
    async fn social_media_requires_subreddit() {
        let mut config = HashMap::new();
        config.insert("platform".to_string(), JsonValue::String("reddit".to_string()));
        let err = SocialMediaExecutor
            .execute(&HashMap::new(), &config, &context())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("subreddit"));
    }

    #[tokio::test]
    async fn prompt_executor_substitutes_template_scenario_s1() {
        let mut inputs = HashMap::new();
        inputs.insert(NodeId::new("a"), serde_json::json!({"text": "hi"}));
        let mut config = HashMap::new();
        config.insert("template".to_string(), JsonValue::String("{{text}}!".to_string()));

        let output = PromptExecutor.execute(&inputs, &config, &context()).await.unwrap();
        assert_eq!(output.get("prompt"), Some(&JsonValue::String("hi!".to_string())));
    }

    #[tokio::test]
    async fn prompt_executor_joins_list_values() {
        let mut inputs = HashMap::new();
        inputs.insert(NodeId::new("a"), serde_json::json!({"tags": ["red", "blue"]}));
        let mut config = HashMap::new();
        config.insert("template".to_string(), JsonValue::String("colors: {{tags}}".to_string()));

        let output = PromptExecutor.execute(&inputs, &config, &context()).await.unwrap();
        assert_eq!(
            output.get("prompt"),
            Some(&JsonValue::String("colors: red, blue".to_string()))
        );
    }

    #[tokio::test]
    async fn image_model_requires_prompt() {
        let err = ImageModelExecutor
            .execute(&HashMap::new(), &HashMap::new(), &context())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("no prompt"));
    }

    #[tokio::test]
    async fn image_model_applies_output_config_override() {
        let mut inputs = HashMap::new();
        inputs.insert(NodeId::new("a"), serde_json::json!({"prompt": "a cat"}));

        let mut output_config = HashMap::new();
        output_config.insert("num_images".to_string(), JsonValue::from(3));

        let mut ctx = context();
        ctx.output_config = Some(output_config);

        let output = ImageModelExecutor
            .execute(&inputs, &HashMap::new(), &ctx)
            .await
            .unwrap();
        let urls = output.get("image_urls").unwrap().as_array().unwrap();
        assert_eq!(urls.len(), 3);
    }

    #[tokio::test]
    async fn output_executor_slices_by_num_images() {
        let mut inputs = HashMap::new();
        inputs.insert(
            NodeId::new("a"),
            serde_json::json!({"image_urls": ["1", "2", "3"]}),
        );
        let mut config = HashMap::new();
        config.insert("num_images".to_string(), JsonValue::from(2));

        let output = OutputExecutor.execute(&inputs, &config, &context()).await.unwrap();
        let images = output.get("final_images").unwrap().as_array().unwrap();
        assert_eq!(images.len(), 2);
    }

    #[tokio::test]
    async fn output_executor_defaults_to_full_list() {
        let mut inputs = HashMap::new();
        inputs.insert(
            NodeId::new("a"),
            serde_json::json!({"image_urls": ["1", "2", "3"]}),
        );

        let output = OutputExecutor
            .execute(&inputs, &HashMap::new(), &context())
            .await
            .unwrap();
        let images = output.get("final_images").unwrap().as_array().unwrap();
        assert_eq!(images.len(), 3);
    }

    #[tokio::test]
    async fn registry_dispatches_by_node_type() {
        let registry = ExecutorRegistry::with_defaults();
        let mut config = HashMap::new();
        config.insert("value".to_string(), JsonValue::String("hi".to_string()));

        let output = registry
            .dispatch(NodeType::TextInput, &NodeId::new("a"), &HashMap::new(), &config, &context())
            .await
            .unwrap();
        assert_eq!(output.get("text"), Some(&JsonValue::String("hi".to_string())));
    }

    #[tokio::test]
    async fn registry_unknown_node_type_fails() {
        let registry = ExecutorRegistry::new();
        let err = registry
            .dispatch(NodeType::Output, &NodeId::new("c"), &HashMap::new(), &HashMap::new(), &context())
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::UnknownNodeType { .. }));
    }
}
