use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};

use crate::errors::AgentResult;
use crate::models::fragment::ResponseFragment;
use crate::models::tool::Tool;
use crate::models::turn::Turn;

/// Sampling options forwarded untouched to the backend
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GenerationConfig {
    #[serde(default)]
    pub temperature: Option<f32>,
    #[serde(default)]
    pub top_p: Option<f32>,
    #[serde(default)]
    pub max_tokens: Option<u32>,
    #[serde(default)]
    pub stop: Vec<String>,
}

/// Fragments in generation order. A failed item is a transport failure.
pub type FragmentStream = BoxStream<'static, AgentResult<ResponseFragment>>;

/// Base trait for model backends (OpenAI-compatible servers, local models, ...)
#[async_trait]
pub trait Provider: Send + Sync {
    /// Start generating the next response for `input` given the conversation so far
    async fn stream(
        &self,
        input: &Turn,
        history: &[Turn],
        tools: &[Tool],
        config: &GenerationConfig,
    ) -> AgentResult<FragmentStream>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_generation_config_defaults() -> anyhow::Result<()> {
        let config: GenerationConfig = serde_json::from_value(json!({"temperature": 0.2}))?;
        assert_eq!(config.temperature, Some(0.2));
        assert_eq!(config.max_tokens, None);
        assert!(config.stop.is_empty());
        Ok(())
    }
}
