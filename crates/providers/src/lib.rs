pub mod anthropic;
pub mod openai;

use async_trait::async_trait;
use pagelens_core::{ChatMessage, Config, Error, LLMResponse, Result};
use serde_json::Value;
use std::sync::Arc;

/// The chat endpoint the agent loop drives: messages in, one completion
/// (text and/or tool calls) out.
#[async_trait]
pub trait Provider: Send + Sync {
    async fn chat(&self, messages: &[ChatMessage], tools: &[Value]) -> Result<LLMResponse>;
}

pub use anthropic::AnthropicProvider;
pub use openai::OpenAIProvider;

/// Build a provider for the configured model. `anthropic/...` models go to
/// the Anthropic API; everything else is treated as OpenAI-compatible.
pub fn create_provider(config: &Config) -> Result<Arc<dyn Provider>> {
    let model = config.agent.model.as_str();
    let provider_name = infer_provider_from_model(model);

    let provider_config = config
        .get_provider(provider_name)
        .filter(|p| !p.api_key.is_empty())
        .or_else(|| config.get_api_key().map(|(_, p)| p))
        .ok_or_else(|| {
            Error::Config(format!(
                "no API key configured for provider '{}'",
                provider_name
            ))
        })?;

    let max_tokens = config.agent.max_tokens;
    let provider: Arc<dyn Provider> = match provider_name {
        "anthropic" => Arc::new(AnthropicProvider::new(
            &provider_config.api_key,
            provider_config.api_base.as_deref(),
            model,
            max_tokens,
        )),
        _ => Arc::new(OpenAIProvider::new(
            &provider_config.api_key,
            provider_config.api_base.as_deref(),
            model,
            max_tokens,
        )),
    };
    Ok(provider)
}

/// `anthropic/claude-...` -> "anthropic"; bare `claude-*` models too.
pub fn infer_provider_from_model(model: &str) -> &'static str {
    if let Some((prefix, _)) = model.split_once('/') {
        return match prefix {
            "anthropic" => "anthropic",
            _ => "openai",
        };
    }
    if model.starts_with("claude") {
        "anthropic"
    } else {
        "openai"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_inference_from_model_names() {
        assert_eq!(
            infer_provider_from_model("anthropic/claude-sonnet-4-20250514"),
            "anthropic"
        );
        assert_eq!(infer_provider_from_model("claude-3-5-haiku-latest"), "anthropic");
        assert_eq!(infer_provider_from_model("openai/gpt-4o"), "openai");
        assert_eq!(infer_provider_from_model("gpt-4o-mini"), "openai");
    }

    #[test]
    fn create_provider_requires_a_key() {
        let config = Config::default();
        assert!(create_provider(&config).is_err());
    }
}
