//! OpenRouter provider implementation.
//!
//! OpenRouter exposes many upstream vendors behind one OpenAI-dialect
//! endpoint, so a single provider entry can serve every persona model whose
//! id is namespaced like `anthropic/claude-sonnet-4`.

use async_trait::async_trait;
use reqwest::Client;

use crate::error::LlmError;
use crate::llm::litellm::{post_chat_completion, ApiRequest};
use crate::llm::{GenerationRequest, GenerationResponse, LlmProvider};

/// Default OpenRouter API endpoint.
const OPENROUTER_BASE_URL: &str = "https://openrouter.ai/api/v1";

/// Default model to use if none specified.
const DEFAULT_MODEL: &str = "openai/gpt-4o-mini";

/// OpenRouter provider for LLM requests.
///
/// Performs exactly one HTTP attempt per call. Retry and fallback policy is
/// owned by the debate engine.
pub struct OpenRouterProvider {
    client: Client,
    api_key: String,
    base_url: String,
    default_model: String,
}

impl OpenRouterProvider {
    /// Create a new OpenRouter provider with the given API key.
    pub fn new(api_key: String) -> Self {
        Self::with_custom_url(
            api_key,
            OPENROUTER_BASE_URL.to_string(),
            DEFAULT_MODEL.to_string(),
        )
    }

    /// Create a new OpenRouter provider with a specific default model.
    pub fn with_model(api_key: String, model: String) -> Self {
        Self::with_custom_url(api_key, OPENROUTER_BASE_URL.to_string(), model)
    }

    /// Create a new OpenRouter provider with custom base URL.
    ///
    /// Useful for testing or using OpenRouter-compatible proxies.
    pub fn with_custom_url(api_key: String, base_url: String, model: String) -> Self {
        Self {
            client: Client::new(),
            api_key,
            base_url,
            default_model: model,
        }
    }

    /// Creates the provider from `OPENROUTER_API_KEY`.
    pub fn from_env() -> Result<Self, LlmError> {
        let api_key = std::env::var("OPENROUTER_API_KEY")
            .map_err(|_| LlmError::MissingApiKey("OPENROUTER_API_KEY".to_string()))?;
        Ok(Self::new(api_key))
    }

    /// Get the API key (for debugging, returns masked value).
    pub fn api_key_masked(&self) -> String {
        if self.api_key.len() <= 8 {
            "*".repeat(self.api_key.len())
        } else {
            format!(
                "{}...{}",
                &self.api_key[..4],
                &self.api_key[self.api_key.len() - 4..]
            )
        }
    }

    /// Get the base URL.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Get the default model.
    pub fn default_model(&self) -> &str {
        &self.default_model
    }
}

#[async_trait]
impl LlmProvider for OpenRouterProvider {
    async fn generate(&self, request: GenerationRequest) -> Result<GenerationResponse, LlmError> {
        let model = if request.model.is_empty() {
            self.default_model.clone()
        } else {
            request.model.clone()
        };

        let api_request = ApiRequest {
            model,
            messages: request.messages,
            temperature: request.temperature,
            max_tokens: request.max_tokens,
        };

        let url = format!("{}/chat/completions", self.base_url.trim_end_matches('/'));
        tracing::debug!(model = %api_request.model, "Sending OpenRouter request");

        post_chat_completion(
            &self.client,
            &url,
            Some(&self.api_key),
            &[
                ("HTTP-Referer", "https://debate-forge.local"),
                ("X-Title", "debate-forge"),
            ],
            &api_request,
        )
        .await
    }

    fn supports_tool_calls(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_openrouter_provider_new() {
        let provider = OpenRouterProvider::new("test-api-key".to_string());

        assert_eq!(provider.base_url(), OPENROUTER_BASE_URL);
        assert_eq!(provider.default_model(), DEFAULT_MODEL);
        assert_eq!(provider.api_key_masked(), "test...-key");
        assert!(provider.supports_tool_calls());
    }

    #[test]
    fn test_openrouter_provider_with_model() {
        let provider = OpenRouterProvider::with_model(
            "test-key".to_string(),
            "anthropic/claude-3".to_string(),
        );

        assert_eq!(provider.default_model(), "anthropic/claude-3");
    }

    #[test]
    fn test_api_key_masked_short() {
        let provider = OpenRouterProvider::new("abc".to_string());
        assert_eq!(provider.api_key_masked(), "***");
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_is_request_failure() {
        let provider = OpenRouterProvider::with_custom_url(
            "key".to_string(),
            "http://localhost:65535/api/v1".to_string(),
            "m".to_string(),
        );
        let result = provider
            .generate(GenerationRequest::new("m", vec![]))
            .await;

        assert!(matches!(result, Err(LlmError::RequestFailed(_))));
    }
}
