//! Uniform, deadline-bounded access to registered model providers.
//!
//! The gateway is the only place a provider is actually called. Each call
//! acquires a budget permit, runs under a hard timeout and races the session's
//! cancellation signal. Dropping the call future on either deadline aborts the
//! in-flight HTTP request. There are no retries here; fallback policy lives in
//! the debate layer.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::debate::cancel::CancellationHandle;
use crate::debate::types::ModelConfig;
use crate::error::{ProviderError, ProviderErrorKind};
use crate::llm::budget::RateLimitBudget;
use crate::llm::litellm::{GenerationRequest, LlmProvider, Message};

/// Default sampling temperature for debate calls.
pub const DEFAULT_TEMPERATURE: f64 = 0.7;

/// Default completion budget for debate calls.
pub const DEFAULT_MAX_TOKENS: u32 = 1500;

/// Text returned by a successful provider call.
#[derive(Debug, Clone, PartialEq)]
pub struct RawCompletion {
    pub text: String,
    pub tokens_used: u32,
    pub model: String,
    pub provider: String,
}

/// Routes invocations to providers registered by id.
pub struct ProviderGateway {
    providers: HashMap<String, Arc<dyn LlmProvider>>,
    budget: Option<Arc<RateLimitBudget>>,
    temperature: f64,
    max_tokens: u32,
}

impl Default for ProviderGateway {
    fn default() -> Self {
        Self::new()
    }
}

impl ProviderGateway {
    pub fn new() -> Self {
        Self {
            providers: HashMap::new(),
            budget: None,
            temperature: DEFAULT_TEMPERATURE,
            max_tokens: DEFAULT_MAX_TOKENS,
        }
    }

    /// Registers `provider` under `provider_id`, replacing any earlier entry.
    pub fn with_provider(
        mut self,
        provider_id: impl Into<String>,
        provider: Arc<dyn LlmProvider>,
    ) -> Self {
        self.register(provider_id, provider);
        self
    }

    pub fn register(&mut self, provider_id: impl Into<String>, provider: Arc<dyn LlmProvider>) {
        self.providers.insert(provider_id.into(), provider);
    }

    /// Shares a per-model call budget with other gateways.
    pub fn with_budget(mut self, budget: Arc<RateLimitBudget>) -> Self {
        self.budget = Some(budget);
        self
    }

    pub fn with_generation_params(mut self, temperature: f64, max_tokens: u32) -> Self {
        self.temperature = temperature;
        self.max_tokens = max_tokens;
        self
    }

    pub fn has_provider(&self, provider_id: &str) -> bool {
        self.providers.contains_key(provider_id)
    }

    pub fn provider_ids(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = self.providers.keys().map(String::as_str).collect();
        ids.sort_unstable();
        ids
    }

    /// Whether calls to `config` may use native tool calling.
    ///
    /// Both the model entry and the registered backend have to declare it.
    pub fn supports_tool_calls(&self, config: &ModelConfig) -> bool {
        config.supports_tool_calls
            && self
                .providers
                .get(&config.provider)
                .map(|p| p.supports_tool_calls())
                .unwrap_or(false)
    }

    /// Invokes one model once.
    ///
    /// `timeout` covers waiting for a budget permit as well as the call itself.
    /// Cancellation yields a `Timeout`-kind error with `cancelled` set.
    pub async fn invoke(
        &self,
        config: &ModelConfig,
        prompt: &str,
        system_prompt: &str,
        timeout: Duration,
        cancel: &CancellationHandle,
    ) -> Result<RawCompletion, ProviderError> {
        let provider = self.providers.get(&config.provider).cloned().ok_or_else(|| {
            ProviderError::new(
                ProviderErrorKind::UnknownModel,
                format!("no provider registered as '{}'", config.provider),
            )
        })?;

        if cancel.is_cancelled() {
            return Err(ProviderError::cancelled());
        }

        let request = GenerationRequest::new(
            config.model.clone(),
            vec![Message::system(system_prompt), Message::user(prompt)],
        )
        .with_temperature(self.temperature)
        .with_max_tokens(self.max_tokens);

        let model_key = config.key();
        let start = Instant::now();

        let call = async {
            let _permit = match &self.budget {
                Some(budget) => Some(budget.acquire(&model_key).await?),
                None => None,
            };

            let response = provider.generate(request).await?;
            let text = response
                .first_content()
                .map(str::to_string)
                .ok_or_else(|| {
                    ProviderError::new(ProviderErrorKind::ProviderRefused, "response has no choices")
                })?;

            Ok::<_, ProviderError>(RawCompletion {
                text,
                tokens_used: response.usage.total_tokens,
                model: config.model.clone(),
                provider: config.provider.clone(),
            })
        };

        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(ProviderError::cancelled()),
            outcome = tokio::time::timeout(timeout, call) => match outcome {
                Ok(result) => result,
                Err(_) => Err(ProviderError::timeout(timeout)),
            },
        };

        match &result {
            Ok(completion) => tracing::debug!(
                provider = %config.provider,
                model = %config.model,
                tokens = completion.tokens_used,
                elapsed_ms = start.elapsed().as_millis() as u64,
                "Provider call succeeded"
            ),
            Err(e) => tracing::warn!(
                provider = %config.provider,
                model = %config.model,
                kind = %e.kind,
                cancelled = e.cancelled,
                error = %e.message,
                "Provider call failed"
            ),
        }

        result
    }
}
