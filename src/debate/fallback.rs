//! Bounded primary-then-secondary model resolution.
//!
//! A turn gets at most two provider calls: the primary and, when the primary
//! fails at the provider or extraction level, one configured secondary. The
//! outcome always carries a field-complete result; failures surface as an
//! error string next to the neutral default.

use std::sync::Arc;
use std::time::Duration;

use super::cancel::CancellationHandle;
use super::extractor::{ExpectedShape, ParsedResult, ResponseExtractor};
use super::types::ModelConfig;
use crate::error::{ExtractionError, ProviderError};
use crate::llm::gateway::ProviderGateway;

/// Provider-neutral prompt for one turn.
///
/// The response-format instructions are rendered per model, since models
/// with native tool calling tend to wrap plain JSON answers in tool markup
/// unless told otherwise.
#[derive(Debug, Clone, PartialEq)]
pub struct TurnPrompt {
    pub prompt: String,
    pub shape: ExpectedShape,
}

impl TurnPrompt {
    pub fn decision(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            shape: ExpectedShape::AgentDecision,
        }
    }

    pub fn verdict(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            shape: ExpectedShape::Verdict,
        }
    }

    /// Response-format instructions for a model with or without tool calling.
    pub fn system_prompt(&self, tool_calls: bool) -> String {
        let schema = self.shape.schema();
        if tool_calls {
            format!(
                "Answer with a single JSON object that matches this shape:\n{}\n\n\
                 Do not call any tools and do not wrap the object in tool-call markup. \
                 Output the JSON object only.",
                schema
            )
        } else {
            format!(
                "Reason briefly in prose, then finish your reply with a ```json code block \
                 containing exactly one object of this shape:\n{}",
                schema
            )
        }
    }
}

/// What a resolved turn ended up with.
#[derive(Debug, Clone, PartialEq)]
pub struct FallbackOutcome {
    pub raw_response: Option<String>,
    /// Always populated. The neutral default when `error` is set.
    pub result: ParsedResult,
    pub error: Option<String>,
    /// Summed over every attempt made.
    pub tokens_used: u32,
    /// The secondary produced `result`.
    pub fallback_used: bool,
    /// Model that produced `raw_response`.
    pub served_by: Option<ModelConfig>,
}

impl FallbackOutcome {
    pub fn succeeded(&self) -> bool {
        self.error.is_none()
    }
}

enum Attempt {
    Parsed {
        raw: String,
        result: ParsedResult,
        tokens: u32,
    },
    Unparsed {
        raw: String,
        error: ExtractionError,
        tokens: u32,
    },
    Failed(ProviderError),
}

impl Attempt {
    fn tokens(&self) -> u32 {
        match self {
            Self::Parsed { tokens, .. } | Self::Unparsed { tokens, .. } => *tokens,
            Self::Failed(_) => 0,
        }
    }

    fn describe(&self, model: &ModelConfig) -> String {
        match self {
            Self::Parsed { .. } => format!("{} succeeded", model),
            Self::Unparsed { error, .. } => format!("{}: {}", model, error),
            Self::Failed(error) => format!("{}: {}", model, error),
        }
    }

    fn was_cancelled(&self) -> bool {
        matches!(self, Self::Failed(e) if e.cancelled)
    }
}

/// Tries a primary model, then at most one secondary.
pub struct FallbackResolver {
    gateway: Arc<ProviderGateway>,
    secondary: Option<ModelConfig>,
}

impl FallbackResolver {
    /// `secondary` is None when fallback is disabled for the session.
    pub fn new(gateway: Arc<ProviderGateway>, secondary: Option<ModelConfig>) -> Self {
        Self { gateway, secondary }
    }

    pub fn secondary(&self) -> Option<&ModelConfig> {
        self.secondary.as_ref()
    }

    pub async fn resolve(
        &self,
        primary: &ModelConfig,
        prompt: &TurnPrompt,
        timeout: Duration,
        cancel: &CancellationHandle,
    ) -> FallbackOutcome {
        let first = self.attempt(primary, prompt, timeout, cancel).await;
        let first = match first {
            Attempt::Parsed {
                raw,
                result,
                tokens,
            } => {
                return FallbackOutcome {
                    raw_response: Some(raw),
                    result,
                    error: None,
                    tokens_used: tokens,
                    fallback_used: false,
                    served_by: Some(primary.clone()),
                };
            }
            failed => failed,
        };

        let secondary = match &self.secondary {
            Some(secondary)
                if secondary != primary && !first.was_cancelled() && !cancel.is_cancelled() =>
            {
                secondary
            }
            _ => return Self::failure(prompt.shape, primary, first, None),
        };

        tracing::warn!(
            primary = %primary,
            fallback = %secondary,
            reason = %first.describe(primary),
            "Primary model failed, trying fallback"
        );

        let second = self.attempt(secondary, prompt, timeout, cancel).await;
        match second {
            Attempt::Parsed {
                raw,
                result,
                tokens,
            } => FallbackOutcome {
                raw_response: Some(raw),
                result,
                error: None,
                tokens_used: first.tokens() + tokens,
                fallback_used: true,
                served_by: Some(secondary.clone()),
            },
            failed => Self::failure(prompt.shape, primary, first, Some((secondary, failed))),
        }
    }

    async fn attempt(
        &self,
        model: &ModelConfig,
        prompt: &TurnPrompt,
        timeout: Duration,
        cancel: &CancellationHandle,
    ) -> Attempt {
        let system_prompt = prompt.system_prompt(self.gateway.supports_tool_calls(model));

        match self
            .gateway
            .invoke(model, &prompt.prompt, &system_prompt, timeout, cancel)
            .await
        {
            Ok(completion) => match ResponseExtractor::extract(&completion.text, prompt.shape) {
                Ok(result) => Attempt::Parsed {
                    raw: completion.text,
                    result,
                    tokens: completion.tokens_used,
                },
                Err(error) => {
                    tracing::debug!(model = %model, error = %error, "Completion not extractable");
                    Attempt::Unparsed {
                        raw: completion.text,
                        error,
                        tokens: completion.tokens_used,
                    }
                }
            },
            Err(error) => Attempt::Failed(error),
        }
    }

    /// Builds the outcome when no attempt produced a usable result.
    ///
    /// The primary's raw text wins over the secondary's when both exist.
    fn failure(
        shape: ExpectedShape,
        primary: &ModelConfig,
        first: Attempt,
        second: Option<(&ModelConfig, Attempt)>,
    ) -> FallbackOutcome {
        let mut error = first.describe(primary);
        let mut tokens_used = first.tokens();

        let (mut raw_response, mut served_by) = match first {
            Attempt::Unparsed { raw, .. } => (Some(raw), Some(primary.clone())),
            _ => (None, None),
        };

        if let Some((secondary, attempt)) = second {
            error = format!("{}; fallback {}", error, attempt.describe(secondary));
            tokens_used += attempt.tokens();
            if raw_response.is_none() {
                if let Attempt::Unparsed { raw, .. } = attempt {
                    raw_response = Some(raw);
                    served_by = Some(secondary.clone());
                }
            }
        }

        FallbackOutcome {
            raw_response,
            result: shape.default_result(),
            error: Some(error),
            tokens_used,
            fallback_used: false,
            served_by,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::debate::types::AgentDecision;
    use crate::error::LlmError;
    use crate::llm::litellm::{
        Choice, GenerationRequest, GenerationResponse, LlmProvider, Message, Usage,
    };
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Replies from a fixed script; `None` entries fail with a 500.
    struct MockLlmProvider {
        responses: Mutex<Vec<Option<String>>>,
        call_count: AtomicUsize,
        system_prompts: Mutex<Vec<String>>,
        tool_calls: bool,
    }

    impl MockLlmProvider {
        fn new(responses: Vec<Option<&str>>) -> Self {
            Self {
                responses: Mutex::new(
                    responses
                        .into_iter()
                        .map(|r| r.map(str::to_string))
                        .collect(),
                ),
                call_count: AtomicUsize::new(0),
                system_prompts: Mutex::new(Vec::new()),
                tool_calls: false,
            }
        }

        fn with_tool_calls(mut self) -> Self {
            self.tool_calls = true;
            self
        }
    }

    #[async_trait]
    impl LlmProvider for MockLlmProvider {
        async fn generate(
            &self,
            request: GenerationRequest,
        ) -> Result<GenerationResponse, LlmError> {
            let idx = self.call_count.fetch_add(1, Ordering::SeqCst);
            self.system_prompts
                .lock()
                .unwrap()
                .push(request.messages[0].content.clone());
            let responses = self.responses.lock().unwrap();
            match responses.get(idx).cloned().flatten() {
                Some(text) => Ok(GenerationResponse {
                    id: format!("resp-{}", idx),
                    model: request.model,
                    choices: vec![Choice {
                        index: 0,
                        message: Message::assistant(text),
                        finish_reason: "stop".to_string(),
                    }],
                    usage: Usage {
                        prompt_tokens: 5,
                        completion_tokens: 5,
                        total_tokens: 10,
                    },
                }),
                None => Err(LlmError::ApiError {
                    code: 500,
                    message: "scripted failure".to_string(),
                }),
            }
        }

        fn supports_tool_calls(&self) -> bool {
            self.tool_calls
        }
    }

    const GOOD: &str = r#"{"action": "BUY", "confidence": 0.9, "reasoning": "r"}"#;

    fn setup(
        primary: MockLlmProvider,
        secondary: MockLlmProvider,
        fallback: bool,
    ) -> (FallbackResolver, Arc<MockLlmProvider>, Arc<MockLlmProvider>) {
        let primary = Arc::new(primary);
        let secondary = Arc::new(secondary);
        let gateway = ProviderGateway::new()
            .with_provider("primary", primary.clone())
            .with_provider("backup", secondary.clone());
        let resolver = FallbackResolver::new(
            Arc::new(gateway),
            fallback.then(|| ModelConfig::new("backup", "b").with_tool_calls(true)),
        );
        (resolver, primary, secondary)
    }

    async fn run(resolver: &FallbackResolver) -> FallbackOutcome {
        resolver
            .resolve(
                &ModelConfig::new("primary", "p"),
                &TurnPrompt::decision("what now?"),
                Duration::from_secs(1),
                &CancellationHandle::new(),
            )
            .await
    }

    #[tokio::test]
    async fn test_primary_success_skips_fallback() {
        let (resolver, _, secondary) = setup(
            MockLlmProvider::new(vec![Some(GOOD)]),
            MockLlmProvider::new(vec![Some(GOOD)]),
            true,
        );
        let outcome = run(&resolver).await;

        assert!(outcome.succeeded());
        assert!(!outcome.fallback_used);
        assert_eq!(outcome.tokens_used, 10);
        assert_eq!(secondary.call_count.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_provider_failure_uses_fallback() {
        let (resolver, _, secondary) = setup(
            MockLlmProvider::new(vec![None]),
            MockLlmProvider::new(vec![Some(GOOD)]),
            true,
        );
        let outcome = run(&resolver).await;

        assert!(outcome.succeeded());
        assert!(outcome.fallback_used);
        assert_eq!(outcome.served_by.unwrap().provider, "backup");
        assert_eq!(secondary.call_count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_extraction_failure_uses_fallback() {
        let (resolver, _, _) = setup(
            MockLlmProvider::new(vec![Some("I'd rather not say.")]),
            MockLlmProvider::new(vec![Some(GOOD)]),
            true,
        );
        let outcome = run(&resolver).await;

        assert!(outcome.fallback_used);
        assert_eq!(outcome.tokens_used, 20);
        let decision = outcome.result.into_decision().unwrap();
        assert_eq!(decision.action, "BUY");
    }

    #[tokio::test]
    async fn test_both_fail_keeps_primary_raw_and_default() {
        let (resolver, primary, secondary) = setup(
            MockLlmProvider::new(vec![Some("prose only")]),
            MockLlmProvider::new(vec![None]),
            true,
        );
        let outcome = run(&resolver).await;

        assert!(!outcome.succeeded());
        assert!(!outcome.fallback_used);
        assert_eq!(outcome.raw_response.as_deref(), Some("prose only"));
        assert_eq!(outcome.served_by.unwrap().provider, "primary");
        assert_eq!(
            outcome.result.into_decision().unwrap(),
            AgentDecision::default()
        );
        let error = outcome.error.unwrap();
        assert!(error.contains("primary:p"));
        assert!(error.contains("fallback backup:b"));
        assert_eq!(primary.call_count.load(Ordering::SeqCst), 1);
        assert_eq!(secondary.call_count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_fallback_disabled() {
        let (resolver, _, secondary) = setup(
            MockLlmProvider::new(vec![None]),
            MockLlmProvider::new(vec![Some(GOOD)]),
            false,
        );
        let outcome = run(&resolver).await;

        assert!(!outcome.succeeded());
        assert!(outcome.raw_response.is_none());
        assert_eq!(secondary.call_count.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_prompt_rerendered_for_tool_capable_fallback() {
        let (resolver, primary, secondary) = setup(
            MockLlmProvider::new(vec![None]),
            MockLlmProvider::new(vec![Some(GOOD)]).with_tool_calls(),
            true,
        );
        run(&resolver).await;

        let primary_system = primary.system_prompts.lock().unwrap()[0].clone();
        let secondary_system = secondary.system_prompts.lock().unwrap()[0].clone();
        assert!(primary_system.contains("```json"));
        assert!(secondary_system.contains("Do not call any tools"));
        assert_ne!(primary_system, secondary_system);
    }

    #[tokio::test]
    async fn test_cancelled_primary_skips_fallback() {
        let (resolver, _, secondary) = setup(
            MockLlmProvider::new(vec![Some(GOOD)]),
            MockLlmProvider::new(vec![Some(GOOD)]),
            true,
        );
        let cancel = CancellationHandle::new();
        cancel.cancel();

        let outcome = resolver
            .resolve(
                &ModelConfig::new("primary", "p"),
                &TurnPrompt::decision("q"),
                Duration::from_secs(1),
                &cancel,
            )
            .await;

        assert!(!outcome.succeeded());
        assert_eq!(secondary.call_count.load(Ordering::SeqCst), 0);
    }
}
