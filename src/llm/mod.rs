//! LLM integration for debate-forge.
//!
//! Concrete clients implement [`LlmProvider`]; the [`ProviderGateway`] routes
//! calls to them by provider id with a timeout, a cancellation race and an
//! optional shared [`RateLimitBudget`].
//!
//! ```ignore
//! use debate_forge::llm::{ProviderGateway, RateLimitBudget};
//! use debate_forge::llm::providers::OpenRouterProvider;
//! use std::sync::Arc;
//!
//! let gateway = ProviderGateway::new()
//!     .with_provider("openrouter", Arc::new(OpenRouterProvider::from_env()?))
//!     .with_budget(RateLimitBudget::shared(4));
//! ```

pub mod budget;
pub mod gateway;
pub mod litellm;
pub mod providers;

pub use budget::{BudgetPermit, RateLimitBudget};
pub use gateway::{ProviderGateway, RawCompletion};
pub use litellm::{
    Choice, GenerationRequest, GenerationResponse, LiteLlmClient, LlmProvider, Message, Usage,
};
pub use providers::OpenRouterProvider;
