//! Concrete LLM provider implementations.
//!
//! Each provider implements [`LlmProvider`] and is registered with the
//! gateway under a provider id.

pub mod openrouter;

pub use openrouter::OpenRouterProvider;

pub use super::litellm::LlmProvider;
