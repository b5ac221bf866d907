//! debate-forge: multi-agent LLM debate orchestration.
//!
//! This library runs a question through several LLM personas over a fixed
//! number of rounds and synthesises a structured verdict, with per-turn
//! fallback models, deadline-bounded provider calls and a streamed event feed.

// Core modules
pub mod cli;
pub mod config;
pub mod debate;
pub mod error;
pub mod llm;
pub mod storage;
pub mod utils;

// Re-export commonly used types
pub use config::{ConfigError, EngineConfig};
pub use debate::{
    CancellationHandle, DebateRequest, DebateSession, DebateSessionManager, PersonaCatalog,
    StreamEvent, Verdict,
};
pub use error::{ExtractionError, LlmError, OrchestrationError, ProviderError, StoreError};
