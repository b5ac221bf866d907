//! Multi-agent debate engine.
//!
//! A debate runs a fixed number of rounds. In each round every configured
//! persona argues once, seeing everything said before it; a judge then reduces
//! the transcript to a [`Verdict`].
//!
//! ```ignore
//! use debate_forge::debate::{DebateRequest, DebateSessionManager, PersonaCatalog};
//! use debate_forge::config::EngineConfig;
//!
//! let manager = Arc::new(DebateSessionManager::new(gateway, PersonaCatalog::builtin(), EngineConfig::from_env()?));
//! let request = DebateRequest::new("Should a retiree move savings into index funds?")
//!     .with_persona("analyst", "openrouter:openai/gpt-4o".parse()?)
//!     .with_persona("critic", "openrouter:anthropic/claude-sonnet-4".parse()?)
//!     .with_rounds(2);
//! let running = manager.spawn(request);
//! ```

pub mod cancel;
pub mod events;
pub mod extractor;
pub mod fallback;
pub mod judge;
pub mod persona;
pub mod registry;
pub mod request;
pub mod round;
pub mod session;
pub mod turn;
pub mod types;

pub use events::{AgentPositionSummary, EventSink, StreamEvent};
pub use extractor::{ExpectedShape, ParsedResult, ResponseExtractor};
pub use fallback::{FallbackOutcome, FallbackResolver, TurnPrompt};
pub use judge::{agreement_ratio, final_positions, heuristic_verdict, JudgeSynthesizer};
pub use persona::PersonaCatalog;
pub use registry::SessionRegistry;
pub use request::{DebateRequest, PersonaSelection};
pub use round::{ExecutionPolicy, RoundOrchestrator, RoundOutcome};
pub use session::{CancellationHandle, DebateSessionManager, RunningDebate};
pub use turn::{AgentSpec, AgentTurnRunner};
pub use types::{
    AgentDecision, AgentTurn, DebateSession, ModelConfig, Persona, PersonaRole, RoundContext,
    SessionStatus, Verdict,
};
