//! Core data model for debate sessions.
//!
//! Everything here is plain serialisable data. The session manager owns the
//! only mutable [`DebateSession`]; collaborators see snapshots or events.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::OrchestrationError;

// ============================================================================
// Personas and models
// ============================================================================

/// Role a persona plays in the debate.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum PersonaRole {
    Analyst,
    Critic,
    Synthesizer,
    Custom(String),
}

impl PersonaRole {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Analyst => "analyst",
            Self::Critic => "critic",
            Self::Synthesizer => "synthesizer",
            Self::Custom(name) => name,
        }
    }
}

impl From<String> for PersonaRole {
    fn from(s: String) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "analyst" => Self::Analyst,
            "critic" => Self::Critic,
            "synthesizer" => Self::Synthesizer,
            other => Self::Custom(other.to_string()),
        }
    }
}

impl From<&str> for PersonaRole {
    fn from(s: &str) -> Self {
        Self::from(s.to_string())
    }
}

impl From<PersonaRole> for String {
    fn from(role: PersonaRole) -> Self {
        role.as_str().to_string()
    }
}

impl fmt::Display for PersonaRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A configured debate role with its prompt template.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Persona {
    pub role: PersonaRole,
    pub display_name: String,
    /// Template rendered per turn. See `debate::turn` for placeholders.
    pub system_prompt_template: String,
    #[serde(default)]
    pub focus_areas: Vec<String>,
}

/// Which provider and model serve an agent.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ModelConfig {
    pub provider: String,
    pub model: String,
    #[serde(default)]
    pub supports_tool_calls: bool,
}

impl ModelConfig {
    pub fn new(provider: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            model: model.into(),
            supports_tool_calls: false,
        }
    }

    pub fn with_tool_calls(mut self, supports: bool) -> Self {
        self.supports_tool_calls = supports;
        self
    }

    /// `provider:model`, used as the rate-limit budget key.
    pub fn key(&self) -> String {
        format!("{}:{}", self.provider, self.model)
    }
}

impl fmt::Display for ModelConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.provider, self.model)
    }
}

impl FromStr for ModelConfig {
    type Err = OrchestrationError;

    /// Parses `provider:model`. The model part may itself contain `:`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().split_once(':') {
            Some((provider, model)) if !provider.is_empty() && !model.is_empty() => {
                Ok(Self::new(provider, model))
            }
            _ => Err(OrchestrationError::InvalidRequest(format!(
                "model must be written as provider:model, got '{}'",
                s
            ))),
        }
    }
}

// ============================================================================
// Turns and rounds
// ============================================================================

/// Neutral action used when a model gives none.
pub const DEFAULT_ACTION: &str = "HOLD";

/// Confidence attached to the neutral action.
pub const DEFAULT_CONFIDENCE: f64 = 0.1;

/// Structured decision parsed from an agent's response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentDecision {
    pub action: String,
    pub confidence: f64,
    #[serde(default)]
    pub reasoning: String,
    #[serde(default)]
    pub key_points: Vec<String>,
}

impl Default for AgentDecision {
    fn default() -> Self {
        Self {
            action: DEFAULT_ACTION.to_string(),
            confidence: DEFAULT_CONFIDENCE,
            reasoning: String::new(),
            key_points: Vec::new(),
        }
    }
}

impl AgentDecision {
    /// Action uppercased and trimmed, for grouping.
    pub fn normalized_action(&self) -> String {
        self.action.trim().to_ascii_uppercase()
    }
}

/// One agent's contribution to one round.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentTurn {
    pub agent_id: String,
    pub round: u32,
    pub persona: Persona,
    pub model_config: ModelConfig,
    pub prompt_sent: String,
    pub raw_response: Option<String>,
    pub parsed_decision: Option<AgentDecision>,
    pub error: Option<String>,
    pub tokens_used: u32,
    pub duration_ms: u64,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    /// The secondary model produced the accepted response.
    #[serde(default)]
    pub fallback_used: bool,
    /// Model that actually produced `raw_response`.
    #[serde(default)]
    pub served_by: Option<ModelConfig>,
}

impl AgentTurn {
    /// Opens a turn. It becomes terminal once [`complete`](Self::complete) runs.
    pub fn begin(
        agent_id: impl Into<String>,
        round: u32,
        persona: Persona,
        model_config: ModelConfig,
        prompt_sent: String,
    ) -> Self {
        Self {
            agent_id: agent_id.into(),
            round,
            persona,
            model_config,
            prompt_sent,
            raw_response: None,
            parsed_decision: None,
            error: None,
            tokens_used: 0,
            duration_ms: 0,
            started_at: Utc::now(),
            completed_at: None,
            fallback_used: false,
            served_by: None,
        }
    }

    pub fn complete(&mut self) {
        let now = Utc::now();
        self.duration_ms = (now - self.started_at).num_milliseconds().max(0) as u64;
        self.completed_at = Some(now);
    }

    pub fn is_terminal(&self) -> bool {
        self.completed_at.is_some()
    }

    /// A turn counts as successful when it parsed a decision without error.
    pub fn succeeded(&self) -> bool {
        self.error.is_none() && self.parsed_decision.is_some()
    }
}

/// All turns of one round, in configured agent order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RoundContext {
    pub round: u32,
    pub turns: Vec<AgentTurn>,
}

impl RoundContext {
    pub fn new(round: u32) -> Self {
        Self {
            round,
            turns: Vec::new(),
        }
    }

    pub fn successful_turns(&self) -> impl Iterator<Item = &AgentTurn> {
        self.turns.iter().filter(|t| t.succeeded())
    }
}

// ============================================================================
// Session
// ============================================================================

/// Lifecycle of a debate session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Pending,
    Running,
    RoundComplete,
    Synthesizing,
    Complete,
    Failed,
    Cancelled,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::RoundComplete => "round_complete",
            Self::Synthesizing => "synthesizing",
            Self::Complete => "complete",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Complete | Self::Failed | Self::Cancelled)
    }

    /// Whether moving from `self` to `next` keeps the lifecycle monotonic.
    pub fn can_transition_to(&self, next: SessionStatus) -> bool {
        use SessionStatus::*;

        if self.is_terminal() {
            return false;
        }

        match (self, next) {
            (_, Failed) => true,
            (Pending, Running) => true,
            (Running, RoundComplete) => true,
            (RoundComplete, Running) => true,
            (RoundComplete, Synthesizing) => true,
            (Synthesizing, Complete) => true,
            (Pending | Running | RoundComplete | Synthesizing, Cancelled) => true,
            _ => false,
        }
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Conclusion of the default verdict.
pub const NO_USABLE_RESPONSE_CONCLUSION: &str =
    "No agent produced a usable response, so no consensus could be reached.";

/// Conclusion used when a session was cancelled before any turn completed.
pub const CANCELLED_CONCLUSION: &str =
    "The debate was cancelled before any agent completed a turn.";

/// Final structured outcome of a debate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Verdict {
    pub conclusion: String,
    pub confidence_score: f64,
    pub agreement_points: BTreeSet<String>,
    pub disagreement_points: BTreeSet<String>,
    pub contributing_agents: BTreeSet<String>,
}

impl Default for Verdict {
    fn default() -> Self {
        Self {
            conclusion: NO_USABLE_RESPONSE_CONCLUSION.to_string(),
            confidence_score: 0.0,
            agreement_points: BTreeSet::new(),
            disagreement_points: BTreeSet::new(),
            contributing_agents: BTreeSet::new(),
        }
    }
}

impl Verdict {
    pub fn cancelled() -> Self {
        Self {
            conclusion: CANCELLED_CONCLUSION.to_string(),
            ..Self::default()
        }
    }
}

/// One debate invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DebateSession {
    pub id: String,
    pub query: String,
    pub rounds: Vec<RoundContext>,
    pub status: SessionStatus,
    pub verdict: Option<Verdict>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl DebateSession {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            query: query.into(),
            rounds: Vec::new(),
            status: SessionStatus::Pending,
            verdict: None,
            created_at: Utc::now(),
            completed_at: None,
        }
    }

    /// Moves to `next`, rejecting any backward or post-terminal move.
    pub fn transition(&mut self, next: SessionStatus) -> Result<(), OrchestrationError> {
        if !self.status.can_transition_to(next) {
            return Err(OrchestrationError::InvalidTransition {
                from: self.status.to_string(),
                to: next.to_string(),
            });
        }

        tracing::debug!(
            session_id = %self.id,
            from = %self.status,
            to = %next,
            "Session transition"
        );
        self.status = next;
        if next.is_terminal() {
            self.completed_at = Some(Utc::now());
        }
        Ok(())
    }

    pub fn all_turns(&self) -> impl Iterator<Item = &AgentTurn> {
        self.rounds.iter().flat_map(|r| r.turns.iter())
    }

    pub fn successful_turns(&self) -> impl Iterator<Item = &AgentTurn> {
        self.all_turns().filter(|t| t.succeeded())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn persona() -> Persona {
        Persona {
            role: PersonaRole::Analyst,
            display_name: "Analyst".to_string(),
            system_prompt_template: "{query}".to_string(),
            focus_areas: vec![],
        }
    }

    #[test]
    fn test_persona_role_serde() {
        let json = serde_json::to_string(&PersonaRole::Critic).unwrap();
        assert_eq!(json, "\"critic\"");

        let custom: PersonaRole = serde_json::from_str("\"Risk_Officer\"").unwrap();
        assert_eq!(custom, PersonaRole::Custom("risk_officer".to_string()));
        assert_eq!(PersonaRole::from("ANALYST"), PersonaRole::Analyst);
    }

    #[test]
    fn test_model_config_parse() {
        let config: ModelConfig = "openrouter:meta/llama:free".parse().unwrap();
        assert_eq!(config.provider, "openrouter");
        assert_eq!(config.model, "meta/llama:free");
        assert_eq!(config.key(), "openrouter:meta/llama:free");

        assert!("no-colon".parse::<ModelConfig>().is_err());
        assert!(":model".parse::<ModelConfig>().is_err());
    }

    #[test]
    fn test_default_decision_is_neutral() {
        let decision = AgentDecision::default();
        assert_eq!(decision.action, "HOLD");
        assert!((decision.confidence - 0.1).abs() < f64::EPSILON);
    }

    #[test]
    fn test_status_transitions_are_monotonic() {
        use SessionStatus::*;

        assert!(Pending.can_transition_to(Running));
        assert!(Running.can_transition_to(RoundComplete));
        assert!(RoundComplete.can_transition_to(Running));
        assert!(RoundComplete.can_transition_to(Synthesizing));
        assert!(Synthesizing.can_transition_to(Complete));

        assert!(!Synthesizing.can_transition_to(RoundComplete));
        assert!(!Synthesizing.can_transition_to(Running));
        assert!(!Complete.can_transition_to(Failed));
        assert!(!Pending.can_transition_to(Complete));
        assert!(Pending.can_transition_to(Cancelled));
        assert!(Synthesizing.can_transition_to(Cancelled));
        assert!(Pending.can_transition_to(Failed));
    }

    #[test]
    fn test_session_transition_error() {
        let mut session = DebateSession::new("What should a retiree do?");
        session.transition(SessionStatus::Running).unwrap();
        session.transition(SessionStatus::RoundComplete).unwrap();
        session.transition(SessionStatus::Synthesizing).unwrap();

        let err = session.transition(SessionStatus::RoundComplete).unwrap_err();
        assert!(matches!(err, OrchestrationError::InvalidTransition { .. }));
        assert_eq!(session.status, SessionStatus::Synthesizing);

        session.transition(SessionStatus::Complete).unwrap();
        assert!(session.completed_at.is_some());
    }

    #[test]
    fn test_turn_lifecycle() {
        let mut turn = AgentTurn::begin(
            "analyst-1",
            1,
            persona(),
            ModelConfig::new("mock", "m"),
            "prompt".to_string(),
        );
        assert!(!turn.is_terminal());
        assert!(!turn.succeeded());

        turn.parsed_decision = Some(AgentDecision::default());
        turn.complete();
        assert!(turn.is_terminal());
        assert!(turn.succeeded());
        assert!(turn.completed_at.unwrap() >= turn.started_at);
    }

    #[test]
    fn test_verdict_serialises_sets_sorted() {
        let mut verdict = Verdict::default();
        verdict.contributing_agents.insert("critic-2".to_string());
        verdict.contributing_agents.insert("analyst-1".to_string());

        let json = serde_json::to_value(&verdict).unwrap();
        assert_eq!(
            json["contributing_agents"],
            serde_json::json!(["analyst-1", "critic-2"])
        );
    }
}
