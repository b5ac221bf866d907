//! External debate invocation request.

use serde::{Deserialize, Serialize};

use super::persona::PersonaCatalog;
use super::turn::AgentSpec;
use super::types::{ModelConfig, PersonaRole};
use crate::error::OrchestrationError;

/// Shortest accepted query, counted in characters after trimming.
pub const MIN_QUERY_CHARS: usize = 10;

/// A persona role paired with the model that plays it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersonaSelection {
    pub role: PersonaRole,
    pub model_config: ModelConfig,
}

impl PersonaSelection {
    pub fn new(role: impl Into<PersonaRole>, model_config: ModelConfig) -> Self {
        Self {
            role: role.into(),
            model_config,
        }
    }
}

/// Request to run one debate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DebateRequest {
    pub query: String,
    pub personas: Vec<PersonaSelection>,
    pub rounds: u32,
    /// `None` uses the engine default.
    #[serde(default)]
    pub enable_fallback: Option<bool>,
}

impl DebateRequest {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            personas: Vec::new(),
            rounds: 1,
            enable_fallback: None,
        }
    }

    pub fn with_persona(mut self, role: impl Into<PersonaRole>, model_config: ModelConfig) -> Self {
        self.personas.push(PersonaSelection::new(role, model_config));
        self
    }

    pub fn with_rounds(mut self, rounds: u32) -> Self {
        self.rounds = rounds;
        self
    }

    pub fn with_fallback(mut self, enabled: bool) -> Self {
        self.enable_fallback = Some(enabled);
        self
    }

    pub fn validate(&self) -> Result<(), OrchestrationError> {
        let query_chars = self.query.trim().chars().count();
        if query_chars < MIN_QUERY_CHARS {
            return Err(OrchestrationError::InvalidRequest(format!(
                "query must be at least {} characters, got {}",
                MIN_QUERY_CHARS, query_chars
            )));
        }

        if self.personas.is_empty() {
            return Err(OrchestrationError::InvalidRequest(
                "at least one persona is required".to_string(),
            ));
        }

        if self.rounds == 0 {
            return Err(OrchestrationError::InvalidRequest(
                "rounds must be at least 1".to_string(),
            ));
        }

        for selection in &self.personas {
            if selection.model_config.provider.trim().is_empty()
                || selection.model_config.model.trim().is_empty()
            {
                return Err(OrchestrationError::InvalidRequest(format!(
                    "persona '{}' has an incomplete model configuration",
                    selection.role
                )));
            }
        }

        Ok(())
    }

    /// Resolves every selection against `catalog`, in request order.
    ///
    /// Agent ids are `<role>-<position>`, 1-based, so the same role can
    /// appear twice with different models.
    pub fn resolve_agents(&self, catalog: &PersonaCatalog) -> Result<Vec<AgentSpec>, OrchestrationError> {
        self.personas
            .iter()
            .enumerate()
            .map(|(idx, selection)| {
                let persona = catalog.resolve(&selection.role)?;
                Ok(AgentSpec::new(
                    format!("{}-{}", selection.role, idx + 1),
                    persona.clone(),
                    selection.model_config.clone(),
                ))
            })
            .collect()
    }
}
