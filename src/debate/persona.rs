//! Persona catalog for debate agents.
//!
//! Each persona pairs a role with a prompt template. The template is rendered
//! per turn by the turn runner with these placeholders:
//!
//! - `{query}` - the question under debate
//! - `{role}` - the persona's display name
//! - `{focus_areas}` - comma-separated focus areas
//! - `{prior_context}` - agent-attributed summary of earlier turns
//! - `{current_round}` - the round number, starting at 1

use std::collections::BTreeMap;
use std::path::Path;

use serde::Deserialize;

use super::types::{Persona, PersonaRole};
use crate::error::OrchestrationError;

// ============================================================================
// Built-in templates
// ============================================================================

const ANALYST_TEMPLATE: &str = r#"You are the {role} in a multi-agent debate. Your job is to build the strongest evidence-based position on the question.

YOUR PERSPECTIVE:
- Break the question into its measurable parts
- Weigh upside against downside with concrete numbers where you can
- Focus on: {focus_areas}

QUESTION:
{query}

DEBATE SO FAR (round {current_round}):
{prior_context}

State your position, then engage with any earlier arguments you disagree with."#;

const CRITIC_TEMPLATE: &str = r#"You are the {role} in a multi-agent debate. Your job is to find what the other participants missed.

YOUR PERSPECTIVE:
- Challenge assumptions and point out unstated risks
- Name the weakest step in each earlier argument
- Focus on: {focus_areas}

QUESTION:
{query}

DEBATE SO FAR (round {current_round}):
{prior_context}

Do not disagree for its own sake. If an argument holds up, say so and move on."#;

const SYNTHESIZER_TEMPLATE: &str = r#"You are the {role} in a multi-agent debate. Your job is to reconcile the positions on the table into one workable recommendation.

YOUR PERSPECTIVE:
- Identify where participants already agree
- Resolve disagreements by naming the conditions under which each side is right
- Focus on: {focus_areas}

QUESTION:
{query}

DEBATE SO FAR (round {current_round}):
{prior_context}

Give a single recommendation and the conditions that would change it."#;

// ============================================================================
// Catalog
// ============================================================================

/// Registry of personas keyed by role.
#[derive(Debug, Clone, Default)]
pub struct PersonaCatalog {
    personas: BTreeMap<PersonaRole, Persona>,
}

#[derive(Debug, Deserialize)]
struct PersonaFile {
    personas: Vec<Persona>,
}

impl PersonaCatalog {
    /// An empty catalog.
    pub fn new() -> Self {
        Self::default()
    }

    /// The analyst, critic and synthesizer personas.
    pub fn builtin() -> Self {
        let mut catalog = Self::new();
        for persona in [
            Persona {
                role: PersonaRole::Analyst,
                display_name: "Analyst".to_string(),
                system_prompt_template: ANALYST_TEMPLATE.to_string(),
                focus_areas: vec![
                    "expected returns".to_string(),
                    "quantitative evidence".to_string(),
                ],
            },
            Persona {
                role: PersonaRole::Critic,
                display_name: "Critic".to_string(),
                system_prompt_template: CRITIC_TEMPLATE.to_string(),
                focus_areas: vec![
                    "downside risk".to_string(),
                    "hidden assumptions".to_string(),
                ],
            },
            Persona {
                role: PersonaRole::Synthesizer,
                display_name: "Synthesizer".to_string(),
                system_prompt_template: SYNTHESIZER_TEMPLATE.to_string(),
                focus_areas: vec!["common ground".to_string(), "trade-offs".to_string()],
            },
        ] {
            catalog.personas.insert(persona.role.clone(), persona);
        }
        catalog
    }

    /// Parses a YAML document of the form `personas: [ ... ]`.
    pub fn from_yaml_str(yaml: &str) -> Result<Self, OrchestrationError> {
        let file: PersonaFile = serde_yaml::from_str(yaml)
            .map_err(|e| OrchestrationError::InvalidPersonaConfig(e.to_string()))?;

        let mut catalog = Self::new();
        for persona in file.personas {
            validate_persona(&persona)?;
            if catalog.personas.contains_key(&persona.role) {
                return Err(OrchestrationError::InvalidPersonaConfig(format!(
                    "role '{}' is defined more than once",
                    persona.role
                )));
            }
            catalog.personas.insert(persona.role.clone(), persona);
        }
        Ok(catalog)
    }

    /// Loads a persona YAML file.
    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self, OrchestrationError> {
        let path = path.as_ref();
        let yaml = std::fs::read_to_string(path).map_err(|e| {
            OrchestrationError::InvalidPersonaConfig(format!("{}: {}", path.display(), e))
        })?;
        Self::from_yaml_str(&yaml)
    }

    /// Adds every persona of `other`, replacing same-role entries.
    pub fn merge(mut self, other: PersonaCatalog) -> Self {
        self.personas.extend(other.personas);
        self
    }

    pub fn with_persona(mut self, persona: Persona) -> Result<Self, OrchestrationError> {
        validate_persona(&persona)?;
        self.personas.insert(persona.role.clone(), persona);
        Ok(self)
    }

    pub fn get(&self, role: &PersonaRole) -> Option<&Persona> {
        self.personas.get(role)
    }

    /// Looks up a role, failing with `UnknownPersona` when absent.
    pub fn resolve(&self, role: &PersonaRole) -> Result<&Persona, OrchestrationError> {
        self.get(role)
            .ok_or_else(|| OrchestrationError::UnknownPersona(role.to_string()))
    }

    pub fn iter(&self) -> impl Iterator<Item = &Persona> {
        self.personas.values()
    }

    pub fn len(&self) -> usize {
        self.personas.len()
    }

    pub fn is_empty(&self) -> bool {
        self.personas.is_empty()
    }
}

fn validate_persona(persona: &Persona) -> Result<(), OrchestrationError> {
    if persona.display_name.trim().is_empty() {
        return Err(OrchestrationError::InvalidPersonaConfig(format!(
            "persona '{}' has an empty display_name",
            persona.role
        )));
    }
    if persona.system_prompt_template.trim().is_empty() {
        return Err(OrchestrationError::InvalidPersonaConfig(format!(
            "persona '{}' has an empty system_prompt_template",
            persona.role
        )));
    }
    if !persona.system_prompt_template.contains("{query}") {
        return Err(OrchestrationError::InvalidPersonaConfig(format!(
            "persona '{}' template never mentions {{query}}",
            persona.role
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_catalog() {
        let catalog = PersonaCatalog::builtin();
        assert_eq!(catalog.len(), 3);

        for persona in catalog.iter() {
            assert!(persona.system_prompt_template.contains("{query}"));
            assert!(persona.system_prompt_template.contains("{prior_context}"));
            assert!(!persona.focus_areas.is_empty());
        }
        assert_eq!(
            catalog.resolve(&PersonaRole::Critic).unwrap().display_name,
            "Critic"
        );
    }

    #[test]
    fn test_unknown_role() {
        let err = PersonaCatalog::builtin()
            .resolve(&PersonaRole::Custom("oracle".to_string()))
            .unwrap_err();
        assert!(matches!(err, OrchestrationError::UnknownPersona(ref r) if r == "oracle"));
    }

    #[test]
    fn test_from_yaml_and_merge() {
        let yaml = r#"
personas:
  - role: risk_officer
    display_name: Risk Officer
    system_prompt_template: "As {role}, assess {query}. Context: {prior_context}"
    focus_areas: [liquidity, drawdown]
  - role: critic
    display_name: Harsh Critic
    system_prompt_template: "Tear apart {query}"
"#;
        let loaded = PersonaCatalog::from_yaml_str(yaml).unwrap();
        assert_eq!(loaded.len(), 2);

        let merged = PersonaCatalog::builtin().merge(loaded);
        assert_eq!(merged.len(), 4);
        assert_eq!(
            merged.resolve(&PersonaRole::Critic).unwrap().display_name,
            "Harsh Critic"
        );
        let custom = merged
            .resolve(&PersonaRole::Custom("risk_officer".to_string()))
            .unwrap();
        assert_eq!(custom.focus_areas, vec!["liquidity", "drawdown"]);
    }

    #[test]
    fn test_invalid_yaml_rejected() {
        let missing_query = r#"
personas:
  - role: analyst
    display_name: A
    system_prompt_template: "no placeholders"
"#;
        assert!(matches!(
            PersonaCatalog::from_yaml_str(missing_query),
            Err(OrchestrationError::InvalidPersonaConfig(_))
        ));

        let duplicate = r#"
personas:
  - {role: critic, display_name: A, system_prompt_template: "{query}"}
  - {role: critic, display_name: B, system_prompt_template: "{query}"}
"#;
        assert!(PersonaCatalog::from_yaml_str(duplicate).is_err());
        assert!(PersonaCatalog::from_yaml_str("not: [valid").is_err());
    }

    #[test]
    fn test_from_yaml_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("personas.yaml");
        std::fs::write(
            &path,
            "personas:\n  - {role: analyst, display_name: Quant, system_prompt_template: \"{query}\"}\n",
        )
        .unwrap();

        let catalog = PersonaCatalog::from_yaml_file(&path).unwrap();
        assert_eq!(catalog.get(&PersonaRole::Analyst).unwrap().display_name, "Quant");
        assert!(PersonaCatalog::from_yaml_file(dir.path().join("missing.yaml")).is_err());
    }
}
