//! Single agent turn execution.

use std::time::Duration;

use super::cancel::CancellationHandle;
use super::fallback::{FallbackResolver, TurnPrompt};
use super::types::{AgentDecision, AgentTurn, ModelConfig, Persona, RoundContext};

/// An agent as configured for a session: identity, persona and model.
#[derive(Debug, Clone, PartialEq)]
pub struct AgentSpec {
    pub agent_id: String,
    pub persona: Persona,
    pub model_config: ModelConfig,
}

impl AgentSpec {
    pub fn new(agent_id: impl Into<String>, persona: Persona, model_config: ModelConfig) -> Self {
        Self {
            agent_id: agent_id.into(),
            persona,
            model_config,
        }
    }
}

const OPENING_CONTEXT: &str = "No arguments yet. You are opening the debate.";

/// Runs one agent's turn: render, resolve, record.
///
/// The runner never touches the session. It returns a terminal [`AgentTurn`]
/// for the orchestrator to attach.
pub struct AgentTurnRunner {
    resolver: FallbackResolver,
    query: String,
    turn_timeout: Duration,
}

impl AgentTurnRunner {
    pub fn new(resolver: FallbackResolver, query: impl Into<String>, turn_timeout: Duration) -> Self {
        Self {
            resolver,
            query: query.into(),
            turn_timeout,
        }
    }

    pub fn query(&self) -> &str {
        &self.query
    }

    /// Executes a turn.
    ///
    /// `prior` is every completed round; `current` holds the turns already
    /// taken this round (empty under parallel execution).
    pub async fn run(
        &self,
        agent: &AgentSpec,
        round: u32,
        prior: &[RoundContext],
        current: &[AgentTurn],
        cancel: &CancellationHandle,
    ) -> AgentTurn {
        let prompt = render_turn_prompt(&agent.persona, &self.query, round, prior, current);
        let mut turn = AgentTurn::begin(
            agent.agent_id.clone(),
            round,
            agent.persona.clone(),
            agent.model_config.clone(),
            prompt.clone(),
        );

        let outcome = self
            .resolver
            .resolve(
                &agent.model_config,
                &TurnPrompt::decision(prompt),
                self.turn_timeout,
                cancel,
            )
            .await;

        turn.raw_response = outcome.raw_response;
        turn.parsed_decision = Some(outcome.result.into_decision().unwrap_or_default());
        turn.error = outcome.error;
        turn.tokens_used = outcome.tokens_used;
        turn.fallback_used = outcome.fallback_used;
        turn.served_by = outcome.served_by;
        turn.complete();

        match &turn.error {
            None => tracing::info!(
                agent = %turn.agent_id,
                round,
                duration_ms = turn.duration_ms,
                tokens = turn.tokens_used,
                fallback_used = turn.fallback_used,
                "Agent turn completed"
            ),
            Some(error) => tracing::warn!(
                agent = %turn.agent_id,
                round,
                duration_ms = turn.duration_ms,
                error = %error,
                "Agent turn failed, continuing with default decision"
            ),
        }

        turn
    }
}

// ============================================================================
// Prompt rendering
// ============================================================================

/// Renders a persona template for one turn.
pub fn render_turn_prompt(
    persona: &Persona,
    query: &str,
    round: u32,
    prior: &[RoundContext],
    current: &[AgentTurn],
) -> String {
    let focus_areas = if persona.focus_areas.is_empty() {
        "the question as a whole".to_string()
    } else {
        persona.focus_areas.join(", ")
    };
    let prior_context = render_context(prior, round, current);
    let current_round = round.to_string();

    render_template(
        &persona.system_prompt_template,
        &[
            ("query", query),
            ("role", &persona.display_name),
            ("focus_areas", &focus_areas),
            ("prior_context", &prior_context),
            ("current_round", &current_round),
        ],
    )
}

/// Substitutes `{name}` placeholders in a single pass.
///
/// Substituted values are never rescanned, so a query that itself contains
/// `{prior_context}` is left alone. Unknown placeholders pass through.
pub fn render_template(template: &str, values: &[(&str, &str)]) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let after = &rest[open + 1..];

        let replaced = after.find('}').and_then(|close| {
            let name = &after[..close];
            values
                .iter()
                .find(|(key, _)| *key == name)
                .map(|(_, value)| (close, *value))
        });

        match replaced {
            Some((close, value)) => {
                out.push_str(value);
                rest = &after[close + 1..];
            }
            None => {
                out.push('{');
                rest = after;
            }
        }
    }

    out.push_str(rest);
    out
}

/// Agent-attributed transcript of everything said before this turn.
///
/// Rounds appear in order, agents in configured order within each round.
/// Failed turns stay in the transcript as `[no response: ...]`.
pub fn render_context(prior: &[RoundContext], round: u32, current: &[AgentTurn]) -> String {
    if prior.iter().all(|r| r.turns.is_empty()) && current.is_empty() {
        return OPENING_CONTEXT.to_string();
    }

    let mut sections = Vec::new();
    for context in prior {
        if context.turns.is_empty() {
            continue;
        }
        sections.push(render_round(
            &format!("Round {}", context.round),
            &context.turns,
        ));
    }
    if !current.is_empty() {
        sections.push(render_round(
            &format!("Round {} (so far)", round),
            current,
        ));
    }
    sections.join("\n\n")
}

fn render_round(heading: &str, turns: &[AgentTurn]) -> String {
    let mut lines = vec![format!("{}:", heading)];
    lines.extend(turns.iter().map(render_turn_line));
    lines.join("\n")
}

fn render_turn_line(turn: &AgentTurn) -> String {
    let who = format!("{} ({})", turn.persona.display_name, turn.agent_id);
    match (&turn.error, &turn.parsed_decision) {
        (None, Some(decision)) => format!("- {}: {}", who, summarize_decision(decision)),
        (Some(error), _) => format!("- {}: [no response: {}]", who, error),
        (None, None) => format!("- {}: [no response: turn did not complete]", who),
    }
}

fn summarize_decision(decision: &AgentDecision) -> String {
    let mut summary = format!(
        "{} (confidence {:.2})",
        decision.action, decision.confidence
    );
    if !decision.reasoning.is_empty() {
        summary.push_str(". ");
        summary.push_str(&decision.reasoning);
    }
    if !decision.key_points.is_empty() {
        summary.push_str(" Key points: ");
        summary.push_str(&decision.key_points.join("; "));
    }
    summary
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::debate::types::PersonaRole;

    fn persona(name: &str) -> Persona {
        Persona {
            role: PersonaRole::Analyst,
            display_name: name.to_string(),
            system_prompt_template:
                "[{role}] Q: {query} | focus: {focus_areas} | round {current_round}\n{prior_context}"
                    .to_string(),
            focus_areas: vec!["risk".to_string(), "return".to_string()],
        }
    }

    fn finished_turn(agent_id: &str, round: u32, reasoning: &str) -> AgentTurn {
        let mut turn = AgentTurn::begin(
            agent_id,
            round,
            persona("Analyst"),
            ModelConfig::new("mock", "m"),
            String::new(),
        );
        turn.parsed_decision = Some(AgentDecision {
            action: "BUY".to_string(),
            confidence: 0.8,
            reasoning: reasoning.to_string(),
            key_points: vec!["cheap".to_string()],
        });
        turn.complete();
        turn
    }

    #[test]
    fn test_render_template_single_pass() {
        let out = render_template(
            "a={a} b={b} keep={unknown} lone { brace",
            &[("a", "{b}"), ("b", "2")],
        );
        assert_eq!(out, "a={b} b=2 keep={unknown} lone { brace");
    }

    #[test]
    fn test_opening_round_prompt() {
        let prompt = render_turn_prompt(&persona("Analyst"), "Which fund?", 1, &[], &[]);
        assert!(prompt.starts_with("[Analyst] Q: Which fund? | focus: risk, return | round 1"));
        assert!(prompt.contains(OPENING_CONTEXT));
    }

    #[test]
    fn test_context_includes_prior_and_current_in_order() {
        let round1 = RoundContext {
            round: 1,
            turns: vec![
                finished_turn("analyst-1", 1, "first argument"),
                finished_turn("critic-2", 1, "second argument"),
            ],
        };
        let current = vec![finished_turn("analyst-1", 2, "third argument")];

        let context = render_context(&[round1], 2, &current);
        let first = context.find("first argument").unwrap();
        let second = context.find("second argument").unwrap();
        let third = context.find("third argument").unwrap();
        assert!(first < second && second < third);
        assert!(context.contains("Round 1:"));
        assert!(context.contains("Round 2 (so far):"));
        assert!(context.contains("Key points: cheap"));
    }

    #[test]
    fn test_failed_turn_rendered_as_no_response() {
        let mut failed = finished_turn("critic-2", 1, "unused");
        failed.error = Some("primary mock:m: provider error (timeout)".to_string());

        let context = render_context(
            &[RoundContext {
                round: 1,
                turns: vec![failed],
            }],
            2,
            &[],
        );
        assert!(context.contains("[no response: primary mock:m: provider error (timeout)]"));
    }
}
