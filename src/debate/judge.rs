//! Verdict synthesis.
//!
//! The judge never fails. Defaulting is layered: the extractor fills missing
//! fields, the judge falls back to a second model, then to a heuristic
//! verdict computed from the agents' final positions, and with no usable
//! turns at all it returns the default verdict without calling any model.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;

use super::cancel::CancellationHandle;
use super::events::AgentPositionSummary;
use super::extractor::DEFAULT_VERDICT_JSON;
use super::fallback::{FallbackResolver, TurnPrompt};
use super::types::{AgentTurn, DebateSession, ModelConfig, SessionStatus, Verdict};
use crate::llm::gateway::ProviderGateway;

// ============================================================================
// Final positions
// ============================================================================

/// Each agent's latest successful turn, in first-appearance order.
pub fn final_turns(session: &DebateSession) -> Vec<&AgentTurn> {
    let mut order: Vec<&str> = Vec::new();
    let mut latest: HashMap<&str, &AgentTurn> = HashMap::new();

    for turn in session.successful_turns() {
        if !latest.contains_key(turn.agent_id.as_str()) {
            order.push(&turn.agent_id);
        }
        latest.insert(&turn.agent_id, turn);
    }

    order.into_iter().filter_map(|id| latest.get(id).copied()).collect()
}

/// Summaries of each agent's final position.
pub fn final_positions(session: &DebateSession) -> Vec<AgentPositionSummary> {
    final_turns(session)
        .into_iter()
        .filter_map(|turn| {
            turn.parsed_decision.as_ref().map(|d| AgentPositionSummary {
                agent_id: turn.agent_id.clone(),
                agent_role: turn.persona.role.to_string(),
                action: d.normalized_action(),
                confidence: d.confidence,
            })
        })
        .collect()
}

/// Share of positions held by the largest action group. 0.0 when empty.
pub fn agreement_ratio(positions: &[AgentPositionSummary]) -> f64 {
    if positions.is_empty() {
        return 0.0;
    }

    let mut counts: HashMap<&str, usize> = HashMap::new();
    for position in positions {
        *counts.entry(position.action.as_str()).or_default() += 1;
    }
    let max = counts.values().copied().max().unwrap_or(0);
    max as f64 / positions.len() as f64
}

// ============================================================================
// Judge
// ============================================================================

const JUDGE_INSTRUCTIONS: &str = r#"You are the JUDGE of a multi-agent debate. Read every argument below and produce the final verdict.

- conclusion: one or two sentences answering the question
- confidence_score: 0.0-1.0, how strongly the arguments support the conclusion
- agreement_points: points most agents accepted
- disagreement_points: points that stayed contested
- contributing_agents: ids of the agents whose arguments shaped the conclusion"#;

/// Reduces a finished debate to one verdict.
pub struct JudgeSynthesizer {
    resolver: FallbackResolver,
    judge_model: ModelConfig,
    timeout: Duration,
}

impl JudgeSynthesizer {
    /// `fallback_model` is tried once if the judge model fails.
    pub fn new(
        gateway: Arc<ProviderGateway>,
        judge_model: ModelConfig,
        fallback_model: Option<ModelConfig>,
        timeout: Duration,
    ) -> Self {
        Self {
            resolver: FallbackResolver::new(gateway, fallback_model),
            judge_model,
            timeout,
        }
    }

    pub async fn synthesize(&self, session: &DebateSession) -> Verdict {
        let contributors: BTreeSet<String> = session
            .successful_turns()
            .map(|t| t.agent_id.clone())
            .collect();

        if contributors.is_empty() {
            tracing::info!(
                session_id = %session.id,
                "No usable turns, returning default verdict"
            );
            // Turns aborted by the cancellation itself carry an error and do not count.
            return if session.status == SessionStatus::Cancelled {
                Verdict::cancelled()
            } else {
                Verdict::default()
            };
        }

        let prompt = TurnPrompt::verdict(build_judge_prompt(session));
        // The judge always runs to completion, even for a cancelled session.
        let outcome = self
            .resolver
            .resolve(
                &self.judge_model,
                &prompt,
                self.timeout,
                &CancellationHandle::new(),
            )
            .await;

        match (outcome.error, outcome.result.into_verdict()) {
            (None, Some(mut verdict)) => {
                if verdict.contributing_agents.is_empty() {
                    verdict.contributing_agents = contributors;
                }
                tracing::info!(
                    session_id = %session.id,
                    confidence = verdict.confidence_score,
                    fallback_used = outcome.fallback_used,
                    "Judge verdict synthesised"
                );
                verdict
            }
            (error, _) => {
                tracing::warn!(
                    session_id = %session.id,
                    error = error.as_deref().unwrap_or("no verdict"),
                    "Judge failed, using heuristic verdict"
                );
                heuristic_verdict(session)
            }
        }
    }

}

/// The judge's prompt: question, full transcript, and the default verdict verbatim.
pub fn build_judge_prompt(session: &DebateSession) -> String {
    let mut transcript = Vec::new();
    for round in &session.rounds {
        transcript.push(format!("Round {}:", round.round));
        for turn in &round.turns {
            let body = match (&turn.error, &turn.parsed_decision) {
                (None, Some(d)) => {
                    let mut line = format!(
                        "{} (confidence {:.2}). {}",
                        d.action, d.confidence, d.reasoning
                    );
                    if !d.key_points.is_empty() {
                        line.push_str(" Key points: ");
                        line.push_str(&d.key_points.join("; "));
                    }
                    line
                }
                (Some(error), _) => format!("[no response: {}]", error),
                (None, None) => "[no response]".to_string(),
            };
            transcript.push(format!(
                "- {} [{}] ({}): {}",
                turn.agent_id, turn.persona.role, turn.persona.display_name, body
            ));
        }
    }

    format!(
        "{}\n\nQUESTION:\n{}\n\nDEBATE TRANSCRIPT:\n{}\n\n\
         Reply with JSON in exactly this shape. If you cannot reach a verdict, \
         return it unchanged:\n{}",
        JUDGE_INSTRUCTIONS,
        session.query,
        transcript.join("\n"),
        DEFAULT_VERDICT_JSON
    )
}

/// Majority-vote verdict over the agents' final positions.
///
/// Confidence is the majority share times the majority's mean confidence.
/// Ties go to the higher mean confidence, then to the alphabetically first action.
pub fn heuristic_verdict(session: &DebateSession) -> Verdict {
    let finals = final_turns(session);
    if finals.is_empty() {
        return Verdict::default();
    }

    let mut groups: BTreeMap<String, Vec<&AgentTurn>> = BTreeMap::new();
    for turn in &finals {
        if let Some(decision) = &turn.parsed_decision {
            groups
                .entry(decision.normalized_action())
                .or_default()
                .push(turn);
        }
    }

    let mean_confidence = |turns: &[&AgentTurn]| -> f64 {
        let sum: f64 = turns
            .iter()
            .filter_map(|t| t.parsed_decision.as_ref())
            .map(|d| d.confidence)
            .sum();
        sum / turns.len().max(1) as f64
    };

    let Some((majority_action, majority)) = groups.iter().max_by(|(a_action, a), (b_action, b)| {
        a.len()
            .cmp(&b.len())
            .then_with(|| mean_confidence(a).total_cmp(&mean_confidence(b)))
            .then_with(|| b_action.cmp(a_action))
    }) else {
        return Verdict::default();
    };

    let total = finals.len();
    let share = majority.len() as f64 / total as f64;
    let confidence_score = (share * mean_confidence(majority)).clamp(0.0, 1.0);

    let mut agreement_points = BTreeSet::new();
    agreement_points.insert(format!(
        "Majority position: {} ({} of {} agents)",
        majority_action,
        majority.len(),
        total
    ));

    let mut point_counts: HashMap<String, (String, BTreeSet<&str>)> = HashMap::new();
    for turn in &finals {
        if let Some(decision) = &turn.parsed_decision {
            for point in &decision.key_points {
                let entry = point_counts
                    .entry(point.trim().to_lowercase())
                    .or_insert_with(|| (point.trim().to_string(), BTreeSet::new()));
                entry.1.insert(turn.agent_id.as_str());
            }
        }
    }
    for (point, agents) in point_counts.into_values() {
        if agents.len() > 1 {
            agreement_points.insert(point);
        }
    }

    let disagreement_points = groups
        .iter()
        .filter(|(action, _)| *action != majority_action)
        .map(|(action, turns)| {
            let ids: Vec<&str> = turns.iter().map(|t| t.agent_id.as_str()).collect();
            format!("{} favoured {}", ids.join(", "), action)
        })
        .collect();

    Verdict {
        conclusion: format!(
            "Heuristic synthesis: {} of {} agents recommend {}.",
            majority.len(),
            total,
            majority_action
        ),
        confidence_score,
        agreement_points,
        disagreement_points,
        contributing_agents: finals.iter().map(|t| t.agent_id.clone()).collect(),
    }
}
