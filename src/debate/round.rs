//! Round sequencing.
//!
//! Within a round, agents run in configured order. Under the default
//! sequential policy each agent finishes (fallback included) before the next
//! one starts, so later personas can answer earlier ones in the same round.

use std::fmt;
use std::str::FromStr;

use futures::future::join_all;
use serde::{Deserialize, Serialize};

use super::cancel::CancellationHandle;
use super::events::{EventSink, StreamEvent};
use super::turn::{AgentSpec, AgentTurnRunner};
use super::types::{DebateSession, RoundContext};
use crate::error::OrchestrationError;

/// How agents within one round are scheduled.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionPolicy {
    /// One agent at a time; later agents see earlier same-round turns.
    #[default]
    Sequential,
    /// All agents at once; every agent sees prior rounds only.
    Parallel,
}

impl ExecutionPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sequential => "sequential",
            Self::Parallel => "parallel",
        }
    }
}

impl fmt::Display for ExecutionPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExecutionPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sequential" => Ok(Self::Sequential),
            "parallel" => Ok(Self::Parallel),
            other => Err(format!("unknown execution policy '{}'", other)),
        }
    }
}

/// Result of one round.
#[derive(Debug, Clone, PartialEq)]
pub struct RoundOutcome {
    pub context: RoundContext,
    /// Cancellation stopped the round before every agent ran.
    pub cancelled: bool,
}

/// Drives every configured agent through one round.
pub struct RoundOrchestrator {
    runner: AgentTurnRunner,
    policy: ExecutionPolicy,
    preview_chars: usize,
}

impl RoundOrchestrator {
    pub fn new(runner: AgentTurnRunner, policy: ExecutionPolicy, preview_chars: usize) -> Self {
        Self {
            runner,
            policy,
            preview_chars,
        }
    }

    pub fn policy(&self) -> ExecutionPolicy {
        self.policy
    }

    /// Runs round `round` against the session's completed rounds.
    ///
    /// Emits one `model_completed` per finished turn, in agent order.
    pub async fn run_round(
        &self,
        session: &DebateSession,
        round: u32,
        agents: &[AgentSpec],
        events: &EventSink,
        cancel: &CancellationHandle,
    ) -> Result<RoundOutcome, OrchestrationError> {
        if agents.is_empty() {
            return Err(OrchestrationError::EmptyRound(round));
        }

        tracing::info!(
            session_id = %session.id,
            round,
            agents = agents.len(),
            policy = %self.policy,
            "Starting round"
        );

        match self.policy {
            ExecutionPolicy::Sequential => {
                self.run_sequential(session, round, agents, events, cancel)
                    .await
            }
            ExecutionPolicy::Parallel => {
                self.run_parallel(session, round, agents, events, cancel)
                    .await
            }
        }
    }

    /// Whether another round follows `round` out of `total`.
    pub fn should_continue(round: u32, total: u32) -> bool {
        round < total
    }

    async fn run_sequential(
        &self,
        session: &DebateSession,
        round: u32,
        agents: &[AgentSpec],
        events: &EventSink,
        cancel: &CancellationHandle,
    ) -> Result<RoundOutcome, OrchestrationError> {
        let mut context = RoundContext::new(round);

        for agent in agents {
            if cancel.is_cancelled() {
                tracing::info!(
                    session_id = %session.id,
                    round,
                    completed = context.turns.len(),
                    "Round cancelled"
                );
                return Ok(RoundOutcome {
                    context,
                    cancelled: true,
                });
            }

            let turn = self
                .runner
                .run(agent, round, &session.rounds, &context.turns, cancel)
                .await;
            events
                .send(StreamEvent::model_completed(&turn, self.preview_chars))
                .await;
            context.turns.push(turn);
        }

        Ok(RoundOutcome {
            context,
            cancelled: cancel.is_cancelled(),
        })
    }

    async fn run_parallel(
        &self,
        session: &DebateSession,
        round: u32,
        agents: &[AgentSpec],
        events: &EventSink,
        cancel: &CancellationHandle,
    ) -> Result<RoundOutcome, OrchestrationError> {
        if cancel.is_cancelled() {
            return Ok(RoundOutcome {
                context: RoundContext::new(round),
                cancelled: true,
            });
        }

        let turns = join_all(
            agents
                .iter()
                .map(|agent| self.runner.run(agent, round, &session.rounds, &[], cancel)),
        )
        .await;

        for turn in &turns {
            events
                .send(StreamEvent::model_completed(turn, self.preview_chars))
                .await;
        }

        Ok(RoundOutcome {
            context: RoundContext { round, turns },
            cancelled: cancel.is_cancelled(),
        })
    }
}
