//! Debate session lifecycle.
//!
//! `pending -> running -> (round_complete -> running)* -> synthesizing -> complete`
//!
//! The manager owns the only mutable [`DebateSession`]. Every state change is
//! published to the [`SessionRegistry`] and mirrored on the event stream.
//! Provider and extraction failures stay inside turns; only orchestration
//! errors fail a session.

use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio_stream::wrappers::ReceiverStream;

pub use super::cancel::CancellationHandle;
use super::events::{EventSink, StreamEvent};
use super::fallback::FallbackResolver;
use super::judge::{agreement_ratio, final_positions, JudgeSynthesizer};
use super::persona::PersonaCatalog;
use super::registry::SessionRegistry;
use super::request::DebateRequest;
use super::round::RoundOrchestrator;
use super::turn::{AgentSpec, AgentTurnRunner};
use super::types::{DebateSession, SessionStatus, Verdict};
use crate::config::EngineConfig;
use crate::error::OrchestrationError;
use crate::llm::gateway::ProviderGateway;
use crate::storage::{JsonFileStore, SessionStore};

/// Default capacity of the event channel created by [`DebateSessionManager::spawn`].
pub const DEFAULT_EVENT_BUFFER: usize = 64;

/// A debate running on its own task.
pub struct RunningDebate {
    pub events: ReceiverStream<StreamEvent>,
    pub cancel: CancellationHandle,
    pub handle: JoinHandle<DebateSession>,
}

/// Runs debate sessions against a shared gateway and persona catalog.
pub struct DebateSessionManager {
    gateway: Arc<ProviderGateway>,
    catalog: Arc<PersonaCatalog>,
    config: EngineConfig,
    store: Option<Arc<dyn SessionStore>>,
    registry: Arc<SessionRegistry>,
}

impl DebateSessionManager {
    /// Sessions are saved under `config.session_dir` when it is set.
    pub fn new(gateway: Arc<ProviderGateway>, catalog: PersonaCatalog, config: EngineConfig) -> Self {
        let store = config
            .session_dir
            .clone()
            .map(|dir| Arc::new(JsonFileStore::new(dir)) as Arc<dyn SessionStore>);

        Self {
            gateway,
            catalog: Arc::new(catalog),
            config,
            store,
            registry: SessionRegistry::shared(),
        }
    }

    /// Replaces the session store.
    pub fn with_store(mut self, store: Arc<dyn SessionStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Shares `registry` instead of a private one.
    pub fn with_registry(mut self, registry: Arc<SessionRegistry>) -> Self {
        self.registry = registry;
        self
    }

    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    pub fn catalog(&self) -> &PersonaCatalog {
        &self.catalog
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Runs `request` on a new task and hands back its event stream.
    pub fn spawn(self: &Arc<Self>, request: DebateRequest) -> RunningDebate {
        let (events, stream) = EventSink::channel(DEFAULT_EVENT_BUFFER);
        let cancel = CancellationHandle::new();

        let manager = Arc::clone(self);
        let task_cancel = cancel.clone();
        let handle =
            tokio::spawn(async move { manager.run(request, &events, &task_cancel).await });

        RunningDebate {
            events: stream,
            cancel,
            handle,
        }
    }

    /// Runs one debate to a terminal state.
    ///
    /// Always returns a session with a verdict. A failed session carries the
    /// default verdict; a cancelled one is judged over its completed turns.
    pub async fn run(
        &self,
        request: DebateRequest,
        events: &EventSink,
        cancel: &CancellationHandle,
    ) -> DebateSession {
        let mut session = DebateSession::new(request.query.trim());
        self.registry.publish(&session);

        tracing::info!(
            session_id = %session.id,
            rounds = request.rounds,
            personas = request.personas.len(),
            "Debate session started"
        );

        let result = match request
            .validate()
            .and_then(|_| request.resolve_agents(&self.catalog))
        {
            Ok(agents) => self.drive(&mut session, &request, &agents, events, cancel).await,
            Err(e) => Err(e),
        };

        if let Err(e) = result {
            self.fail(&mut session, e, events).await;
        }

        tracing::info!(
            session_id = %session.id,
            status = %session.status,
            turns = session.all_turns().count(),
            confidence = session.verdict.as_ref().map(|v| v.confidence_score).unwrap_or(0.0),
            "Debate session finished"
        );

        self.persist(&session).await;
        self.registry.cleanup_expired(self.config.session_ttl);
        session
    }

    async fn drive(
        &self,
        session: &mut DebateSession,
        request: &DebateRequest,
        agents: &[AgentSpec],
        events: &EventSink,
        cancel: &CancellationHandle,
    ) -> Result<(), OrchestrationError> {
        let enable_fallback = request
            .enable_fallback
            .unwrap_or(self.config.default_enable_fallback);
        let resolver = FallbackResolver::new(
            Arc::clone(&self.gateway),
            enable_fallback.then(|| self.config.fallback_model.clone()),
        );
        let runner = AgentTurnRunner::new(resolver, session.query.clone(), self.config.turn_timeout);
        let orchestrator = RoundOrchestrator::new(
            runner,
            self.config.execution_policy,
            self.config.preview_chars,
        );

        let mut cancelled = false;
        for round in 1..=request.rounds {
            if cancel.is_cancelled() {
                cancelled = true;
                break;
            }

            self.advance(session, SessionStatus::Running)?;
            events
                .send(StreamEvent::round_started(round, request.rounds, agents.len()))
                .await;

            let outcome = orchestrator
                .run_round(session, round, agents, events, cancel)
                .await?;
            session.rounds.push(outcome.context);

            if outcome.cancelled {
                cancelled = true;
                break;
            }
            self.advance(session, SessionStatus::RoundComplete)?;

            if !RoundOrchestrator::should_continue(round, request.rounds) {
                break;
            }
        }

        let positions = final_positions(session);
        events
            .send(StreamEvent::comparison_completed(
                session.rounds.len(),
                agreement_ratio(&positions),
                positions,
            ))
            .await;

        if cancelled {
            tracing::info!(
                session_id = %session.id,
                completed_rounds = session.rounds.len(),
                "Debate cancelled, judging completed turns"
            );
            self.advance(session, SessionStatus::Cancelled)?;
        } else {
            self.advance(session, SessionStatus::Synthesizing)?;
        }

        let judge = JudgeSynthesizer::new(
            Arc::clone(&self.gateway),
            self.config.judge_model.clone(),
            Some(self.config.fallback_model.clone()),
            self.config.judge_timeout,
        );
        let verdict = judge.synthesize(session).await;
        session.verdict = Some(verdict.clone());

        if cancelled {
            self.registry.publish(session);
        } else if cancel.is_cancelled() {
            tracing::info!(
                session_id = %session.id,
                "Debate cancelled during synthesis, keeping the verdict"
            );
            self.advance(session, SessionStatus::Cancelled)?;
        } else {
            self.advance(session, SessionStatus::Complete)?;
        }
        events.send(StreamEvent::synthesis_completed(verdict)).await;
        Ok(())
    }

    fn advance(
        &self,
        session: &mut DebateSession,
        next: SessionStatus,
    ) -> Result<(), OrchestrationError> {
        session.transition(next)?;
        self.registry.publish(session);
        Ok(())
    }

    async fn fail(&self, session: &mut DebateSession, error: OrchestrationError, events: &EventSink) {
        tracing::error!(session_id = %session.id, error = %error, "Debate session failed");

        if !session.status.is_terminal() {
            if let Err(e) = session.transition(SessionStatus::Failed) {
                tracing::warn!(
                    session_id = %session.id,
                    error = %e,
                    "Could not mark session failed"
                );
            }
        }
        if session.verdict.is_none() {
            session.verdict = Some(Verdict::default());
        }
        self.registry.publish(session);
        events.send(StreamEvent::error(error.to_string(), false)).await;
    }

    async fn persist(&self, session: &DebateSession) {
        let Some(store) = &self.store else {
            return;
        };
        if let Err(e) = store.save(session).await {
            tracing::warn!(session_id = %session.id, error = %e, "Failed to save session");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::debate::types::ModelConfig;
    use crate::storage::MemoryStore;
    use tokio_stream::StreamExt;

    fn manager() -> DebateSessionManager {
        DebateSessionManager::new(
            Arc::new(ProviderGateway::new()),
            PersonaCatalog::builtin(),
            EngineConfig::default(),
        )
    }

    #[tokio::test]
    async fn test_invalid_request_fails_with_one_error_event() {
        let store = Arc::new(MemoryStore::new());
        let manager = manager().with_store(store.clone());
        let (events, stream) = EventSink::channel(16);

        let session = manager
            .run(DebateRequest::new("short"), &events, &CancellationHandle::new())
            .await;
        drop(events);

        assert_eq!(session.status, SessionStatus::Failed);
        assert_eq!(session.verdict, Some(Verdict::default()));

        let collected: Vec<StreamEvent> = stream.collect().await;
        assert_eq!(collected.len(), 1);
        assert_eq!(collected[0].event_type(), "error");

        assert!(store.load(&session.id).await.is_ok());
        assert_eq!(
            manager.registry().get(&session.id).unwrap().status,
            SessionStatus::Failed
        );
    }

    #[tokio::test]
    async fn test_fail_marks_running_session_and_keeps_terminal_status() {
        let manager = manager();
        let (events, stream) = EventSink::channel(16);

        let mut running = DebateSession::new("Should a retiree buy an annuity?");
        running.transition(SessionStatus::Running).unwrap();
        manager
            .fail(&mut running, OrchestrationError::EmptyRound(1), &events)
            .await;
        assert_eq!(running.status, SessionStatus::Failed);
        assert_eq!(running.verdict, Some(Verdict::default()));

        let mut done = DebateSession::new("Should a retiree buy an annuity?");
        done.transition(SessionStatus::Running).unwrap();
        done.transition(SessionStatus::RoundComplete).unwrap();
        done.transition(SessionStatus::Synthesizing).unwrap();
        done.transition(SessionStatus::Complete).unwrap();
        manager
            .fail(&mut done, OrchestrationError::InvalidRequest("late".to_string()), &events)
            .await;
        assert_eq!(done.status, SessionStatus::Complete);
        drop(events);

        let collected: Vec<StreamEvent> = stream.collect().await;
        assert_eq!(collected.len(), 2);
        assert!(collected.iter().all(|e| e.event_type() == "error"));
    }

    #[tokio::test]
    async fn test_cancelled_before_start() {
        let manager = manager();
        let cancel = CancellationHandle::new();
        cancel.cancel();

        let request = DebateRequest::new("Should a retiree buy an annuity?")
            .with_persona("analyst", ModelConfig::new("mock", "m"))
            .with_rounds(2);
        let session = manager.run(request, &EventSink::disabled(), &cancel).await;

        assert_eq!(session.status, SessionStatus::Cancelled);
        assert!(session.rounds.is_empty());
        assert_eq!(session.verdict, Some(Verdict::cancelled()));
    }
}
