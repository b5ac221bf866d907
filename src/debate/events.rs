//! Live event stream for presentation collaborators.
//!
//! Events carry only what a live view needs, never the whole session.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

use super::types::{AgentTurn, Verdict};

// ============================================================================
// Stream Events
// ============================================================================

/// Final position of one agent, as reported by `comparison_completed`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentPositionSummary {
    pub agent_id: String,
    pub agent_role: String,
    pub action: String,
    pub confidence: f64,
}

/// Events emitted while a debate runs, tagged by `type` on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    /// A round has started.
    RoundStarted {
        round: u32,
        total_rounds: u32,
        agent_count: usize,
        timestamp: DateTime<Utc>,
    },
    /// One agent turn finished, successfully or not.
    ModelCompleted {
        agent_id: String,
        agent_name: String,
        agent_role: String,
        round: u32,
        response_preview: String,
        tokens_used: u32,
        duration_ms: u64,
        fallback_used: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
        timestamp: DateTime<Utc>,
    },
    /// All rounds finished. Positions are taken from each agent's last turn.
    ComparisonCompleted {
        round_count: usize,
        agreement_ratio: f64,
        positions: Vec<AgentPositionSummary>,
        timestamp: DateTime<Utc>,
    },
    /// The judge produced the verdict. Always the last event of a debate that ran.
    SynthesisCompleted {
        verdict: Verdict,
        timestamp: DateTime<Utc>,
    },
    /// A session-level failure.
    Error {
        message: String,
        recoverable: bool,
        timestamp: DateTime<Utc>,
    },
}

impl StreamEvent {
    /// Creates a RoundStarted event.
    pub fn round_started(round: u32, total_rounds: u32, agent_count: usize) -> Self {
        Self::RoundStarted {
            round,
            total_rounds,
            agent_count,
            timestamp: Utc::now(),
        }
    }

    /// Creates a ModelCompleted event for a finished turn.
    pub fn model_completed(turn: &AgentTurn, preview_chars: usize) -> Self {
        let preview = turn
            .raw_response
            .as_deref()
            .map(|raw| truncate_preview(raw, preview_chars))
            .unwrap_or_default();

        Self::ModelCompleted {
            agent_id: turn.agent_id.clone(),
            agent_name: turn.persona.display_name.clone(),
            agent_role: turn.persona.role.to_string(),
            round: turn.round,
            response_preview: preview,
            tokens_used: turn.tokens_used,
            duration_ms: turn.duration_ms,
            fallback_used: turn.fallback_used,
            error: turn.error.clone(),
            timestamp: Utc::now(),
        }
    }

    /// Creates a ComparisonCompleted event.
    pub fn comparison_completed(
        round_count: usize,
        agreement_ratio: f64,
        positions: Vec<AgentPositionSummary>,
    ) -> Self {
        Self::ComparisonCompleted {
            round_count,
            agreement_ratio,
            positions,
            timestamp: Utc::now(),
        }
    }

    /// Creates a SynthesisCompleted event.
    pub fn synthesis_completed(verdict: Verdict) -> Self {
        Self::SynthesisCompleted {
            verdict,
            timestamp: Utc::now(),
        }
    }

    /// Creates an Error event.
    pub fn error(message: impl Into<String>, recoverable: bool) -> Self {
        Self::Error {
            message: message.into(),
            recoverable,
            timestamp: Utc::now(),
        }
    }

    /// The wire discriminator.
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::RoundStarted { .. } => "round_started",
            Self::ModelCompleted { .. } => "model_completed",
            Self::ComparisonCompleted { .. } => "comparison_completed",
            Self::SynthesisCompleted { .. } => "synthesis_completed",
            Self::Error { .. } => "error",
        }
    }

    /// Whether no further events follow this one.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::SynthesisCompleted { .. } | Self::Error { .. })
    }
}

/// Truncates on a char boundary, appending `...` when anything was cut.
pub fn truncate_preview(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((cut, _)) => format!("{}...", &text[..cut]),
        None => text.to_string(),
    }
}

// ============================================================================
// Event Sink
// ============================================================================

/// Sending half of the event stream.
///
/// A dropped receiver never fails the debate; events are simply discarded.
#[derive(Debug, Clone, Default)]
pub struct EventSink {
    tx: Option<mpsc::Sender<StreamEvent>>,
}

impl EventSink {
    pub fn new(tx: mpsc::Sender<StreamEvent>) -> Self {
        Self { tx: Some(tx) }
    }

    /// A sink that discards every event.
    pub fn disabled() -> Self {
        Self { tx: None }
    }

    /// Creates a sink plus the stream a presentation layer consumes.
    pub fn channel(capacity: usize) -> (Self, ReceiverStream<StreamEvent>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self::new(tx), ReceiverStream::new(rx))
    }

    pub async fn send(&self, event: StreamEvent) {
        if let Some(tx) = &self.tx {
            let _ = tx.send(event).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_stream::StreamExt;

    #[test]
    fn test_event_wire_format() {
        let event = StreamEvent::round_started(1, 3, 2);
        let json = serde_json::to_value(&event).unwrap();

        assert_eq!(json["type"], "round_started");
        assert_eq!(json["round"], 1);
        assert_eq!(json["total_rounds"], 3);
        assert_eq!(json["agent_count"], 2);
        assert_eq!(event.event_type(), "round_started");
    }

    #[test]
    fn test_error_event_is_terminal() {
        let event = StreamEvent::error("bad request", false);
        assert!(event.is_terminal());
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "error");
        assert_eq!(json["recoverable"], false);

        assert!(!StreamEvent::round_started(1, 1, 1).is_terminal());
    }

    #[test]
    fn test_truncate_preview_char_boundary() {
        assert_eq!(truncate_preview("short", 10), "short");
        assert_eq!(truncate_preview("exactly", 7), "exactly");
        assert_eq!(truncate_preview("héllo wörld", 5), "héllo...");
        assert_eq!(truncate_preview("", 3), "");
    }

    #[tokio::test]
    async fn test_sink_survives_dropped_receiver() {
        let (sink, stream) = EventSink::channel(4);
        drop(stream);
        sink.send(StreamEvent::error("ignored", true)).await;

        EventSink::disabled()
            .send(StreamEvent::round_started(1, 1, 1))
            .await;
    }

    #[tokio::test]
    async fn test_sink_delivers_in_order() {
        let (sink, mut stream) = EventSink::channel(4);
        sink.send(StreamEvent::round_started(1, 1, 2)).await;
        sink.send(StreamEvent::synthesis_completed(Verdict::default()))
            .await;
        drop(sink);

        let mut types = Vec::new();
        while let Some(event) = stream.next().await {
            types.push(event.event_type());
        }
        assert_eq!(types, vec!["round_started", "synthesis_completed"]);
    }
}
