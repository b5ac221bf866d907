//! Error types for debate-forge operations.
//!
//! Defines the error taxonomy for the engine:
//! - LLM transport errors raised by concrete provider clients
//! - Provider errors normalised by the gateway
//! - Extraction errors for unusable model output
//! - Orchestration errors that are fatal to a session
//! - Session store errors

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors raised by concrete LLM clients.
#[derive(Debug, Error)]
pub enum LlmError {
    #[error("Missing API key: {0} environment variable not set")]
    MissingApiKey(String),

    #[error("HTTP request failed: {0}")]
    RequestFailed(String),

    #[error("Failed to parse LLM response: {0}")]
    ParseError(String),

    #[error("Rate limited: {0}")]
    RateLimited(String),

    #[error("Invalid model: {0}")]
    InvalidModel(String),

    #[error("API error ({code}): {message}")]
    ApiError { code: u16, message: String },
}

/// Classification of a provider failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderErrorKind {
    Timeout,
    RateLimited,
    AuthFailure,
    UnknownModel,
    NetworkError,
    ProviderRefused,
}

impl ProviderErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Timeout => "timeout",
            Self::RateLimited => "rate_limited",
            Self::AuthFailure => "auth_failure",
            Self::UnknownModel => "unknown_model",
            Self::NetworkError => "network_error",
            Self::ProviderRefused => "provider_refused",
        }
    }
}

impl fmt::Display for ProviderErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A failed provider invocation, as seen by the orchestration layer.
#[derive(Debug, Clone, Error, PartialEq)]
#[error("provider error ({kind}): {message}")]
pub struct ProviderError {
    pub kind: ProviderErrorKind,
    pub message: String,
    /// Set when the call was aborted by session cancellation rather than the clock.
    pub cancelled: bool,
}

impl ProviderError {
    pub fn new(kind: ProviderErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            cancelled: false,
        }
    }

    pub fn timeout(after: std::time::Duration) -> Self {
        Self::new(
            ProviderErrorKind::Timeout,
            format!("no response within {} ms", after.as_millis()),
        )
    }

    pub fn cancelled() -> Self {
        Self {
            kind: ProviderErrorKind::Timeout,
            message: "call cancelled with the session".to_string(),
            cancelled: true,
        }
    }
}

impl From<LlmError> for ProviderError {
    fn from(err: LlmError) -> Self {
        let kind = match &err {
            LlmError::MissingApiKey(_) => ProviderErrorKind::AuthFailure,
            LlmError::RequestFailed(_) => ProviderErrorKind::NetworkError,
            LlmError::ParseError(_) => ProviderErrorKind::ProviderRefused,
            LlmError::RateLimited(_) => ProviderErrorKind::RateLimited,
            LlmError::InvalidModel(_) => ProviderErrorKind::UnknownModel,
            LlmError::ApiError { code, .. } => match code {
                401 | 403 => ProviderErrorKind::AuthFailure,
                404 => ProviderErrorKind::UnknownModel,
                408 | 504 => ProviderErrorKind::Timeout,
                429 => ProviderErrorKind::RateLimited,
                _ => ProviderErrorKind::ProviderRefused,
            },
        };
        ProviderError::new(kind, err.to_string())
    }
}

/// Why a completion could not be turned into a structured result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtractionErrorKind {
    /// No JSON object anywhere in the text.
    NotFound,
    /// An object was opened but never closed.
    Truncated,
    /// A balanced region was found but is not valid JSON.
    Malformed,
    /// Valid JSON with none of the fields the shape requires.
    MissingFields,
}

impl fmt::Display for ExtractionErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::NotFound => "no JSON object found",
            Self::Truncated => "JSON object truncated",
            Self::Malformed => "malformed JSON",
            Self::MissingFields => "required fields missing",
        };
        f.write_str(s)
    }
}

/// Extraction failure. Always carries the raw text so callers can retry or log it.
#[derive(Debug, Clone, Error, PartialEq)]
#[error("extraction failed: {kind}{}", .detail.as_deref().map(|d| format!(" ({d})")).unwrap_or_default())]
pub struct ExtractionError {
    pub kind: ExtractionErrorKind,
    pub raw: String,
    pub detail: Option<String>,
}

impl ExtractionError {
    pub fn new(kind: ExtractionErrorKind, raw: impl Into<String>) -> Self {
        Self {
            kind,
            raw: raw.into(),
            detail: None,
        }
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }
}

/// Errors that are fatal to a debate session.
#[derive(Debug, Error)]
pub enum OrchestrationError {
    #[error("Invalid debate request: {0}")]
    InvalidRequest(String),

    #[error("Unknown persona role '{0}'")]
    UnknownPersona(String),

    #[error("Invalid persona configuration: {0}")]
    InvalidPersonaConfig(String),

    #[error("Invalid session transition from '{from}' to '{to}'")]
    InvalidTransition { from: String, to: String },

    #[error("Round {0} has no agents configured")]
    EmptyRound(u32),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Errors from the session persistence collaborator.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Session '{0}' not found")]
    NotFound(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
