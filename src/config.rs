//! Engine configuration for debate sessions.
//!
//! This module provides the tunables shared by every session an engine runs:
//! call deadlines, the fallback and judge models, round execution policy, the
//! per-model call budget, generation parameters and session persistence.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::debate::round::ExecutionPolicy;
use crate::debate::types::ModelConfig;

/// Errors that can occur during configuration operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// An environment variable has an invalid value.
    #[error("Invalid value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    /// Configuration validation failed.
    #[error("Configuration validation failed: {0}")]
    ValidationFailed(String),
}

/// Configuration for the debate engine.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    // Deadlines
    /// Deadline for a single agent call, fallback attempts included separately.
    pub turn_timeout: Duration,
    /// Deadline for the judge call.
    pub judge_timeout: Duration,

    // Models
    /// Secondary model tried once when a primary call fails.
    pub fallback_model: ModelConfig,
    /// Model that synthesises the verdict.
    pub judge_model: ModelConfig,
    /// Fallback setting used when a request does not specify one.
    pub default_enable_fallback: bool,

    // Execution
    /// How agents within one round are scheduled.
    pub execution_policy: ExecutionPolicy,
    /// Concurrent calls allowed per model across all sessions.
    pub max_concurrent_per_model: usize,

    // Generation
    pub temperature: f64,
    pub max_tokens: u32,

    // Events
    /// Maximum characters of a response echoed in `model_completed`.
    pub preview_chars: usize,

    // Sessions
    /// Directory finished sessions are written to, if any.
    pub session_dir: Option<PathBuf>,
    /// How long finished sessions stay in the registry.
    pub session_ttl: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            turn_timeout: Duration::from_secs(60),
            judge_timeout: Duration::from_secs(90),
            fallback_model: ModelConfig::new("openrouter", "openai/gpt-4o-mini"),
            judge_model: ModelConfig::new("openrouter", "anthropic/claude-sonnet-4"),
            default_enable_fallback: true,
            execution_policy: ExecutionPolicy::Sequential,
            max_concurrent_per_model: 4,
            temperature: 0.7,
            max_tokens: 1500,
            preview_chars: 200,
            session_dir: None,
            session_ttl: Duration::from_secs(3600),
        }
    }
}

impl EngineConfig {
    /// Creates a configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads configuration from `DEBATE_*` environment variables.
    ///
    /// Unset variables keep their defaults.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidValue` if a set variable cannot be parsed.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Like [`from_env`](Self::from_env) with a custom variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        // Deadlines
        if let Some(val) = lookup("DEBATE_TURN_TIMEOUT_SECS") {
            let secs: u64 = parse_env_value(&val, "DEBATE_TURN_TIMEOUT_SECS")?;
            config.turn_timeout = Duration::from_secs(secs);
        }

        if let Some(val) = lookup("DEBATE_JUDGE_TIMEOUT_SECS") {
            let secs: u64 = parse_env_value(&val, "DEBATE_JUDGE_TIMEOUT_SECS")?;
            config.judge_timeout = Duration::from_secs(secs);
        }

        // Models
        if let Some(val) = lookup("DEBATE_FALLBACK_MODEL") {
            config.fallback_model = parse_model(&val, "DEBATE_FALLBACK_MODEL")?;
        }

        if let Some(val) = lookup("DEBATE_JUDGE_MODEL") {
            config.judge_model = parse_model(&val, "DEBATE_JUDGE_MODEL")?;
        }

        if let Some(val) = lookup("DEBATE_ENABLE_FALLBACK") {
            config.default_enable_fallback = parse_env_bool(&val, "DEBATE_ENABLE_FALLBACK")?;
        }

        // Execution
        if let Some(val) = lookup("DEBATE_EXECUTION_POLICY") {
            config.execution_policy = parse_env_value(&val, "DEBATE_EXECUTION_POLICY")?;
        }

        if let Some(val) = lookup("DEBATE_MAX_CONCURRENT_PER_MODEL") {
            config.max_concurrent_per_model =
                parse_env_value(&val, "DEBATE_MAX_CONCURRENT_PER_MODEL")?;
        }

        // Generation
        if let Some(val) = lookup("DEBATE_TEMPERATURE") {
            config.temperature = parse_env_value(&val, "DEBATE_TEMPERATURE")?;
        }

        if let Some(val) = lookup("DEBATE_MAX_TOKENS") {
            config.max_tokens = parse_env_value(&val, "DEBATE_MAX_TOKENS")?;
        }

        if let Some(val) = lookup("DEBATE_PREVIEW_CHARS") {
            config.preview_chars = parse_env_value(&val, "DEBATE_PREVIEW_CHARS")?;
        }

        // Sessions
        if let Some(val) = lookup("DEBATE_SESSION_DIR") {
            if !val.trim().is_empty() {
                config.session_dir = Some(PathBuf::from(val));
            }
        }

        if let Some(val) = lookup("DEBATE_SESSION_TTL_SECS") {
            let secs: u64 = parse_env_value(&val, "DEBATE_SESSION_TTL_SECS")?;
            config.session_ttl = Duration::from_secs(secs);
        }

        Ok(config)
    }

    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ValidationFailed` if any values are invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.turn_timeout.is_zero() {
            return Err(ConfigError::ValidationFailed(
                "turn_timeout must be greater than 0".to_string(),
            ));
        }

        if self.judge_timeout.is_zero() {
            return Err(ConfigError::ValidationFailed(
                "judge_timeout must be greater than 0".to_string(),
            ));
        }

        if self.max_concurrent_per_model == 0 {
            return Err(ConfigError::ValidationFailed(
                "max_concurrent_per_model must be greater than 0".to_string(),
            ));
        }

        if !(0.0..=2.0).contains(&self.temperature) {
            return Err(ConfigError::ValidationFailed(
                "temperature must be between 0.0 and 2.0".to_string(),
            ));
        }

        if self.max_tokens == 0 {
            return Err(ConfigError::ValidationFailed(
                "max_tokens must be greater than 0".to_string(),
            ));
        }

        if self.preview_chars == 0 {
            return Err(ConfigError::ValidationFailed(
                "preview_chars must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }

    /// Builder method to set the per-call agent timeout.
    pub fn with_turn_timeout(mut self, timeout: Duration) -> Self {
        self.turn_timeout = timeout;
        self
    }

    /// Builder method to set the judge timeout.
    pub fn with_judge_timeout(mut self, timeout: Duration) -> Self {
        self.judge_timeout = timeout;
        self
    }

    /// Builder method to set the fallback model.
    pub fn with_fallback_model(mut self, model: ModelConfig) -> Self {
        self.fallback_model = model;
        self
    }

    /// Builder method to set the judge model.
    pub fn with_judge_model(mut self, model: ModelConfig) -> Self {
        self.judge_model = model;
        self
    }

    /// Builder method to set the execution policy.
    pub fn with_execution_policy(mut self, policy: ExecutionPolicy) -> Self {
        self.execution_policy = policy;
        self
    }

    /// Builder method to set the per-model concurrency budget.
    pub fn with_max_concurrent_per_model(mut self, max: usize) -> Self {
        self.max_concurrent_per_model = max;
        self
    }

    /// Builder method to set the sampling temperature.
    pub fn with_temperature(mut self, temperature: f64) -> Self {
        self.temperature = temperature;
        self
    }

    /// Builder method to set max tokens per completion.
    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    /// Builder method to set the response preview length.
    pub fn with_preview_chars(mut self, chars: usize) -> Self {
        self.preview_chars = chars;
        self
    }

    /// Builder method to set the session output directory.
    pub fn with_session_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.session_dir = Some(dir.into());
        self
    }

    /// Builder method to set the registry TTL.
    pub fn with_session_ttl(mut self, ttl: Duration) -> Self {
        self.session_ttl = ttl;
        self
    }
}

/// Parse an environment variable value into a type.
fn parse_env_value<T: std::str::FromStr>(value: &str, key: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::InvalidValue {
        key: key.to_string(),
        message: format!("could not parse '{}'", value),
    })
}

/// Parse an environment variable as a boolean.
fn parse_env_bool(value: &str, key: &str) -> Result<bool, ConfigError> {
    match value.trim().to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidValue {
            key: key.to_string(),
            message: format!("expected boolean value, got '{}'", value),
        }),
    }
}

/// Parse a `provider:model` environment variable.
fn parse_model(value: &str, key: &str) -> Result<ModelConfig, ConfigError> {
    value.parse().map_err(|_| ConfigError::InvalidValue {
        key: key.to_string(),
        message: format!("expected provider:model, got '{}'", value),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_default_config() {
        let config = EngineConfig::default();
        assert_eq!(config.turn_timeout, Duration::from_secs(60));
        assert_eq!(config.judge_timeout, Duration::from_secs(90));
        assert_eq!(config.preview_chars, 200);
        assert_eq!(config.fallback_model.key(), "openrouter:openai/gpt-4o-mini");
        assert_eq!(config.judge_model.key(), "openrouter:anthropic/claude-sonnet-4");
        assert_eq!(config.execution_policy, ExecutionPolicy::Sequential);
        assert_eq!(config.max_concurrent_per_model, 4);
        assert!((config.temperature - 0.7).abs() < f64::EPSILON);
        assert_eq!(config.max_tokens, 1500);
        assert!(config.session_dir.is_none());
        assert_eq!(config.session_ttl, Duration::from_secs(3600));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_builder() {
        let config = EngineConfig::new()
            .with_turn_timeout(Duration::from_secs(5))
            .with_judge_timeout(Duration::from_secs(7))
            .with_execution_policy(ExecutionPolicy::Parallel)
            .with_max_concurrent_per_model(2)
            .with_temperature(0.2)
            .with_max_tokens(300)
            .with_preview_chars(40)
            .with_session_dir("/tmp/sessions")
            .with_judge_model(ModelConfig::new("mock", "judge"));

        assert_eq!(config.turn_timeout, Duration::from_secs(5));
        assert_eq!(config.judge_timeout, Duration::from_secs(7));
        assert_eq!(config.execution_policy, ExecutionPolicy::Parallel);
        assert_eq!(config.max_concurrent_per_model, 2);
        assert_eq!(config.max_tokens, 300);
        assert_eq!(config.preview_chars, 40);
        assert_eq!(config.session_dir, Some(PathBuf::from("/tmp/sessions")));
        assert_eq!(config.judge_model.provider, "mock");
    }

    #[test]
    fn test_from_lookup() {
        let config = EngineConfig::from_lookup(lookup_from(&[
            ("DEBATE_TURN_TIMEOUT_SECS", "15"),
            ("DEBATE_JUDGE_MODEL", "openrouter:google/gemini-2.5-pro"),
            ("DEBATE_EXECUTION_POLICY", "parallel"),
            ("DEBATE_ENABLE_FALLBACK", "off"),
            ("DEBATE_SESSION_DIR", "out"),
        ]))
        .unwrap();

        assert_eq!(config.turn_timeout, Duration::from_secs(15));
        assert_eq!(config.judge_model.model, "google/gemini-2.5-pro");
        assert_eq!(config.execution_policy, ExecutionPolicy::Parallel);
        assert!(!config.default_enable_fallback);
        assert_eq!(config.session_dir, Some(PathBuf::from("out")));
        assert_eq!(config.max_tokens, 1500);
    }

    #[test]
    fn test_from_lookup_invalid_values() {
        let err = EngineConfig::from_lookup(lookup_from(&[("DEBATE_MAX_TOKENS", "lots")]))
            .unwrap_err();
        assert!(err.to_string().contains("DEBATE_MAX_TOKENS"));

        assert!(
            EngineConfig::from_lookup(lookup_from(&[("DEBATE_JUDGE_MODEL", "nocolon")])).is_err()
        );
        assert!(
            EngineConfig::from_lookup(lookup_from(&[("DEBATE_ENABLE_FALLBACK", "maybe")])).is_err()
        );
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        let cases = [
            (
                EngineConfig::default().with_turn_timeout(Duration::ZERO),
                "turn_timeout",
            ),
            (
                EngineConfig::default().with_max_concurrent_per_model(0),
                "max_concurrent_per_model",
            ),
            (EngineConfig::default().with_temperature(3.0), "temperature"),
            (EngineConfig::default().with_max_tokens(0), "max_tokens"),
            (EngineConfig::default().with_preview_chars(0), "preview_chars"),
        ];

        for (config, field) in cases {
            let err = config.validate().unwrap_err();
            assert!(err.to_string().contains(field), "{}", err);
        }
    }

    #[test]
    fn test_parse_env_bool() {
        assert!(parse_env_bool("YES", "k").unwrap());
        assert!(!parse_env_bool("0", "k").unwrap());
        assert!(parse_env_bool("sometimes", "k").is_err());
    }
}
