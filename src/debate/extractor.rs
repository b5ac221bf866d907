//! Structured extraction from raw model completions.
//!
//! The pipeline is fixed: strip tool-call artifacts, find the first balanced
//! JSON object that parses, then map it onto the expected shape with
//! documented defaults. Every field of the result is populated; anything
//! short of that is an [`ExtractionError`] carrying the raw text.

use std::collections::BTreeSet;

use serde_json::{Map, Value};

use super::types::{AgentDecision, Verdict, DEFAULT_ACTION, DEFAULT_CONFIDENCE};
use crate::error::{ExtractionError, ExtractionErrorKind};
use crate::utils::json_extraction::{find_json_object, strip_tool_artifacts, JsonExtractionResult};

/// Confidence assumed when a model names an action but no confidence.
pub const UNSTATED_CONFIDENCE: f64 = 0.5;

/// Conclusion used when a judge reply omits one.
pub const UNSTATED_CONCLUSION: &str = "The judge did not state a conclusion.";

const ACTION_KEYS: &[&str] = &["action", "decision", "recommendation"];
const CONFIDENCE_KEYS: &[&str] = &["confidence", "confidence_score", "confidenceScore"];
const REASONING_KEYS: &[&str] = &["reasoning", "rationale", "explanation"];
const KEY_POINT_KEYS: &[&str] = &["key_points", "keyPoints", "points", "arguments"];

const CONCLUSION_KEYS: &[&str] = &["conclusion", "summary", "final_verdict"];
const VERDICT_CONFIDENCE_KEYS: &[&str] = &["confidence_score", "confidenceScore", "confidence"];
const AGREEMENT_KEYS: &[&str] = &["agreement_points", "agreementPoints", "agreements"];
const DISAGREEMENT_KEYS: &[&str] = &["disagreement_points", "disagreementPoints", "disagreements"];
const CONTRIBUTOR_KEYS: &[&str] = &["contributing_agents", "contributingAgents", "agents"];

/// JSON shape agents are asked to answer in.
pub const DECISION_SCHEMA: &str = r#"{
  "action": "your recommendation in one or two words, e.g. BUY, SELL, HOLD, ADOPT, REJECT",
  "confidence": 0.0,
  "reasoning": "why you hold this position",
  "key_points": ["supporting point", "supporting point"]
}"#;

/// The default verdict, verbatim. Returned unchanged it extracts to `Verdict::default()`.
pub const DEFAULT_VERDICT_JSON: &str = r#"{
  "conclusion": "No agent produced a usable response, so no consensus could be reached.",
  "confidence_score": 0.0,
  "agreement_points": [],
  "disagreement_points": [],
  "contributing_agents": []
}"#;

/// The shape a caller expects the completion to contain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExpectedShape {
    AgentDecision,
    Verdict,
}

impl ExpectedShape {
    fn recognised_keys(&self) -> Vec<&'static str> {
        match self {
            Self::AgentDecision => [ACTION_KEYS, CONFIDENCE_KEYS, REASONING_KEYS, KEY_POINT_KEYS]
                .concat(),
            Self::Verdict => [
                CONCLUSION_KEYS,
                VERDICT_CONFIDENCE_KEYS,
                AGREEMENT_KEYS,
                DISAGREEMENT_KEYS,
                CONTRIBUTOR_KEYS,
            ]
            .concat(),
        }
    }

    /// The documented JSON shape for prompts.
    pub fn schema(&self) -> &'static str {
        match self {
            Self::AgentDecision => DECISION_SCHEMA,
            Self::Verdict => DEFAULT_VERDICT_JSON,
        }
    }

    /// The neutral value used when extraction fails.
    pub fn default_result(&self) -> ParsedResult {
        match self {
            Self::AgentDecision => ParsedResult::Decision(AgentDecision::default()),
            Self::Verdict => ParsedResult::Verdict(Verdict::default()),
        }
    }
}

/// A field-complete extraction result.
#[derive(Debug, Clone, PartialEq)]
pub enum ParsedResult {
    Decision(AgentDecision),
    Verdict(Verdict),
}

impl ParsedResult {
    pub fn into_decision(self) -> Option<AgentDecision> {
        match self {
            Self::Decision(d) => Some(d),
            Self::Verdict(_) => None,
        }
    }

    pub fn into_verdict(self) -> Option<Verdict> {
        match self {
            Self::Verdict(v) => Some(v),
            Self::Decision(_) => None,
        }
    }
}

/// Stateless extractor. Pure over its input and idempotent on its own output.
#[derive(Debug, Clone, Copy, Default)]
pub struct ResponseExtractor;

impl ResponseExtractor {
    pub fn extract(raw_text: &str, shape: ExpectedShape) -> Result<ParsedResult, ExtractionError> {
        let object = Self::locate_object(raw_text)?;

        let recognised = shape.recognised_keys();
        if !object.keys().any(|k| recognised.contains(&k.as_str())) {
            return Err(
                ExtractionError::new(ExtractionErrorKind::MissingFields, raw_text)
                    .with_detail(format!("expected one of: {}", recognised.join(", "))),
            );
        }

        Ok(match shape {
            ExpectedShape::AgentDecision => ParsedResult::Decision(decision_from(&object)),
            ExpectedShape::Verdict => ParsedResult::Verdict(verdict_from(&object)),
        })
    }

    pub fn extract_decision(raw_text: &str) -> Result<AgentDecision, ExtractionError> {
        Self::extract(raw_text, ExpectedShape::AgentDecision)
            .map(|r| r.into_decision().unwrap_or_default())
    }

    pub fn extract_verdict(raw_text: &str) -> Result<Verdict, ExtractionError> {
        Self::extract(raw_text, ExpectedShape::Verdict)
            .map(|r| r.into_verdict().unwrap_or_default())
    }

    /// Like [`extract`](Self::extract), but substitutes the shape's neutral
    /// default on failure and hands the error back alongside it.
    pub fn extract_or_default(
        raw_text: &str,
        shape: ExpectedShape,
    ) -> (ParsedResult, Option<ExtractionError>) {
        match Self::extract(raw_text, shape) {
            Ok(result) => (result, None),
            Err(e) => (shape.default_result(), Some(e)),
        }
    }

    fn locate_object(raw_text: &str) -> Result<Map<String, Value>, ExtractionError> {
        let cleaned = strip_tool_artifacts(raw_text);

        match find_json_object(&cleaned) {
            JsonExtractionResult::Success(json) => match serde_json::from_str::<Value>(&json) {
                Ok(Value::Object(map)) => Ok(map),
                Ok(_) => Err(ExtractionError::new(ExtractionErrorKind::Malformed, raw_text)
                    .with_detail("top-level value is not an object")),
                Err(e) => Err(ExtractionError::new(ExtractionErrorKind::Malformed, raw_text)
                    .with_detail(e.to_string())),
            },
            JsonExtractionResult::Truncated {
                unclosed_braces, ..
            } => Err(
                ExtractionError::new(ExtractionErrorKind::Truncated, raw_text)
                    .with_detail(format!("{} unclosed brace(s)", unclosed_braces)),
            ),
            JsonExtractionResult::Malformed { error, .. } => {
                Err(ExtractionError::new(ExtractionErrorKind::Malformed, raw_text).with_detail(error))
            }
            JsonExtractionResult::NotFound => {
                Err(ExtractionError::new(ExtractionErrorKind::NotFound, raw_text))
            }
        }
    }
}

// ============================================================================
// Field mapping
// ============================================================================

fn first_present<'a>(object: &'a Map<String, Value>, keys: &[&str]) -> Option<&'a Value> {
    keys.iter()
        .filter_map(|k| object.get(*k))
        .find(|v| !v.is_null())
}

fn text_of(value: &Value) -> Option<String> {
    let text = match value {
        Value::String(s) => s.trim().to_string(),
        Value::Null => return None,
        other => other.to_string(),
    };
    if text.is_empty() {
        None
    } else {
        Some(text)
    }
}

/// Reads a confidence given as a fraction, a percentage or a string.
///
/// Values above 1 and up to 100 are read as percentages. The result is
/// clamped to [0, 1]; non-finite or unparseable values yield None.
fn confidence_of(value: &Value) -> Option<f64> {
    let (number, percent) = match value {
        Value::Number(n) => (n.as_f64()?, false),
        Value::String(s) => {
            let trimmed = s.trim();
            match trimmed.strip_suffix('%') {
                Some(stripped) => (stripped.trim().parse::<f64>().ok()?, true),
                None => (trimmed.parse::<f64>().ok()?, false),
            }
        }
        _ => return None,
    };

    if !number.is_finite() {
        return None;
    }

    let fraction = if percent || (number > 1.0 && number <= 100.0) {
        number / 100.0
    } else {
        number
    };
    Some(fraction.clamp(0.0, 1.0))
}

fn string_list(value: Option<&Value>) -> Vec<String> {
    match value {
        Some(Value::Array(items)) => items.iter().filter_map(text_of).collect(),
        Some(other) => text_of(other).into_iter().collect(),
        None => Vec::new(),
    }
}

fn string_set(value: Option<&Value>) -> BTreeSet<String> {
    string_list(value).into_iter().collect()
}

fn decision_from(object: &Map<String, Value>) -> AgentDecision {
    let action = first_present(object, ACTION_KEYS)
        .and_then(text_of)
        .map(|a| a.to_ascii_uppercase());
    let confidence = first_present(object, CONFIDENCE_KEYS).and_then(confidence_of);

    let (action, confidence) = match action {
        Some(action) => (action, confidence.unwrap_or(UNSTATED_CONFIDENCE)),
        None => (DEFAULT_ACTION.to_string(), DEFAULT_CONFIDENCE),
    };

    AgentDecision {
        action,
        confidence,
        reasoning: first_present(object, REASONING_KEYS)
            .and_then(text_of)
            .unwrap_or_default(),
        key_points: string_list(first_present(object, KEY_POINT_KEYS)),
    }
}

fn verdict_from(object: &Map<String, Value>) -> Verdict {
    Verdict {
        conclusion: first_present(object, CONCLUSION_KEYS)
            .and_then(text_of)
            .unwrap_or_else(|| UNSTATED_CONCLUSION.to_string()),
        confidence_score: first_present(object, VERDICT_CONFIDENCE_KEYS)
            .and_then(confidence_of)
            .unwrap_or(0.0),
        agreement_points: string_set(first_present(object, AGREEMENT_KEYS)),
        disagreement_points: string_set(first_present(object, DISAGREEMENT_KEYS)),
        contributing_agents: string_set(first_present(object, CONTRIBUTOR_KEYS)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decision(raw: &str) -> AgentDecision {
        ResponseExtractor::extract_decision(raw).expect("should extract")
    }

    #[test]
    fn test_clean_decision() {
        let d = decision(
            r#"{"action": "buy", "confidence": 0.8, "reasoning": "cheap", "key_points": ["a", "b"]}"#,
        );
        assert_eq!(d.action, "BUY");
        assert!((d.confidence - 0.8).abs() < 1e-9);
        assert_eq!(d.reasoning, "cheap");
        assert_eq!(d.key_points, vec!["a", "b"]);
    }

    #[test]
    fn test_prose_and_tool_tags() {
        let raw = r#"Let me think. <tool_call><invoke name="answer">{"decision": "SELL", "confidence": "75%"}</invoke></tool_call> Done }"#;
        let d = decision(raw);
        assert_eq!(d.action, "SELL");
        assert!((d.confidence - 0.75).abs() < 1e-9);
        assert!(d.key_points.is_empty());
    }

    #[test]
    fn test_missing_action_defaults_to_hold() {
        let d = decision(r#"{"reasoning": "unclear", "confidence": 0.9}"#);
        assert_eq!(d.action, DEFAULT_ACTION);
        assert!((d.confidence - DEFAULT_CONFIDENCE).abs() < 1e-9);
        assert_eq!(d.reasoning, "unclear");
    }

    #[test]
    fn test_confidence_normalisation() {
        assert!((decision(r#"{"action": "x", "confidence": 85}"#).confidence - 0.85).abs() < 1e-9);
        assert_eq!(decision(r#"{"action": "x", "confidence": 250}"#).confidence, 1.0);
        assert_eq!(decision(r#"{"action": "x", "confidence": -2}"#).confidence, 0.0);
        assert_eq!(
            decision(r#"{"action": "x", "confidence": "very"}"#).confidence,
            UNSTATED_CONFIDENCE
        );
        assert!((decision(r#"{"action": "x", "confidence": "0.3"}"#).confidence - 0.3).abs() < 1e-9);
    }

    #[test]
    fn test_error_kinds() {
        let cases = [
            ("", ExtractionErrorKind::NotFound),
            ("I would simply hold.", ExtractionErrorKind::NotFound),
            (r#"{"action": "BUY", "reas"#, ExtractionErrorKind::Truncated),
            ("{action: BUY}", ExtractionErrorKind::Malformed),
            (r#"{"foo": 1}"#, ExtractionErrorKind::MissingFields),
        ];

        for (raw, kind) in cases {
            let err = ResponseExtractor::extract(raw, ExpectedShape::AgentDecision).unwrap_err();
            assert_eq!(err.kind, kind, "input {:?}", raw);
            assert_eq!(err.raw, raw);
        }
    }

    #[test]
    fn test_extract_or_default_is_field_complete() {
        for raw in ["", "prose only", r#"{"action": "BU"#, "<tool_use>{}</tool_use>"] {
            let (result, err) = ResponseExtractor::extract_or_default(raw, ExpectedShape::AgentDecision);
            assert!(err.is_some());
            let d = result.into_decision().unwrap();
            assert_eq!(d.action, DEFAULT_ACTION);
            assert!((0.0..=1.0).contains(&d.confidence));
        }
    }

    #[test]
    fn test_extraction_is_idempotent() {
        let first = decision(r#"noise {"recommendation": " hold ", "keyPoints": "one"} noise"#);
        let reencoded = serde_json::to_string(&first).unwrap();
        assert_eq!(decision(&reencoded), first);
    }

    #[test]
    fn test_verdict_extraction() {
        let raw = r#"```json
{"conclusion": "Balanced approach", "confidence_score": 0.7,
 "agreement_points": ["diversify", "diversify"], "disagreement_points": [],
 "contributing_agents": ["analyst-1"]}
```"#;
        let v = ResponseExtractor::extract_verdict(raw).unwrap();
        assert_eq!(v.conclusion, "Balanced approach");
        assert!((v.confidence_score - 0.7).abs() < 1e-9);
        assert_eq!(v.agreement_points.len(), 1);
        assert!(v.contributing_agents.contains("analyst-1"));
    }

    #[test]
    fn test_default_verdict_round_trips() {
        let default = Verdict::default();
        assert_eq!(
            ResponseExtractor::extract_verdict(DEFAULT_VERDICT_JSON).unwrap(),
            default
        );

        let json = serde_json::to_string_pretty(&default).unwrap();
        assert_eq!(ResponseExtractor::extract_verdict(&json).unwrap(), default);
    }

    #[test]
    fn test_decision_schema_is_extractable() {
        let d = decision(DECISION_SCHEMA);
        assert!((0.0..=1.0).contains(&d.confidence));
        assert_eq!(d.key_points.len(), 2);
    }

    #[test]
    fn test_partial_verdict_gets_defaults() {
        let v = ResponseExtractor::extract_verdict(r#"{"confidence": 0.4}"#).unwrap();
        assert_eq!(v.conclusion, UNSTATED_CONCLUSION);
        assert!(v.agreement_points.is_empty());
    }

    #[test]
    fn test_adversarial_inputs_never_panic() {
        let inputs = [
            "{".repeat(200),
            "}".repeat(200),
            "\"".repeat(50),
            "<".repeat(50),
            "<tool_call".to_string(),
            "{\"action\": \"\\".to_string(),
            "\u{0}\u{ffff}{\"a\":\"é\"}".to_string(),
            "[1, 2, {\"action\": \"BUY\"}]".to_string(),
        ];
        for input in &inputs {
            let _ = ResponseExtractor::extract_or_default(input, ExpectedShape::AgentDecision);
            let _ = ResponseExtractor::extract_or_default(input, ExpectedShape::Verdict);
        }
    }
}
