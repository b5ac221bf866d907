//! JSON extraction utilities for parsing LLM responses.
//!
//! Model output is adversarial: prose interleaved with JSON, JSON wrapped in
//! tool-call pseudo-XML, objects cut off mid-stream. This module provides the
//! two low-level passes the response extractor builds on:
//!
//! 1. [`strip_tool_artifacts`] removes known tool-call markers with a small lexer.
//! 2. [`find_json_object`] locates the first balanced JSON object that parses,
//!    counting braces outside string literals only.
//!
//! # Example
//!
//! ```
//! use debate_forge::utils::json_extraction::{find_json_object, strip_tool_artifacts};
//!
//! let raw = r#"<tool_call>{"action": "BUY"}</tool_call> trailing }"#;
//! let cleaned = strip_tool_artifacts(raw);
//! let found = find_json_object(&cleaned);
//! assert_eq!(found.json(), Some(r#"{"action": "BUY"}"#));
//! ```

use regex::Regex;

/// Tag names emitted by tool-calling models that never carry meaning for us.
pub const TOOL_ARTIFACT_TAGS: &[&str] = &[
    "tool_call",
    "tool_calls",
    "function_call",
    "function_calls",
    "invoke",
    "tool_use",
    "antml:invoke",
    "parameter",
    "tool_result",
    "function_results",
];

/// Result of a JSON object scan.
#[derive(Debug, Clone, PartialEq)]
pub enum JsonExtractionResult {
    /// A balanced object that parses as JSON.
    Success(String),
    /// An object was opened but the text ended first.
    Truncated {
        partial_json: String,
        unclosed_braces: usize,
        unclosed_brackets: usize,
    },
    /// Balanced regions existed but none of them parsed.
    Malformed { candidate: String, error: String },
    /// The text contains no `{` at all.
    NotFound,
}

impl JsonExtractionResult {
    /// Returns the extracted JSON string for the Success case
    pub fn json(&self) -> Option<&str> {
        match self {
            JsonExtractionResult::Success(json) => Some(json),
            _ => None,
        }
    }
}

/// Analysis result for JSON structure
#[derive(Debug, Clone, PartialEq)]
pub struct JsonStructureAnalysis {
    /// Number of unclosed braces ('{' without matching '}')
    pub unclosed_braces: usize,
    /// Number of unclosed brackets ('[' without matching ']')
    pub unclosed_brackets: usize,
    /// Whether we ended inside a string literal
    pub in_string: bool,
}

/// Tracks brace/bracket depth over `s` to describe an incomplete structure.
pub fn analyze_json_structure(s: &str) -> JsonStructureAnalysis {
    let mut brace_depth: isize = 0;
    let mut bracket_depth: isize = 0;
    let mut in_string = false;
    let mut escape_next = false;

    for c in s.chars() {
        if escape_next {
            escape_next = false;
            continue;
        }

        match c {
            '\\' if in_string => escape_next = true,
            '"' => in_string = !in_string,
            '{' if !in_string => brace_depth += 1,
            '}' if !in_string => brace_depth -= 1,
            '[' if !in_string => bracket_depth += 1,
            ']' if !in_string => bracket_depth -= 1,
            _ => {}
        }
    }

    JsonStructureAnalysis {
        unclosed_braces: brace_depth.max(0) as usize,
        unclosed_brackets: bracket_depth.max(0) as usize,
        in_string,
    }
}

/// Finds the matching closing brace for a string starting with '{'.
///
/// Braces inside string literals are ignored and `\` escapes are honoured,
/// so `{"a": "}"}` closes at the final brace. Returns the byte index of the
/// matching '}', or None if the object never closes.
pub fn find_matching_brace(s: &str) -> Option<usize> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escape_next = false;

    for (i, c) in s.char_indices() {
        if escape_next {
            escape_next = false;
            continue;
        }

        match c {
            '\\' if in_string => {
                escape_next = true;
            }
            '"' => {
                in_string = !in_string;
            }
            '{' if !in_string => {
                depth += 1;
            }
            '}' if !in_string => {
                depth = depth.saturating_sub(1);
                if depth == 0 {
                    return Some(i);
                }
            }
            _ => {}
        }
    }

    None
}

/// Extract JSON from a ```json ... ``` code block.
///
/// Returns the first balanced object inside the fence, if any.
pub fn extract_from_json_code_block(content: &str) -> Option<String> {
    let re = Regex::new(r"```json\s*\n?([\s\S]*?)\n?```").ok()?;
    let caps = re.captures(content)?;
    let json_content = caps.get(1)?.as_str().trim();
    let start = json_content.find('{')?;
    let end = find_matching_brace(&json_content[start..])?;
    Some(json_content[start..=start + end].to_string())
}

/// Removes tool-call artifact markers from `text`.
///
/// Open, close, self-closing and orphan markers for every name in
/// [`TOOL_ARTIFACT_TAGS`] are dropped. The content between a paired open and
/// close marker is kept. Any other `<...>` text passes through unchanged.
///
/// Removing a marker can splice a new one together (`<tool<invoke>_call>`), so
/// passes repeat until the text stops shrinking. The result is therefore a
/// fixed point and stripping twice equals stripping once.
pub fn strip_tool_artifacts(text: &str) -> String {
    let mut current = strip_once(text);
    loop {
        let next = strip_once(&current);
        if next.len() == current.len() {
            return current;
        }
        current = next;
    }
}

/// One stripping pass.
///
/// Inside a `{...}` region, string literals are tracked the way
/// [`find_matching_brace`] tracks them, and markers inside `"..."` are left
/// alone. Outside any object, quotes are prose and never suppress stripping.
fn strip_once(text: &str) -> String {
    let bytes = text.as_bytes();
    let mut out = String::with_capacity(text.len());
    let mut copied_to = 0;
    let mut depth: usize = 0;
    let mut in_string = false;
    let mut escape_next = false;
    let mut i = 0;

    while i < bytes.len() {
        let b = bytes[i];

        if in_string {
            if escape_next {
                escape_next = false;
            } else if b == b'\\' {
                escape_next = true;
            } else if b == b'"' {
                in_string = false;
            }
            i += 1;
            continue;
        }

        match b {
            b'<' => {
                if let Some(end) = artifact_tag_end(bytes, i) {
                    out.push_str(&text[copied_to..i]);
                    copied_to = end;
                    i = end;
                    continue;
                }
            }
            b'{' => depth += 1,
            b'}' => depth = depth.saturating_sub(1),
            b'"' if depth > 0 => in_string = true,
            _ => {}
        }
        i += 1;
    }

    out.push_str(&text[copied_to..]);
    out
}

/// If a known artifact marker starts at `start` (a `<`), returns the byte
/// index just past it.
///
/// A marker without its closing `>` ends at the first newline, brace or `<`,
/// so a cut-off tag never swallows the JSON that follows it.
fn artifact_tag_end(bytes: &[u8], start: usize) -> Option<usize> {
    let mut i = start + 1;
    if bytes.get(i) == Some(&b'/') {
        i += 1;
    }

    let name_start = i;
    while i < bytes.len() && is_tag_name_byte(bytes[i]) {
        i += 1;
    }
    if i == name_start {
        return None;
    }

    // Tag names are ASCII so this slice is always on a char boundary.
    let name = std::str::from_utf8(&bytes[name_start..i]).ok()?;
    if !TOOL_ARTIFACT_TAGS
        .iter()
        .any(|known| known.eq_ignore_ascii_case(name))
    {
        return None;
    }

    match bytes.get(i) {
        None => return Some(i),
        Some(b) if *b == b'>' || *b == b'/' || b.is_ascii_whitespace() => {}
        Some(_) => return None,
    }

    while i < bytes.len() {
        match bytes[i] {
            b'>' => return Some(i + 1),
            b'"' => match bytes[i + 1..].iter().position(|b| *b == b'"') {
                Some(offset) => i += offset + 2,
                None => return Some(i),
            },
            b'\n' | b'{' | b'}' | b'<' => return Some(i),
            _ => i += 1,
        }
    }

    Some(i)
}

fn is_tag_name_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_' || b == b':' || b == b'-'
}

/// Finds the first balanced JSON object in `content` that parses.
///
/// A ```json fence is tried first. Otherwise every `{` is tried in order as a
/// candidate start: a naive first-`{`-to-last-`}` slice would pick up braces
/// from trailing prose. When nothing parses, an unclosed candidate reports
/// [`JsonExtractionResult::Truncated`] and a balanced-but-invalid one reports
/// [`JsonExtractionResult::Malformed`].
pub fn find_json_object(content: &str) -> JsonExtractionResult {
    if let Some(fenced) = extract_from_json_code_block(content) {
        if parses_as_object(&fenced) {
            return JsonExtractionResult::Success(fenced);
        }
    }

    let mut truncated: Option<&str> = None;
    let mut malformed: Option<(&str, String)> = None;

    for (start, _) in content.match_indices('{') {
        let substr = &content[start..];
        match find_matching_brace(substr) {
            Some(end) => {
                let candidate = &substr[..=end];
                match serde_json::from_str::<serde_json::Value>(candidate) {
                    Ok(value) if value.is_object() => {
                        return JsonExtractionResult::Success(candidate.to_string());
                    }
                    Ok(_) => {}
                    Err(e) => {
                        if malformed.is_none() {
                            malformed = Some((candidate, e.to_string()));
                        }
                    }
                }
            }
            None => {
                if truncated.is_none() {
                    truncated = Some(substr);
                }
            }
        }
    }

    if let Some(partial) = truncated {
        let analysis = analyze_json_structure(partial);
        return JsonExtractionResult::Truncated {
            partial_json: partial.to_string(),
            unclosed_braces: analysis.unclosed_braces.max(1),
            unclosed_brackets: analysis.unclosed_brackets,
        };
    }

    if let Some((candidate, error)) = malformed {
        return JsonExtractionResult::Malformed {
            candidate: candidate.to_string(),
            error,
        };
    }

    JsonExtractionResult::NotFound
}

fn parses_as_object(s: &str) -> bool {
    serde_json::from_str::<serde_json::Value>(s)
        .map(|v| v.is_object())
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_direct_json() {
        let input = r#"{"key": "value"}"#;
        assert_eq!(find_json_object(input).json(), Some(input));
    }

    #[test]
    fn test_json_code_block() {
        let input = r#"Here is the response:
```json
{"key": "value"}
```
Hope this helps!"#;
        assert_eq!(find_json_object(input).json(), Some(r#"{"key": "value"}"#));
    }

    #[test]
    fn test_trailing_prose_braces_ignored() {
        let input = r#"Result: {"a": {"b": 1}} and then some } stray } braces"#;
        assert_eq!(find_json_object(input).json(), Some(r#"{"a": {"b": 1}}"#));
    }

    #[test]
    fn test_braces_inside_strings() {
        let input = r#"{"message": "use } and { freely", "n": 1}"#;
        assert_eq!(find_json_object(input).json(), Some(input));
    }

    #[test]
    fn test_json_with_escaped_quotes() {
        let input = r#"{"message": "He said \"hello}\""}"#;
        assert_eq!(find_json_object(input).json(), Some(input));
    }

    #[test]
    fn test_skips_non_json_braces_in_prose() {
        let input = r#"Consider {x, y} first. {"action": "SELL"}"#;
        assert_eq!(find_json_object(input).json(), Some(r#"{"action": "SELL"}"#));
    }

    #[test]
    fn test_truncated_json() {
        let input = r#"Here you go: {"action": "BUY", "reasoning": "because"#;
        match find_json_object(input) {
            JsonExtractionResult::Truncated {
                unclosed_braces, ..
            } => assert_eq!(unclosed_braces, 1),
            other => panic!("expected truncated, got {:?}", other),
        }
    }

    #[test]
    fn test_malformed_json() {
        let input = "{action: BUY, confidence: high}";
        assert!(matches!(
            find_json_object(input),
            JsonExtractionResult::Malformed { .. }
        ));
    }

    #[test]
    fn test_not_found() {
        assert_eq!(find_json_object(""), JsonExtractionResult::NotFound);
        assert_eq!(
            find_json_object("I would hold for now."),
            JsonExtractionResult::NotFound
        );
    }

    #[test]
    fn test_find_matching_brace_nested() {
        assert_eq!(find_matching_brace(r#"{"a": {"b": {}}} tail"#), Some(15));
        assert_eq!(find_matching_brace(r#"{"a": {"b": 1}"#), None);
    }

    #[test]
    fn test_strip_paired_tags_keeps_content() {
        let input = r#"<tool_call>{"action": "BUY"}</tool_call>"#;
        assert_eq!(strip_tool_artifacts(input), r#"{"action": "BUY"}"#);
    }

    #[test]
    fn test_strip_tags_with_attributes() {
        let input = r#"<invoke name="decide"><parameter name="json">{"a": 1}</parameter></invoke>"#;
        assert_eq!(strip_tool_artifacts(input), r#"{"a": 1}"#);
    }

    #[test]
    fn test_strip_orphan_and_truncated_tags() {
        assert_eq!(strip_tool_artifacts(r#"</invoke>{"a": 1}"#), r#"{"a": 1}"#);
        assert_eq!(strip_tool_artifacts(r#"<tool_use {"a": 1}"#), r#"{"a": 1}"#);
        assert_eq!(strip_tool_artifacts("text <function_calls"), "text ");
    }

    #[test]
    fn test_strip_preserves_unrelated_markup() {
        let input = "a <b>bold</b> claim, 3 < 4, <invoker> stays";
        assert_eq!(strip_tool_artifacts(input), input);
    }

    #[test]
    fn test_strip_leaves_markers_inside_json_strings() {
        let input = r#"{"reasoning": "the <invoke step", "action": "BUY", "confidence": 0.9}"#;
        assert_eq!(strip_tool_artifacts(input), input);

        let escaped = r#"{"note": "say \"<tool_call>\" twice", "a": 1}"#;
        assert_eq!(strip_tool_artifacts(escaped), escaped);

        let wrapped = r#"<tool_call>{"why": "see </tool_call> docs"}</tool_call>"#;
        assert_eq!(
            strip_tool_artifacts(wrapped),
            r#"{"why": "see </tool_call> docs"}"#
        );
    }

    #[test]
    fn test_strip_is_idempotent_on_spliced_tags() {
        let input = "<tool<invoke>_call>{}";
        let once = strip_tool_artifacts(input);
        assert_eq!(once, "{}");
        assert_eq!(strip_tool_artifacts(&once), once);
    }

    #[test]
    fn test_strip_handles_multibyte_text() {
        let input = "résumé <tool_result>→ {\"ok\": true}</tool_result> ✓";
        assert_eq!(strip_tool_artifacts(input), "résumé → {\"ok\": true} ✓");
    }
}
