//! JSON extraction utilities for parsing LLM responses.
//!
//! Models asked for structured output still wrap it in markdown fences,
//! prepend reasoning, or stop mid-object when they hit the token limit.
//! The extraction strategies, tried in order:
//! 1. JSON in a ```json (or bare ```) code fence
//! 2. Direct JSON (content starts with '{')
//! 3. The last balanced, parseable JSON object anywhere in the content
//!
//! # Example
//!
//! ```
//! use article_forge::utils::json_extraction::extract_json_object;
//!
//! let response = "Sure! Here it is:\n```json\n{\"passed\": true}\n```";
//! let value = extract_json_object(response).unwrap();
//! assert_eq!(value["passed"], true);
//! ```

use std::sync::OnceLock;

use regex::Regex;
use serde_json::Value;
use thiserror::Error;

/// Error type for JSON extraction failures.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum JsonExtractionError {
    #[error("JSON appears truncated: {unclosed_braces} unclosed braces, {unclosed_brackets} unclosed brackets. Partial: {partial_preview}...")]
    Truncated {
        partial_preview: String,
        unclosed_braces: usize,
        unclosed_brackets: usize,
    },
    #[error("No JSON object found in response. Content starts with: '{content_preview}'")]
    NotFound { content_preview: String },
}

/// Brace/bracket balance of a piece of text, ignoring string literals.
#[derive(Debug, Clone, PartialEq)]
pub struct JsonStructureAnalysis {
    /// Number of '{' without a matching '}'.
    pub unclosed_braces: usize,
    /// Number of '[' without a matching ']'.
    pub unclosed_brackets: usize,
    /// Whether the scan ended inside a string literal.
    pub in_string: bool,
    /// Byte offset of the first '{' or '['.
    pub json_start: Option<usize>,
}

impl JsonStructureAnalysis {
    fn is_truncated(&self) -> bool {
        self.json_start.is_some()
            && (self.unclosed_braces > 0 || self.unclosed_brackets > 0 || self.in_string)
    }
}

/// Scans `s` and tracks brace/bracket depth outside of string literals.
pub fn analyze_json_structure(s: &str) -> JsonStructureAnalysis {
    let mut brace_depth: isize = 0;
    let mut bracket_depth: isize = 0;
    let mut in_string = false;
    let mut escape_next = false;
    let mut json_start: Option<usize> = None;

    for (i, c) in s.char_indices() {
        if escape_next {
            escape_next = false;
            continue;
        }

        match c {
            '\\' if in_string => escape_next = true,
            '"' => in_string = !in_string,
            '{' if !in_string => {
                json_start.get_or_insert(i);
                brace_depth += 1;
            }
            '}' if !in_string => brace_depth -= 1,
            '[' if !in_string => {
                json_start.get_or_insert(i);
                bracket_depth += 1;
            }
            ']' if !in_string => bracket_depth -= 1,
            _ => {}
        }
    }

    JsonStructureAnalysis {
        unclosed_braces: brace_depth.max(0) as usize,
        unclosed_brackets: bracket_depth.max(0) as usize,
        in_string,
        json_start,
    }
}

/// Finds the index of the '}' matching the '{' at the start of `s`.
pub fn find_matching_brace(s: &str) -> Option<usize> {
    if !s.starts_with('{') {
        return None;
    }

    let mut depth = 0usize;
    let mut in_string = false;
    let mut escape_next = false;

    for (i, c) in s.char_indices() {
        if escape_next {
            escape_next = false;
            continue;
        }
        match c {
            '\\' if in_string => escape_next = true,
            '"' => in_string = !in_string,
            '{' if !in_string => depth += 1,
            '}' if !in_string => {
                depth -= 1;
                if depth == 0 {
                    return Some(i);
                }
            }
            _ => {}
        }
    }

    None
}

fn code_fence_regex() -> &'static Regex {
    static FENCE: OnceLock<Regex> = OnceLock::new();
    FENCE.get_or_init(|| {
        Regex::new(r"(?s)```(?:json|JSON)?\s*\n?(.*?)```").expect("Invalid regex for code fences")
    })
}

/// Returns the content of the first fenced code block that parses as JSON.
pub fn extract_from_code_block(content: &str) -> Option<String> {
    code_fence_regex()
        .captures_iter(content)
        .filter_map(|caps| caps.get(1))
        .map(|m| m.as_str().trim().to_string())
        .find(|candidate| serde_json::from_str::<Value>(candidate).is_ok())
}

/// Returns the last balanced `{...}` in `content` that parses as JSON.
///
/// Reasoning models tend to think out loud before answering, so the last
/// object is the most likely to be the answer.
pub fn extract_last_valid_json_object(content: &str) -> Option<String> {
    let starts: Vec<usize> = content.match_indices('{').map(|(i, _)| i).collect();

    starts.into_iter().rev().find_map(|start| {
        let candidate = &content[start..];
        let end = find_matching_brace(candidate)?;
        let json = &candidate[..=end];
        serde_json::from_str::<Value>(json)
            .ok()
            .filter(Value::is_object)
            .map(|_| json.to_string())
    })
}

/// Extracts a JSON object from a raw LLM response.
pub fn extract_json_object(content: &str) -> Result<Value, JsonExtractionError> {
    let trimmed = content.trim();

    if let Some(json) = extract_from_code_block(trimmed) {
        if let Ok(value) = serde_json::from_str::<Value>(&json) {
            if value.is_object() {
                return Ok(value);
            }
        }
    }

    if trimmed.starts_with('{') {
        if let Some(end) = find_matching_brace(trimmed) {
            if let Ok(value) = serde_json::from_str::<Value>(&trimmed[..=end]) {
                return Ok(value);
            }
        }
    }

    if let Some(json) = extract_last_valid_json_object(trimmed) {
        if let Ok(value) = serde_json::from_str::<Value>(&json) {
            return Ok(value);
        }
    }

    let analysis = analyze_json_structure(trimmed);
    if analysis.is_truncated() {
        let start = analysis.json_start.unwrap_or(0);
        let partial: String = trimmed[start..].chars().take(100).collect();
        return Err(JsonExtractionError::Truncated {
            partial_preview: partial,
            unclosed_braces: analysis.unclosed_braces,
            unclosed_brackets: analysis.unclosed_brackets,
        });
    }

    Err(JsonExtractionError::NotFound {
        content_preview: trimmed.chars().take(50).collect(),
    })
}
