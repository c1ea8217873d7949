//! Extraction of a JSON object from raw backend text.

use crate::errors::SchemaViolation;
use regex::Regex;
use serde_json::Value;
use std::sync::LazyLock;

static FENCE: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"(?s)```[A-Za-z]*[ \t]*\r?\n?(.*?)```").ok());

/// Opening braces tried as the start of an embedded object. Each try scans
/// to the end of the text, so this bounds the work on brace-heavy prose.
const MAX_BRACE_CANDIDATES: usize = 64;

/// Turns raw model text into a JSON object.
///
/// Accepted forms, tried in order: the whole text as a JSON object, the
/// contents of a fenced code block, and the first balanced `{...}` span that
/// parses, starting from one of the first 64 opening braces. The result still has to pass [`validate`](super::validate).
///
/// # Errors
///
/// Returns a violation at `$` when no JSON object can be found.
pub fn coerce_raw_output(contract: &str, raw: &str) -> Result<Value, SchemaViolation> {
    let trimmed = raw.trim();

    if let Some(value) = parse_object(trimmed) {
        return Ok(value);
    }

    if let Some(fence) = FENCE.as_ref() {
        for caps in fence.captures_iter(trimmed) {
            if let Some(value) = caps.get(1).and_then(|m| parse_object(m.as_str().trim())) {
                return Ok(value);
            }
        }
    }

    for (start, _) in trimmed.match_indices('{').take(MAX_BRACE_CANDIDATES) {
        if let Some(end) = balanced_end(&trimmed[start..]) {
            if let Some(value) = parse_object(&trimmed[start..start + end]) {
                return Ok(value);
            }
        }
    }

    Err(SchemaViolation::new(
        contract,
        "$",
        if trimmed.is_empty() {
            "backend returned empty output".to_string()
        } else {
            "output does not contain a JSON object".to_string()
        },
    ))
}

fn parse_object(text: &str) -> Option<Value> {
    match serde_json::from_str::<Value>(text) {
        Ok(value @ Value::Object(_)) => Some(value),
        _ => None,
    }
}

/// Byte length of the balanced brace span starting at `text[0] == '{'`.
fn balanced_end(text: &str) -> Option<usize> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (i, ch) in text.char_indices() {
        if in_string {
            match ch {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth = depth.checked_sub(1)?;
                if depth == 0 {
                    return Some(i + 1);
                }
            }
            _ => {}
        }
    }
    None
}
