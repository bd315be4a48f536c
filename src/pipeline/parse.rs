//! Recovery of question payloads from raw LLM output.
//!
//! Models asked for strict JSON still wander: code fences, prose around
//! the object, a bare array instead of the `{"questions": […]}` wrapper.
//! Recovery runs as an ordered list of pure strategies over the response
//! text; the first one that yields a candidate list wins. Every strategy
//! is a standalone function so each is testable without a provider.
//!
//! Order:
//! 1. direct parse (object with `questions`, or a bare array)
//! 2. fence-strip, then regex-extract a `{… "questions": [… ] …}` object
//! 3. regex-extract a bracketed array, with a first-`[`/last-`]` slice as
//!    a second chance
//! 4. scan every `{…}` candidate, preferring one that carries `questions`
//!
//! A parsed top-level object carrying an `error` key is an API error
//! payload, not questions, and fails recovery outright.

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use tracing::debug;

static RE_CODE_FENCE: Lazy<Regex> = Lazy::new(|| Regex::new(r"```(?:json)?").unwrap());

static RE_QUESTIONS_OBJECT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"(?s)\{.*?"questions"\s*:\s*\[.*?\].*?\}"#).unwrap());

static RE_ARRAY: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)\[.*?\]").unwrap());

static RE_OBJECT: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)\{.*?\}").unwrap());

/// Fallback strategies tried in order after a direct parse fails, over the
/// fence-stripped text.
const FALLBACK_STRATEGIES: &[(&str, fn(&str) -> Option<Vec<Value>>)] = &[
    ("questions-object", extract_questions_object),
    ("bracketed-array", extract_array),
    ("object-scan", scan_objects),
];

/// Recover the candidate question list from a raw model response.
///
/// Returns unvalidated JSON values; normalization decides what survives.
/// `None` means nothing question-shaped could be recovered.
pub fn parse_question_payload(raw: &str) -> Option<Vec<Value>> {
    // Valid JSON of the wrong shape is a model error, not a formatting
    // accident; the extraction strategies are for malformed text only.
    if let Ok(value) = serde_json::from_str::<Value>(raw) {
        let recovered = questions_from_value(value);
        if recovered.is_some() {
            debug!("parsed question payload directly");
        }
        return recovered;
    }

    let cleaned = strip_code_fences(raw);
    for (name, strategy) in FALLBACK_STRATEGIES {
        if let Some(questions) = strategy(&cleaned) {
            debug!(strategy = name, "recovered question payload");
            return Some(questions);
        }
    }
    None
}

/// Remove all markdown fence markers and trim.
fn strip_code_fences(text: &str) -> String {
    RE_CODE_FENCE.replace_all(text, "").trim().to_string()
}

/// Accept `{"questions": […]}` or a bare array; reject error payloads.
fn questions_from_value(value: Value) -> Option<Vec<Value>> {
    match value {
        Value::Object(mut map) => {
            if map.contains_key("error") {
                return None;
            }
            match map.remove("questions") {
                Some(Value::Array(questions)) => Some(questions),
                _ => None,
            }
        }
        Value::Array(items) => Some(items),
        _ => None,
    }
}

// ── Strategy 2: object carrying a questions array ─────────────────────────

fn extract_questions_object(text: &str) -> Option<Vec<Value>> {
    let m = RE_QUESTIONS_OBJECT.find(text)?;
    let value = serde_json::from_str::<Value>(m.as_str()).ok()?;
    match value {
        Value::Object(_) => questions_from_value(value),
        _ => None,
    }
}

// ── Strategy 3: bracketed array ───────────────────────────────────────────

fn extract_array(text: &str) -> Option<Vec<Value>> {
    if let Some(m) = RE_ARRAY.find(text) {
        if let Ok(Value::Array(items)) = serde_json::from_str::<Value>(m.as_str()) {
            return Some(items);
        }
    }

    // The non-greedy match stops at the first `]`, which truncates arrays
    // whose elements themselves contain brackets. Second chance: the
    // outermost bracket pair.
    let start = text.find('[')?;
    let end = text.rfind(']')?;
    if end <= start {
        return None;
    }
    match serde_json::from_str::<Value>(&text[start..=end]) {
        Ok(Value::Array(items)) => Some(items),
        _ => None,
    }
}

// ── Strategy 4: any-object scan ───────────────────────────────────────────

fn scan_objects(text: &str) -> Option<Vec<Value>> {
    let mut first: Option<Value> = None;

    for m in RE_OBJECT.find_iter(text) {
        let Ok(value) = serde_json::from_str::<Value>(m.as_str()) else {
            continue;
        };
        if !value.is_object() {
            continue;
        }
        if value.get("questions").map(Value::is_array) == Some(true) {
            return questions_from_value(value);
        }
        if first.is_none() {
            first = Some(value);
        }
    }

    first.map(|obj| vec![obj])
}
