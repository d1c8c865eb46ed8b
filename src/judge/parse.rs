//! Judge output contract: raw text to a validated [`JudgmentResult`].
//!
//! Parsing runs as a fixed chain of fallible steps
//! (raw text → JSON span → object → validated record). Each step either
//! hands its output to the next or stops with the [`SchemaViolation`] that
//! names it. Nothing partial survives a failed step.

use super::{ComparableCase, JudgmentResult};
use crate::error::SchemaViolation;
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// Top-level keys every judgment must carry.
pub const REQUIRED_FIELDS: [&str; 5] = [
    "Score",
    "Confidence",
    "Explanation",
    "Inference_Chain",
    "Comparable_Cases",
];

type Step<T> = std::result::Result<T, SchemaViolation>;

/// Run the full parse/repair chain over a raw judge response.
pub fn parse_judgment(raw: &str) -> Step<JudgmentResult> {
    let span = extract_span(raw)?;
    let mut object = parse_object(span)?;
    check_required(&object)?;

    let score = coerce_score(&object["Score"])?;
    let confidence = coerce_confidence(&object["Confidence"])?;
    let explanation = coerce_explanation(take(&mut object, "Explanation"))?;
    let inference_chain = coerce_inference_chain(take(&mut object, "Inference_Chain"))?;
    let comparable_cases = coerce_comparable_cases(take(&mut object, "Comparable_Cases"))?;

    Ok(JudgmentResult {
        score,
        confidence,
        explanation,
        inference_chain,
        comparable_cases,
    })
}

fn take(object: &mut Map<String, Value>, key: &str) -> Value {
    object.remove(key).unwrap_or(Value::Null)
}

/// Step 1: the text between the first `{` and the last `}`, inclusive.
pub fn extract_span(raw: &str) -> Step<&str> {
    match (raw.find('{'), raw.rfind('}')) {
        (Some(start), Some(end)) if end > start => Ok(&raw[start..=end]),
        _ => Err(SchemaViolation::NoJsonFound),
    }
}

/// Step 2: the span must be a JSON object.
fn parse_object(span: &str) -> Step<Map<String, Value>> {
    match serde_json::from_str::<Value>(span) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(other) => Err(SchemaViolation::MalformedJson(format!(
            "expected an object, found {}",
            kind(&other)
        ))),
        Err(e) => Err(SchemaViolation::MalformedJson(e.to_string())),
    }
}

/// Step 3: all required keys present.
fn check_required(object: &Map<String, Value>) -> Step<()> {
    let missing: Vec<&'static str> = REQUIRED_FIELDS
        .iter()
        .copied()
        .filter(|k| !object.contains_key(*k))
        .collect();
    if missing.is_empty() {
        Ok(())
    } else {
        Err(SchemaViolation::MissingField(missing))
    }
}

/// Step 4: integer coercion, then membership in {1, 2, 3}.
///
/// Integral strings (`"2"`) are accepted, floats are truncated, booleans and
/// everything else are rejected.
fn coerce_score(value: &Value) -> Step<u8> {
    let n = match value {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().filter(|f| f.is_finite()).map(|f| f.trunc() as i64)),
        Value::String(s) => s.trim().parse::<i64>().ok(),
        _ => None,
    };
    match n {
        Some(s @ 1..=3) => Ok(s as u8),
        _ => Err(SchemaViolation::InvalidScore(value.to_string())),
    }
}

/// Step 5: float coercion, then the closed range [0, 10].
fn coerce_confidence(value: &Value) -> Step<f64> {
    let f = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    match f {
        Some(c) if (0.0..=10.0).contains(&c) => Ok(c),
        _ => Err(SchemaViolation::InvalidConfidence(value.to_string())),
    }
}

/// Step 6: an object, or a string holding one.
fn coerce_explanation(value: Value) -> Step<BTreeMap<String, String>> {
    let object = match value {
        Value::Object(map) => map,
        Value::String(s) => match serde_json::from_str::<Value>(&s) {
            Ok(Value::Object(map)) => map,
            _ => return Err(SchemaViolation::InvalidExplanation(truncate(&s))),
        },
        other => return Err(SchemaViolation::InvalidExplanation(kind(&other).to_string())),
    };

    Ok(object.into_iter().map(|(k, v)| (k, text_of(v))).collect())
}

/// Step 7: an array, or a string holding one.
fn coerce_inference_chain(value: Value) -> Step<Vec<String>> {
    let items = match value {
        Value::Array(items) => items,
        Value::String(s) => match serde_json::from_str::<Value>(&s) {
            Ok(Value::Array(items)) => items,
            _ => return Err(SchemaViolation::InvalidInferenceChain(truncate(&s))),
        },
        other => {
            return Err(SchemaViolation::InvalidInferenceChain(
                kind(&other).to_string(),
            ));
        }
    };
    Ok(items.into_iter().map(text_of).collect())
}

/// Step 8: an array, or a string holding one, with a quote-repair retry.
///
/// Entries that are not objects are dropped.
fn coerce_comparable_cases(value: Value) -> Step<Vec<ComparableCase>> {
    let items = match value {
        Value::Array(items) => items,
        Value::String(s) => parse_array_with_repair(&s)
            .ok_or_else(|| SchemaViolation::InvalidComparableCases(truncate(&s)))?,
        other => {
            return Err(SchemaViolation::InvalidComparableCases(
                kind(&other).to_string(),
            ));
        }
    };

    Ok(items
        .into_iter()
        .filter_map(|item| match item {
            Value::Object(map) => Some(ComparableCase::from_object(&map)),
            _ => None,
        })
        .collect())
}

/// Parse `text` as a JSON array, retrying once with `'` replaced by `"`.
pub fn parse_array_with_repair(text: &str) -> Option<Vec<Value>> {
    let as_array = |t: &str| match serde_json::from_str::<Value>(t) {
        Ok(Value::Array(items)) => Some(items),
        _ => None,
    };
    as_array(text).or_else(|| as_array(&text.replace('\'', "\"")))
}

/// Strings as-is; any other value as its JSON text.
fn text_of(value: Value) -> String {
    match value {
        Value::String(s) => s,
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Lenient integer reading used for case scores.
pub(crate) fn loose_int(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f.trunc() as i64)),
        Value::String(s) => s.trim().parse::<f64>().ok().map(|f| f.trunc() as i64),
        _ => None,
    }
}

/// Lenient float reading used for case similarities.
pub(crate) fn loose_float(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
}

fn kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn truncate(s: &str) -> String {
    const MAX: usize = 120;
    match s.char_indices().nth(MAX) {
        Some((idx, _)) => format!("{}...", &s[..idx]),
        None => s.to_string(),
    }
}
