use serde_json::{json, Value};

use redline_core::types::{Category, SecondaryAnalysis};

use crate::builder::{as_f64, string_list, DEFAULT_CONFIDENCE};
use crate::path::is_truthy;

/// Secondary confidence below this asks for review.
pub const SECONDARY_REVIEW_THRESHOLD: f64 = 0.8;

const UNAVAILABLE: &str = "Secondary LLM unavailable";
const GENERIC_ERROR: &str = "secondary_llm_error";

/// Normalize a raw secondary reply.
///
/// Both snake_case and the capitalized key spellings some models produce are
/// accepted. An empty reply, or one carrying `error`, becomes an error analysis.
pub fn structure_secondary(raw: Value, default_model: &str) -> SecondaryAnalysis {
    let raw = match raw {
        Value::Null => json!({}),
        Value::Object(_) => raw,
        other => json!({ "raw_value": other }),
    };

    let model = raw
        .get("model")
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .unwrap_or(default_model)
        .to_string();

    let error = raw.get("error").filter(|v| is_truthy(v));
    let is_empty = raw.as_object().is_some_and(|o| o.is_empty());

    if is_empty || error.is_some() {
        let detail = error.map(|e| match e {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        });
        return SecondaryAnalysis {
            model,
            label: None,
            confidence: 0.0,
            explanation: detail.clone().unwrap_or_else(|| UNAVAILABLE.to_string()),
            content_safety: None,
            critical_info: vec![],
            needs_review: true,
            citations: vec![],
            error: Some(detail.unwrap_or_else(|| GENERIC_ERROR.to_string())),
            raw,
        };
    }

    let label = pick(&raw, "label", "Sensitivity")
        .and_then(Value::as_str)
        .and_then(|s| s.parse::<Category>().ok());

    let confidence = raw
        .get("confidence")
        .filter(|v| !v.is_null())
        .or_else(|| raw.get("Confidence"))
        .and_then(as_f64)
        .unwrap_or(DEFAULT_CONFIDENCE)
        .clamp(0.0, 1.0);

    let explanation = pick(&raw, "rationale", "Reasoning")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();

    let content_safety = pick(&raw, "content_safety", "Content_safety")
        .and_then(Value::as_str)
        .map(str::to_string);

    let critical_info = string_list(pick(&raw, "critical_info", "Critical_info"));

    let citations = match pick(&raw, "citations", "Citations") {
        Some(Value::Array(items)) => items.clone(),
        _ => vec![],
    };

    let flagged = pick(&raw, "needs_review", "Requires_review").is_some_and(is_truthy);

    SecondaryAnalysis {
        model,
        label,
        confidence,
        explanation,
        content_safety,
        critical_info,
        needs_review: flagged || confidence < SECONDARY_REVIEW_THRESHOLD,
        citations,
        error: None,
        raw,
    }
}

/// First truthy value under either spelling.
fn pick<'a>(raw: &'a Value, key: &str, alt: &str) -> Option<&'a Value> {
    raw.get(key)
        .filter(|v| is_truthy(v))
        .or_else(|| raw.get(alt).filter(|v| is_truthy(v)))
}
