use serde_json::{json, Value};
use tracing::{debug, warn};

use redline_core::json::parse_reply;
use redline_core::types::{AnalysisEngine, Category, Citation, DetectorSignals, PrimaryAnalysis};

use crate::citations::{decision_citation, dedupe, FINAL_DECISION_SOURCE};
use crate::engine::{FlowRun, NodeOutcome};
use crate::path::is_truthy;

/// Confidence used when the decision omits one, and by the fallback ladder.
pub const DEFAULT_CONFIDENCE: f64 = 0.7;

/// Detector hits cited by a fallback decision.
const FALLBACK_CITATIONS: usize = 3;

/// The primary analysis and the raw decision record kept for audit.
#[derive(Debug, Clone)]
pub struct PrimaryDecision {
    pub analysis: PrimaryAnalysis,
    pub raw: Value,
}

/// Terminal decision fields as parsed from a node output.
#[derive(Debug, Clone, PartialEq)]
pub struct TerminalDecision {
    pub category: Category,
    pub secondary_tags: Vec<String>,
    pub confidence: f64,
    pub explanation: String,
    pub citations: Vec<Citation>,
}

/// Turn a finished flow run into the primary analysis.
///
/// A missing, failed, empty or unparseable terminal output routes to the
/// fallback ladder driven by the detector signals.
pub fn build_primary(run: &FlowRun, signals: &DetectorSignals, model: &str) -> PrimaryDecision {
    let mut audit = run.citations.clone();

    let terminal = run
        .terminal_outcome()
        .and_then(NodeOutcome::output)
        .filter(|v| is_truthy(v));

    let parsed = match terminal {
        Some(output) => match parse_terminal(output) {
            Ok(decision) => Some(decision),
            Err(reason) => {
                warn!(
                    terminal = run.terminal.as_deref().unwrap_or("none"),
                    reason = %reason,
                    "Terminal output unusable, applying fallback"
                );
                None
            }
        },
        None => {
            debug!(
                terminal = run.terminal.as_deref().unwrap_or("none"),
                "No usable terminal output, applying fallback"
            );
            None
        }
    };

    let (engine, decision) = match parsed {
        Some(decision) => (AnalysisEngine::PromptTree, decision),
        None => (AnalysisEngine::Fallback, fallback_decision(signals)),
    };

    audit.extend(decision.citations.iter().cloned());
    let citations = if audit.is_empty() {
        decision.citations.clone()
    } else {
        dedupe(&audit)
    };

    let raw = json!({
        "final_category": decision.category,
        "secondary_tags": decision.secondary_tags,
        "confidence": decision.confidence,
        "citations": citations,
        "explanation": decision.explanation,
        "source": engine,
    });

    PrimaryDecision {
        analysis: PrimaryAnalysis {
            engine,
            model: model.to_string(),
            category: decision.category,
            secondary_tags: decision.secondary_tags,
            confidence: decision.confidence,
            explanation: decision.explanation,
            citations,
        },
        raw,
    }
}

/// Parse a terminal node output, either structured or a JSON string.
pub fn parse_terminal(output: &Value) -> Result<TerminalDecision, String> {
    let parsed;
    let data = match output {
        Value::String(s) => {
            parsed = parse_reply(s).ok_or_else(|| "terminal output is not JSON".to_string())?;
            &parsed
        }
        other => other,
    };
    let obj = data
        .as_object()
        .ok_or_else(|| "terminal output is not an object".to_string())?;

    let category = obj
        .get("final_category")
        .and_then(Value::as_str)
        .ok_or_else(|| "missing final_category".to_string())?
        .parse::<Category>()?;

    let confidence = match obj.get("confidence") {
        None | Some(Value::Null) => DEFAULT_CONFIDENCE,
        Some(v) => as_f64(v)
            .ok_or_else(|| format!("confidence is not a number: {}", v))?
            .clamp(0.0, 1.0),
    };

    let citations = obj
        .get("citations")
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter(|c| c.is_object())
                .filter_map(|c| decision_citation(c, FINAL_DECISION_SOURCE))
                .collect()
        })
        .unwrap_or_default();

    Ok(TerminalDecision {
        category,
        secondary_tags: string_list(obj.get("secondary_tags")),
        confidence,
        explanation: obj
            .get("explanation")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
        citations,
    })
}

/// Deterministic decision from detector signals alone.
pub fn fallback_decision(signals: &DetectorSignals) -> TerminalDecision {
    let (category, tags, explanation): (Category, &[&str], &str) = if signals.has_unsafe_pattern {
        (Category::Unsafe, &["Safety-Risk"], "Unsafe keywords detected.")
    } else if signals.has_pii {
        (Category::HighlySensitive, &["PII"], "PII patterns detected.")
    } else if signals.has_internal_markers {
        (Category::Confidential, &["Internal"], "Internal markers detected.")
    } else {
        (Category::Public, &[], "No sensitive markers found.")
    };

    let hits = if signals.pii_hits.is_empty() {
        &signals.unsafe_hits
    } else {
        &signals.pii_hits
    };

    TerminalDecision {
        category,
        secondary_tags: tags.iter().map(|t| t.to_string()).collect(),
        confidence: DEFAULT_CONFIDENCE,
        explanation: explanation.to_string(),
        citations: hits
            .iter()
            .filter(|c| !c.snippet.trim().is_empty())
            .take(FALLBACK_CITATIONS)
            .cloned()
            .collect(),
    }
}

/// Finite numbers and numeric strings.
pub(crate) fn as_f64(value: &Value) -> Option<f64> {
    let n = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    };
    n.filter(|f| f.is_finite())
}

/// A list of strings; a scalar becomes a one-element list.
pub(crate) fn string_list(value: Option<&Value>) -> Vec<String> {
    match value {
        None | Some(Value::Null) => vec![],
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(|v| match v {
                Value::String(s) => Some(s.clone()),
                Value::Null => None,
                other => Some(other.to_string()),
            })
            .collect(),
        Some(Value::String(s)) if s.is_empty() => vec![],
        Some(Value::String(s)) => vec![s.clone()],
        Some(other) => vec![other.to_string()],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::NodeErrorKind;

    fn run_with_terminal(outcome: NodeOutcome) -> FlowRun {
        let mut run = FlowRun::default();
        run.outputs.insert("final_decision".into(), outcome);
        run.order.push("final_decision".into());
        run.terminal = Some("final_decision".into());
        run
    }

    fn signals() -> DetectorSignals {
        DetectorSignals::default()
    }

    #[test]
    fn test_fallback_ladder_order() {
        let mut s = DetectorSignals {
            has_unsafe_pattern: true,
            has_pii: true,
            has_internal_markers: true,
            ..Default::default()
        };
        let d = fallback_decision(&s);
        assert_eq!(d.category, Category::Unsafe);
        assert_eq!(d.secondary_tags, vec!["Safety-Risk"]);
        assert_eq!(d.explanation, "Unsafe keywords detected.");

        s.has_unsafe_pattern = false;
        assert_eq!(fallback_decision(&s).category, Category::HighlySensitive);
        s.has_pii = false;
        let d = fallback_decision(&s);
        assert_eq!(d.category, Category::Confidential);
        assert_eq!(d.secondary_tags, vec!["Internal"]);
        s.has_internal_markers = false;
        let d = fallback_decision(&s);
        assert_eq!(d.category, Category::Public);
        assert!(d.secondary_tags.is_empty());
        assert_eq!(d.confidence, DEFAULT_CONFIDENCE);
    }

    #[test]
    fn test_fallback_citations_prefer_pii_hits() {
        let s = DetectorSignals {
            has_unsafe_pattern: true,
            pii_hits: (0..5).map(|i| Citation::new(format!("pii {}", i))).collect(),
            unsafe_hits: vec![Citation::new("weapon")],
            ..Default::default()
        };
        let d = fallback_decision(&s);
        assert_eq!(d.citations.len(), 3);
        assert_eq!(d.citations[0].snippet, "pii 0");

        let s = DetectorSignals {
            unsafe_hits: vec![Citation::new("weapon")],
            ..Default::default()
        };
        assert_eq!(fallback_decision(&s).citations[0].snippet, "weapon");
    }

    #[test]
    fn test_failed_terminal_uses_fallback() {
        let run = run_with_terminal(NodeOutcome::failed(NodeErrorKind::ClientError, "down"));
        let s = DetectorSignals {
            has_unsafe_pattern: true,
            ..Default::default()
        };
        let d = build_primary(&run, &s, "primary-model");
        assert_eq!(d.analysis.engine, AnalysisEngine::Fallback);
        assert_eq!(d.analysis.category, Category::Unsafe);
        assert_eq!(d.analysis.confidence, 0.7);
        assert_eq!(d.analysis.model, "primary-model");
        assert_eq!(d.raw["source"], json!("fallback"));
    }

    #[test]
    fn test_no_terminal_uses_fallback() {
        let d = build_primary(&FlowRun::default(), &signals(), "m");
        assert_eq!(d.analysis.category, Category::Public);
        assert!(d.analysis.citations.is_empty());
    }

    #[test]
    fn test_missing_final_category_uses_fallback() {
        let run = run_with_terminal(NodeOutcome::Completed(json!({"confidence": 0.9})));
        let d = build_primary(&run, &signals(), "m");
        assert_eq!(d.analysis.engine, AnalysisEngine::Fallback);
    }

    #[test]
    fn test_unknown_category_uses_fallback() {
        let run = run_with_terminal(NodeOutcome::Completed(json!({"final_category": "Secret"})));
        assert_eq!(build_primary(&run, &signals(), "m").analysis.engine, AnalysisEngine::Fallback);
    }

    #[test]
    fn test_structured_terminal() {
        let run = run_with_terminal(NodeOutcome::Completed(json!({
            "final_category": "Highly Sensitive",
            "secondary_tags": ["PII", "HR"],
            "confidence": "0.92",
            "explanation": "Salary records",
            "citations": [{"page": 2, "snippet": "salary: 90k"}, {"page": 3, "snippet": ""}]
        })));
        let d = build_primary(&run, &signals(), "m");
        assert_eq!(d.analysis.engine, AnalysisEngine::PromptTree);
        assert_eq!(d.analysis.category, Category::HighlySensitive);
        assert_eq!(d.analysis.secondary_tags, vec!["PII", "HR"]);
        assert!((d.analysis.confidence - 0.92).abs() < 1e-9);
        assert_eq!(d.analysis.citations.len(), 1);
        assert_eq!(d.analysis.citations[0].source.as_deref(), Some("final_decision"));
        assert_eq!(d.raw["source"], json!("prompt_tree"));
    }

    #[test]
    fn test_string_terminal_with_fence_and_defaults() {
        let reply = "```json\n{\"final_category\": \"confidential\"}\n```";
        let run = run_with_terminal(NodeOutcome::Completed(json!(reply)));
        let d = build_primary(&run, &signals(), "m");
        assert_eq!(d.analysis.category, Category::Confidential);
        assert!(d.analysis.secondary_tags.is_empty());
        assert_eq!(d.analysis.confidence, DEFAULT_CONFIDENCE);
        assert_eq!(d.analysis.explanation, "");
    }

    #[test]
    fn test_confidence_is_clamped_and_validated() {
        let out = json!({"final_category": "Public", "confidence": 7});
        assert_eq!(parse_terminal(&out).unwrap().confidence, 1.0);
        let out = json!({"final_category": "Public", "confidence": "high"});
        assert!(parse_terminal(&out).is_err());
    }

    #[test]
    fn test_non_finite_confidence_uses_fallback() {
        for bad in ["NaN", "inf", "-infinity"] {
            let out = json!({"final_category": "Unsafe", "confidence": bad});
            assert!(parse_terminal(&out).is_err());
        }

        let run = run_with_terminal(NodeOutcome::Completed(json!({
            "final_category": "Unsafe",
            "confidence": "NaN"
        })));
        let d = build_primary(&run, &signals(), "m");
        assert_eq!(d.analysis.engine, AnalysisEngine::Fallback);
        assert_eq!(d.analysis.category, Category::Public);
        assert_eq!(d.analysis.confidence, DEFAULT_CONFIDENCE);
    }

    #[test]
    fn test_audit_citations_supersede_and_dedupe() {
        let mut run = run_with_terminal(NodeOutcome::Completed(json!({
            "final_category": "Confidential",
            "citations": [{"page": 1, "snippet": "roadmap"}, {"page": 1, "snippet": "roadmap"}]
        })));
        run.citations = vec![
            Citation::new("internal only").with_page(Some(1)).with_source("confidentiality_scan"),
            Citation::new("internal only").with_page(Some(1)).with_source("confidentiality_scan"),
        ];
        let d = build_primary(&run, &signals(), "m");
        let snippets: Vec<&str> = d.analysis.citations.iter().map(|c| c.snippet.as_str()).collect();
        assert_eq!(snippets, vec!["internal only", "roadmap"]);
    }

    #[test]
    fn test_string_list_coercion() {
        assert_eq!(string_list(Some(&json!("PII"))), vec!["PII"]);
        assert_eq!(string_list(Some(&json!(["a", 1, null]))), vec!["a", "1"]);
        assert!(string_list(Some(&json!(""))).is_empty());
        assert!(string_list(None).is_empty());
    }
}
