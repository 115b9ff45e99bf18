use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use serde_json::Value;
use tracing::debug;

use redline_core::types::Citation;

/// Characters of the trimmed snippet that participate in the dedup key.
const SNIPPET_KEY_CHARS: usize = 120;

/// Source tag for citations taken from the terminal decision.
pub const FINAL_DECISION_SOURCE: &str = "final_decision";

/// Pulls evidence spans out of one kind of node output.
///
/// Extractors skip malformed entries rather than failing.
pub trait CitationExtractor: Send + Sync + 'static {
    /// Node kind this extractor handles.
    fn kind(&self) -> &str;

    /// Extract citations from a node's output, tagging them with `node_id`.
    fn extract(&self, node_id: &str, output: &Value) -> Vec<Citation>;
}

/// Registry mapping node kinds to citation extractors.
pub struct CitationRegistry {
    extractors: HashMap<String, Arc<dyn CitationExtractor>>,
}

impl CitationRegistry {
    pub fn new() -> Self {
        Self {
            extractors: HashMap::new(),
        }
    }

    /// Register an extractor, replacing any previous one for the same kind.
    pub fn register(&mut self, extractor: impl CitationExtractor) {
        let kind = extractor.kind().to_string();
        self.extractors.insert(kind, Arc::new(extractor));
    }

    pub fn get(&self, kind: &str) -> Option<Arc<dyn CitationExtractor>> {
        self.extractors.get(kind).cloned()
    }

    /// List registered kinds.
    pub fn kinds(&self) -> Vec<&str> {
        self.extractors.keys().map(|s| s.as_str()).collect()
    }

    /// Extract citations for a node. Unknown kinds contribute nothing.
    pub fn collect(&self, kind: &str, node_id: &str, output: &Value) -> Vec<Citation> {
        let Some(extractor) = self.extractors.get(kind) else {
            return vec![];
        };
        let citations: Vec<Citation> = extractor
            .extract(node_id, output)
            .into_iter()
            .filter(|c| !c.snippet.trim().is_empty())
            .collect();
        debug!(node_id, kind, count = citations.len(), "Collected citations");
        citations
    }

    /// Create a registry with the built-in extractors registered.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register(PiiSpanExtractor);
        registry.register(ScanCitationExtractor::new("unsafe_scan"));
        registry.register(ScanCitationExtractor::new("confidentiality_scan"));
        registry.register(FinalDecisionExtractor);
        registry.register(ImageFindingExtractor);
        registry
    }
}

impl Default for CitationRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}

/// `pii_spans[].{page, text}`
pub struct PiiSpanExtractor;

impl CitationExtractor for PiiSpanExtractor {
    fn kind(&self) -> &str {
        "pii_scan"
    }

    fn extract(&self, node_id: &str, output: &Value) -> Vec<Citation> {
        entries(output, "pii_spans")
            .filter_map(|span| {
                let text = non_empty_str(span.get("text"))?;
                Some(
                    Citation::new(text)
                        .with_page(lenient_int(span.get("page")))
                        .with_source(node_id),
                )
            })
            .collect()
    }
}

/// `citations[].{page, text|snippet}` for scan-style nodes.
pub struct ScanCitationExtractor {
    kind: String,
}

impl ScanCitationExtractor {
    pub fn new(kind: impl Into<String>) -> Self {
        Self { kind: kind.into() }
    }
}

impl CitationExtractor for ScanCitationExtractor {
    fn kind(&self) -> &str {
        &self.kind
    }

    fn extract(&self, node_id: &str, output: &Value) -> Vec<Citation> {
        entries(output, "citations")
            .filter_map(|cite| {
                let text = non_empty_str(cite.get("text"))
                    .or_else(|| non_empty_str(cite.get("snippet")))?;
                Some(
                    Citation::new(text)
                        .with_page(lenient_int(cite.get("page")))
                        .with_source(node_id),
                )
            })
            .collect()
    }
}

/// `citations[].{page, snippet, image_index, region}`
pub struct FinalDecisionExtractor;

impl CitationExtractor for FinalDecisionExtractor {
    fn kind(&self) -> &str {
        FINAL_DECISION_SOURCE
    }

    fn extract(&self, node_id: &str, output: &Value) -> Vec<Citation> {
        entries(output, "citations")
            .filter_map(|cite| decision_citation(cite, node_id))
            .collect()
    }
}

/// `findings[].{page, description, image_index, regions_of_concern[]}`
pub struct ImageFindingExtractor;

impl CitationExtractor for ImageFindingExtractor {
    fn kind(&self) -> &str {
        "image_analysis"
    }

    fn extract(&self, node_id: &str, output: &Value) -> Vec<Citation> {
        entries(output, "findings")
            .filter_map(|finding| {
                let description = non_empty_str(finding.get("description"))?;
                let regions: Vec<&str> = finding
                    .get("regions_of_concern")
                    .and_then(Value::as_array)
                    .map(|r| r.iter().filter_map(Value::as_str).collect())
                    .unwrap_or_default();
                let region = (!regions.is_empty()).then(|| regions.join(", "));
                Some(
                    Citation::new(description)
                        .with_page(lenient_int(finding.get("page")))
                        .with_image_index(lenient_int(finding.get("image_index")))
                        .with_region(region)
                        .with_source(node_id),
                )
            })
            .collect()
    }
}

/// Build a citation from a decision-style entry (`snippet`, `page`, `image_index`, `region`).
pub fn decision_citation(cite: &Value, source: &str) -> Option<Citation> {
    let snippet = non_empty_str(cite.get("snippet"))?;
    let region = cite
        .get("region")
        .and_then(Value::as_str)
        .map(|s| s.to_string());
    Some(
        Citation::new(snippet)
            .with_page(lenient_int(cite.get("page")))
            .with_image_index(lenient_int(cite.get("image_index")))
            .with_region(region)
            .with_source(source),
    )
}

/// Remove duplicate citations, keeping the first occurrence and relative order.
pub fn dedupe(citations: &[Citation]) -> Vec<Citation> {
    let mut seen = HashSet::new();
    citations
        .iter()
        .filter(|c| seen.insert(dedup_key(c)))
        .cloned()
        .collect()
}

type DedupKey = (Option<i64>, Option<i64>, String, String, String);

fn dedup_key(c: &Citation) -> DedupKey {
    let snippet: String = c.snippet.trim().chars().take(SNIPPET_KEY_CHARS).collect();
    (
        c.page,
        c.image_index,
        c.region.as_deref().unwrap_or("").trim().to_string(),
        c.source.clone().unwrap_or_default(),
        snippet,
    )
}

/// Object entries of the array at `key`, skipping non-objects.
fn entries<'a>(output: &'a Value, key: &str) -> impl Iterator<Item = &'a Value> {
    output
        .get(key)
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .filter(|v| v.is_object())
}

pub(crate) fn non_empty_str(value: Option<&Value>) -> Option<&str> {
    value
        .and_then(Value::as_str)
        .filter(|s| !s.trim().is_empty())
}

/// Integers, integral floats, and numeric strings.
pub(crate) fn lenient_int(value: Option<&Value>) -> Option<i64> {
    match value? {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().filter(|f| f.fract() == 0.0).map(|f| f as i64)),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn registry() -> CitationRegistry {
        CitationRegistry::with_builtins()
    }

    #[test]
    fn test_pii_spans() {
        let out = json!({"pii_spans": [
            {"page": 2, "text": "123-45-6789"},
            {"page": 3},
            "garbage",
            {"page": "4", "text": "jane@example.com"}
        ]});
        let cites = registry().collect("pii_scan", "pii_scan", &out);
        assert_eq!(cites.len(), 2);
        assert_eq!(cites[0].page, Some(2));
        assert_eq!(cites[0].source.as_deref(), Some("pii_scan"));
        assert_eq!(cites[1].page, Some(4));
    }

    #[test]
    fn test_scan_accepts_text_or_snippet() {
        let out = json!({"citations": [
            {"page": 1, "text": "build a bomb"},
            {"page": 2, "snippet": "internal roadmap"},
            {"page": 3, "text": ""}
        ]});
        let unsafe_cites = registry().collect("unsafe_scan", "unsafe_scan", &out);
        assert_eq!(unsafe_cites.len(), 2);
        let conf_cites = registry().collect("confidentiality_scan", "conf", &out);
        assert_eq!(conf_cites[1].snippet, "internal roadmap");
        assert_eq!(conf_cites[1].source.as_deref(), Some("conf"));
    }

    #[test]
    fn test_final_decision_fields() {
        let out = json!({"citations": [
            {"page": 1, "snippet": "salary table", "image_index": 0, "region": "top-left"},
            {"snippet": ""}
        ]});
        let cites = registry().collect("final_decision", "final_decision", &out);
        assert_eq!(cites.len(), 1);
        assert_eq!(cites[0].image_index, Some(0));
        assert_eq!(cites[0].region.as_deref(), Some("top-left"));
    }

    #[test]
    fn test_image_findings_join_regions() {
        let out = json!({"findings": [
            {"page": 1, "image_index": 2, "description": "passport scan",
             "regions_of_concern": ["face", "mrz"]},
            {"page": 1, "description": "logo", "regions_of_concern": []},
            {"page": 2, "regions_of_concern": ["x"]}
        ]});
        let cites = registry().collect("image_analysis", "image_analysis", &out);
        assert_eq!(cites.len(), 2);
        assert_eq!(cites[0].region.as_deref(), Some("face, mrz"));
        assert_eq!(cites[1].region, None);
    }

    #[test]
    fn test_malformed_output_contributes_nothing() {
        let r = registry();
        assert!(r.collect("pii_scan", "pii_scan", &json!("plain text")).is_empty());
        assert!(r.collect("pii_scan", "pii_scan", &json!({"pii_spans": "nope"})).is_empty());
        assert!(r.collect("final_decision", "f", &json!([1, 2, 3])).is_empty());
    }

    #[test]
    fn test_unknown_kind_contributes_nothing() {
        let out = json!({"citations": [{"snippet": "x"}]});
        assert!(registry().collect("precheck", "precheck", &out).is_empty());
    }

    #[test]
    fn test_custom_kind_registration() {
        let mut r = registry();
        r.register(ScanCitationExtractor::new("legal_scan"));
        let out = json!({"citations": [{"text": "privileged"}]});
        assert_eq!(r.collect("legal_scan", "legal", &out).len(), 1);
        assert!(r.kinds().contains(&"legal_scan"));
    }

    #[test]
    fn test_dedupe_first_wins_and_is_idempotent() {
        let a = Citation::new("  same snippet ").with_page(Some(1)).with_source("x");
        let b = Citation::new("same snippet").with_page(Some(1)).with_source("x");
        let c = Citation::new("same snippet").with_page(Some(2)).with_source("x");
        let d = Citation::new("same snippet").with_page(Some(1)).with_source("y");
        let input = vec![a.clone(), b, c.clone(), d.clone(), a.clone()];

        let once = dedupe(&input);
        assert_eq!(once, vec![a, c, d]);
        assert_eq!(dedupe(&once), once);
    }

    #[test]
    fn test_dedupe_uses_snippet_prefix() {
        let base = "x".repeat(SNIPPET_KEY_CHARS);
        let a = Citation::new(format!("{}AAA", base));
        let b = Citation::new(format!("{}BBB", base));
        assert_eq!(dedupe(&[a.clone(), b]), vec![a]);
    }

    #[test]
    fn test_dedupe_region_is_trimmed() {
        let a = Citation::new("s").with_region(Some(" top ".into()));
        let b = Citation::new("s").with_region(Some("top".into()));
        let c = Citation::new("s");
        assert_eq!(dedupe(&[a.clone(), b, c.clone()]), vec![a, c]);
    }
}
