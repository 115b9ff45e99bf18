use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 1-indexed page number → extracted page text.
pub type PageMap = BTreeMap<u32, String>;

/// Upstream detector flag that prompt nodes can be gated on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Signal {
    HasPii,
    HasUnsafePattern,
    HasInternalMarkers,
}

impl Signal {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::HasPii => "has_pii",
            Self::HasUnsafePattern => "has_unsafe_pattern",
            Self::HasInternalMarkers => "has_internal_markers",
        }
    }
}

impl fmt::Display for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Signal {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim() {
            "has_pii" => Ok(Self::HasPii),
            "has_unsafe_pattern" => Ok(Self::HasUnsafePattern),
            "has_internal_markers" => Ok(Self::HasInternalMarkers),
            other => Err(format!("unknown detector signal: {}", other)),
        }
    }
}

/// A piece of evidence pointing back into the source document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Citation {
    #[serde(default)]
    pub page: Option<i64>,
    pub snippet: String,
    #[serde(default)]
    pub image_index: Option<i64>,
    #[serde(default)]
    pub region: Option<String>,
    #[serde(default)]
    pub source: Option<String>,
}

impl Citation {
    pub fn new(snippet: impl Into<String>) -> Self {
        Self {
            page: None,
            snippet: snippet.into(),
            image_index: None,
            region: None,
            source: None,
        }
    }

    pub fn with_page(mut self, page: Option<i64>) -> Self {
        self.page = page;
        self
    }

    pub fn with_image_index(mut self, index: Option<i64>) -> Self {
        self.image_index = index;
        self
    }

    pub fn with_region(mut self, region: Option<String>) -> Self {
        self.region = region;
        self
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }
}

/// Heuristic evidence produced before classification. Never mutated by the pipeline.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DetectorSignals {
    #[serde(default)]
    pub has_pii: bool,
    #[serde(default)]
    pub has_unsafe_pattern: bool,
    #[serde(default)]
    pub has_internal_markers: bool,
    #[serde(default)]
    pub pii_hits: Vec<Citation>,
    #[serde(default)]
    pub unsafe_hits: Vec<Citation>,
}

impl DetectorSignals {
    pub fn get(&self, signal: Signal) -> bool {
        match signal {
            Signal::HasPii => self.has_pii,
            Signal::HasUnsafePattern => self.has_unsafe_pattern,
            Signal::HasInternalMarkers => self.has_internal_markers,
        }
    }
}

/// Sensitivity category, ordered by severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Category {
    Public,
    Confidential,
    #[serde(rename = "Highly Sensitive")]
    HighlySensitive,
    Unsafe,
}

impl Category {
    /// Severity used to pick the more restrictive of two categories.
    pub fn severity(&self) -> u8 {
        match self {
            Self::Public => 1,
            Self::Confidential => 2,
            Self::HighlySensitive => 3,
            Self::Unsafe => 4,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Public => "Public",
            Self::Confidential => "Confidential",
            Self::HighlySensitive => "Highly Sensitive",
            Self::Unsafe => "Unsafe",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Category {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let normalized: String = s
            .trim()
            .to_lowercase()
            .chars()
            .map(|c| if c == '_' || c == '-' { ' ' } else { c })
            .collect();
        match normalized.as_str() {
            "public" => Ok(Self::Public),
            "confidential" => Ok(Self::Confidential),
            "highly sensitive" => Ok(Self::HighlySensitive),
            "unsafe" => Ok(Self::Unsafe),
            _ => Err(format!("unknown category: {}", s)),
        }
    }
}

/// An image extracted from the source document, base64-encoded.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PageImage {
    pub page: u32,
    pub index: u32,
    pub data: String,
    #[serde(default)]
    pub ext: String,
    pub size: usize,
}

/// Role in a model conversation.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// A single message sent to a model client.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }
}

/// Where the primary decision came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnalysisEngine {
    PromptTree,
    Fallback,
}

/// Normalized output of the prompt flow (or the fallback ladder).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrimaryAnalysis {
    pub engine: AnalysisEngine,
    pub model: String,
    pub category: Category,
    pub secondary_tags: Vec<String>,
    pub confidence: f64,
    pub explanation: String,
    pub citations: Vec<Citation>,
}

/// Normalized output of the independent secondary model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecondaryAnalysis {
    pub model: String,
    pub label: Option<Category>,
    pub confidence: f64,
    pub explanation: String,
    pub content_safety: Option<String>,
    pub critical_info: Vec<String>,
    pub needs_review: bool,
    pub citations: Vec<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip)]
    pub raw: serde_json::Value,
}

impl SecondaryAnalysis {
    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

/// Named reason for routing a result to human review.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewTrigger {
    LowConfidence,
    UnsafeDetector,
    PromptErrors,
    LlmDisagreement,
    SecondaryLlmFlag,
}

impl ReviewTrigger {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::LowConfidence => "low_confidence",
            Self::UnsafeDetector => "unsafe_detector",
            Self::PromptErrors => "prompt_errors",
            Self::LlmDisagreement => "llm_disagreement",
            Self::SecondaryLlmFlag => "secondary_llm_flag",
        }
    }
}

impl fmt::Display for ReviewTrigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionSummary {
    pub category: Category,
    pub confidence: f64,
    pub secondary_tags: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReviewSummary {
    pub required: bool,
    pub triggers: Vec<ReviewTrigger>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgreementSummary {
    pub score: f64,
    pub disagreements: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LegibilitySummary {
    pub average_score: f64,
}

/// Compact, reviewer-facing view of a classification.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Summary {
    pub decision: DecisionSummary,
    pub review: ReviewSummary,
    pub agreement: AgreementSummary,
    pub content_safety: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub legibility: Option<LegibilitySummary>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DualLlmValidation {
    pub agreement_score: f64,
    pub disagreements: Vec<String>,
    pub resolution_strategy: String,
    pub secondary_model: String,
}

/// Everything the models produced, kept for auditing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditPayload {
    pub prompt_errors: Vec<String>,
    pub prompt_flow: serde_json::Value,
    pub primary_raw: serde_json::Value,
    pub secondary_llm: serde_json::Value,
    pub dual_llm_validation: DualLlmValidation,
}

/// Final, immutable verdict for a single document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassificationResult {
    pub doc_id: String,
    pub final_category: Category,
    pub secondary_tags: Vec<String>,
    pub confidence: f64,
    pub explanation: String,
    pub page_count: usize,
    pub image_count: usize,
    pub content_safety: String,
    pub citations: Vec<Citation>,
    pub raw_signals: DetectorSignals,
    pub llm_payload: AuditPayload,
    pub requires_review: bool,
    pub review_triggers: Vec<ReviewTrigger>,
    pub dual_llm_agreement: f64,
    pub dual_llm_disagreements: Option<Vec<String>>,
    pub primary_analysis: PrimaryAnalysis,
    pub secondary_analysis: SecondaryAnalysis,
    pub summary: Summary,
    pub legibility_score: Option<f64>,
    pub classified_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_category_parsing_variants() {
        assert_eq!("Highly Sensitive".parse::<Category>(), Ok(Category::HighlySensitive));
        assert_eq!("highly_sensitive".parse::<Category>(), Ok(Category::HighlySensitive));
        assert_eq!(" UNSAFE ".parse::<Category>(), Ok(Category::Unsafe));
        assert!("Secret".parse::<Category>().is_err());
    }

    #[test]
    fn test_category_serializes_display_name() {
        let json = serde_json::to_string(&Category::HighlySensitive).unwrap();
        assert_eq!(json, "\"Highly Sensitive\"");
        assert!(Category::Unsafe.severity() > Category::HighlySensitive.severity());
    }

    #[test]
    fn test_signal_lookup() {
        let signals = DetectorSignals {
            has_internal_markers: true,
            ..Default::default()
        };
        assert!(signals.get(Signal::HasInternalMarkers));
        assert!(!signals.get(Signal::HasPii));
        assert_eq!("has_pii".parse::<Signal>(), Ok(Signal::HasPii));
        assert!("has_secrets".parse::<Signal>().is_err());
    }

    #[test]
    fn test_review_trigger_names() {
        let json = serde_json::to_string(&ReviewTrigger::SecondaryLlmFlag).unwrap();
        assert_eq!(json, "\"secondary_llm_flag\"");
        assert_eq!(ReviewTrigger::LlmDisagreement.to_string(), "llm_disagreement");
    }
}
