use redline_core::types::{ReviewTrigger, SecondaryAnalysis};

use crate::consensus::Agreement;

pub const LOW_CONFIDENCE_THRESHOLD: f64 = 0.8;
pub const AGREEMENT_THRESHOLD: f64 = 0.7;

/// Inputs the review gate looks at.
#[derive(Debug, Clone, Copy)]
pub struct ReviewInputs<'a> {
    pub confidence: f64,
    pub unsafe_detector: bool,
    pub prompt_errors: &'a [String],
    pub agreement: &'a Agreement,
    pub secondary: &'a SecondaryAnalysis,
}

/// Triggers in fixed order. Review is required iff the list is non-empty.
pub fn review_triggers(inputs: ReviewInputs<'_>) -> Vec<ReviewTrigger> {
    let mut triggers = Vec::new();
    if inputs.confidence < LOW_CONFIDENCE_THRESHOLD {
        triggers.push(ReviewTrigger::LowConfidence);
    }
    if inputs.unsafe_detector {
        triggers.push(ReviewTrigger::UnsafeDetector);
    }
    if !inputs.prompt_errors.is_empty() {
        triggers.push(ReviewTrigger::PromptErrors);
    }
    if inputs.agreement.score < AGREEMENT_THRESHOLD || !inputs.agreement.disagreements.is_empty() {
        triggers.push(ReviewTrigger::LlmDisagreement);
    }
    if inputs.secondary.needs_review {
        triggers.push(ReviewTrigger::SecondaryLlmFlag);
    }
    triggers
}
