use redline_core::types::{
    AgreementSummary, DecisionSummary, LegibilitySummary, ReviewSummary, ReviewTrigger, Summary,
};

use crate::consensus::{Agreement, Resolution};

pub const DEFAULT_CONTENT_SAFETY: &str = "Content is safe for kids";

/// Assemble the reviewer-facing summary block.
pub fn build_summary(
    resolution: &Resolution,
    triggers: &[ReviewTrigger],
    agreement: &Agreement,
    content_safety: &str,
    legibility_score: Option<f64>,
) -> Summary {
    Summary {
        decision: DecisionSummary {
            category: resolution.category,
            confidence: resolution.confidence,
            secondary_tags: resolution.tags.clone(),
        },
        review: ReviewSummary {
            required: !triggers.is_empty(),
            triggers: triggers.to_vec(),
        },
        agreement: AgreementSummary {
            score: agreement.score,
            disagreements: agreement.disagreements.clone(),
        },
        content_safety: content_safety.to_string(),
        legibility: legibility_score.map(|average_score| LegibilitySummary { average_score }),
    }
}
