use tracing::debug;

use redline_core::types::{Category, PrimaryAnalysis, SecondaryAnalysis};

/// Confidence gap below which the two analyses count as close.
pub const CONFIDENCE_GAP_LIMIT: f64 = 0.2;

pub const SECONDARY_ERROR: &str = "secondary_llm_error";
pub const RESOLUTION_STRATEGY: &str = "most_restrictive";

/// Agreement between the two analyses.
#[derive(Debug, Clone, PartialEq)]
pub struct Agreement {
    /// One of 0, 0.25, 0.5, 0.75, 1.0.
    pub score: f64,
    pub disagreements: Vec<String>,
}

/// The decision after reconciling both analyses.
#[derive(Debug, Clone, PartialEq)]
pub struct Resolution {
    pub category: Category,
    pub confidence: f64,
    pub explanation: String,
    pub tags: Vec<String>,
    /// Whether the secondary analysis supplied the final values.
    pub from_secondary: bool,
}

/// Score how closely the secondary analysis agrees with the primary.
pub fn compute_agreement(primary: &PrimaryAnalysis, secondary: &SecondaryAnalysis) -> Agreement {
    if secondary.is_error() {
        return Agreement {
            score: 0.0,
            disagreements: vec![SECONDARY_ERROR.to_string()],
        };
    }

    let mut disagreements = Vec::new();

    let category_score = if secondary.label == Some(primary.category) {
        1.0
    } else {
        disagreements.push(format!(
            "category: primary={}, secondary={}",
            primary.category,
            secondary
                .label
                .map(|c| c.as_str())
                .unwrap_or("none")
        ));
        0.0
    };

    let gap = (primary.confidence - secondary.confidence).abs();
    let confidence_score = if gap < CONFIDENCE_GAP_LIMIT {
        1.0
    } else {
        disagreements.push(format!("confidence_gap: {:.2}", gap));
        0.5
    };

    Agreement {
        score: (category_score + confidence_score) / 2.0,
        disagreements,
    }
}

/// Pick the more restrictive category. Ties favor `a`.
pub fn resolve(a: Option<Category>, b: Option<Category>) -> Option<Category> {
    match (a, b) {
        (None, other) => other,
        (some, None) => some,
        (Some(a), Some(b)) => Some(if a.severity() >= b.severity() { a } else { b }),
    }
}

/// Reconcile the primary and secondary analyses into one decision.
pub fn reconcile(primary: &PrimaryAnalysis, secondary: &SecondaryAnalysis) -> Resolution {
    let secondary_label = if secondary.is_error() {
        None
    } else {
        secondary.label
    };
    let category = resolve(Some(primary.category), secondary_label).unwrap_or(primary.category);

    if secondary_label == Some(category) {
        debug!(category = %category, "Secondary analysis supplies the final decision");
        let tags = if secondary.critical_info.is_empty() {
            primary.secondary_tags.clone()
        } else {
            secondary.critical_info.clone()
        };
        Resolution {
            category,
            confidence: secondary.confidence,
            explanation: secondary.explanation.clone(),
            tags,
            from_secondary: true,
        }
    } else {
        Resolution {
            category,
            confidence: primary.confidence,
            explanation: primary.explanation.clone(),
            tags: primary.secondary_tags.clone(),
            from_secondary: false,
        }
    }
}
