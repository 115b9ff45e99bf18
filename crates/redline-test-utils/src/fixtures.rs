use chrono::Utc;
use serde_json::{json, Value};

use redline_core::types::*;

/// Two short pages.
pub fn sample_pages() -> PageMap {
    PageMap::from([
        (
            1,
            "INTERNAL ONLY. Quarterly plan for the platform team.".to_string(),
        ),
        (
            2,
            "Contact Jane Doe at jane.doe@example.com, SSN 123-45-6789.".to_string(),
        ),
    ])
}

pub fn sample_image(page: u32, index: u32) -> PageImage {
    PageImage {
        page,
        index,
        data: "iVBORw0KGgo=".to_string(),
        ext: "png".to_string(),
        size: 8,
    }
}

/// Signals with a PII hit on page 2.
pub fn pii_signals() -> DetectorSignals {
    DetectorSignals {
        has_pii: true,
        pii_hits: vec![Citation::new("123-45-6789")
            .with_page(Some(2))
            .with_source("detector:ssn")],
        ..Default::default()
    }
}

/// Signals with an unsafe-content hit on page 1.
pub fn unsafe_signals() -> DetectorSignals {
    DetectorSignals {
        has_unsafe_pattern: true,
        unsafe_hits: vec![Citation::new("build a bomb")
            .with_page(Some(1))
            .with_source("detector:weapons")],
        ..Default::default()
    }
}

/// A fully populated result for store and rendering tests.
pub fn sample_result(doc_id: &str) -> ClassificationResult {
    let citation = Citation::new("INTERNAL ONLY")
        .with_page(Some(1))
        .with_source("final_decision");
    ClassificationResult {
        doc_id: doc_id.to_string(),
        final_category: Category::Confidential,
        secondary_tags: vec!["Internal".into()],
        confidence: 0.9,
        explanation: "Marked internal".into(),
        page_count: 2,
        image_count: 0,
        content_safety: "Content is safe for kids".into(),
        citations: vec![citation.clone()],
        raw_signals: DetectorSignals {
            has_internal_markers: true,
            ..Default::default()
        },
        llm_payload: AuditPayload {
            prompt_errors: vec![],
            prompt_flow: json!({"final_decision": {"final_category": "Confidential"}}),
            primary_raw: json!({"final_category": "Confidential", "source": "prompt_tree"}),
            secondary_llm: json!({"label": "Confidential", "confidence": 0.9}),
            dual_llm_validation: DualLlmValidation {
                agreement_score: 1.0,
                disagreements: vec![],
                resolution_strategy: "most_restrictive".into(),
                secondary_model: "static-reasoner".into(),
            },
        },
        requires_review: false,
        review_triggers: vec![],
        dual_llm_agreement: 1.0,
        dual_llm_disagreements: None,
        primary_analysis: PrimaryAnalysis {
            engine: AnalysisEngine::PromptTree,
            model: "scripted-model".into(),
            category: Category::Confidential,
            secondary_tags: vec!["Internal".into()],
            confidence: 0.9,
            explanation: "Marked internal".into(),
            citations: vec![citation],
        },
        secondary_analysis: SecondaryAnalysis {
            model: "static-reasoner".into(),
            label: Some(Category::Confidential),
            confidence: 0.9,
            explanation: "Internal plan".into(),
            content_safety: None,
            critical_info: vec![],
            needs_review: false,
            citations: vec![],
            error: None,
            raw: Value::Null,
        },
        summary: Summary {
            decision: DecisionSummary {
                category: Category::Confidential,
                confidence: 0.9,
                secondary_tags: vec!["Internal".into()],
            },
            review: ReviewSummary {
                required: false,
                triggers: vec![],
            },
            agreement: AgreementSummary {
                score: 1.0,
                disagreements: vec![],
            },
            content_safety: "Content is safe for kids".into(),
            legibility: None,
        },
        legibility_score: None,
        classified_at: Utc::now(),
    }
}
