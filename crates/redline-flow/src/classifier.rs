use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use serde_json::{json, Value};
use tracing::{info, warn};

use redline_core::config::AppConfig;
use redline_core::error::Result;
use redline_core::traits::{ModelClient, RecordStore, SecondaryReasoner};
use redline_core::types::{
    AuditPayload, ClassificationResult, DetectorSignals, DualLlmValidation, PageImage, PageMap,
};

use crate::builder::build_primary;
use crate::citations::CitationRegistry;
use crate::consensus::{compute_agreement, reconcile, RESOLUTION_STRATEGY};
use crate::engine::{FlowEngine, FlowInput};
use crate::library::FlowLibrary;
use crate::pages::{format_for_secondary, DEFAULT_SECONDARY_MAX_CHARS, DEFAULT_TRUNCATE_CHARS};
use crate::review::{review_triggers, ReviewInputs};
use crate::secondary::structure_secondary;
use crate::summary::{build_summary, DEFAULT_CONTENT_SAFETY};

/// One document to classify.
#[derive(Debug, Clone)]
pub struct ClassificationRequest {
    pub doc_id: String,
    /// 1-indexed page number to page text.
    pub pages: PageMap,
    pub signals: DetectorSignals,
    pub images: Vec<PageImage>,
    pub legibility_score: Option<f64>,
}

impl ClassificationRequest {
    pub fn new(doc_id: impl Into<String>, pages: PageMap, signals: DetectorSignals) -> Self {
        Self {
            doc_id: doc_id.into(),
            pages,
            signals,
            images: vec![],
            legibility_score: None,
        }
    }

    pub fn with_images(mut self, images: Vec<PageImage>) -> Self {
        self.images = images;
        self
    }

    pub fn with_legibility(mut self, score: f64) -> Self {
        self.legibility_score = Some(score.clamp(0.0, 1.0));
        self
    }
}

/// Tunables for a classifier.
#[derive(Debug, Clone)]
pub struct ClassifierOptions {
    pub truncate_chars: usize,
    pub secondary_max_chars: usize,
    pub default_content_safety: String,
}

impl Default for ClassifierOptions {
    fn default() -> Self {
        Self {
            truncate_chars: DEFAULT_TRUNCATE_CHARS,
            secondary_max_chars: DEFAULT_SECONDARY_MAX_CHARS,
            default_content_safety: DEFAULT_CONTENT_SAFETY.to_string(),
        }
    }
}

impl ClassifierOptions {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            truncate_chars: config.flow.truncate_chars,
            secondary_max_chars: config.classifier.secondary_max_chars,
            default_content_safety: config.classifier.default_content_safety.clone(),
        }
    }
}

/// Single-document classification pipeline.
///
/// Holds only shared, read-only collaborators, so one instance can classify
/// many documents concurrently.
pub struct Classifier {
    library: Arc<FlowLibrary>,
    engine: FlowEngine,
    secondary: Option<Arc<dyn SecondaryReasoner>>,
    store: Option<Arc<dyn RecordStore>>,
    options: ClassifierOptions,
}

impl Classifier {
    /// A classifier over the process-wide flow library.
    pub fn new(client: Arc<dyn ModelClient>) -> Self {
        Self {
            library: FlowLibrary::global(),
            engine: FlowEngine::new(client),
            secondary: None,
            store: None,
            options: ClassifierOptions::default(),
        }
    }

    pub fn with_library(mut self, library: Arc<FlowLibrary>) -> Self {
        self.library = library;
        self
    }

    pub fn with_secondary(mut self, reasoner: Arc<dyn SecondaryReasoner>) -> Self {
        self.secondary = Some(reasoner);
        self
    }

    pub fn with_store(mut self, store: Arc<dyn RecordStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_citations(mut self, registry: Arc<CitationRegistry>) -> Self {
        self.engine = self.engine.with_citations(registry);
        self
    }

    pub fn with_options(mut self, options: ClassifierOptions) -> Self {
        self.engine = self.engine.with_truncate_chars(options.truncate_chars);
        self.options = options;
        self
    }

    pub fn library(&self) -> &Arc<FlowLibrary> {
        &self.library
    }

    /// Classify one document.
    ///
    /// Model, parsing, and secondary failures degrade the result instead of
    /// failing the call. Only a broken prompt library is returned as an error.
    pub async fn classify(&self, request: ClassificationRequest) -> Result<ClassificationResult> {
        let start = Instant::now();
        let flow = self.library.definition().await?;

        let run = self
            .engine
            .run(
                &flow,
                FlowInput {
                    pages: &request.pages,
                    signals: &request.signals,
                    images: &request.images,
                },
            )
            .await;

        let primary = build_primary(&run, &request.signals, self.engine.model_name());

        let (secondary_raw, secondary_model) = self.secondary_reply(&request.pages).await;
        let secondary = structure_secondary(secondary_raw, &secondary_model);

        let agreement = compute_agreement(&primary.analysis, &secondary);
        let resolution = reconcile(&primary.analysis, &secondary);

        let content_safety = secondary
            .content_safety
            .clone()
            .filter(|s| !s.trim().is_empty())
            .unwrap_or_else(|| self.options.default_content_safety.clone());

        let triggers = review_triggers(ReviewInputs {
            confidence: resolution.confidence,
            unsafe_detector: request.signals.has_unsafe_pattern,
            prompt_errors: &run.errors,
            agreement: &agreement,
            secondary: &secondary,
        });

        let summary = build_summary(
            &resolution,
            &triggers,
            &agreement,
            &content_safety,
            request.legibility_score,
        );

        let llm_payload = AuditPayload {
            prompt_errors: run.errors.clone(),
            prompt_flow: run.to_value(),
            primary_raw: primary.raw,
            secondary_llm: secondary.raw.clone(),
            dual_llm_validation: DualLlmValidation {
                agreement_score: agreement.score,
                disagreements: agreement.disagreements.clone(),
                resolution_strategy: RESOLUTION_STRATEGY.to_string(),
                secondary_model: secondary.model.clone(),
            },
        };

        let result = ClassificationResult {
            doc_id: request.doc_id,
            final_category: resolution.category,
            secondary_tags: resolution.tags,
            confidence: resolution.confidence,
            explanation: resolution.explanation,
            page_count: request.pages.len(),
            image_count: request.images.len(),
            content_safety,
            citations: primary.analysis.citations.clone(),
            raw_signals: request.signals,
            llm_payload,
            requires_review: !triggers.is_empty(),
            review_triggers: triggers,
            dual_llm_agreement: agreement.score,
            dual_llm_disagreements: (!agreement.disagreements.is_empty())
                .then_some(agreement.disagreements),
            primary_analysis: primary.analysis,
            secondary_analysis: secondary,
            summary,
            legibility_score: request.legibility_score,
            classified_at: Utc::now(),
        };

        info!(
            doc_id = %result.doc_id,
            category = %result.final_category,
            confidence = result.confidence,
            agreement = result.dual_llm_agreement,
            requires_review = result.requires_review,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Document classified"
        );

        if let Some(store) = &self.store {
            if let Err(e) = store.save_classification(&result).await {
                warn!(doc_id = %result.doc_id, error = %e, "Failed to persist classification");
            }
        }

        Ok(result)
    }

    async fn secondary_reply(&self, pages: &PageMap) -> (Value, String) {
        let Some(reasoner) = &self.secondary else {
            return (
                json!({"error": "secondary reasoner not configured"}),
                "none".to_string(),
            );
        };
        let text = format_for_secondary(
            pages,
            self.options.truncate_chars,
            self.options.secondary_max_chars,
        );
        let reply = match reasoner.reason(&text).await {
            Ok(value) => value,
            Err(e) => {
                warn!(error = %e, "Secondary reasoning failed");
                json!({ "error": e.to_string() })
            }
        };
        (reply, reasoner.model_name().to_string())
    }
}
