use std::io::Write;
use std::sync::Arc;

use serde_json::json;

use redline_core::detect::PatternDetector;
use redline_core::traits::{RecordStore, SignalDetector};
use redline_core::types::{AnalysisEngine, Category, DetectorSignals, ReviewTrigger};
use redline_flow::library::SECONDARY_PROMPT;
use redline_flow::{ClassificationRequest, Classifier, FlowLibrary};
use redline_llm::LlmSecondaryReasoner;
use redline_store::SqliteRecordStore;
use redline_test_utils::{
    sample_pages, unsafe_signals, FailingReasoner, ScriptedModelClient, StaticReasoner,
};

fn builtin(client: ScriptedModelClient) -> Classifier {
    Classifier::new(Arc::new(client)).with_library(Arc::new(FlowLibrary::builtin()))
}

fn library_file(content: &str) -> tempfile::NamedTempFile {
    let mut tmp = tempfile::Builder::new()
        .suffix(".toml")
        .tempfile()
        .expect("create temp file");
    tmp.write_all(content.as_bytes()).expect("write library");
    tmp
}

#[tokio::test]
async fn test_unsafe_signal_with_every_model_down() {
    let classifier = builtin(ScriptedModelClient::new())
        .with_secondary(Arc::new(FailingReasoner::new("connection refused")));
    let request = ClassificationRequest::new("doc-unsafe", sample_pages(), unsafe_signals());

    let result = classifier.classify(request).await.expect("classify never fails on model errors");
    assert_eq!(result.final_category, Category::Unsafe);
    assert_eq!(result.confidence, 0.7);
    assert_eq!(result.secondary_tags, vec!["Safety-Risk".to_string()]);
    assert_eq!(result.primary_analysis.engine, AnalysisEngine::Fallback);
    assert_eq!(result.dual_llm_agreement, 0.0);
    assert!(result.secondary_analysis.is_error());
    assert!(result.requires_review);
    assert!(result.review_triggers.contains(&ReviewTrigger::UnsafeDetector));
    assert!(result.review_triggers.contains(&ReviewTrigger::PromptErrors));
    assert_eq!(result.citations[0].snippet, "build a bomb");
}

#[tokio::test]
async fn test_clean_document_with_every_model_down() {
    let classifier = builtin(ScriptedModelClient::new());
    let request =
        ClassificationRequest::new("doc-clean", sample_pages(), DetectorSignals::default());

    let result = classifier.classify(request).await.unwrap();
    assert_eq!(result.final_category, Category::Public);
    assert!(result.secondary_tags.is_empty());
    assert!(result.citations.is_empty());
    assert_eq!(result.secondary_analysis.model, "none");
}

#[tokio::test]
async fn test_detector_to_store_round_trip() {
    let pages = sample_pages();
    let signals = PatternDetector::default().detect(&pages);
    assert!(signals.has_pii);

    let client = ScriptedModelClient::new()
        .reply("precheck", json!([{"page": 2, "summary": "Contact details with SSN"}]))
        .reply("pii_scan", json!({"has_pii": true, "citations": [{"page": 2, "text": "123-45-6789"}]}))
        .reply("unsafe_scan", json!({"is_unsafe": false}))
        .reply("confidentiality_scan", json!({"is_confidential": true}))
        .reply(
            "final_decision",
            json!({
                "final_category": "Highly Sensitive",
                "secondary_tags": ["PII"],
                "confidence": "0.92",
                "explanation": "Contains an SSN"
            }),
        );
    let reasoner = StaticReasoner::new(json!({
        "label": "Highly Sensitive",
        "confidence": 0.88,
        "explanation": "SSN on page 2",
        "critical_info": ["SSN"],
        "content_safety": "Safe for all audiences"
    }));
    let store = Arc::new(SqliteRecordStore::in_memory().unwrap());

    let classifier = builtin(client)
        .with_secondary(Arc::new(reasoner))
        .with_store(store.clone() as Arc<dyn RecordStore>);
    let result = classifier
        .classify(ClassificationRequest::new("doc-pii", pages, signals).with_legibility(0.95))
        .await
        .unwrap();

    assert_eq!(result.final_category, Category::HighlySensitive);
    assert_eq!(result.secondary_tags, vec!["SSN".to_string()]);
    assert_eq!(result.confidence, 0.88);
    assert_eq!(result.content_safety, "Safe for all audiences");
    assert_eq!(result.dual_llm_agreement, 1.0);

    let stored = store.get("doc-pii").unwrap().expect("classification persisted");
    assert_eq!(stored.final_category, Category::HighlySensitive);
    assert_eq!(stored.legibility_score, Some(0.95));
    assert_eq!(stored.summary.content_safety, "Safe for all audiences");
    assert_eq!(
        stored.llm_payload.prompt_flow["final_decision"]["final_category"],
        json!("Highly Sensitive")
    );
}

#[tokio::test]
async fn test_llm_secondary_reasoner_over_model_client() {
    let library = Arc::new(FlowLibrary::builtin());
    let prompt = library
        .prompt(SECONDARY_PROMPT)
        .await
        .unwrap()
        .expect("built-in secondary prompt");

    // The secondary request carries plain text, so it has no node id
    let secondary_client = ScriptedModelClient::new().reply(
        "",
        json!({"label": "Public", "confidence": 0.6, "reasoning": "Nothing sensitive"}),
    );
    let reasoner = LlmSecondaryReasoner::new(Arc::new(secondary_client.clone()), prompt.content);

    let classifier = Classifier::new(Arc::new(ScriptedModelClient::new()))
        .with_library(library)
        .with_secondary(Arc::new(reasoner));
    let result = classifier
        .classify(ClassificationRequest::new(
            "doc-sec",
            sample_pages(),
            DetectorSignals::default(),
        ))
        .await
        .unwrap();

    assert_eq!(result.secondary_analysis.model, "scripted-model");
    assert_eq!(result.secondary_analysis.label, Some(Category::Public));
    assert_eq!(result.final_category, Category::Public);

    let calls = secondary_client.calls();
    assert_eq!(calls.len(), 1);
    assert!(calls[0].messages[1].content.starts_with("=== Page 1 ==="));
}

#[tokio::test]
async fn test_failing_node_halts_custom_flow() {
    let tmp = library_file(
        r#"
[prompts.triage]
content = "Triage the document."

[prompts.decide]
content = "Decide the category."

[[prompt_flow]]
id = "triage"

[[prompt_flow]]
id = "decide"
depends_on = ["triage"]
"#,
    );
    let client = ScriptedModelClient::new()
        .fail("triage", "HTTP 503")
        .reply("decide", json!({"final_category": "Public"}));
    let classifier = Classifier::new(Arc::new(client.clone()))
        .with_library(Arc::new(FlowLibrary::new(Some(tmp.path().to_path_buf()))));

    let signals = DetectorSignals {
        has_internal_markers: true,
        ..Default::default()
    };
    let result = classifier
        .classify(ClassificationRequest::new("doc-halt", sample_pages(), signals))
        .await
        .unwrap();

    assert_eq!(client.called_nodes(), vec!["triage".to_string()]);
    assert_eq!(result.llm_payload.prompt_errors.len(), 1);
    assert_eq!(result.llm_payload.prompt_flow["triage"]["failed"], json!(true));
    assert_eq!(result.primary_analysis.engine, AnalysisEngine::Fallback);
    assert_eq!(result.final_category, Category::Confidential);
}

#[tokio::test]
async fn test_last_node_is_terminal_without_final_marker() {
    let tmp = library_file(
        r#"
[prompts.scan]
content = "Scan."

[prompts.decide]
content = "Decide."

[[prompt_flow]]
id = "scan"

[[prompt_flow]]
id = "decide"
"#,
    );
    let client = ScriptedModelClient::new()
        .reply("scan", json!({"final_category": "Unsafe"}))
        .reply(
            "decide",
            json!({"final_category": "Confidential", "confidence": 0.95, "explanation": "Internal"}),
        );
    let classifier = Classifier::new(Arc::new(client))
        .with_library(Arc::new(FlowLibrary::new(Some(tmp.path().to_path_buf()))))
        .with_secondary(Arc::new(StaticReasoner::new(json!({
            "label": "Confidential",
            "confidence": 0.95,
            "needs_review": false
        }))));

    let result = classifier
        .classify(ClassificationRequest::new(
            "doc-last",
            sample_pages(),
            DetectorSignals::default(),
        ))
        .await
        .unwrap();

    assert_eq!(result.primary_analysis.engine, AnalysisEngine::PromptTree);
    assert_eq!(result.primary_analysis.category, Category::Confidential);
    assert!(!result.requires_review);
    assert!(result.review_triggers.is_empty());
}

#[tokio::test]
async fn test_broken_library_is_the_only_error() {
    let tmp = library_file("[[prompt_flow]]\nid = \"unknown_step\"\n");
    let classifier = Classifier::new(Arc::new(ScriptedModelClient::new()))
        .with_library(Arc::new(FlowLibrary::new(Some(tmp.path().to_path_buf()))));

    let err = classifier
        .classify(ClassificationRequest::new(
            "doc-err",
            sample_pages(),
            DetectorSignals::default(),
        ))
        .await
        .unwrap_err();
    assert!(err.to_string().contains("unknown prompt"));
}
