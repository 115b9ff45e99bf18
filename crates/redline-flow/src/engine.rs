use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use serde_json::{json, Map, Value};
use tracing::{debug, info, warn};

use redline_core::traits::ModelClient;
use redline_core::types::{ChatMessage, Citation, DetectorSignals, PageImage, PageMap};

use crate::citations::{lenient_int, non_empty_str, CitationRegistry};
use crate::library::FlowDefinition;
use crate::node::PromptNode;
use crate::pages::{prepare_pages, DEFAULT_TRUNCATE_CHARS};
use crate::path::first_firing;

/// Why a node failed to produce output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeErrorKind {
    /// The model client returned an error.
    ClientError,
    /// The node references a prompt the definition does not carry.
    MissingPrompt,
}

impl NodeErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ClientError => "client_error",
            Self::MissingPrompt => "missing_prompt",
        }
    }
}

impl fmt::Display for NodeErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct NodeFailure {
    pub kind: NodeErrorKind,
    pub detail: String,
}

/// Result of executing one prompt node.
#[derive(Debug, Clone, PartialEq)]
pub enum NodeOutcome {
    Completed(Value),
    Failed(NodeFailure),
}

impl NodeOutcome {
    pub fn failed(kind: NodeErrorKind, detail: impl Into<String>) -> Self {
        Self::Failed(NodeFailure {
            kind,
            detail: detail.into(),
        })
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, Self::Failed(_))
    }

    pub fn output(&self) -> Option<&Value> {
        match self {
            Self::Completed(v) => Some(v),
            Self::Failed(_) => None,
        }
    }

    /// JSON form exposed to later nodes and kept in the audit payload.
    pub fn to_value(&self, node_id: &str) -> Value {
        match self {
            Self::Completed(v) => v.clone(),
            Self::Failed(f) => json!({
                "error": f.detail,
                "failed": true,
                "kind": f.kind.as_str(),
                "prompt_node": node_id,
            }),
        }
    }
}

/// Everything a flow run produced.
#[derive(Debug, Clone, Default)]
pub struct FlowRun {
    /// Outcome per executed node.
    pub outputs: HashMap<String, NodeOutcome>,
    /// Executed node ids in execution order.
    pub order: Vec<String>,
    /// Failed node ids in execution order.
    pub errors: Vec<String>,
    pub terminal: Option<String>,
    /// Citations harvested from completed nodes, not yet deduplicated.
    pub citations: Vec<Citation>,
    /// Page summaries collected along the way.
    pub summary_pages: PageMap,
}

impl FlowRun {
    pub fn outcome(&self, node_id: &str) -> Option<&NodeOutcome> {
        self.outputs.get(node_id)
    }

    pub fn terminal_outcome(&self) -> Option<&NodeOutcome> {
        self.terminal.as_deref().and_then(|id| self.outputs.get(id))
    }

    /// Node id to serialized outcome, for the audit payload.
    pub fn to_value(&self) -> Value {
        let map: Map<String, Value> = self
            .order
            .iter()
            .filter_map(|id| self.outputs.get(id).map(|o| (id.clone(), o.to_value(id))))
            .collect();
        Value::Object(map)
    }

    fn record(&mut self, node_id: &str, outcome: NodeOutcome) {
        if self.outputs.insert(node_id.to_string(), outcome).is_none() {
            self.order.push(node_id.to_string());
        }
    }
}

/// Per-document inputs to a flow run.
#[derive(Debug, Clone, Copy)]
pub struct FlowInput<'a> {
    pub pages: &'a PageMap,
    pub signals: &'a DetectorSignals,
    pub images: &'a [PageImage],
}

/// Executes a flow definition node by node, in declared order.
pub struct FlowEngine {
    client: Arc<dyn ModelClient>,
    citations: Arc<CitationRegistry>,
    truncate_chars: usize,
}

impl FlowEngine {
    pub fn new(client: Arc<dyn ModelClient>) -> Self {
        Self {
            client,
            citations: Arc::new(CitationRegistry::with_builtins()),
            truncate_chars: DEFAULT_TRUNCATE_CHARS,
        }
    }

    pub fn with_citations(mut self, registry: Arc<CitationRegistry>) -> Self {
        self.citations = registry;
        self
    }

    pub fn with_truncate_chars(mut self, chars: usize) -> Self {
        self.truncate_chars = chars;
        self
    }

    pub fn model_name(&self) -> &str {
        self.client.model_name()
    }

    /// Run the flow. Node failures are recorded, never returned.
    pub async fn run(&self, flow: &FlowDefinition, input: FlowInput<'_>) -> FlowRun {
        let start = Instant::now();
        let mut run = FlowRun::default();
        let has_images = !input.images.is_empty();

        for node in &flow.nodes {
            if !node.conditions.satisfied(input.signals, has_images) {
                debug!(node_id = %node.id, "Run conditions not met, skipping node");
                continue;
            }
            if !self.dependencies_ready(node, &run) {
                debug!(node_id = %node.id, "Dependencies not ready, skipping node");
                continue;
            }
            if node.is_multimodal() && !has_images {
                continue;
            }

            let node_start = Instant::now();
            let outcome = self.execute(flow, node, &input, &run).await;
            let elapsed_ms = node_start.elapsed().as_millis() as u64;

            match &outcome {
                NodeOutcome::Completed(_) => {
                    info!(node_id = %node.id, elapsed_ms, "Prompt node completed");
                }
                NodeOutcome::Failed(f) => {
                    warn!(
                        node_id = %node.id,
                        kind = %f.kind,
                        error = %f.detail,
                        elapsed_ms,
                        "Prompt node failed"
                    );
                }
            }

            run.record(&node.id, outcome.clone());

            match &outcome {
                NodeOutcome::Completed(output) => {
                    let found = self.citations.collect(node.kind(), &node.id, output);
                    run.citations.extend(found);
                }
                NodeOutcome::Failed(_) => {
                    run.errors.push(node.id.clone());
                    if node.stop_on_error {
                        run.terminal = Some(node.id.clone());
                        break;
                    }
                }
            }

            if let NodeOutcome::Completed(output) = &outcome {
                if node.collect_summary {
                    merge_page_summaries(output, &mut run.summary_pages);
                }
                if let Some(idx) = first_firing(&node.stop_if, output) {
                    debug!(node_id = %node.id, path = %node.stop_if[idx].path, "Stop rule fired");
                    run.terminal = Some(node.id.clone());
                    break;
                }
            }

            if node.final_node {
                run.terminal = Some(node.id.clone());
                break;
            }
        }

        if run.terminal.is_none() {
            run.terminal = flow
                .nodes
                .iter()
                .rev()
                .find(|n| run.outputs.contains_key(&n.id))
                .map(|n| n.id.clone());
        }

        info!(
            nodes_run = run.order.len(),
            errors = run.errors.len(),
            terminal = run.terminal.as_deref().unwrap_or("none"),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Flow complete"
        );
        run
    }

    fn dependencies_ready(&self, node: &PromptNode, run: &FlowRun) -> bool {
        node.depends_on.iter().all(|dep| match run.outputs.get(dep) {
            None => false,
            Some(outcome) => !(node.require_successful_deps && outcome.is_failed()),
        })
    }

    async fn execute(
        &self,
        flow: &FlowDefinition,
        node: &PromptNode,
        input: &FlowInput<'_>,
        run: &FlowRun,
    ) -> NodeOutcome {
        let Some(template) = flow.prompt(node.prompt_name()) else {
            return NodeOutcome::failed(
                NodeErrorKind::MissingPrompt,
                format!("prompt '{}' not found", node.prompt_name()),
            );
        };

        let reply = if node.is_multimodal() {
            self.client
                .invoke_with_images(&template.content, input.images)
                .await
        } else {
            let payload = self.request_payload(node, input, run);
            let messages = vec![template.to_message(), ChatMessage::user(payload.to_string())];
            self.client.invoke(messages).await
        };

        match reply {
            Ok(value) => NodeOutcome::Completed(value),
            Err(e) => NodeOutcome::failed(NodeErrorKind::ClientError, e.to_string()),
        }
    }

    fn request_payload(&self, node: &PromptNode, input: &FlowInput<'_>, run: &FlowRun) -> Value {
        let prior: Map<String, Value> = run
            .order
            .iter()
            .filter_map(|id| run.outputs.get(id).map(|o| (id.clone(), o.to_value(id))))
            .collect();

        let mut extra = Map::new();
        extra.insert(
            "detectors".into(),
            serde_json::to_value(input.signals).unwrap_or_default(),
        );
        extra.insert("prior_results".into(), Value::Object(prior));
        extra.insert("node_id".into(), Value::String(node.id.clone()));
        for (k, v) in &node.extra {
            extra.insert(k.clone(), v.clone());
        }

        let source = if node.use_summary_pages && !run.summary_pages.is_empty() {
            &run.summary_pages
        } else {
            input.pages
        };

        json!({
            "pages": prepare_pages(source, self.truncate_chars),
            "page_count": input.pages.len(),
            "extra": extra,
        })
    }
}

/// Merge `{page, summary}` entries from a node output into the summary map.
///
/// Accepts a top-level array or an object carrying `page_summaries`.
pub fn merge_page_summaries(output: &Value, summaries: &mut PageMap) {
    let entries = match output {
        Value::Array(items) => items.as_slice(),
        Value::Object(map) => match map.get("page_summaries") {
            Some(Value::Array(items)) => items.as_slice(),
            _ => return,
        },
        _ => return,
    };

    for entry in entries {
        let page = lenient_int(entry.get("page")).filter(|p| *p > 0);
        let summary = non_empty_str(entry.get("summary"));
        if let (Some(page), Some(summary)) = (page, summary) {
            if let Ok(page) = u32::try_from(page) {
                summaries.insert(page, summary.to_string());
            }
        }
    }
}
