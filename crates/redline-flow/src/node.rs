use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

use redline_core::types::{DetectorSignals, Signal};

/// How a prompt node talks to the model client.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunnerKind {
    #[default]
    Standard,
    Multimodal,
}

/// Run conditions evaluated before a node executes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NodeConditions {
    #[serde(default, alias = "has_images")]
    pub requires_images: bool,
    #[serde(default, alias = "signals_true")]
    pub signals_must_be_true: Vec<Signal>,
    #[serde(default, alias = "signals_false")]
    pub signals_must_be_false: Vec<Signal>,
}

impl NodeConditions {
    /// Whether the node may run given the detector signals and image availability.
    pub fn satisfied(&self, signals: &DetectorSignals, has_images: bool) -> bool {
        if self.requires_images && !has_images {
            return false;
        }
        if self.signals_must_be_true.iter().any(|s| !signals.get(*s)) {
            return false;
        }
        !self.signals_must_be_false.iter().any(|s| signals.get(*s))
    }
}

/// Halts the flow when the value at `path` in a node's output matches.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StopRule {
    /// Dotted path into the output; integer segments index arrays.
    #[serde(alias = "field")]
    pub path: String,
    /// Exact value to compare against. Without it, any truthy value fires.
    #[serde(default, deserialize_with = "present", skip_serializing_if = "Option::is_none")]
    pub equals: Option<Value>,
}

impl StopRule {
    pub fn truthy(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            equals: None,
        }
    }

    pub fn equals(path: impl Into<String>, value: Value) -> Self {
        Self {
            path: path.into(),
            equals: Some(value),
        }
    }
}

// An explicit `equals: null` must stay distinguishable from a missing key.
fn present<'de, D>(deserializer: D) -> std::result::Result<Option<Value>, D::Error>
where
    D: Deserializer<'de>,
{
    Value::deserialize(deserializer).map(Some)
}

/// One configured step of the classification flow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromptNode {
    /// Unique identifier within the flow.
    pub id: String,
    /// Prompt template name. Empty means "same as id".
    #[serde(default)]
    pub prompt: String,
    /// Citation extraction tag. Defaults to the node id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(default)]
    pub runner: RunnerKind,
    #[serde(default)]
    pub conditions: NodeConditions,
    /// Nodes whose output must be present before this one runs.
    #[serde(default)]
    pub depends_on: Vec<String>,
    /// Also skip when a dependency ran but failed.
    #[serde(default)]
    pub require_successful_deps: bool,
    /// Send collected page summaries instead of the raw pages.
    #[serde(default)]
    pub use_summary_pages: bool,
    /// Harvest `{page, summary}` entries from this node's output.
    #[serde(default)]
    pub collect_summary: bool,
    #[serde(default = "default_stop_on_error")]
    pub stop_on_error: bool,
    #[serde(default)]
    pub stop_if: Vec<StopRule>,
    #[serde(default)]
    pub final_node: bool,
    /// Static payload merged into the request's `extra` block.
    #[serde(default)]
    pub extra: Map<String, Value>,
}

fn default_stop_on_error() -> bool {
    true
}

impl PromptNode {
    /// Create a standard node using a prompt template of the same name.
    pub fn new(id: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            prompt: id.clone(),
            id,
            kind: None,
            runner: RunnerKind::Standard,
            conditions: NodeConditions::default(),
            depends_on: vec![],
            require_successful_deps: false,
            use_summary_pages: false,
            collect_summary: false,
            stop_on_error: default_stop_on_error(),
            stop_if: vec![],
            final_node: false,
            extra: Map::new(),
        }
    }

    pub fn with_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.prompt = prompt.into();
        self
    }

    pub fn with_kind(mut self, kind: impl Into<String>) -> Self {
        self.kind = Some(kind.into());
        self
    }

    pub fn multimodal(mut self) -> Self {
        self.runner = RunnerKind::Multimodal;
        self
    }

    pub fn requires_images(mut self) -> Self {
        self.conditions.requires_images = true;
        self
    }

    pub fn when_true(mut self, signal: Signal) -> Self {
        self.conditions.signals_must_be_true.push(signal);
        self
    }

    pub fn when_false(mut self, signal: Signal) -> Self {
        self.conditions.signals_must_be_false.push(signal);
        self
    }

    pub fn depends_on(mut self, ids: &[&str]) -> Self {
        self.depends_on = ids.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn with_summary_pages(mut self) -> Self {
        self.use_summary_pages = true;
        self
    }

    pub fn collecting_summary(mut self) -> Self {
        self.collect_summary = true;
        self
    }

    pub fn continue_on_error(mut self) -> Self {
        self.stop_on_error = false;
        self
    }

    pub fn stop_if(mut self, rule: StopRule) -> Self {
        self.stop_if.push(rule);
        self
    }

    pub fn final_node(mut self) -> Self {
        self.final_node = true;
        self
    }

    pub fn with_extra(mut self, key: impl Into<String>, value: Value) -> Self {
        self.extra.insert(key.into(), value);
        self
    }

    /// Template name used to look up the prompt.
    pub fn prompt_name(&self) -> &str {
        if self.prompt.is_empty() {
            &self.id
        } else {
            &self.prompt
        }
    }

    /// Tag selecting the citation extractor for this node.
    pub fn kind(&self) -> &str {
        self.kind.as_deref().unwrap_or(&self.id)
    }

    pub fn is_multimodal(&self) -> bool {
        self.runner == RunnerKind::Multimodal
    }
}
