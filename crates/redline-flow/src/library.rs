use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};

use serde::{Deserialize, Serialize};
use tokio::sync::OnceCell;
use tracing::{debug, info};

use redline_core::error::{RedlineError, Result};
use redline_core::types::{ChatMessage, Role, Signal};

use crate::node::PromptNode;

const BUILTIN_PROMPTS: &str = include_str!("../assets/default_prompts.toml");

/// Env var overriding the prompt library location for [`FlowLibrary::global`].
pub const LIBRARY_ENV: &str = "REDLINE_PROMPT_LIBRARY";
pub const DEFAULT_LIBRARY_PATH: &str = "config/prompt_library.toml";

/// Prompt template name used by the secondary reasoner.
pub const SECONDARY_PROMPT: &str = "secondary_reasoning";

/// A model prompt bound to a role.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromptTemplate {
    #[serde(default = "default_role")]
    pub role: Role,
    pub content: String,
}

fn default_role() -> Role {
    Role::System
}

impl PromptTemplate {
    pub fn to_message(&self) -> ChatMessage {
        ChatMessage::new(self.role, self.content.trim())
    }
}

/// On-disk prompt library layout.
#[derive(Debug, Default, Deserialize)]
struct LibraryFile {
    #[serde(default)]
    prompts: HashMap<String, PromptTemplate>,
    #[serde(default)]
    prompt_flow: Vec<PromptNode>,
}

/// A validated flow: ordered nodes plus the prompt table they reference.
#[derive(Debug, Clone, PartialEq)]
pub struct FlowDefinition {
    pub prompts: HashMap<String, PromptTemplate>,
    pub nodes: Vec<PromptNode>,
}

impl FlowDefinition {
    /// Build and validate a definition.
    pub fn new(prompts: HashMap<String, PromptTemplate>, nodes: Vec<PromptNode>) -> Result<Self> {
        let def = Self { prompts, nodes };
        def.validate()?;
        Ok(def)
    }

    /// The built-in six-node flow with the built-in prompts.
    pub fn builtin() -> Self {
        Self {
            prompts: builtin_prompts(),
            nodes: default_flow(),
        }
    }

    pub fn prompt(&self, name: &str) -> Option<&PromptTemplate> {
        self.prompts.get(name)
    }

    pub fn node(&self, id: &str) -> Option<&PromptNode> {
        self.nodes.iter().find(|n| n.id == id)
    }

    /// Check id uniqueness, dependency order, and prompt references.
    pub fn validate(&self) -> Result<()> {
        let mut seen: HashSet<&str> = HashSet::new();
        for node in &self.nodes {
            if node.id.trim().is_empty() {
                return Err(RedlineError::InvalidFlow("node with empty id".into()));
            }
            for dep in &node.depends_on {
                if !seen.contains(dep.as_str()) {
                    return Err(RedlineError::InvalidFlow(format!(
                        "node '{}' depends on '{}', which is not declared before it",
                        node.id, dep
                    )));
                }
            }
            if !self.prompts.contains_key(node.prompt_name()) {
                return Err(RedlineError::InvalidFlow(format!(
                    "node '{}' references unknown prompt '{}'",
                    node.id,
                    node.prompt_name()
                )));
            }
            if !seen.insert(node.id.as_str()) {
                return Err(RedlineError::InvalidFlow(format!(
                    "duplicate node id '{}'",
                    node.id
                )));
            }
        }
        Ok(())
    }
}

/// Parse a prompt library document. `.json` paths are JSON, everything else TOML.
///
/// Configured prompts override the built-in ones by name; an empty
/// `prompt_flow` selects the built-in flow.
pub fn parse_library(content: &str, path: &Path) -> Result<FlowDefinition> {
    let is_json = path
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));

    let file: LibraryFile = if content.trim().is_empty() {
        LibraryFile::default()
    } else if is_json {
        serde_json::from_str(content)
            .map_err(|e| RedlineError::Config(format!("{}: {}", path.display(), e)))?
    } else {
        toml::from_str(content)
            .map_err(|e| RedlineError::Config(format!("{}: {}", path.display(), e)))?
    };

    let mut prompts = builtin_prompts();
    prompts.extend(file.prompts);

    let nodes = if file.prompt_flow.is_empty() {
        debug!(path = %path.display(), "No prompt_flow configured, using built-in flow");
        default_flow()
    } else {
        file.prompt_flow
    };

    FlowDefinition::new(prompts, nodes)
}

/// Process-lifetime cache of the flow definition.
///
/// The first successful load is kept forever; concurrent first callers share
/// a single load. Callers always get an independent copy.
pub struct FlowLibrary {
    path: Option<PathBuf>,
    cache: OnceCell<Arc<FlowDefinition>>,
    loads: AtomicUsize,
}

impl FlowLibrary {
    /// A library backed by an optional file. A missing file selects the built-ins.
    pub fn new(path: Option<PathBuf>) -> Self {
        Self {
            path,
            cache: OnceCell::new(),
            loads: AtomicUsize::new(0),
        }
    }

    /// A library that never touches the filesystem.
    pub fn builtin() -> Self {
        Self::new(None)
    }

    /// A library pre-seeded with an already-built definition.
    pub fn from_definition(definition: FlowDefinition) -> Result<Self> {
        definition.validate()?;
        Ok(Self {
            path: None,
            cache: OnceCell::from(Arc::new(definition)),
            loads: AtomicUsize::new(0),
        })
    }

    /// Shared process-wide library, located via `$REDLINE_PROMPT_LIBRARY`
    /// or `config/prompt_library.toml`.
    pub fn global() -> Arc<FlowLibrary> {
        static GLOBAL: OnceLock<Arc<FlowLibrary>> = OnceLock::new();
        GLOBAL
            .get_or_init(|| {
                let path = std::env::var(LIBRARY_ENV)
                    .map(PathBuf::from)
                    .unwrap_or_else(|_| PathBuf::from(DEFAULT_LIBRARY_PATH));
                Arc::new(FlowLibrary::new(Some(path)))
            })
            .clone()
    }

    /// An independent copy of the flow definition.
    pub async fn definition(&self) -> Result<FlowDefinition> {
        Ok(self.shared().await?.as_ref().clone())
    }

    /// Look up a prompt template by name.
    pub async fn prompt(&self, name: &str) -> Result<Option<PromptTemplate>> {
        Ok(self.shared().await?.prompt(name).cloned())
    }

    /// Number of underlying loads performed so far.
    pub fn load_count(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }

    async fn shared(&self) -> Result<&Arc<FlowDefinition>> {
        self.cache
            .get_or_try_init(|| async { self.load().await.map(Arc::new) })
            .await
    }

    async fn load(&self) -> Result<FlowDefinition> {
        self.loads.fetch_add(1, Ordering::SeqCst);

        let Some(path) = &self.path else {
            return Ok(FlowDefinition::builtin());
        };

        let content = match tokio::fs::read_to_string(path).await {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!(path = %path.display(), "Prompt library not found, using built-in flow");
                return Ok(FlowDefinition::builtin());
            }
            Err(e) => return Err(RedlineError::Io(e)),
        };

        let def = parse_library(&content, path)?;
        info!(
            path = %path.display(),
            nodes = def.nodes.len(),
            prompts = def.prompts.len(),
            "Prompt library loaded"
        );
        Ok(def)
    }
}

/// Built-in prompt templates.
pub fn builtin_prompts() -> HashMap<String, PromptTemplate> {
    // The asset is compiled in and covered by tests.
    toml::from_str::<LibraryFile>(BUILTIN_PROMPTS)
        .map(|f| f.prompts)
        .unwrap_or_default()
}

/// The built-in six-node flow.
pub fn default_flow() -> Vec<PromptNode> {
    vec![
        PromptNode::new("image_analysis")
            .multimodal()
            .requires_images()
            .continue_on_error(),
        PromptNode::new("precheck").collecting_summary(),
        PromptNode::new("pii_scan")
            .depends_on(&["precheck"])
            .when_true(Signal::HasPii)
            .with_summary_pages(),
        PromptNode::new("unsafe_scan")
            .depends_on(&["precheck"])
            .with_summary_pages(),
        PromptNode::new("confidentiality_scan")
            .depends_on(&["precheck", "unsafe_scan"])
            .with_summary_pages(),
        PromptNode::new("final_decision")
            .depends_on(&["confidentiality_scan"])
            .with_summary_pages()
            .final_node(),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn toml_path() -> PathBuf {
        PathBuf::from("library.toml")
    }

    #[test]
    fn test_builtin_prompts_cover_default_flow() {
        let def = FlowDefinition::builtin();
        def.validate().unwrap();
        assert_eq!(def.nodes.len(), 6);
        assert!(def.prompt(SECONDARY_PROMPT).is_some());
        assert_eq!(def.prompt("precheck").unwrap().role, Role::System);
    }

    #[test]
    fn test_default_flow_shape() {
        let flow = default_flow();
        let ids: Vec<&str> = flow.iter().map(|n| n.id.as_str()).collect();
        assert_eq!(
            ids,
            vec!["image_analysis", "precheck", "pii_scan", "unsafe_scan", "confidentiality_scan", "final_decision"]
        );
        assert!(flow[0].is_multimodal());
        assert!(!flow[0].stop_on_error);
        assert!(flow[1].collect_summary);
        assert_eq!(flow[2].conditions.signals_must_be_true, vec![Signal::HasPii]);
        assert_eq!(flow[4].depends_on, vec!["precheck", "unsafe_scan"]);
        assert!(flow[5].final_node);
    }

    #[test]
    fn test_empty_library_uses_builtins() {
        let def = parse_library("", &toml_path()).unwrap();
        assert_eq!(def, FlowDefinition::builtin());
    }

    #[test]
    fn test_prompts_only_keeps_default_flow_with_overrides() {
        let content = r#"
[prompts.precheck]
role = "system"
content = "Custom precheck"
"#;
        let def = parse_library(content, &toml_path()).unwrap();
        assert_eq!(def.nodes, default_flow());
        assert_eq!(def.prompt("precheck").unwrap().content, "Custom precheck");
        assert!(def.prompt("final_decision").is_some());
    }

    #[test]
    fn test_custom_flow_toml() {
        let content = r#"
[prompts.triage]
content = "Triage it"

[[prompt_flow]]
id = "triage"
stop_if = [{ path = "verdict", equals = "public" }]

[[prompt_flow]]
id = "final_decision"
depends_on = ["triage"]
final_node = true
"#;
        let def = parse_library(content, &toml_path()).unwrap();
        assert_eq!(def.nodes.len(), 2);
        assert_eq!(def.nodes[0].stop_if.len(), 1);
        assert_eq!(def.prompt("triage").unwrap().role, Role::System);
    }

    #[test]
    fn test_custom_flow_json() {
        let content = r#"{
            "prompts": {"scan": {"role": "user", "content": "Scan it"}},
            "prompt_flow": [{"id": "scan", "prompt": "scan", "final_node": true}]
        }"#;
        let def = parse_library(content, Path::new("flow.json")).unwrap();
        assert_eq!(def.nodes[0].id, "scan");
        assert_eq!(def.prompt("scan").unwrap().role, Role::User);
    }

    #[test]
    fn test_rejects_duplicate_ids() {
        let content = r#"
[[prompt_flow]]
id = "precheck"
[[prompt_flow]]
id = "precheck"
"#;
        let err = parse_library(content, &toml_path()).unwrap_err();
        assert!(err.to_string().contains("duplicate node id"));
    }

    #[test]
    fn test_rejects_forward_dependency() {
        let content = r#"
[[prompt_flow]]
id = "final_decision"
depends_on = ["precheck"]
[[prompt_flow]]
id = "precheck"
"#;
        let err = parse_library(content, &toml_path()).unwrap_err();
        assert!(err.to_string().contains("not declared before"));
    }

    #[test]
    fn test_rejects_unknown_prompt() {
        let content = r#"
[[prompt_flow]]
id = "mystery"
"#;
        let err = parse_library(content, &toml_path()).unwrap_err();
        assert!(err.to_string().contains("unknown prompt 'mystery'"));
    }

    #[test]
    fn test_rejects_malformed_document() {
        let err = parse_library("prompt_flow = 3", &toml_path()).unwrap_err();
        assert!(matches!(err, RedlineError::Config(_)));
    }

    #[tokio::test]
    async fn test_missing_file_falls_back_to_builtin() {
        let lib = FlowLibrary::new(Some(PathBuf::from("/nonexistent/redline/library.toml")));
        let def = lib.definition().await.unwrap();
        assert_eq!(def.nodes, default_flow());
    }

    #[tokio::test]
    async fn test_copies_are_independent() {
        let lib = FlowLibrary::builtin();
        let mut first = lib.definition().await.unwrap();
        first.nodes.clear();
        first.prompts.clear();

        let second = lib.definition().await.unwrap();
        assert_eq!(second.nodes.len(), 6);
        assert!(!second.prompts.is_empty());
        assert_eq!(lib.load_count(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_first_callers_share_one_load() {
        let mut tmp = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        tmp.write_all(b"[prompts.precheck]\ncontent = \"p\"\n").unwrap();
        let lib = Arc::new(FlowLibrary::new(Some(tmp.path().to_path_buf())));

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let lib = lib.clone();
                tokio::spawn(async move { lib.definition().await.map(|d| d.nodes.len()) })
            })
            .collect();

        for handle in handles {
            assert_eq!(handle.await.unwrap().unwrap(), 6);
        }
        assert_eq!(lib.load_count(), 1);
    }

    #[tokio::test]
    async fn test_failed_load_is_not_cached() {
        let mut tmp = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        tmp.write_all(b"[[prompt_flow]]\nid = \"ghost\"\n").unwrap();
        let lib = FlowLibrary::new(Some(tmp.path().to_path_buf()));

        assert!(lib.definition().await.is_err());
        assert!(lib.definition().await.is_err());
        assert_eq!(lib.load_count(), 2);
    }

    #[test]
    fn test_global_is_shared() {
        assert!(Arc::ptr_eq(&FlowLibrary::global(), &FlowLibrary::global()));
    }

    #[tokio::test]
    async fn test_from_definition_skips_loading() {
        let def = FlowDefinition::new(builtin_prompts(), vec![PromptNode::new("precheck")]).unwrap();
        let lib = FlowLibrary::from_definition(def).unwrap();
        assert_eq!(lib.definition().await.unwrap().nodes.len(), 1);
        assert_eq!(lib.load_count(), 0);
    }
}
