use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{RedlineError, Result};

/// Top-level Redline configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Model driving the prompt flow.
    pub model: ModelConfig,
    /// Model producing the independent second opinion. Defaults to `model`.
    #[serde(default)]
    pub secondary: Option<ModelConfig>,
    #[serde(default)]
    pub flow: FlowConfig,
    #[serde(default)]
    pub classifier: ClassifierConfig,
    #[serde(default)]
    pub store: Option<StoreConfig>,
    #[serde(default)]
    pub detectors: DetectorConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    pub model_id: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default)]
    pub temperature: f32,
    /// Per-request timeout in seconds.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default)]
    pub extra_headers: HashMap<String, String>,
}

fn default_provider() -> String { "openai".to_string() }
fn default_max_tokens() -> u32 { 2048 }
fn default_timeout_secs() -> u64 { 120 }

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlowConfig {
    /// Prompt library file. When unset, `$REDLINE_PROMPT_LIBRARY` or
    /// `config/prompt_library.toml` is tried, then the built-in flow.
    #[serde(default)]
    pub library_path: Option<String>,
    /// Maximum characters of each page sent to a prompt node.
    #[serde(default = "default_truncate_chars")]
    pub truncate_chars: usize,
}

impl Default for FlowConfig {
    fn default() -> Self {
        Self {
            library_path: None,
            truncate_chars: default_truncate_chars(),
        }
    }
}

fn default_truncate_chars() -> usize { 1200 }

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassifierConfig {
    /// Character budget for the text handed to the secondary reasoner.
    #[serde(default = "default_secondary_max_chars")]
    pub secondary_max_chars: usize,
    /// Content-safety note used when the secondary model gives none.
    #[serde(default = "default_content_safety")]
    pub default_content_safety: String,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            secondary_max_chars: default_secondary_max_chars(),
            default_content_safety: default_content_safety(),
        }
    }
}

fn default_secondary_max_chars() -> usize { 8000 }
fn default_content_safety() -> String { "Content is safe for kids".to_string() }

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default = "default_store_enabled")]
    pub enabled: bool,
    #[serde(default = "default_store_path")]
    pub path: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            path: default_store_path(),
        }
    }
}

fn default_store_enabled() -> bool { true }
fn default_store_path() -> String { "~/.redline/records.db".to_string() }

/// A labelled regex used by the pattern detector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectorPattern {
    pub pattern: String,
    pub label: String,
}

impl DetectorPattern {
    fn new(pattern: &str, label: &str) -> Self {
        Self {
            pattern: pattern.to_string(),
            label: label.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectorConfig {
    #[serde(default = "DetectorConfig::default_pii")]
    pub pii: Vec<DetectorPattern>,
    #[serde(default = "DetectorConfig::default_unsafe")]
    pub unsafe_content: Vec<DetectorPattern>,
    #[serde(default = "DetectorConfig::default_internal")]
    pub internal_markers: Vec<DetectorPattern>,
    /// Maximum hit spans kept per detector.
    #[serde(default = "default_max_hits")]
    pub max_hits: usize,
}

fn default_max_hits() -> usize { 20 }

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            pii: Self::default_pii(),
            unsafe_content: Self::default_unsafe(),
            internal_markers: Self::default_internal(),
            max_hits: default_max_hits(),
        }
    }
}

impl DetectorConfig {
    pub fn default_pii() -> Vec<DetectorPattern> {
        vec![
            DetectorPattern::new(r"\b\d{3}-\d{2}-\d{4}\b", "ssn"),
            DetectorPattern::new(r"\b[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}\b", "email"),
            DetectorPattern::new(r"\b(?:\+?1[-. ]?)?\(?\d{3}\)?[-. ]\d{3}[-. ]\d{4}\b", "phone"),
            DetectorPattern::new(r"\b(?:\d[ -]?){13,16}\b", "card_number"),
            DetectorPattern::new(r"(?i)\b(?:date of birth|dob)\s*[:\-]", "date_of_birth"),
        ]
    }

    pub fn default_unsafe() -> Vec<DetectorPattern> {
        vec![
            DetectorPattern::new(r"(?i)\b(?:bomb|explosive)s?\b", "explosives"),
            DetectorPattern::new(r"(?i)\bkill(?:ing)?\s+(?:yourself|himself|herself|them)\b", "violence"),
            DetectorPattern::new(r"(?i)\bself[- ]harm\b", "self_harm"),
            DetectorPattern::new(r"(?i)\b(?:porn|explicit sexual)\b", "sexual_content"),
        ]
    }

    pub fn default_internal() -> Vec<DetectorPattern> {
        vec![
            DetectorPattern::new(r"(?i)\binternal use only\b", "internal_use"),
            DetectorPattern::new(r"(?i)\bconfidential\b", "confidential"),
            DetectorPattern::new(r"(?i)\bproprietary\b", "proprietary"),
            DetectorPattern::new(r"(?i)\bdo not distribute\b", "no_distribution"),
        ]
    }
}

impl AppConfig {
    /// Load config from a TOML file, with env var expansion.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|_| RedlineError::ConfigNotFound(path.display().to_string()))?;

        // Expand ${ENV_VAR} references
        let expanded = expand_env_vars(&content);

        toml::from_str(&expanded)
            .map_err(|e| RedlineError::Config(e.to_string()))
    }

    /// Secondary model config, falling back to the primary model.
    pub fn secondary_model(&self) -> &ModelConfig {
        self.secondary.as_ref().unwrap_or(&self.model)
    }

    /// Resolved record store path, if persistence is enabled.
    pub fn store_path(&self) -> Option<PathBuf> {
        self.store
            .as_ref()
            .filter(|s| s.enabled)
            .map(|s| expand_home(&s.path))
    }

    /// Resolved prompt library path, if one is configured.
    pub fn library_path(&self) -> Option<PathBuf> {
        self.flow.library_path.as_deref().map(expand_home)
    }
}

/// Expand a leading `~/` to the home directory.
pub fn expand_home(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs_home() {
            return home.join(rest);
        }
    }
    PathBuf::from(path)
}

/// Expand `${ENV_VAR}` patterns in a string.
pub fn expand_env_vars(input: &str) -> String {
    let mut result = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(c) = chars.next() {
        if c == '$' && chars.peek() == Some(&'{') {
            chars.next(); // consume '{'
            let mut var_name = String::new();
            for c in chars.by_ref() {
                if c == '}' {
                    break;
                }
                var_name.push(c);
            }
            match std::env::var(&var_name) {
                Ok(val) => result.push_str(&val),
                Err(_) => {
                    // Keep original if env var not set
                    result.push_str(&format!("${{{}}}", var_name));
                }
            }
        } else {
            result.push(c);
        }
    }
    result
}

fn dirs_home() -> Option<PathBuf> {
    std::env::var("HOME").ok().map(PathBuf::from)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expand_env_vars() {
        std::env::set_var("TEST_REDLINE_VAR", "hello");
        let result = expand_env_vars("key = \"${TEST_REDLINE_VAR}\"");
        assert_eq!(result, "key = \"hello\"");
        std::env::remove_var("TEST_REDLINE_VAR");
    }

    #[test]
    fn test_expand_env_vars_missing() {
        let result = expand_env_vars("key = \"${NONEXISTENT_REDLINE_VAR}\"");
        assert_eq!(result, "key = \"${NONEXISTENT_REDLINE_VAR}\"");
    }

    #[test]
    fn test_defaults_from_minimal_toml() {
        let toml_str = r#"
[model]
model_id = "gpt-4o"
"#;
        let config: AppConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.model.provider, "openai");
        assert_eq!(config.model.max_tokens, 2048);
        assert_eq!(config.flow.truncate_chars, 1200);
        assert!(config.flow.library_path.is_none());
        assert_eq!(config.classifier.secondary_max_chars, 8000);
        assert_eq!(config.classifier.default_content_safety, "Content is safe for kids");
        assert!(config.store.is_none());
        assert!(config.store_path().is_none());
        assert_eq!(config.detectors.pii.len(), DetectorConfig::default_pii().len());
        assert_eq!(config.secondary_model().model_id, "gpt-4o");
    }

    #[test]
    fn test_secondary_and_store_sections() {
        let toml_str = r#"
[model]
provider = "gemini"
model_id = "gemini-1.5-pro"

[secondary]
model_id = "gpt-4o-mini"

[store]
path = "/var/lib/redline/records.db"

[detectors]
pii = [{ pattern = "EMP-\\d+", label = "employee_id" }]
"#;
        let config: AppConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.secondary_model().model_id, "gpt-4o-mini");
        assert_eq!(config.secondary_model().provider, "openai");
        assert_eq!(
            config.store_path(),
            Some(PathBuf::from("/var/lib/redline/records.db"))
        );
        assert_eq!(config.detectors.pii.len(), 1);
        assert_eq!(config.detectors.pii[0].label, "employee_id");
        // Untouched lists keep their built-in patterns
        assert!(!config.detectors.unsafe_content.is_empty());
    }

    #[test]
    fn test_disabled_store_has_no_path() {
        let toml_str = r#"
[model]
model_id = "gpt-4o"

[store]
enabled = false
"#;
        let config: AppConfig = toml::from_str(toml_str).unwrap();
        assert!(config.store_path().is_none());
    }
}
