mod doctor;
mod document;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context};
use clap::{CommandFactory, Parser, Subcommand};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use redline_core::config::{AppConfig, ModelConfig, StoreConfig};
use redline_core::detect::PatternDetector;
use redline_core::traits::{RecordStore, SignalDetector};
use redline_core::types::ClassificationResult;

use redline_flow::library::SECONDARY_PROMPT;
use redline_flow::{ClassificationRequest, Classifier, ClassifierOptions, FlowLibrary};
use redline_llm::LlmSecondaryReasoner;
use redline_store::{DocRecord, DocStatus, SqliteRecordStore};

#[derive(Parser)]
#[command(name = "redline", version, about = "Dual-model document sensitivity classifier")]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "redline.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Classify a document (.txt with form-feed page breaks, or extracted .json)
    Classify {
        /// Document to classify
        file: PathBuf,
        /// Document ID (auto-generated if not provided)
        #[arg(long)]
        doc_id: Option<String>,
        /// Print the full result as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show the active prompt flow
    Flow,
    /// List recent classifications
    History {
        /// Number of records to show
        #[arg(long, default_value = "20")]
        limit: usize,
    },
    /// Show the stored classification for a document
    Show {
        doc_id: String,
    },
    /// Run configuration health checks
    Doctor,
    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("redline=info,warn")),
        )
        .with_target(false)
        .init();

    let cli = Cli::parse();

    // Handle completions before config loading
    if let Commands::Completions { shell } = &cli.command {
        let mut cmd = Cli::command();
        clap_complete::generate(*shell, &mut cmd, "redline", &mut std::io::stdout());
        return Ok(());
    }

    let config = load_config(&cli.config)?;
    let library = match config.library_path() {
        Some(path) => Arc::new(FlowLibrary::new(Some(path))),
        None => FlowLibrary::global(),
    };

    match cli.command {
        Commands::Classify { file, doc_id, json } => {
            let doc_id = doc_id.unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
            let result = classify_file(&config, library, &file, doc_id).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&result)?);
            } else {
                print_result(&result);
            }
        }
        Commands::Flow => {
            let def = library.definition().await?;
            for (i, node) in def.nodes.iter().enumerate() {
                let mut flags = Vec::new();
                if node.is_multimodal() {
                    flags.push("multimodal".to_string());
                }
                if !node.depends_on.is_empty() {
                    flags.push(format!("after {}", node.depends_on.join(",")));
                }
                if !node.conditions.signals_must_be_true.is_empty() {
                    let names: Vec<_> = node
                        .conditions
                        .signals_must_be_true
                        .iter()
                        .map(|s| s.as_str())
                        .collect();
                    flags.push(format!("if {}", names.join("&")));
                }
                if !node.stop_on_error {
                    flags.push("continue-on-error".to_string());
                }
                if node.final_node {
                    flags.push("final".to_string());
                }
                println!(
                    "{:>2}. {:<24} prompt={:<24} {}",
                    i + 1,
                    node.id,
                    node.prompt_name(),
                    flags.join(" ")
                );
            }
        }
        Commands::History { limit } => {
            let store = open_store(&config)?;
            for record in store.recent(limit)? {
                println!(
                    "{}  {}  {:<16} {:.2}{}",
                    record.classified_at.format("%Y-%m-%d %H:%M:%S"),
                    record.doc_id,
                    record.final_category.as_str(),
                    record.confidence,
                    if record.requires_review { "  [review]" } else { "" }
                );
            }
        }
        Commands::Show { doc_id } => {
            let store = open_store(&config)?;
            match store.get(&doc_id)? {
                Some(result) => println!("{}", serde_json::to_string_pretty(&result)?),
                None => bail!("no classification stored for {}", doc_id),
            }
        }
        Commands::Doctor => doctor::run_doctor(&config, &library).await,
        Commands::Completions { .. } => unreachable!("handled before config load"),
    }

    Ok(())
}

async fn classify_file(
    config: &AppConfig,
    library: Arc<FlowLibrary>,
    path: &Path,
    doc_id: String,
) -> anyhow::Result<ClassificationResult> {
    let doc = document::load(path)?;
    let detector = PatternDetector::new(&config.detectors);
    let signals = detector.detect(&doc.pages);

    let client = redline_llm::create_client(&config.model)?;
    let mut classifier = Classifier::new(client)
        .with_library(library.clone())
        .with_options(ClassifierOptions::from_config(config));

    match library.prompt(SECONDARY_PROMPT).await? {
        Some(prompt) => {
            let secondary_client = redline_llm::create_client(config.secondary_model())?;
            classifier = classifier.with_secondary(Arc::new(LlmSecondaryReasoner::new(
                secondary_client,
                prompt.content,
            )));
        }
        None => warn!(prompt = SECONDARY_PROMPT, "Prompt missing, secondary model disabled"),
    }

    let store = match config.store_path() {
        Some(db_path) => match SqliteRecordStore::open(&db_path) {
            Ok(store) => Some(Arc::new(store)),
            Err(e) => {
                warn!(error = %e, "Record store unavailable, results will not be persisted");
                None
            }
        },
        None => None,
    };
    if let Some(store) = &store {
        let record = DocRecord::new(&doc_id, &doc.filename)
            .with_counts(doc.pages.len(), doc.images.len())
            .with_source_path(path.display().to_string());
        if let Err(e) = store.insert_doc_record(&record) {
            warn!(doc_id = %doc_id, error = %e, "Failed to register document");
        }
        classifier = classifier.with_store(store.clone() as Arc<dyn RecordStore>);
    }

    info!(
        doc_id = %doc_id,
        pages = doc.pages.len(),
        images = doc.images.len(),
        pii = signals.has_pii,
        unsafe_pattern = signals.has_unsafe_pattern,
        "Classifying document"
    );

    let mut request = ClassificationRequest::new(&doc_id, doc.pages, signals).with_images(doc.images);
    if let Some(score) = doc.legibility_score {
        request = request.with_legibility(score);
    }

    match classifier.classify(request).await {
        Ok(result) => Ok(result),
        Err(e) => {
            if let Some(store) = &store {
                mark_failed(store, &doc_id);
            }
            Err(e.into())
        }
    }
}

/// Best-effort status update after a failed classification. Returns whether a row changed.
fn mark_failed(store: &SqliteRecordStore, doc_id: &str) -> bool {
    match store.update_doc_status(doc_id, DocStatus::Failed) {
        Ok(true) => true,
        Ok(false) => {
            warn!(doc_id = %doc_id, "No document record to mark failed");
            false
        }
        Err(e) => {
            warn!(doc_id = %doc_id, error = %e, "Failed to mark document failed");
            false
        }
    }
}

fn print_result(result: &ClassificationResult) {
    println!("Document:    {}", result.doc_id);
    println!(
        "Category:    {} ({:.2})",
        result.final_category, result.confidence
    );
    if !result.secondary_tags.is_empty() {
        println!("Tags:        {}", result.secondary_tags.join(", "));
    }
    println!("Safety:      {}", result.content_safety);
    println!("Agreement:   {:.2}", result.dual_llm_agreement);
    if result.requires_review {
        let triggers: Vec<_> = result.review_triggers.iter().map(|t| t.as_str()).collect();
        println!("Review:      required ({})", triggers.join(", "));
    }
    println!("Explanation: {}", result.explanation);
    for citation in &result.citations {
        let page = citation
            .page
            .map(|p| format!("p{}", p))
            .unwrap_or_else(|| "-".to_string());
        println!("  [{}] {}", page, truncate(&citation.snippet, 120));
    }
}

fn open_store(config: &AppConfig) -> anyhow::Result<SqliteRecordStore> {
    let path = config
        .store_path()
        .context("record store is disabled; add a [store] section to the config")?;
    Ok(SqliteRecordStore::open(&path)?)
}

fn load_config(path: &Path) -> anyhow::Result<AppConfig> {
    if path.exists() {
        return Ok(AppConfig::load(path)?);
    }

    // Check for config in common locations
    if let Some(home_config) = dirs_home().map(|h| h.join(".redline").join("config.toml")) {
        if home_config.exists() {
            info!(path = %home_config.display(), "Loading config from home directory");
            return Ok(AppConfig::load(&home_config)?);
        }
    }

    eprintln!("Warning: No config file found. Set OPENAI_API_KEY or create redline.toml");
    eprintln!("See redline.toml.example for reference.");
    Ok(create_env_config())
}

fn create_env_config() -> AppConfig {
    let (provider, model_id, api_key) = if let Ok(key) = std::env::var("OPENAI_API_KEY") {
        ("openai", "gpt-4o-mini", Some(key))
    } else if let Ok(key) = std::env::var("GEMINI_API_KEY") {
        ("gemini", "gemini-1.5-pro-latest", Some(key))
    } else {
        // Default to Ollama (local)
        ("ollama", "llama3.2", None)
    };

    let model = ModelConfig {
        provider: provider.to_string(),
        model_id: model_id.to_string(),
        api_key,
        base_url: None,
        max_tokens: 2048,
        temperature: 0.0,
        timeout_secs: 120,
        extra_headers: Default::default(),
    };

    AppConfig {
        model,
        secondary: None,
        flow: Default::default(),
        classifier: Default::default(),
        store: Some(StoreConfig::default()),
        detectors: Default::default(),
    }
}

fn dirs_home() -> Option<PathBuf> {
    std::env::var("HOME").ok().map(PathBuf::from)
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mark_failed_updates_registered_doc() {
        let store = SqliteRecordStore::in_memory().unwrap();
        store
            .insert_doc_record(&DocRecord::new("doc-1", "plan.txt"))
            .unwrap();

        assert!(mark_failed(&store, "doc-1"));
        let doc = store.get_doc("doc-1").unwrap().unwrap();
        assert_eq!(doc.status, DocStatus::Failed);

        assert!(!mark_failed(&store, "missing"));
    }

    #[test]
    fn test_truncate_is_char_safe() {
        assert_eq!(truncate("héllo", 2), "hé");
        assert_eq!(truncate("ok", 10), "ok");
    }
}
