use regex::Regex;

use redline_core::config::{AppConfig, DetectorPattern, ModelConfig};
use redline_flow::library::SECONDARY_PROMPT;
use redline_flow::FlowLibrary;

struct CheckResult {
    label: String,
    ok: bool,
    detail: String,
}

pub async fn run_doctor(config: &AppConfig, library: &FlowLibrary) {
    let checks = vec![
        check_model("Primary model", &config.model),
        check_model("Secondary model", config.secondary_model()),
        check_library(library).await,
        check_detectors(config),
        check_store(config),
    ];

    let mut ok_count = 0;
    let mut fail_count = 0;

    for check in &checks {
        let icon = if check.ok { "[OK]" } else { "[!!]" };
        println!("  {} {}: {}", icon, check.label, check.detail);
        if check.ok {
            ok_count += 1;
        } else {
            fail_count += 1;
        }
    }

    println!();
    println!("  {} passed, {} issues found", ok_count, fail_count);
}

fn check_model(label: &str, model: &ModelConfig) -> CheckResult {
    let unexpanded_key = model.api_key.as_deref().is_some_and(|k| k.starts_with("${"));
    if unexpanded_key {
        return CheckResult {
            label: label.into(),
            ok: false,
            detail: format!("api_key for '{}' references an unset variable", model.provider),
        };
    }

    match redline_llm::create_client(model) {
        Ok(client) => CheckResult {
            label: label.into(),
            ok: true,
            detail: format!("{} ({})", client.model_name(), model.provider),
        },
        Err(e) => CheckResult {
            label: label.into(),
            ok: false,
            detail: e.to_string(),
        },
    }
}

async fn check_library(library: &FlowLibrary) -> CheckResult {
    match library.definition().await {
        Ok(def) if def.prompt(SECONDARY_PROMPT).is_none() => CheckResult {
            label: "Prompt library".into(),
            ok: false,
            detail: format!("no '{}' prompt for the secondary model", SECONDARY_PROMPT),
        },
        Ok(def) => CheckResult {
            label: "Prompt library".into(),
            ok: true,
            detail: format!("{} nodes, {} prompts", def.nodes.len(), def.prompts.len()),
        },
        Err(e) => CheckResult {
            label: "Prompt library".into(),
            ok: false,
            detail: e.to_string(),
        },
    }
}

fn check_detectors(config: &AppConfig) -> CheckResult {
    let detectors = &config.detectors;
    let all: Vec<&DetectorPattern> = detectors
        .pii
        .iter()
        .chain(&detectors.unsafe_content)
        .chain(&detectors.internal_markers)
        .collect();
    let bad: Vec<String> = all
        .iter()
        .filter(|p| Regex::new(&p.pattern).is_err())
        .map(|p| format!("'{}' ({})", p.label, p.pattern))
        .collect();

    if bad.is_empty() {
        CheckResult {
            label: "Detectors".into(),
            ok: true,
            detail: format!("{} patterns", all.len()),
        }
    } else {
        CheckResult {
            label: "Detectors".into(),
            ok: false,
            detail: format!("Invalid patterns: {}", bad.join(", ")),
        }
    }
}

fn check_store(config: &AppConfig) -> CheckResult {
    let Some(path) = config.store_path() else {
        return CheckResult {
            label: "Record store".into(),
            ok: true,
            detail: "Disabled".into(),
        };
    };
    match redline_store::SqliteRecordStore::open(&path) {
        Ok(_) => CheckResult {
            label: "Record store".into(),
            ok: true,
            detail: format!("{}", path.display()),
        },
        Err(e) => CheckResult {
            label: "Record store".into(),
            ok: false,
            detail: format!("{}: {}", path.display(), e),
        },
    }
}
