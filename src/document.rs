use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{bail, Context};
use serde::Deserialize;

use redline_core::types::{PageImage, PageMap};

/// A document ready for classification.
#[derive(Debug, Default)]
pub struct LoadedDocument {
    pub filename: String,
    pub pages: PageMap,
    pub images: Vec<PageImage>,
    pub legibility_score: Option<f64>,
}

/// Pre-extracted document produced by an upstream extraction step.
#[derive(Deserialize)]
struct ExtractedDocument {
    pages: BTreeMap<String, String>,
    #[serde(default)]
    images: Vec<PageImage>,
    #[serde(default)]
    legibility_score: Option<f64>,
}

/// Load a document from disk.
///
/// `.json` files carry already-extracted pages (keyed by page number),
/// images, and an optional legibility score. Anything else is read as
/// plain text with form feeds separating pages.
pub fn load(path: &Path) -> anyhow::Result<LoadedDocument> {
    let filename = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string());
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;

    let is_json = path
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("json"));

    let mut doc = if is_json {
        from_json(&content).with_context(|| format!("invalid document JSON in {}", path.display()))?
    } else {
        LoadedDocument {
            pages: split_pages(&content),
            ..Default::default()
        }
    };
    doc.filename = filename;

    if doc.pages.is_empty() {
        bail!("{} contains no text", path.display());
    }
    Ok(doc)
}

/// Split plain text into 1-indexed pages on form feeds, dropping blank pages.
pub fn split_pages(text: &str) -> PageMap {
    text.split('\x0c')
        .map(str::trim)
        .filter(|page| !page.is_empty())
        .enumerate()
        .map(|(i, page)| (i as u32 + 1, page.to_string()))
        .collect()
}

fn from_json(content: &str) -> anyhow::Result<LoadedDocument> {
    let raw: ExtractedDocument = serde_json::from_str(content)?;
    let mut pages = PageMap::new();
    for (key, text) in raw.pages {
        let page: u32 = key
            .trim()
            .parse()
            .with_context(|| format!("page key '{}' is not a number", key))?;
        if page == 0 {
            bail!("page numbers start at 1");
        }
        if !text.trim().is_empty() {
            pages.insert(page, text);
        }
    }
    Ok(LoadedDocument {
        filename: String::new(),
        pages,
        images: raw.images,
        legibility_score: raw.legibility_score,
    })
}
