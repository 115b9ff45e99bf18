use regex::Regex;

use crate::config::{DetectorConfig, DetectorPattern};
use crate::traits::SignalDetector;
use crate::types::{Citation, DetectorSignals, PageMap};

/// Compiled regex detector producing `DetectorSignals`.
pub struct PatternDetector {
    pii: Vec<(Regex, String)>,
    unsafe_content: Vec<(Regex, String)>,
    internal_markers: Vec<(Regex, String)>,
    max_hits: usize,
}

impl PatternDetector {
    /// Compile patterns. Invalid patterns are skipped with a warning.
    pub fn new(config: &DetectorConfig) -> Self {
        Self {
            pii: compile(&config.pii),
            unsafe_content: compile(&config.unsafe_content),
            internal_markers: compile(&config.internal_markers),
            max_hits: config.max_hits,
        }
    }

    fn scan(&self, patterns: &[(Regex, String)], pages: &PageMap) -> Vec<Citation> {
        let mut hits = Vec::new();
        for (page, text) in pages {
            for (re, label) in patterns {
                for m in re.find_iter(text) {
                    if hits.len() >= self.max_hits {
                        return hits;
                    }
                    hits.push(
                        Citation::new(m.as_str())
                            .with_page(Some(i64::from(*page)))
                            .with_source(format!("detector:{}", label)),
                    );
                }
            }
        }
        hits
    }
}

impl Default for PatternDetector {
    fn default() -> Self {
        Self::new(&DetectorConfig::default())
    }
}

impl SignalDetector for PatternDetector {
    fn detect(&self, pages: &PageMap) -> DetectorSignals {
        let pii_hits = self.scan(&self.pii, pages);
        let unsafe_hits = self.scan(&self.unsafe_content, pages);
        let has_internal_markers = pages
            .values()
            .any(|text| self.internal_markers.iter().any(|(re, _)| re.is_match(text)));

        tracing::debug!(
            pii = pii_hits.len(),
            unsafe_hits = unsafe_hits.len(),
            internal = has_internal_markers,
            "Detector scan complete"
        );

        DetectorSignals {
            has_pii: !pii_hits.is_empty(),
            has_unsafe_pattern: !unsafe_hits.is_empty(),
            has_internal_markers,
            pii_hits,
            unsafe_hits,
        }
    }
}

fn compile(patterns: &[DetectorPattern]) -> Vec<(Regex, String)> {
    patterns
        .iter()
        .filter_map(|p| match Regex::new(&p.pattern) {
            Ok(re) => Some((re, p.label.clone())),
            Err(e) => {
                tracing::warn!(
                    pattern = %p.pattern,
                    error = %e,
                    "Invalid detector pattern regex, skipping"
                );
                None
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pages(texts: &[&str]) -> PageMap {
        texts
            .iter()
            .enumerate()
            .map(|(i, t)| (i as u32 + 1, t.to_string()))
            .collect()
    }

    #[test]
    fn test_detects_pii_with_page_numbers() {
        let detector = PatternDetector::default();
        let signals = detector.detect(&pages(&["nothing here", "SSN: 123-45-6789"]));
        assert!(signals.has_pii);
        assert_eq!(signals.pii_hits.len(), 1);
        assert_eq!(signals.pii_hits[0].page, Some(2));
        assert_eq!(signals.pii_hits[0].snippet, "123-45-6789");
        assert_eq!(signals.pii_hits[0].source.as_deref(), Some("detector:ssn"));
        assert!(!signals.has_unsafe_pattern);
    }

    #[test]
    fn test_internal_markers_have_no_hits() {
        let detector = PatternDetector::default();
        let signals = detector.detect(&pages(&["INTERNAL USE ONLY - roadmap"]));
        assert!(signals.has_internal_markers);
        assert!(!signals.has_pii);
        assert!(signals.pii_hits.is_empty());
    }

    #[test]
    fn test_clean_document() {
        let detector = PatternDetector::default();
        let signals = detector.detect(&pages(&["The quarterly picnic is on Friday."]));
        assert_eq!(signals, DetectorSignals::default());
    }

    #[test]
    fn test_invalid_pattern_skipped_and_hits_capped() {
        let config = DetectorConfig {
            pii: vec![
                DetectorPattern { pattern: "(".into(), label: "broken".into() },
                DetectorPattern { pattern: r"EMP-\d+".into(), label: "employee".into() },
            ],
            unsafe_content: vec![],
            internal_markers: vec![],
            max_hits: 2,
        };
        let detector = PatternDetector::new(&config);
        let signals = detector.detect(&pages(&["EMP-1 EMP-2 EMP-3"]));
        assert!(signals.has_pii);
        assert_eq!(signals.pii_hits.len(), 2);
    }
}
