use redline_core::types::PageMap;

pub const DEFAULT_TRUNCATE_CHARS: usize = 1200;
pub const DEFAULT_SECONDARY_MAX_CHARS: usize = 8000;

const ELLIPSIS: &str = " …";

/// Trim a page body and cut it to `max_chars` at the last word boundary.
pub fn truncate_page(text: &str, max_chars: usize) -> String {
    let body = text.trim();
    if body.chars().count() <= max_chars {
        return body.to_string();
    }
    let head: String = body.chars().take(max_chars).collect();
    let cut = match head.rfind(' ') {
        Some(idx) => &head[..idx],
        None => head.as_str(),
    };
    format!("{}{}", cut, ELLIPSIS)
}

/// Trim and truncate every page, keeping page order.
pub fn prepare_pages(pages: &PageMap, max_chars: usize) -> PageMap {
    pages
        .iter()
        .map(|(num, text)| (*num, truncate_page(text, max_chars)))
        .collect()
}

/// Render pages as `=== Page N ===` blocks for the secondary reasoner,
/// stopping once `max_chars` characters have been emitted.
pub fn format_for_secondary(pages: &PageMap, truncate_chars: usize, max_chars: usize) -> String {
    let mut chunks: Vec<String> = Vec::new();
    let mut used = 0usize;

    for (num, text) in pages {
        let entry = format!("=== Page {} ===\n{}\n", num, truncate_page(text, truncate_chars));
        let len = entry.chars().count();
        if used + len > max_chars {
            let remaining = max_chars.saturating_sub(used);
            if remaining > 0 {
                chunks.push(entry.chars().take(remaining).collect());
            }
            break;
        }
        chunks.push(entry);
        used += len;
        if used >= max_chars {
            break;
        }
    }

    chunks.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_text_is_trimmed_only() {
        assert_eq!(truncate_page("  hello world \n", 1200), "hello world");
    }

    #[test]
    fn test_truncates_at_word_boundary() {
        let text = "alpha beta gamma delta";
        assert_eq!(truncate_page(text, 13), "alpha beta …");
    }

    #[test]
    fn test_truncates_without_spaces() {
        assert_eq!(truncate_page("abcdefghij", 4), "abcd …");
    }

    #[test]
    fn test_truncation_counts_chars_not_bytes() {
        let text = "é".repeat(10);
        assert_eq!(truncate_page(&text, 3), "ééé …");
    }

    #[test]
    fn test_prepare_pages_keeps_keys() {
        let pages = PageMap::from([(1, " one ".to_string()), (3, "three".to_string())]);
        let prepared = prepare_pages(&pages, 1200);
        assert_eq!(prepared.keys().copied().collect::<Vec<_>>(), vec![1, 3]);
        assert_eq!(prepared[&1], "one");
    }

    #[test]
    fn test_secondary_format_blocks() {
        let pages = PageMap::from([(2, "second".to_string()), (1, "first".to_string())]);
        let text = format_for_secondary(&pages, 1200, 8000);
        assert_eq!(text, "=== Page 1 ===\nfirst\n\n=== Page 2 ===\nsecond\n");
    }

    #[test]
    fn test_secondary_format_is_capped() {
        let pages = PageMap::from([(1, "x".repeat(50)), (2, "y".repeat(50))]);
        let text = format_for_secondary(&pages, 1200, 70);
        assert!(text.starts_with("=== Page 1 ===\n"));
        assert!(text.ends_with("\n\n=== "));
        assert!(!text.contains('y'));
        // two chunks joined by one newline
        assert_eq!(text.chars().count(), 71);
    }
}
