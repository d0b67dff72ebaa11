//! Small shared utilities.

pub mod mime;

/// Truncate text to `max` characters on a UTF-8 boundary, appending a
/// visible marker when anything was cut.
pub fn truncate_with_marker(text: &str, max: usize) -> String {
    if text.len() <= max {
        return text.to_string();
    }
    let mut end = max;
    while end > 0 && !text.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}\n\n[Content truncated at {} characters]", &text[..end], max)
}

/// Strip optional Markdown code fences (``` / ```json) around a JSON
/// payload. LLMs add them despite instructions.
pub fn strip_json_fences(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let rest = rest.strip_prefix("json").unwrap_or(rest);
    let rest = rest.trim_start_matches(['\r', '\n']);
    rest.strip_suffix("```").map(str::trim).unwrap_or(trimmed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_short_text_untouched() {
        assert_eq!(truncate_with_marker("hello", 50_000), "hello");
    }

    #[test]
    fn test_truncate_appends_marker() {
        let long = "a".repeat(100);
        let truncated = truncate_with_marker(&long, 10);
        assert!(truncated.starts_with("aaaaaaaaaa"));
        assert!(truncated.contains("[Content truncated at 10 characters]"));
    }

    #[test]
    fn test_truncate_respects_utf8_boundary() {
        let text = "éééééé";
        let truncated = truncate_with_marker(text, 3);
        assert!(truncated.starts_with('é'));
        assert!(truncated.contains("truncated"));
    }

    #[test]
    fn test_strip_fences() {
        assert_eq!(strip_json_fences("{\"a\":1}"), "{\"a\":1}");
        assert_eq!(strip_json_fences("```json\n{\"a\":1}\n```"), "{\"a\":1}");
        assert_eq!(strip_json_fences("```\n{\"a\":1}\n```"), "{\"a\":1}");
        assert_eq!(strip_json_fences("  {\"a\":1}  "), "{\"a\":1}");
    }
}
