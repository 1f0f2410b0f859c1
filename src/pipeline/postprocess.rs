//! Post-processing: structural cleanup of model-generated markdown.
//!
//! Vision models follow the extraction prompt most of the time, but still
//! wrap answers in code fences, emit `\r\n`, pad lines with spaces or slip
//! in zero-width characters. These passes fix that without touching the
//! text itself. The result is trimmed at both ends because the report
//! assembler owns the spacing between pages.
//!
//! Passes run in a fixed order: line endings are normalised first so every
//! later regex only has to deal with `\n`.

use once_cell::sync::Lazy;
use regex::Regex;

/// Clean one page of raw model output.
///
/// An empty return value means the model produced nothing usable; the
/// inference layer turns that into an empty-response failure.
pub fn clean_page_markdown(raw: &str) -> String {
    let s = normalise_line_endings(raw);
    let s = strip_outer_fences(&s);
    let s = remove_invisible_chars(&s);
    let s = remove_placeholder_images(&s);
    let s = trim_trailing_whitespace(&s);
    let s = collapse_blank_lines(&s);
    s.trim().to_string()
}

// ── Line endings ─────────────────────────────────────────────────────────────

fn normalise_line_endings(input: &str) -> String {
    input.replace("\r\n", "\n").replace('\r', "\n")
}

// ── Outer fences ─────────────────────────────────────────────────────────────

static RE_OUTER_FENCES: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?s)^```[ \t]*(?:markdown|md)?[ \t]*\n(.*?)\n?```$").expect("valid regex")
});

fn strip_outer_fences(input: &str) -> String {
    match RE_OUTER_FENCES.captures(input.trim()) {
        Some(caps) => caps[1].to_string(),
        None => input.to_string(),
    }
}

// ── Invisible characters ─────────────────────────────────────────────────────

fn remove_invisible_chars(input: &str) -> String {
    input
        .chars()
        .filter(|c| !matches!(c, '\u{200B}' | '\u{200C}' | '\u{200D}' | '\u{FEFF}' | '\u{00AD}'))
        .collect()
}

// ── Placeholder images ───────────────────────────────────────────────────────

// The model sees a picture, not files, so any image link it writes points
// nowhere. Links with a real http(s) target are left alone.
static RE_PLACEHOLDER_IMAGE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"!\[[^\]]*\]\((?:[^)h]|h[^t]|ht[^t]|htt[^p])[^)]*\)|!\[[^\]]*\]\(\)")
        .expect("valid regex")
});

fn remove_placeholder_images(input: &str) -> String {
    RE_PLACEHOLDER_IMAGE.replace_all(input, "").to_string()
}

// ── Whitespace ───────────────────────────────────────────────────────────────

fn trim_trailing_whitespace(input: &str) -> String {
    input
        .lines()
        .map(str::trim_end)
        .collect::<Vec<_>>()
        .join("\n")
}

static RE_BLANK_LINES: Lazy<Regex> = Lazy::new(|| Regex::new(r"\n{3,}").expect("valid regex"));

/// At most one blank line between blocks.
fn collapse_blank_lines(input: &str) -> String {
    RE_BLANK_LINES.replace_all(input, "\n\n").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_markdown_fence() {
        let raw = "```markdown\n# Title\n\nBody\n```";
        assert_eq!(clean_page_markdown(raw), "# Title\n\nBody");
    }

    #[test]
    fn strips_bare_fence_and_crlf() {
        let raw = "```\r\n| a | b |\r\n|---|---|\r\n| 1 | 2 |\r\n```\r\n";
        assert_eq!(clean_page_markdown(raw), "| a | b |\n|---|---|\n| 1 | 2 |");
    }

    #[test]
    fn inner_code_blocks_are_kept() {
        let raw = "Intro\n\n```rust\nfn main() {}\n```\n\nOutro";
        assert_eq!(clean_page_markdown(raw), raw);
    }

    #[test]
    fn collapses_blank_runs_and_trailing_spaces() {
        let raw = "a   \n\n\n\n\nb\t\n";
        assert_eq!(clean_page_markdown(raw), "a\n\nb");
    }

    #[test]
    fn removes_invisible_characters() {
        assert_eq!(clean_page_markdown("\u{FEFF}he\u{200B}llo"), "hello");
    }

    #[test]
    fn removes_placeholder_images_only() {
        let raw = "![chart](figure1.png) text ![logo](https://example.com/l.png) ![]()";
        assert_eq!(
            clean_page_markdown(raw),
            "text ![logo](https://example.com/l.png)"
        );
    }

    #[test]
    fn whitespace_only_becomes_empty() {
        assert_eq!(clean_page_markdown("  \r\n\n\t "), "");
        assert_eq!(clean_page_markdown("```markdown\n\n```"), "");
    }
}
