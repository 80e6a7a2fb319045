//! Plain-text extraction from rendered HTML content.
//!
//! Model output and editor content may be HTML. PDF layout and Google Docs
//! insertion work on plain text, so block-level tags become line breaks,
//! all other tags are dropped and the common entities are decoded.

use regex::Regex;
use std::sync::OnceLock;

fn break_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)<br\s*/?>|</(p|div|h[1-6]|li|ul|ol|tr|table|blockquote|pre)\s*>")
            .expect("valid regex")
    })
}

fn list_item_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)<li[^>]*>").expect("valid regex"))
}

fn tag_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"<[^>]*>").expect("valid regex"))
}

fn blank_lines_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\n{3,}").expect("valid regex"))
}

fn decode_entities(text: &str) -> String {
    text.replace("&nbsp;", " ")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&apos;", "'")
        // last, so "&amp;lt;" decodes to "&lt;" and not "<"
        .replace("&amp;", "&")
}

/// Returns true when `text` contains anything that looks like a tag.
pub fn looks_like_html(text: &str) -> bool {
    tag_re().is_match(text)
}

/// Converts HTML to readable plain text. Plain text passes through unchanged
/// apart from entity decoding.
pub fn html_to_text(html: &str) -> String {
    if !looks_like_html(html) {
        return decode_entities(html);
    }

    let text = break_re().replace_all(html, "$0\n");
    let text = list_item_re().replace_all(&text, "- ");
    let text = tag_re().replace_all(&text, "");
    let text = decode_entities(&text);

    let lines: Vec<&str> = text.lines().map(str::trim_end).collect();
    let joined = lines.join("\n");
    blank_lines_re()
        .replace_all(&joined, "\n\n")
        .trim()
        .to_string()
}
