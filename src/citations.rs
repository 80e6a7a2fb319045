//! Citation linking.
//!
//! Rewrites bracketed markers such as `[3]` into anchors pointing at the
//! third citation URL. Markers without a matching citation are left as-is.

use regex::{Captures, Regex};
use std::collections::HashMap;
use std::sync::OnceLock;

fn marker_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\[(\d+)\]").expect("valid regex"))
}

/// Escapes a URL for use inside a double-quoted HTML attribute.
fn escape_attr(value: &str) -> String {
    value
        .replace('&', "&amp;")
        .replace('"', "&quot;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

/// Replaces every in-range `[n]` (1-based) in `content` with a link to `urls[n - 1]`.
pub fn link_citations(content: &str, urls: &[String]) -> String {
    if urls.is_empty() || content.is_empty() {
        return content.to_string();
    }

    marker_re()
        .replace_all(content, |caps: &Captures| {
            let marker = &caps[0];
            let url = caps[1]
                .parse::<usize>()
                .ok()
                .and_then(|n| n.checked_sub(1))
                .and_then(|i| urls.get(i))
                .filter(|u| !u.is_empty());

            match url {
                Some(url) => format!(
                    "<a href=\"{}\" target=\"_blank\" rel=\"noopener noreferrer\">{}</a>",
                    escape_attr(url),
                    marker
                ),
                None => marker.to_string(),
            }
        })
        .into_owned()
}

/// Rewrites `[n]` markers through `map` (1-based, old to new) in one pass.
/// Markers with no entry are left as-is.
pub fn renumber_citations(content: &str, map: &HashMap<usize, usize>) -> String {
    if map.is_empty() || content.is_empty() {
        return content.to_string();
    }

    marker_re()
        .replace_all(content, |caps: &Captures| {
            match caps[1].parse::<usize>().ok().and_then(|n| map.get(&n)) {
                Some(to) => format!("[{}]", to),
                None => caps[0].to_string(),
            }
        })
        .into_owned()
}
