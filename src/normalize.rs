//! Normalization of raw model replies.
//!
//! Models do not reliably honor the requested JSON schema, so a reply is read
//! in stages, each less strict than the last:
//!
//! 1. strip `<think>…</think>` reasoning blocks
//! 2. unwrap a `<p>{…}</p>` wrapper and collapse whitespace
//! 3. strict JSON parse → [`Normalized::Parsed`]
//! 4. regex recovery of `content:` / `reasoning:` → [`Normalized::PartiallyRecovered`]
//! 5. the cleaned text itself → [`Normalized::RawFallback`]
//!
//! [`normalize`] never fails; every variant yields some content.

use regex::Regex;
use serde::Deserialize;
use std::sync::OnceLock;

use crate::models::{Asset, Citation, Confidence};

/// The `content` field of a reply: either the `{title, content}` object the
/// schema asks for, or a bare string from a model that ignored it.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum ReplyContent {
    Structured {
        #[serde(default)]
        title: String,
        content: String,
    },
    Text(String),
}

/// A reply that matched the response schema.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ModelOutput {
    pub content: ReplyContent,
    #[serde(default)]
    pub citations: Vec<Citation>,
    #[serde(default)]
    pub assets: Vec<Asset>,
    #[serde(default)]
    pub reasoning: Option<String>,
}

/// Outcome of [`normalize`], tagged with how much structure was recovered.
#[derive(Debug, Clone, PartialEq)]
pub enum Normalized {
    Parsed(ModelOutput),
    PartiallyRecovered {
        content: Option<String>,
        reasoning: Option<String>,
    },
    RawFallback(String),
}

impl Normalized {
    pub fn confidence(&self) -> Confidence {
        match self {
            Normalized::Parsed(_) => Confidence::Parsed,
            Normalized::PartiallyRecovered { .. } => Confidence::PartiallyRecovered,
            Normalized::RawFallback(_) => Confidence::RawFallback,
        }
    }

    pub fn title(&self) -> Option<&str> {
        match self {
            Normalized::Parsed(ModelOutput {
                content: ReplyContent::Structured { title, .. },
                ..
            }) if !title.is_empty() => Some(title),
            _ => None,
        }
    }

    pub fn content(&self) -> &str {
        match self {
            Normalized::Parsed(out) => match &out.content {
                ReplyContent::Structured { content, .. } => content,
                ReplyContent::Text(text) => text,
            },
            Normalized::PartiallyRecovered { content, .. } => content.as_deref().unwrap_or(""),
            Normalized::RawFallback(text) => text,
        }
    }

    pub fn reasoning(&self) -> Option<&str> {
        match self {
            Normalized::Parsed(out) => out.reasoning.as_deref(),
            Normalized::PartiallyRecovered { reasoning, .. } => reasoning.as_deref(),
            Normalized::RawFallback(_) => None,
        }
    }

    pub fn citations(&self) -> &[Citation] {
        match self {
            Normalized::Parsed(out) => &out.citations,
            _ => &[],
        }
    }

    pub fn assets(&self) -> &[Asset] {
        match self {
            Normalized::Parsed(out) => &out.assets,
            _ => &[],
        }
    }
}

fn think_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?s)<think>.*?</think>").expect("valid regex"))
}

fn content_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"content:\s*([^}]*?)(?:,\s*reasoning+:|$)").expect("valid regex")
    })
}

fn reasoning_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"reasoning:\s*([^}]*?)(?:,\s*\w+:|$)").expect("valid regex"))
}

fn whitespace_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\s+").expect("valid regex"))
}

fn paragraph_open_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"<p>\s*\{").expect("valid regex"))
}

fn paragraph_close_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\}\s*</p>").expect("valid regex"))
}

/// Removes wrappers and collapses every whitespace run to one space.
fn clean(text: &str) -> String {
    let text = paragraph_open_re().replace(text, "{");
    let text = paragraph_close_re().replace(&text, "}");
    let text = text
        .replace('\r', "")
        .replace("\\n", " ")
        .replace(['\n', '\t'], " ");
    whitespace_re().replace_all(&text, " ").trim().to_string()
}

/// Parses a raw model reply. See the module docs for the stages.
pub fn normalize(raw: &str) -> Normalized {
    let without_think = think_re().replace_all(raw, "");
    let without_think = without_think.trim();

    if without_think.is_empty() {
        return Normalized::RawFallback(raw.to_string());
    }

    let cleaned = clean(without_think);

    match serde_json::from_str::<ModelOutput>(&cleaned) {
        Ok(out) => return Normalized::Parsed(out),
        Err(e) => tracing::debug!(error = %e, "model reply is not schema JSON, trying recovery"),
    }

    let content = content_re()
        .captures(&cleaned)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().trim().to_string())
        .filter(|s| !s.is_empty());
    let reasoning = reasoning_re()
        .captures(&cleaned)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().trim().to_string())
        .filter(|s| !s.is_empty());

    if content.is_none() && reasoning.is_none() {
        return Normalized::RawFallback(cleaned);
    }

    Normalized::PartiallyRecovered { content, reasoning }
}
