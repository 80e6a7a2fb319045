//! Research orchestration: query → prompt → model → normalized session.
//!
//! [`run_research`] performs one turn. When a previous session is supplied
//! the turn is a continuation: the prompt carries the prior content, the
//! request links the prior response id, and the new content is appended to
//! the old. A failed continuation returns an error and leaves the caller's
//! previous session untouched.

use anyhow::{Context, Result};
use std::collections::HashMap;

use crate::citations::{link_citations, renumber_citations};
use crate::llm::{ModelClient, ModelReply};
use crate::models::{Citation, ResearchSession};
use crate::normalize::{normalize, Normalized};
use crate::prompt::{build_prompt, request_body, PromptRequest};

/// Maximum length of a title derived from content.
const MAX_DERIVED_TITLE_CHARS: usize = 120;

/// Separator placed between continuation turns.
const CONTINUATION_SEPARATOR: &str = "\n\n";

/// Input to one research turn.
#[derive(Debug, Clone, Default)]
pub struct ResearchRequest {
    pub query: String,
    pub temperature: Option<f64>,
    /// The session being continued, if any.
    pub previous: Option<ResearchSession>,
}

impl ResearchRequest {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            ..Default::default()
        }
    }
}

/// Runs one research turn against `client`.
///
/// `default_temperature` is used when the request carries none.
pub async fn run_research(
    client: &dyn ModelClient,
    default_temperature: f64,
    req: &ResearchRequest,
) -> Result<ResearchSession> {
    let prompt_req = match &req.previous {
        Some(prev) => PromptRequest {
            temperature: req.temperature,
            ..PromptRequest::continuing(&req.query, &prev.content)
        },
        None => PromptRequest {
            temperature: req.temperature,
            ..PromptRequest::new(&req.query)
        },
    };

    let prompt = build_prompt(&prompt_req, default_temperature);
    let previous_id = req.previous.as_ref().and_then(|p| p.response_id.as_deref());
    let body = request_body(client.provider(), client.model(), &prompt, previous_id);

    tracing::info!(
        query = %req.query,
        continuation = req.previous.is_some(),
        temperature = prompt.temperature,
        "requesting model completion"
    );

    let reply = client
        .complete(&body)
        .await
        .context("model completion failed")?;

    let normalized = normalize(&reply.text);
    if normalized.confidence() != crate::models::Confidence::Parsed {
        tracing::warn!(
            confidence = ?normalized.confidence(),
            "model reply did not match the response schema"
        );
    }

    let session = session_from_reply(&req.query, &normalized, &reply);

    Ok(match &req.previous {
        Some(prev) => merge_continuation(prev, session),
        None => session,
    })
}

/// Builds a session from a normalized reply.
pub fn session_from_reply(
    query: &str,
    normalized: &Normalized,
    reply: &ModelReply,
) -> ResearchSession {
    let content = normalized.content().to_string();

    let title = normalized
        .title()
        .map(str::to_string)
        .or_else(|| derive_title(&content))
        .unwrap_or_else(|| query.to_string());

    let mut citations: Vec<Citation> = normalized.citations().to_vec();
    if citations.is_empty() {
        citations = reply
            .citations
            .iter()
            .map(|url| Citation {
                title: url.clone(),
                url: url.clone(),
            })
            .collect();
    }

    ResearchSession {
        query: query.to_string(),
        title,
        content,
        citations,
        assets: normalized.assets().to_vec(),
        response_id: reply.response_id.clone(),
        reasoning: normalized.reasoning().map(str::to_string),
        confidence: normalized.confidence(),
    }
}

/// Appends a continuation turn to the session it continues.
///
/// Content is concatenated. Citations and assets from the new turn are added
/// when their URL is not already present, so earlier `[n]` markers keep
/// pointing at the same sources. The new turn's markers refer to its own
/// bibliography and are renumbered to the merged list.
pub fn merge_continuation(prev: &ResearchSession, next: ResearchSession) -> ResearchSession {
    let mut merged = prev.clone();

    let mut renumber = HashMap::new();
    for (i, citation) in next.citations.into_iter().enumerate() {
        let index = match merged.citations.iter().position(|c| c.url == citation.url) {
            Some(pos) => pos,
            None => {
                merged.citations.push(citation);
                merged.citations.len() - 1
            }
        };
        renumber.insert(i + 1, index + 1);
    }
    let content = renumber_citations(&next.content, &renumber);

    if !content.is_empty() {
        if !merged.content.is_empty() {
            merged.content.push_str(CONTINUATION_SEPARATOR);
        }
        merged.content.push_str(&content);
    }

    for asset in next.assets {
        if !merged.assets.iter().any(|a| a.url == asset.url) {
            merged.assets.push(asset);
        }
    }

    merged.response_id = next.response_id.or(merged.response_id);
    merged.reasoning = next.reasoning;
    merged.confidence = next.confidence;
    merged
}

/// Session content with `[n]` markers turned into links.
pub fn render_content(session: &ResearchSession) -> String {
    link_citations(&session.content, &session.citation_urls())
}

/// First non-empty line of plain text, truncated.
fn derive_title(content: &str) -> Option<String> {
    let text = crate::html::html_to_text(content);
    let line = text.lines().map(str::trim).find(|l| !l.is_empty())?;
    Some(line.chars().take(MAX_DERIVED_TITLE_CHARS).collect())
}
