//! Google Docs export.
//!
//! A [`DocsSession`] owns everything the export needs: the HTTP client, the
//! OAuth [`TokenSlot`], and a coarse progress state:
//!
//! ```text
//! Uninitialized → ApiLoaded → Authenticated → DocCreated → DocUpdated
//! ```
//!
//! Document text is inserted with one `batchUpdate`. URLs in the text become
//! hyperlinks: each URL run is inserted and then styled with a link over
//! exactly its range. Docs API indexes count UTF-16 code units and the body
//! starts at index 1.
//!
//! Any 401/403 from the Docs API clears the cached token so the next call
//! re-authenticates.

use regex::Regex;
use serde::Serialize;
use serde_json::{json, Value};
use std::sync::{Mutex, OnceLock};
use std::time::Duration;

use crate::config::GoogleConfig;
use crate::error::UpstreamError;
use crate::html::{html_to_text, looks_like_html};
use crate::models::{now_millis, HistoryRecord};
use crate::oauth::{AuthToken, TokenSlot};
use crate::store::HistoryStore;

/// First index of a document body.
const BODY_START_INDEX: usize = 1;

const REQUEST_TIMEOUT_SECS: u64 = 30;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum DocsState {
    Uninitialized,
    ApiLoaded,
    Authenticated,
    DocCreated,
    DocUpdated,
}

/// A finished export.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DocExport {
    pub url: String,
    pub document_id: String,
}

fn url_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#"https?://[^\s<>"]+"#).expect("valid regex"))
}

fn doc_id_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"/document/d/([a-zA-Z0-9_-]+)").expect("valid regex"))
}

pub fn edit_url(document_id: &str) -> String {
    format!("https://docs.google.com/document/d/{}/edit", document_id)
}

/// Extracts the document id from a Docs URL.
pub fn doc_id_from_url(url: &str) -> Option<String> {
    doc_id_re()
        .captures(url)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
}

fn utf16_len(s: &str) -> usize {
    s.encode_utf16().count()
}

fn insert_text(index: usize, text: &str) -> Value {
    json!({
        "insertText": {
            "location": { "index": index },
            "text": text,
        }
    })
}

fn link_style(start: usize, end: usize, url: &str) -> Value {
    json!({
        "updateTextStyle": {
            "range": { "startIndex": start, "endIndex": end },
            "textStyle": { "link": { "url": url } },
            "fields": "link",
        }
    })
}

/// Builds the `batchUpdate` requests that insert `content` at the start of
/// an empty document, linking every URL.
///
/// Trailing sentence punctuation is not treated as part of a URL.
pub fn build_update_requests(content: &str) -> Vec<Value> {
    let mut requests = Vec::new();
    let mut cursor = BODY_START_INDEX;
    let mut last = 0usize;

    for m in url_re().find_iter(content) {
        let url = m
            .as_str()
            .trim_end_matches(|c: char| matches!(c, '.' | ',' | ';' | ':' | '!' | '?' | ')'));
        if url.is_empty() {
            continue;
        }

        if m.start() > last {
            let run = &content[last..m.start()];
            requests.push(insert_text(cursor, run));
            cursor += utf16_len(run);
        }

        let len = utf16_len(url);
        requests.push(insert_text(cursor, url));
        requests.push(link_style(cursor, cursor + len, url));
        cursor += len;
        last = m.start() + url.len();
    }

    if last < content.len() {
        requests.push(insert_text(cursor, &content[last..]));
    }

    requests
}

/// Explicit Google Docs context; one per server or CLI run.
pub struct DocsSession {
    config: GoogleConfig,
    client: Mutex<Option<reqwest::Client>>,
    state: Mutex<DocsState>,
    tokens: TokenSlot,
    /// `state` of the last consent URL handed out, until a callback uses it.
    oauth_state: Mutex<Option<String>>,
}

impl DocsSession {
    pub fn new(config: GoogleConfig) -> Self {
        Self {
            config,
            client: Mutex::new(None),
            state: Mutex::new(DocsState::Uninitialized),
            tokens: TokenSlot::new(),
            oauth_state: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &GoogleConfig {
        &self.config
    }

    pub fn tokens(&self) -> &TokenSlot {
        &self.tokens
    }

    pub fn state(&self) -> DocsState {
        *self.state.lock().unwrap()
    }

    fn advance(&self, to: DocsState) {
        let mut state = self.state.lock().unwrap();
        if to > *state {
            *state = to;
        }
    }

    /// Remembers the `state` of a consent URL just handed out. A newer URL
    /// replaces an older one.
    pub fn remember_oauth_state(&self, state: String) {
        *self.oauth_state.lock().unwrap() = Some(state);
    }

    /// Consumes the remembered `state` if it matches. Each value is
    /// accepted once.
    pub fn take_oauth_state(&self, state: &str) -> bool {
        let mut expected = self.oauth_state.lock().unwrap();
        if expected.as_deref() == Some(state) {
            *expected = None;
            true
        } else {
            false
        }
    }

    /// Stores credentials obtained elsewhere (OAuth callback, direct setting).
    pub fn set_token(&self, token: AuthToken) {
        self.tokens.set(token);
        self.advance(DocsState::Authenticated);
    }

    fn rewind(&self, to: DocsState) {
        let mut state = self.state.lock().unwrap();
        if *state > to {
            *state = to;
        }
    }

    fn clear_token(&self) {
        self.tokens.clear();
        self.rewind(DocsState::ApiLoaded);
    }

    /// Prepares the HTTP client. Idempotent.
    pub fn init(&self) -> Result<reqwest::Client, UpstreamError> {
        let mut client = self.client.lock().unwrap();
        if let Some(c) = client.as_ref() {
            return Ok(c.clone());
        }
        let built = reqwest::Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()?;
        *client = Some(built.clone());
        drop(client);
        self.advance(DocsState::ApiLoaded);
        Ok(built)
    }

    /// Returns an access token, waiting for one to be provided if none is
    /// cached.
    pub async fn authenticate(&self) -> Result<String, UpstreamError> {
        self.init()?;
        if let Some(token) = self.tokens.current() {
            self.advance(DocsState::Authenticated);
            return Ok(token.access_token);
        }

        tracing::info!(
            timeout_secs = self.config.auth_timeout_secs,
            "waiting for google authentication"
        );
        let timeout = Duration::from_secs(self.config.auth_timeout_secs);
        match self.tokens.wait_for_token(timeout).await {
            Some(token) => {
                self.advance(DocsState::Authenticated);
                Ok(token.access_token)
            }
            None => Err(UpstreamError::AuthTimeout),
        }
    }

    fn cached_token(&self) -> Result<String, UpstreamError> {
        self.tokens
            .current()
            .map(|t| t.access_token)
            .ok_or(UpstreamError::NotAuthenticated)
    }

    async fn call(&self, request: reqwest::RequestBuilder) -> Result<Value, UpstreamError> {
        let response = request.send().await?;
        let status = response.status();

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let err = UpstreamError::from_status(status.as_u16(), body);
            if err.is_auth_failure() {
                tracing::warn!(status = status.as_u16(), "docs api rejected token; clearing");
                self.clear_token();
            }
            return Err(err);
        }

        Ok(response.json().await?)
    }

    /// Creates an empty document and returns its id.
    ///
    /// Progress from an earlier document is discarded: the state goes back
    /// to `Authenticated` before the new one is created.
    pub async fn create_document(&self, title: &str) -> Result<String, UpstreamError> {
        let client = self.init()?;
        let token = self.cached_token()?;
        self.rewind(DocsState::Authenticated);
        let url = format!("{}/documents", self.config.docs_api_base);

        let doc = self
            .call(client.post(url).bearer_auth(token).json(&json!({ "title": title })))
            .await?;

        let id = doc["documentId"]
            .as_str()
            .ok_or_else(|| UpstreamError::Malformed("create response has no documentId".into()))?
            .to_string();

        self.advance(DocsState::DocCreated);
        tracing::info!(document_id = %id, "created google doc");
        Ok(id)
    }

    /// Inserts `content` into an empty document, linking URLs.
    pub async fn update_document(
        &self,
        document_id: &str,
        content: &str,
    ) -> Result<(), UpstreamError> {
        let requests = build_update_requests(content);
        if requests.is_empty() {
            return Ok(());
        }

        let client = self.init()?;
        let token = self.cached_token()?;
        let url = format!(
            "{}/documents/{}:batchUpdate",
            self.config.docs_api_base, document_id
        );

        self.call(
            client
                .post(url)
                .bearer_auth(token)
                .json(&json!({ "requests": requests })),
        )
        .await?;

        self.advance(DocsState::DocUpdated);
        Ok(())
    }

    pub async fn get_document(&self, document_id: &str) -> Result<Value, UpstreamError> {
        let client = self.init()?;
        let token = self.cached_token()?;
        let url = format!("{}/documents/{}", self.config.docs_api_base, document_id);
        self.call(client.get(url).bearer_auth(token)).await
    }

    /// Creates a document holding `content` and returns its id.
    pub async fn create_with_content(
        &self,
        title: &str,
        content: &str,
    ) -> Result<String, UpstreamError> {
        let id = self.create_document(title).await?;
        self.update_document(&id, content).await?;
        Ok(id)
    }

    /// Full export: authenticate, create, fill, and record in history.
    ///
    /// HTML content is reduced to plain text first. A failure to record the
    /// export is logged and does not fail the export.
    pub async fn export(
        &self,
        store: &dyn HistoryStore,
        title: &str,
        content: &str,
    ) -> Result<DocExport, UpstreamError> {
        let text = if looks_like_html(content) {
            html_to_text(content)
        } else {
            content.to_string()
        };

        self.authenticate().await?;
        let id = self.create_document(title).await?;
        self.update_document(&id, &text).await?;

        let url = edit_url(&id);
        match doc_id_from_url(&url) {
            Some(doc_id) => {
                let record = HistoryRecord {
                    title: title.to_string(),
                    doc_id,
                    timestamp: now_millis(),
                };
                if let Err(e) = store.upsert_doc_export(&record).await {
                    tracing::warn!(error = %e, title, "failed to record doc export in history");
                }
            }
            None => tracing::warn!(url = %url, "could not extract document id from url"),
        }

        Ok(DocExport {
            url,
            document_id: id,
        })
    }
}
