//! Google OAuth 2.0 helpers.
//!
//! The server builds the consent URL, exchanges authorization codes using
//! the client secret it holds, and publishes the resulting token through a
//! [`TokenSlot`]. Anything waiting for authentication subscribes to the slot
//! instead of registering a callback.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::sync::watch;

use crate::config::GoogleConfig;
use crate::error::UpstreamError;

pub const SCOPES: &[&str] = &[
    "https://www.googleapis.com/auth/documents",
    "https://www.googleapis.com/auth/drive.file",
];

/// Credentials for the Docs API.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthToken {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
}

#[derive(Debug, Clone)]
pub struct AuthorizationUrl {
    pub url: String,
    /// Opaque value echoed back by Google on the callback.
    pub state: String,
}

/// Builds the consent-screen URL requesting offline Docs and Drive access.
pub fn authorization_url(config: &GoogleConfig) -> Result<AuthorizationUrl> {
    let mut url = reqwest::Url::parse(&config.auth_endpoint)
        .with_context(|| format!("invalid google.auth_endpoint: {}", config.auth_endpoint))?;
    let state = uuid::Uuid::new_v4().to_string();

    url.query_pairs_mut()
        .append_pair("client_id", &config.client_id)
        .append_pair("redirect_uri", &config.redirect_uri)
        .append_pair("response_type", "code")
        .append_pair("scope", &SCOPES.join(" "))
        .append_pair("access_type", "offline")
        .append_pair("prompt", "consent")
        .append_pair("state", &state);

    Ok(AuthorizationUrl {
        url: url.to_string(),
        state,
    })
}

/// Exchanges an authorization code for tokens at the token endpoint.
pub async fn exchange_code(
    client: &reqwest::Client,
    config: &GoogleConfig,
    code: &str,
) -> Result<AuthToken> {
    let secret = config.client_secret()?;

    let response = client
        .post(&config.token_endpoint)
        .form(&[
            ("code", code),
            ("client_id", config.client_id.as_str()),
            ("client_secret", secret.as_str()),
            ("redirect_uri", config.redirect_uri.as_str()),
            ("grant_type", "authorization_code"),
        ])
        .send()
        .await
        .map_err(UpstreamError::from)?;

    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(UpstreamError::from_status(status.as_u16(), body).into());
    }

    let token: AuthToken = response
        .json()
        .await
        .map_err(UpstreamError::from)
        .context("token endpoint returned an unexpected body")?;
    Ok(token)
}

/// The current OAuth token, shared between writers (callback, credential
/// setting) and readers (Docs calls).
#[derive(Debug)]
pub struct TokenSlot {
    tx: watch::Sender<Option<AuthToken>>,
}

impl TokenSlot {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(None);
        Self { tx }
    }

    pub fn set(&self, token: AuthToken) {
        self.tx.send_replace(Some(token));
    }

    pub fn clear(&self) {
        self.tx.send_replace(None);
    }

    pub fn current(&self) -> Option<AuthToken> {
        self.tx.borrow().clone()
    }

    /// Returns the token as soon as one is present, or `None` after `timeout`.
    pub async fn wait_for_token(&self, timeout: Duration) -> Option<AuthToken> {
        let mut rx = self.tx.subscribe();
        let waited = tokio::time::timeout(timeout, rx.wait_for(|t| t.is_some())).await;
        match waited {
            Ok(Ok(token)) => token.clone(),
            _ => None,
        }
    }
}

impl Default for TokenSlot {
    fn default() -> Self {
        Self::new()
    }
}
