//! Typed errors for calls to external HTTP services.
//!
//! Everything else in the crate uses `anyhow`; this enum exists so callers
//! can tell an authentication failure (which must drop the cached OAuth
//! token) from any other upstream failure, and so the HTTP proxy can
//! forward the upstream status code.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum UpstreamError {
    /// The upstream rejected our credentials (HTTP 401 or 403).
    #[error("upstream rejected credentials ({status})")]
    Unauthorized { status: u16, body: String },

    /// Any other non-2xx response.
    #[error("upstream error {status}: {body}")]
    Status { status: u16, body: String },

    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("not authenticated with Google; authenticate first")]
    NotAuthenticated,

    #[error("timed out waiting for Google authentication")]
    AuthTimeout,

    #[error("unexpected upstream response: {0}")]
    Malformed(String),
}

impl UpstreamError {
    /// Classifies a non-success status code.
    pub fn from_status(status: u16, body: String) -> Self {
        if status == 401 || status == 403 {
            UpstreamError::Unauthorized { status, body }
        } else {
            UpstreamError::Status { status, body }
        }
    }

    /// The upstream status to forward to our own client, if any.
    pub fn status(&self) -> Option<u16> {
        match self {
            UpstreamError::Unauthorized { status, .. } | UpstreamError::Status { status, .. } => {
                Some(*status)
            }
            UpstreamError::Transport(e) => e.status().map(|s| s.as_u16()),
            UpstreamError::NotAuthenticated => Some(401),
            UpstreamError::AuthTimeout => Some(408),
            UpstreamError::Malformed(_) => None,
        }
    }

    pub fn is_auth_failure(&self) -> bool {
        matches!(
            self,
            UpstreamError::Unauthorized { .. } | UpstreamError::NotAuthenticated
        )
    }

    /// Response body to surface as `details`, parsed as JSON when possible.
    pub fn details(&self) -> Option<serde_json::Value> {
        match self {
            UpstreamError::Unauthorized { body, .. } | UpstreamError::Status { body, .. } => {
                Some(
                    serde_json::from_str(body)
                        .unwrap_or_else(|_| serde_json::Value::String(body.clone())),
                )
            }
            _ => None,
        }
    }
}
