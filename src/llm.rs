//! Model completion client.
//!
//! Defines the [`ModelClient`] trait used by the research pipeline and the
//! [`HttpModelClient`] implementation that talks to a hosted model API. Four
//! provider families are understood; they differ in request shape (see
//! [`crate::prompt::request_body`]) and in where the reply text lives:
//!
//! | Provider | Reply text |
//! |----------|------------|
//! | `openai`, `perplexity` | `choices[0].message.content` |
//! | `openai-responses` | `output_text`, or `output[].content[]` of type `output_text` |
//! | `gemini` | `candidates[0].content.parts[].text` |
//!
//! Perplexity also returns a top-level `citations` array of URLs, which is
//! surfaced in [`ModelReply::citations`].
//!
//! There are no retries: a failed call is reported to the caller as an
//! [`UpstreamError`] carrying the upstream status.

use anyhow::{bail, Result};
use async_trait::async_trait;
use serde_json::Value;
use std::str::FromStr;
use std::time::Duration;

use crate::config::LlmConfig;
use crate::error::UpstreamError;

/// Model API family.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provider {
    OpenAiChat,
    OpenAiResponses,
    Perplexity,
    Gemini,
}

impl FromStr for Provider {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "openai" | "deepseek" => Ok(Provider::OpenAiChat),
            "openai-responses" => Ok(Provider::OpenAiResponses),
            "perplexity" => Ok(Provider::Perplexity),
            "gemini" => Ok(Provider::Gemini),
            other => bail!(
                "Unknown model provider: '{}'. Must be openai, openai-responses, perplexity, or gemini.",
                other
            ),
        }
    }
}

/// Text and metadata extracted from a completion response.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ModelReply {
    pub text: String,
    pub response_id: Option<String>,
    /// Provider-level source URLs, when the provider returns them.
    pub citations: Vec<String>,
}

/// A model completion backend.
#[async_trait]
pub trait ModelClient: Send + Sync {
    /// Provider family, used to shape request bodies.
    fn provider(&self) -> Provider;

    /// Model identifier placed in request bodies.
    fn model(&self) -> &str;

    /// Sends a request body and returns the raw upstream JSON.
    async fn send(&self, body: &Value) -> Result<Value, UpstreamError>;

    /// Sends a request body and extracts the reply.
    async fn complete(&self, body: &Value) -> Result<ModelReply, UpstreamError> {
        let json = self.send(body).await?;
        extract_reply(self.provider(), &json)
    }
}

/// [`ModelClient`] backed by a hosted HTTP API.
pub struct HttpModelClient {
    client: reqwest::Client,
    provider: Provider,
    endpoint: String,
    model: String,
    api_key: String,
}

impl HttpModelClient {
    /// Creates a client from configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the provider is unknown or the API key variable
    /// is not set.
    pub fn new(config: &LlmConfig) -> Result<Self> {
        let provider = config.provider()?;
        let api_key = config.api_key()?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            client,
            provider,
            endpoint: config.endpoint.clone(),
            model: config.model.clone(),
            api_key,
        })
    }

    /// Forwards an arbitrary body and returns the upstream status and JSON
    /// body unchanged. Used by the `/api/research` passthrough.
    pub async fn forward(&self, body: &Value) -> Result<(u16, Value), UpstreamError> {
        let response = self.request(body).send().await?;
        let status = response.status().as_u16();
        let text = response.text().await?;
        let json = serde_json::from_str(&text).unwrap_or(Value::String(text));
        Ok((status, json))
    }

    fn request(&self, body: &Value) -> reqwest::RequestBuilder {
        let builder = match self.provider {
            // Gemini takes the key as a query parameter.
            Provider::Gemini => self
                .client
                .post(&self.endpoint)
                .query(&[("key", self.api_key.as_str())]),
            _ => self
                .client
                .post(&self.endpoint)
                .header("Authorization", format!("Bearer {}", self.api_key)),
        };
        builder.header("Content-Type", "application/json").json(body)
    }
}

#[async_trait]
impl ModelClient for HttpModelClient {
    fn provider(&self) -> Provider {
        self.provider
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn send(&self, body: &Value) -> Result<Value, UpstreamError> {
        let response = self.request(body).send().await?;
        let status = response.status();

        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            return Err(UpstreamError::from_status(status.as_u16(), body_text));
        }

        Ok(response.json().await?)
    }
}

/// Extracts reply text, response id and citations from a provider response.
pub fn extract_reply(provider: Provider, json: &Value) -> Result<ModelReply, UpstreamError> {
    let text = match provider {
        Provider::OpenAiChat | Provider::Perplexity => json["choices"][0]["message"]["content"]
            .as_str()
            .map(str::to_string),
        Provider::OpenAiResponses => json["output_text"]
            .as_str()
            .map(str::to_string)
            .or_else(|| responses_output_text(json)),
        Provider::Gemini => {
            let parts = json["candidates"][0]["content"]["parts"].as_array();
            parts.map(|parts| {
                parts
                    .iter()
                    .filter_map(|p| p["text"].as_str())
                    .collect::<Vec<_>>()
                    .join("")
            })
        }
    };

    let text = text.ok_or_else(|| {
        UpstreamError::Malformed(format!("no reply text in {:?} response", provider))
    })?;

    let response_id = json["id"]
        .as_str()
        .or_else(|| json["responseId"].as_str())
        .map(str::to_string);

    let citations = json["citations"]
        .as_array()
        .map(|arr| {
            arr.iter()
                .filter_map(|c| c.as_str().map(str::to_string))
                .collect()
        })
        .unwrap_or_default();

    Ok(ModelReply {
        text,
        response_id,
        citations,
    })
}

fn responses_output_text(json: &Value) -> Option<String> {
    let output = json["output"].as_array()?;
    let texts: Vec<&str> = output
        .iter()
        .filter_map(|item| item["content"].as_array())
        .flatten()
        .filter(|c| c["type"] == "output_text")
        .filter_map(|c| c["text"].as_str())
        .collect();
    if texts.is_empty() {
        None
    } else {
        Some(texts.join(""))
    }
}
