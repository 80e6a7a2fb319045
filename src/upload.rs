//! Knowledge-file uploads.
//!
//! A local file or a public URL is uploaded to the provider's file API with
//! purpose `assistants` and then attached to a vector store the model can
//! search. The vector store is created on first use and its id cached in the
//! `vector_store_id` setting. A cached id that the provider no longer knows
//! (404) is replaced by a freshly created store.
//!
//! | Step | Request |
//! |------|---------|
//! | upload | `POST {api_base}/files` (multipart: `purpose`, `file`) |
//! | check store | `GET {api_base}/vector_stores/{id}` |
//! | create store | `POST {api_base}/vector_stores` `{name}` |
//! | attach | `POST {api_base}/vector_stores/{id}/files` `{file_id}` |

use anyhow::{bail, Context, Result};
use reqwest::multipart::{Form, Part};
use serde::Serialize;
use serde_json::{json, Value};
use std::path::PathBuf;
use std::time::Duration;

use crate::config::FilesConfig;
use crate::error::UpstreamError;
use crate::store::HistoryStore;

/// Setting key holding the cached vector store id.
pub const VECTOR_STORE_SETTING: &str = "vector_store_id";

const FALLBACK_URL_FILENAME: &str = "downloaded_file_from_url";

/// Where an uploaded file comes from.
#[derive(Debug, Clone, PartialEq)]
pub enum UploadSource {
    Path(PathBuf),
    Url(String),
}

impl UploadSource {
    /// `http://` and `https://` inputs are URLs; anything else is a path.
    pub fn parse(input: &str) -> Self {
        if input.starts_with("http://") || input.starts_with("https://") {
            UploadSource::Url(input.to_string())
        } else {
            UploadSource::Path(PathBuf::from(input))
        }
    }
}

/// Last path segment of a URL, used as the uploaded filename.
pub fn filename_from_url(url: &str) -> String {
    reqwest::Url::parse(url)
        .ok()
        .and_then(|u| {
            u.path_segments()
                .and_then(|mut segments| segments.next_back().map(str::to_string))
        })
        .filter(|name| !name.is_empty())
        .unwrap_or_else(|| FALLBACK_URL_FILENAME.to_string())
}

/// A file attached to the knowledge vector store.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadedFile {
    pub filename: String,
    pub file_id: String,
    pub vector_store_id: String,
    pub vector_store_file_id: String,
}

fn id_field(body: &Value, what: &str) -> Result<String, UpstreamError> {
    body["id"]
        .as_str()
        .map(str::to_string)
        .ok_or_else(|| UpstreamError::Malformed(format!("{} response has no id", what)))
}

/// Client for the file and vector-store endpoints.
pub struct FileUploader {
    client: reqwest::Client,
    api_base: String,
    api_key: String,
    store_name: String,
}

impl FileUploader {
    /// # Errors
    ///
    /// Returns an error if the API key variable is not set.
    pub fn new(config: &FilesConfig) -> Result<Self> {
        let api_key = config.api_key()?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            client,
            api_base: config.api_base.trim_end_matches('/').to_string(),
            api_key,
            store_name: config.vector_store_name.clone(),
        })
    }

    /// Reads a local file or downloads a URL, returning its name and bytes.
    pub async fn fetch(&self, source: &UploadSource) -> Result<(String, Vec<u8>)> {
        match source {
            UploadSource::Path(path) => {
                let bytes = tokio::fs::read(path)
                    .await
                    .with_context(|| format!("Failed to read {}", path.display()))?;
                let filename = path
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .with_context(|| format!("not a file path: {}", path.display()))?;
                Ok((filename, bytes))
            }
            UploadSource::Url(url) => {
                let response = self
                    .client
                    .get(url)
                    .send()
                    .await
                    .map_err(UpstreamError::from)?;
                let status = response.status();
                if !status.is_success() {
                    let body = response.text().await.unwrap_or_default();
                    return Err(anyhow::Error::new(UpstreamError::from_status(
                        status.as_u16(),
                        body,
                    ))
                    .context(format!("Failed to fetch file from URL: {}", url)));
                }
                let bytes = response.bytes().await.map_err(UpstreamError::from)?;
                Ok((filename_from_url(url), bytes.to_vec()))
            }
        }
    }

    async fn call(&self, request: reqwest::RequestBuilder) -> Result<Value, UpstreamError> {
        let response = request.bearer_auth(&self.api_key).send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(UpstreamError::from_status(status.as_u16(), body));
        }
        Ok(response.json().await?)
    }

    fn vector_stores(&self, path: &str) -> String {
        format!("{}/vector_stores{}", self.api_base, path)
    }

    async fn upload_file(&self, filename: &str, bytes: Vec<u8>) -> Result<String, UpstreamError> {
        let form = Form::new().text("purpose", "assistants").part(
            "file",
            Part::bytes(bytes).file_name(filename.to_string()),
        );
        let body = self
            .call(
                self.client
                    .post(format!("{}/files", self.api_base))
                    .multipart(form),
            )
            .await?;
        id_field(&body, "file upload")
    }

    async fn create_vector_store(&self) -> Result<String, UpstreamError> {
        let body = self
            .call(
                self.client
                    .post(self.vector_stores(""))
                    .header("OpenAI-Beta", "assistants=v2")
                    .json(&json!({ "name": self.store_name })),
            )
            .await?;
        let id = id_field(&body, "vector store")?;
        tracing::info!(vector_store_id = %id, name = %self.store_name, "created vector store");
        Ok(id)
    }

    /// `Ok(false)` when the provider answers 404 for `id`.
    async fn vector_store_exists(&self, id: &str) -> Result<bool, UpstreamError> {
        let request = self
            .client
            .get(self.vector_stores(&format!("/{}", id)))
            .header("OpenAI-Beta", "assistants=v2");
        match self.call(request).await {
            Ok(_) => Ok(true),
            Err(e) if e.status() == Some(404) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Returns the cached vector store id, creating (and caching) a store
    /// when none is cached or the cached one is gone.
    pub async fn resolve_vector_store(&self, store: &dyn HistoryStore) -> Result<String> {
        if let Some(id) = store.get_setting(VECTOR_STORE_SETTING).await? {
            if self.vector_store_exists(&id).await? {
                return Ok(id);
            }
            tracing::warn!(vector_store_id = %id, "cached vector store not found; creating a new one");
        }

        let id = self.create_vector_store().await?;
        store.set_setting(VECTOR_STORE_SETTING, &id).await?;
        Ok(id)
    }

    async fn attach(&self, vector_store_id: &str, file_id: &str) -> Result<String, UpstreamError> {
        let body = self
            .call(
                self.client
                    .post(self.vector_stores(&format!("/{}/files", vector_store_id)))
                    .header("OpenAI-Beta", "assistants=v2")
                    .json(&json!({ "file_id": file_id })),
            )
            .await?;
        id_field(&body, "vector store file")
    }

    /// Uploads `bytes` and attaches the file to the knowledge vector store.
    pub async fn upload(
        &self,
        store: &dyn HistoryStore,
        filename: &str,
        bytes: Vec<u8>,
    ) -> Result<UploadedFile> {
        if filename.trim().is_empty() {
            bail!("filename must not be empty");
        }

        let size = bytes.len();
        let file_id = self
            .upload_file(filename, bytes)
            .await
            .context("file upload failed")?;
        tracing::info!(file_id = %file_id, filename, bytes = size, "uploaded file");

        let vector_store_id = self.resolve_vector_store(store).await?;
        let vector_store_file_id = self
            .attach(&vector_store_id, &file_id)
            .await
            .context("adding file to vector store failed")?;

        Ok(UploadedFile {
            filename: filename.to_string(),
            file_id,
            vector_store_id,
            vector_store_file_id,
        })
    }

    /// [`fetch`](Self::fetch) followed by [`upload`](Self::upload).
    pub async fn upload_source(
        &self,
        store: &dyn HistoryStore,
        source: &UploadSource,
    ) -> Result<UploadedFile> {
        let (filename, bytes) = self.fetch(source).await?;
        self.upload(store, &filename, bytes).await
    }
}
