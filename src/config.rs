//! TOML configuration parsing and validation.
//!
//! Secrets are never stored in the file: the model API key and the Google
//! client secret are read from the environment variables the config names.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::llm::Provider;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    pub server: ServerConfig,
    pub llm: LlmConfig,
    #[serde(default)]
    pub google: GoogleConfig,
    #[serde(default)]
    pub pdf: PdfConfig,
    #[serde(default)]
    pub files: FilesConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub bind: String,
    #[serde(default = "default_allowed_origins")]
    pub allowed_origins: Vec<String>,
}

fn default_allowed_origins() -> Vec<String> {
    vec!["http://localhost:3000".to_string()]
}

#[derive(Debug, Deserialize, Clone)]
pub struct LlmConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_temperature")]
    pub temperature: f64,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_provider() -> String {
    "openai".to_string()
}
fn default_endpoint() -> String {
    "https://api.openai.com/v1/chat/completions".to_string()
}
fn default_model() -> String {
    "gpt-4o-mini".to_string()
}
fn default_api_key_env() -> String {
    "OPENAI_API_KEY".to_string()
}
fn default_temperature() -> f64 {
    0.7
}
fn default_timeout_secs() -> u64 {
    300
}

impl LlmConfig {
    /// Parsed provider family. Only valid after [`load_config`] validation.
    pub fn provider(&self) -> Result<Provider> {
        self.provider.parse()
    }

    /// Reads the API key from the configured environment variable.
    pub fn api_key(&self) -> Result<String> {
        std::env::var(&self.api_key_env)
            .with_context(|| format!("{} environment variable not set", self.api_key_env))
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct GoogleConfig {
    #[serde(default)]
    pub client_id: String,
    #[serde(default = "default_client_secret_env")]
    pub client_secret_env: String,
    #[serde(default = "default_redirect_uri")]
    pub redirect_uri: String,
    #[serde(default = "default_auth_endpoint")]
    pub auth_endpoint: String,
    #[serde(default = "default_token_endpoint")]
    pub token_endpoint: String,
    #[serde(default = "default_docs_api_base")]
    pub docs_api_base: String,
    #[serde(default = "default_auth_timeout_secs")]
    pub auth_timeout_secs: u64,
}

impl Default for GoogleConfig {
    fn default() -> Self {
        Self {
            client_id: String::new(),
            client_secret_env: default_client_secret_env(),
            redirect_uri: default_redirect_uri(),
            auth_endpoint: default_auth_endpoint(),
            token_endpoint: default_token_endpoint(),
            docs_api_base: default_docs_api_base(),
            auth_timeout_secs: default_auth_timeout_secs(),
        }
    }
}

fn default_client_secret_env() -> String {
    "GOOGLE_CLIENT_SECRET".to_string()
}
fn default_redirect_uri() -> String {
    "http://localhost:3001/api/google-docs/auth/callback".to_string()
}
fn default_auth_endpoint() -> String {
    "https://accounts.google.com/o/oauth2/v2/auth".to_string()
}
fn default_token_endpoint() -> String {
    "https://oauth2.googleapis.com/token".to_string()
}
fn default_docs_api_base() -> String {
    "https://docs.googleapis.com/v1".to_string()
}
fn default_auth_timeout_secs() -> u64 {
    120
}

impl GoogleConfig {
    pub fn client_secret(&self) -> Result<String> {
        std::env::var(&self.client_secret_env).with_context(|| {
            format!("{} environment variable not set", self.client_secret_env)
        })
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct PdfConfig {
    #[serde(default = "default_author")]
    pub author: String,
    #[serde(default = "default_keywords")]
    pub keywords: Vec<String>,
}

impl Default for PdfConfig {
    fn default() -> Self {
        Self {
            author: default_author(),
            keywords: default_keywords(),
        }
    }
}

fn default_author() -> String {
    "Deep Research".to_string()
}
fn default_keywords() -> Vec<String> {
    vec!["research".to_string(), "physics".to_string()]
}

/// Knowledge-file uploads to the model provider's file and vector-store API.
#[derive(Debug, Deserialize, Clone)]
pub struct FilesConfig {
    #[serde(default = "default_files_api_base")]
    pub api_base: String,
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_vector_store_name")]
    pub vector_store_name: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for FilesConfig {
    fn default() -> Self {
        Self {
            api_base: default_files_api_base(),
            api_key_env: default_api_key_env(),
            vector_store_name: default_vector_store_name(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_files_api_base() -> String {
    "https://api.openai.com/v1".to_string()
}
fn default_vector_store_name() -> String {
    "deep_research_knowledge".to_string()
}

impl FilesConfig {
    pub fn api_key(&self) -> Result<String> {
        std::env::var(&self.api_key_env)
            .with_context(|| format!("{} environment variable not set", self.api_key_env))
    }
}

impl Config {
    /// Config used by tests and by commands that can run without a file.
    pub fn minimal() -> Self {
        Self {
            db: DbConfig {
                path: PathBuf::from("./data/dr.sqlite"),
            },
            server: ServerConfig {
                bind: "127.0.0.1:3001".to_string(),
                allowed_origins: default_allowed_origins(),
            },
            llm: LlmConfig {
                provider: default_provider(),
                endpoint: default_endpoint(),
                model: default_model(),
                api_key_env: default_api_key_env(),
                temperature: default_temperature(),
                timeout_secs: default_timeout_secs(),
            },
            google: GoogleConfig::default(),
            pdf: PdfConfig::default(),
            files: FilesConfig::default(),
        }
    }
}

pub fn parse_config(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    parse_config(&content)
}

fn validate(config: &Config) -> Result<()> {
    config
        .llm
        .provider()
        .with_context(|| format!("Unknown llm.provider: '{}'", config.llm.provider))?;

    if !(0.1..=1.0).contains(&config.llm.temperature) {
        anyhow::bail!("llm.temperature must be in [0.1, 1.0]");
    }

    if config.llm.timeout_secs == 0 {
        anyhow::bail!("llm.timeout_secs must be > 0");
    }

    if config.llm.endpoint.trim().is_empty() {
        anyhow::bail!("llm.endpoint must not be empty");
    }

    if config.google.auth_timeout_secs == 0 {
        anyhow::bail!("google.auth_timeout_secs must be > 0");
    }

    if config.files.timeout_secs == 0 {
        anyhow::bail!("files.timeout_secs must be > 0");
    }

    Ok(())
}
