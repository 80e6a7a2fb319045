//! Core data models used throughout Deep Research.
//!
//! A [`ResearchSession`] is produced by every successful model call. Exports of
//! a session are recorded as [`HistoryEntry`] values, one persisted entity type
//! whose [`HistoryPayload`] says whether it is a stored PDF or a Google Doc
//! reference. [`StoredPdf`] and [`HistoryRecord`] are the per-kind views.

use anyhow::bail;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// A bibliography entry returned by the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Citation {
    #[serde(default)]
    pub title: String,
    pub url: String,
}

/// A media asset (image, figure) the model suggested for the paper.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Asset {
    pub url: String,
    #[serde(default)]
    pub description: String,
}

/// How much of the model's reply could be understood.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Confidence {
    /// The reply was valid JSON matching the response schema.
    Parsed,
    /// Only `content:` / `reasoning:` fragments could be recovered.
    PartiallyRecovered,
    /// Nothing structured was found; content is the cleaned raw reply.
    RawFallback,
}

impl Default for Confidence {
    fn default() -> Self {
        Confidence::Parsed
    }
}

/// The result of one research turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResearchSession {
    pub query: String,
    pub title: String,
    /// HTML or plain text, as produced by the model.
    pub content: String,
    #[serde(default)]
    pub citations: Vec<Citation>,
    #[serde(default)]
    pub assets: Vec<Asset>,
    /// Provider-side id used to link continuation turns.
    #[serde(default)]
    pub response_id: Option<String>,
    #[serde(default)]
    pub reasoning: Option<String>,
    #[serde(default)]
    pub confidence: Confidence,
}

impl ResearchSession {
    pub fn citation_urls(&self) -> Vec<String> {
        self.citations.iter().map(|c| c.url.clone()).collect()
    }
}

/// Discriminator for [`HistoryEntry`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HistoryKind {
    Pdf,
    DocExport,
}

impl HistoryKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            HistoryKind::Pdf => "pdf",
            HistoryKind::DocExport => "doc_export",
        }
    }
}

impl FromStr for HistoryKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        match s {
            "pdf" => Ok(HistoryKind::Pdf),
            "doc" | "doc_export" => Ok(HistoryKind::DocExport),
            other => bail!("invalid history kind: '{}' (expected pdf or doc)", other),
        }
    }
}

/// Kind-specific half of a history entry.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum HistoryPayload {
    Pdf {
        filename: String,
        query: String,
        #[serde(skip)]
        pdf_data: Vec<u8>,
    },
    DocExport {
        #[serde(rename = "docId")]
        doc_id: String,
    },
}

/// A persisted record of a past research export.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryEntry {
    pub id: i64,
    pub title: String,
    /// Milliseconds since the Unix epoch.
    pub created_at: i64,
    #[serde(flatten)]
    pub payload: HistoryPayload,
}

impl HistoryEntry {
    pub fn kind(&self) -> HistoryKind {
        match self.payload {
            HistoryPayload::Pdf { .. } => HistoryKind::Pdf,
            HistoryPayload::DocExport { .. } => HistoryKind::DocExport,
        }
    }

    pub fn as_pdf(&self) -> Option<StoredPdf> {
        match &self.payload {
            HistoryPayload::Pdf {
                filename,
                query,
                pdf_data,
            } => Some(StoredPdf {
                id: self.id,
                filename: filename.clone(),
                date: format_ts_iso(self.created_at),
                query: query.clone(),
                pdf_data: pdf_data.clone(),
            }),
            HistoryPayload::DocExport { .. } => None,
        }
    }

    pub fn as_doc_export(&self) -> Option<HistoryRecord> {
        match &self.payload {
            HistoryPayload::DocExport { doc_id } => Some(HistoryRecord {
                title: self.title.clone(),
                doc_id: doc_id.clone(),
                timestamp: self.created_at,
            }),
            HistoryPayload::Pdf { .. } => None,
        }
    }
}

/// A generated PDF kept in history.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredPdf {
    pub id: i64,
    pub filename: String,
    /// ISO-8601 creation time.
    pub date: String,
    pub query: String,
    #[serde(skip)]
    pub pdf_data: Vec<u8>,
}

/// A Google Doc export kept in history, keyed by title.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryRecord {
    pub title: String,
    pub doc_id: String,
    /// Milliseconds since the Unix epoch.
    pub timestamp: i64,
}

impl HistoryRecord {
    pub fn edit_url(&self) -> String {
        crate::gdocs::edit_url(&self.doc_id)
    }
}

pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

pub fn format_ts_iso(ts_millis: i64) -> String {
    chrono::DateTime::from_timestamp_millis(ts_millis)
        .map(|dt| dt.format("%Y-%m-%dT%H:%M:%S%.3fZ").to_string())
        .unwrap_or_else(|| ts_millis.to_string())
}
