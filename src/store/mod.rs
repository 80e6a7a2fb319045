//! History storage abstraction.
//!
//! Past exports are kept as [`HistoryEntry`] values in a single store. The
//! [`HistoryStore`] trait offers per-kind operations on top of that:
//! stored PDFs are keyed by an auto-incrementing id and listed in insertion
//! order; Google Doc exports are keyed by title (a later export with the
//! same title replaces the earlier one) and listed newest first.
//!
//! Two backends are provided:
//!
//! | Backend | Use |
//! |---------|-----|
//! | [`SqliteHistoryStore`] | the `history` and `settings` tables created by [`crate::migrate`] |
//! | [`InMemoryHistoryStore`] | tests and ephemeral serving |

pub mod memory;
pub mod sqlite;

use anyhow::Result;
use async_trait::async_trait;

use crate::models::{HistoryEntry, HistoryRecord, StoredPdf};

pub use memory::InMemoryHistoryStore;
pub use sqlite::SqliteHistoryStore;

/// Abstract storage backend for research history and user settings.
///
/// # Operations
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`save_pdf`](HistoryStore::save_pdf) | Store a generated PDF, returning its id |
/// | [`list_pdfs`](HistoryStore::list_pdfs) | All stored PDFs, oldest first |
/// | [`get_pdf`](HistoryStore::get_pdf) | One stored PDF by id |
/// | [`delete_pdf`](HistoryStore::delete_pdf) | Remove a stored PDF |
/// | [`upsert_doc_export`](HistoryStore::upsert_doc_export) | Record a Google Doc export by title |
/// | [`list_doc_exports`](HistoryStore::list_doc_exports) | All doc exports, newest first |
/// | [`get_doc_export`](HistoryStore::get_doc_export) | One doc export by title |
/// | [`list_all`](HistoryStore::list_all) | Every entry of every kind, newest first |
#[async_trait]
pub trait HistoryStore: Send + Sync {
    async fn save_pdf(&self, pdf_data: &[u8], filename: &str, query: &str) -> Result<i64>;

    async fn list_pdfs(&self) -> Result<Vec<StoredPdf>>;

    async fn get_pdf(&self, id: i64) -> Result<Option<StoredPdf>>;

    /// Returns `false` when no PDF had that id.
    async fn delete_pdf(&self, id: i64) -> Result<bool>;

    async fn upsert_doc_export(&self, record: &HistoryRecord) -> Result<()>;

    async fn list_doc_exports(&self) -> Result<Vec<HistoryRecord>>;

    async fn get_doc_export(&self, title: &str) -> Result<Option<HistoryRecord>>;

    async fn list_all(&self) -> Result<Vec<HistoryEntry>>;

    async fn get_setting(&self, key: &str) -> Result<Option<String>>;

    async fn set_setting(&self, key: &str, value: &str) -> Result<()>;
}
