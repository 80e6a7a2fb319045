//! In-memory [`HistoryStore`] implementation for tests and ephemeral serving.
//!
//! Entries live in a `Vec` behind `std::sync::RwLock`; ids are assigned
//! from a counter that never reuses a value, like SQLite `AUTOINCREMENT`.

use std::collections::HashMap;
use std::sync::RwLock;

use anyhow::Result;
use async_trait::async_trait;

use crate::models::{now_millis, HistoryEntry, HistoryPayload, HistoryRecord, StoredPdf};

use super::HistoryStore;

struct Entries {
    rows: Vec<HistoryEntry>,
    next_id: i64,
}

/// In-memory history store.
pub struct InMemoryHistoryStore {
    entries: RwLock<Entries>,
    settings: RwLock<HashMap<String, String>>,
}

impl InMemoryHistoryStore {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(Entries {
                rows: Vec::new(),
                next_id: 1,
            }),
            settings: RwLock::new(HashMap::new()),
        }
    }
}

impl Default for InMemoryHistoryStore {
    fn default() -> Self {
        Self::new()
    }
}

fn newest_first(a: &HistoryEntry, b: &HistoryEntry) -> std::cmp::Ordering {
    b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id))
}

#[async_trait]
impl HistoryStore for InMemoryHistoryStore {
    async fn save_pdf(&self, pdf_data: &[u8], filename: &str, query: &str) -> Result<i64> {
        let mut entries = self.entries.write().unwrap();
        let id = entries.next_id;
        entries.next_id += 1;
        entries.rows.push(HistoryEntry {
            id,
            title: filename.to_string(),
            created_at: now_millis(),
            payload: HistoryPayload::Pdf {
                filename: filename.to_string(),
                query: query.to_string(),
                pdf_data: pdf_data.to_vec(),
            },
        });
        Ok(id)
    }

    async fn list_pdfs(&self) -> Result<Vec<StoredPdf>> {
        let entries = self.entries.read().unwrap();
        let mut pdfs: Vec<StoredPdf> = entries.rows.iter().filter_map(|e| e.as_pdf()).collect();
        pdfs.sort_by_key(|p| p.id);
        Ok(pdfs)
    }

    async fn get_pdf(&self, id: i64) -> Result<Option<StoredPdf>> {
        let entries = self.entries.read().unwrap();
        Ok(entries
            .rows
            .iter()
            .find(|e| e.id == id)
            .and_then(|e| e.as_pdf()))
    }

    async fn delete_pdf(&self, id: i64) -> Result<bool> {
        let mut entries = self.entries.write().unwrap();
        let before = entries.rows.len();
        entries
            .rows
            .retain(|e| !(e.id == id && e.as_pdf().is_some()));
        Ok(entries.rows.len() != before)
    }

    async fn upsert_doc_export(&self, record: &HistoryRecord) -> Result<()> {
        let mut entries = self.entries.write().unwrap();
        let existing = entries
            .rows
            .iter_mut()
            .find(|e| e.title == record.title && e.as_doc_export().is_some());

        match existing {
            Some(entry) => {
                entry.created_at = record.timestamp;
                entry.payload = HistoryPayload::DocExport {
                    doc_id: record.doc_id.clone(),
                };
            }
            None => {
                let id = entries.next_id;
                entries.next_id += 1;
                entries.rows.push(HistoryEntry {
                    id,
                    title: record.title.clone(),
                    created_at: record.timestamp,
                    payload: HistoryPayload::DocExport {
                        doc_id: record.doc_id.clone(),
                    },
                });
            }
        }
        Ok(())
    }

    async fn list_doc_exports(&self) -> Result<Vec<HistoryRecord>> {
        let entries = self.entries.read().unwrap();
        let mut records: Vec<HistoryRecord> = entries
            .rows
            .iter()
            .filter_map(|e| e.as_doc_export())
            .collect();
        records.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        Ok(records)
    }

    async fn get_doc_export(&self, title: &str) -> Result<Option<HistoryRecord>> {
        let entries = self.entries.read().unwrap();
        Ok(entries
            .rows
            .iter()
            .filter(|e| e.title == title)
            .find_map(|e| e.as_doc_export()))
    }

    async fn list_all(&self) -> Result<Vec<HistoryEntry>> {
        let entries = self.entries.read().unwrap();
        let mut rows = entries.rows.clone();
        rows.sort_by(newest_first);
        Ok(rows)
    }

    async fn get_setting(&self, key: &str) -> Result<Option<String>> {
        Ok(self.settings.read().unwrap().get(key).cloned())
    }

    async fn set_setting(&self, key: &str, value: &str) -> Result<()> {
        self.settings
            .write()
            .unwrap()
            .insert(key.to_string(), value.to_string());
        Ok(())
    }
}
