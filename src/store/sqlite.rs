//! SQLite-backed [`HistoryStore`] implementation.
//!
//! Maps each operation onto the `history` and `settings` tables created by
//! [`crate::migrate::apply_schema`].

use anyhow::Result;
use async_trait::async_trait;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

use crate::models::{now_millis, HistoryEntry, HistoryPayload, HistoryRecord, StoredPdf};

use super::HistoryStore;

/// SQLite implementation of the [`HistoryStore`] trait.
pub struct SqliteHistoryStore {
    pool: SqlitePool,
}

impl SqliteHistoryStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

fn entry_from_row(row: &SqliteRow) -> Result<HistoryEntry> {
    let kind: String = row.try_get("kind")?;
    let payload = match kind.as_str() {
        "pdf" => HistoryPayload::Pdf {
            filename: row.try_get::<Option<String>, _>("filename")?.unwrap_or_default(),
            query: row.try_get::<Option<String>, _>("query")?.unwrap_or_default(),
            pdf_data: row.try_get::<Option<Vec<u8>>, _>("pdf_data")?.unwrap_or_default(),
        },
        "doc_export" => HistoryPayload::DocExport {
            doc_id: row.try_get::<Option<String>, _>("doc_id")?.unwrap_or_default(),
        },
        other => anyhow::bail!("unknown history kind in database: {}", other),
    };

    Ok(HistoryEntry {
        id: row.try_get("id")?,
        title: row.try_get("title")?,
        created_at: row.try_get("created_at")?,
        payload,
    })
}

const ENTRY_COLUMNS: &str = "id, kind, title, created_at, filename, query, pdf_data, doc_id";

#[async_trait]
impl HistoryStore for SqliteHistoryStore {
    async fn save_pdf(&self, pdf_data: &[u8], filename: &str, query: &str) -> Result<i64> {
        let result = sqlx::query(
            r#"
            INSERT INTO history (kind, title, created_at, filename, query, pdf_data)
            VALUES ('pdf', ?, ?, ?, ?, ?)
            "#,
        )
        .bind(filename)
        .bind(now_millis())
        .bind(filename)
        .bind(query)
        .bind(pdf_data)
        .execute(&self.pool)
        .await?;

        Ok(result.last_insert_rowid())
    }

    async fn list_pdfs(&self) -> Result<Vec<StoredPdf>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM history WHERE kind = 'pdf' ORDER BY id ASC",
            ENTRY_COLUMNS
        ))
        .fetch_all(&self.pool)
        .await?;

        let mut pdfs = Vec::with_capacity(rows.len());
        for row in &rows {
            if let Some(pdf) = entry_from_row(row)?.as_pdf() {
                pdfs.push(pdf);
            }
        }
        Ok(pdfs)
    }

    async fn get_pdf(&self, id: i64) -> Result<Option<StoredPdf>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM history WHERE kind = 'pdf' AND id = ?",
            ENTRY_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => Ok(entry_from_row(&row)?.as_pdf()),
            None => Ok(None),
        }
    }

    async fn delete_pdf(&self, id: i64) -> Result<bool> {
        let result = sqlx::query("DELETE FROM history WHERE kind = 'pdf' AND id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn upsert_doc_export(&self, record: &HistoryRecord) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        let updated = sqlx::query(
            "UPDATE history SET doc_id = ?, created_at = ? WHERE kind = 'doc_export' AND title = ?",
        )
        .bind(&record.doc_id)
        .bind(record.timestamp)
        .bind(&record.title)
        .execute(&mut *tx)
        .await?;

        if updated.rows_affected() == 0 {
            sqlx::query(
                "INSERT INTO history (kind, title, created_at, doc_id) VALUES ('doc_export', ?, ?, ?)",
            )
            .bind(&record.title)
            .bind(record.timestamp)
            .bind(&record.doc_id)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn list_doc_exports(&self) -> Result<Vec<HistoryRecord>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM history WHERE kind = 'doc_export' ORDER BY created_at DESC, id DESC",
            ENTRY_COLUMNS
        ))
        .fetch_all(&self.pool)
        .await?;

        let mut records = Vec::with_capacity(rows.len());
        for row in &rows {
            if let Some(record) = entry_from_row(row)?.as_doc_export() {
                records.push(record);
            }
        }
        Ok(records)
    }

    async fn get_doc_export(&self, title: &str) -> Result<Option<HistoryRecord>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM history WHERE kind = 'doc_export' AND title = ?",
            ENTRY_COLUMNS
        ))
        .bind(title)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => Ok(entry_from_row(&row)?.as_doc_export()),
            None => Ok(None),
        }
    }

    async fn list_all(&self) -> Result<Vec<HistoryEntry>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM history ORDER BY created_at DESC, id DESC",
            ENTRY_COLUMNS
        ))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(entry_from_row).collect()
    }

    async fn get_setting(&self, key: &str) -> Result<Option<String>> {
        let value: Option<String> = sqlx::query_scalar("SELECT value FROM settings WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;
        Ok(value)
    }

    async fn set_setting(&self, key: &str, value: &str) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO settings (key, value, updated_at)
            VALUES (?, ?, ?)
            ON CONFLICT(key) DO UPDATE SET
                value = excluded.value,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(key)
        .bind(value)
        .bind(now_millis())
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
