use anyhow::Result;
use sqlx::SqlitePool;

use crate::config::Config;
use crate::db;

pub async fn run_migrations(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    apply_schema(&pool).await?;
    pool.close().await;
    Ok(())
}

/// Creates all tables and indexes. Idempotent.
pub async fn apply_schema(pool: &SqlitePool) -> Result<()> {
    // One table for every history kind; kind-specific columns are nullable.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS history (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            kind TEXT NOT NULL CHECK (kind IN ('pdf', 'doc_export')),
            title TEXT NOT NULL,
            created_at INTEGER NOT NULL,
            filename TEXT,
            query TEXT,
            pdf_data BLOB,
            doc_id TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Doc exports are keyed by title; a second export with the same title overwrites.
    sqlx::query(
        "CREATE UNIQUE INDEX IF NOT EXISTS idx_history_doc_title ON history(title) WHERE kind = 'doc_export'",
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_history_kind ON history(kind, created_at DESC)")
        .execute(pool)
        .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS settings (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL,
            updated_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}
