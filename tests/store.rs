//! SQLite history store behaviour against a real database file.

use deep_research::models::{HistoryKind, HistoryRecord};
use deep_research::store::{HistoryStore, SqliteHistoryStore};
use tempfile::TempDir;

async fn store_in(tmp: &TempDir) -> SqliteHistoryStore {
    let pool = deep_research::db::connect_path(&tmp.path().join("history.sqlite"))
        .await
        .unwrap();
    deep_research::migrate::apply_schema(&pool).await.unwrap();
    SqliteHistoryStore::new(pool)
}

fn record(title: &str, doc_id: &str, timestamp: i64) -> HistoryRecord {
    HistoryRecord {
        title: title.to_string(),
        doc_id: doc_id.to_string(),
        timestamp,
    }
}

#[tokio::test]
async fn test_pdfs_round_trip_in_insertion_order() {
    let tmp = TempDir::new().unwrap();
    let store = store_in(&tmp).await;

    let a = store.save_pdf(b"%PDF-a", "a.pdf", "first").await.unwrap();
    let b = store.save_pdf(b"%PDF-b", "b.pdf", "second").await.unwrap();
    assert!(b > a);

    let pdfs = store.list_pdfs().await.unwrap();
    assert_eq!(pdfs.len(), 2);
    assert_eq!(pdfs[0].filename, "a.pdf");
    assert_eq!(pdfs[1].query, "second");
    assert_eq!(pdfs[1].pdf_data, b"%PDF-b");

    let got = store.get_pdf(a).await.unwrap().unwrap();
    assert_eq!(got.pdf_data, b"%PDF-a");
    assert!(store.get_pdf(999).await.unwrap().is_none());
}

#[tokio::test]
async fn test_delete_pdf_and_ids_not_reused() {
    let tmp = TempDir::new().unwrap();
    let store = store_in(&tmp).await;

    let a = store.save_pdf(b"x", "a.pdf", "q").await.unwrap();
    assert!(store.delete_pdf(a).await.unwrap());
    assert!(!store.delete_pdf(a).await.unwrap());
    assert!(store.list_pdfs().await.unwrap().is_empty());

    let b = store.save_pdf(b"y", "b.pdf", "q").await.unwrap();
    assert!(b > a);
}

#[tokio::test]
async fn test_doc_exports_overwrite_by_title_newest_first() {
    let tmp = TempDir::new().unwrap();
    let store = store_in(&tmp).await;

    store.upsert_doc_export(&record("Entropy", "doc1", 100)).await.unwrap();
    store.upsert_doc_export(&record("Gravity", "doc2", 200)).await.unwrap();
    store.upsert_doc_export(&record("Entropy", "doc3", 300)).await.unwrap();

    let records = store.list_doc_exports().await.unwrap();
    assert_eq!(records, vec![record("Entropy", "doc3", 300), record("Gravity", "doc2", 200)]);

    let got = store.get_doc_export("Entropy").await.unwrap().unwrap();
    assert_eq!(got.edit_url(), "https://docs.google.com/document/d/doc3/edit");
    assert!(store.get_doc_export("Unknown").await.unwrap().is_none());
}

#[tokio::test]
async fn test_list_all_mixes_kinds() {
    let tmp = TempDir::new().unwrap();
    let store = store_in(&tmp).await;

    store.upsert_doc_export(&record("Entropy", "doc1", 1)).await.unwrap();
    store.save_pdf(b"x", "Entropy", "q").await.unwrap();

    let all = store.list_all().await.unwrap();
    assert_eq!(all.len(), 2);
    // The PDF was saved "now", after the doc export's timestamp of 1 ms.
    assert_eq!(all[0].kind(), HistoryKind::Pdf);
    assert_eq!(all[1].kind(), HistoryKind::DocExport);
}

#[tokio::test]
async fn test_data_survives_reopen() {
    let tmp = TempDir::new().unwrap();
    {
        let store = store_in(&tmp).await;
        store.save_pdf(b"persisted", "p.pdf", "q").await.unwrap();
        store.set_setting("theme", "dark").await.unwrap();
        store.close().await;
    }

    let store = store_in(&tmp).await;
    assert_eq!(store.list_pdfs().await.unwrap()[0].pdf_data, b"persisted");
    assert_eq!(
        store.get_setting("theme").await.unwrap().as_deref(),
        Some("dark")
    );
}

#[tokio::test]
async fn test_settings_upsert() {
    let tmp = TempDir::new().unwrap();
    let store = store_in(&tmp).await;

    assert!(store.get_setting("model").await.unwrap().is_none());
    store.set_setting("model", "a").await.unwrap();
    store.set_setting("model", "b").await.unwrap();
    assert_eq!(store.get_setting("model").await.unwrap().as_deref(), Some("b"));
}
