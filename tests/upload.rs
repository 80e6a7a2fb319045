//! Knowledge uploads against a mock file / vector-store API.

use std::sync::{Arc, Mutex};

use axum::{
    body::Bytes,
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    routing::{get, post},
    Json, Router,
};
use serde_json::{json, Value};

use deep_research::config::FilesConfig;
use deep_research::store::{HistoryStore, InMemoryHistoryStore};
use deep_research::upload::{FileUploader, UploadSource, VECTOR_STORE_SETTING};

const API_KEY_ENV: &str = "DR_UPLOAD_TEST_API_KEY";
const API_KEY: &str = "upload-key";

#[derive(Default)]
struct Recorded {
    uploads: Vec<String>,
    stores: Vec<String>,
    attached: Vec<(String, String)>,
    lookup_status: Option<u16>,
}

#[derive(Clone, Default)]
struct MockFiles {
    state: Arc<Mutex<Recorded>>,
}

fn authorized(headers: &HeaderMap) -> bool {
    headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v == format!("Bearer {}", API_KEY))
}

async fn mock_upload(
    State(mock): State<MockFiles>,
    headers: HeaderMap,
    body: Bytes,
) -> (StatusCode, Json<Value>) {
    if !authorized(&headers) {
        return (StatusCode::UNAUTHORIZED, Json(json!({})));
    }
    let text = String::from_utf8_lossy(&body).to_string();
    if !text.contains("name=\"purpose\"") || !text.contains("assistants") {
        return (StatusCode::BAD_REQUEST, Json(json!({ "error": "purpose" })));
    }
    let mut state = mock.state.lock().unwrap();
    state.uploads.push(text);
    let id = format!("file-{}", state.uploads.len());
    (StatusCode::OK, Json(json!({ "id": id, "purpose": "assistants" })))
}

async fn mock_create_store(
    State(mock): State<MockFiles>,
    Json(body): Json<Value>,
) -> Json<Value> {
    let mut state = mock.state.lock().unwrap();
    state
        .stores
        .push(body["name"].as_str().unwrap_or_default().to_string());
    Json(json!({ "id": format!("vs_{}", state.stores.len()) }))
}

async fn mock_get_store(
    State(mock): State<MockFiles>,
    Path(id): Path<String>,
) -> (StatusCode, Json<Value>) {
    let state = mock.state.lock().unwrap();
    if let Some(status) = state.lookup_status {
        let status = StatusCode::from_u16(status).unwrap();
        return (status, Json(json!({ "error": { "message": "lookup failed" } })));
    }
    let known = (1..=state.stores.len()).any(|n| id == format!("vs_{}", n));
    if known {
        (StatusCode::OK, Json(json!({ "id": id })))
    } else {
        (StatusCode::NOT_FOUND, Json(json!({ "error": { "message": "no such store" } })))
    }
}

async fn mock_attach(
    State(mock): State<MockFiles>,
    Path(id): Path<String>,
    Json(body): Json<Value>,
) -> Json<Value> {
    let mut state = mock.state.lock().unwrap();
    let file_id = body["file_id"].as_str().unwrap_or_default().to_string();
    state.attached.push((id, file_id.clone()));
    Json(json!({ "id": format!("vsf-{}", file_id) }))
}

async fn mock_source() -> &'static str {
    "Clausius, 1865: the entropy of the universe tends to a maximum."
}

async fn spawn_mock(mock: MockFiles) -> String {
    let app = Router::new()
        .route("/v1/files", post(mock_upload))
        .route("/v1/vector_stores", post(mock_create_store))
        .route("/v1/vector_stores/{id}", get(mock_get_store))
        .route("/v1/vector_stores/{id}/files", post(mock_attach))
        .route("/papers/clausius.txt", get(mock_source))
        .with_state(mock);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{}", addr)
}

fn uploader(base: &str) -> FileUploader {
    std::env::set_var(API_KEY_ENV, API_KEY);
    FileUploader::new(&FilesConfig {
        api_base: format!("{}/v1", base),
        api_key_env: API_KEY_ENV.to_string(),
        ..Default::default()
    })
    .unwrap()
}

#[tokio::test]
async fn test_first_upload_creates_and_caches_vector_store() {
    let mock = MockFiles::default();
    let base = spawn_mock(mock.clone()).await;
    let uploader = uploader(&base);
    let store = InMemoryHistoryStore::new();

    let uploaded = uploader
        .upload(&store, "notes.txt", b"entropy notes".to_vec())
        .await
        .unwrap();
    assert_eq!(uploaded.filename, "notes.txt");
    assert_eq!(uploaded.file_id, "file-1");
    assert_eq!(uploaded.vector_store_id, "vs_1");
    assert_eq!(uploaded.vector_store_file_id, "vsf-file-1");
    assert_eq!(
        store.get_setting(VECTOR_STORE_SETTING).await.unwrap().as_deref(),
        Some("vs_1")
    );

    let state = mock.state.lock().unwrap();
    assert_eq!(state.stores, vec!["deep_research_knowledge"]);
    assert!(state.uploads[0].contains("filename=\"notes.txt\""));
    assert!(state.uploads[0].contains("entropy notes"));
    assert_eq!(state.attached, vec![("vs_1".to_string(), "file-1".to_string())]);
}

#[tokio::test]
async fn test_cached_vector_store_is_reused() {
    let mock = MockFiles::default();
    let base = spawn_mock(mock.clone()).await;
    let uploader = uploader(&base);
    let store = InMemoryHistoryStore::new();

    uploader.upload(&store, "a.txt", b"a".to_vec()).await.unwrap();
    let second = uploader.upload(&store, "b.txt", b"b".to_vec()).await.unwrap();

    assert_eq!(second.vector_store_id, "vs_1");
    assert_eq!(mock.state.lock().unwrap().stores.len(), 1);
}

#[tokio::test]
async fn test_stale_vector_store_is_recreated() {
    let mock = MockFiles::default();
    let base = spawn_mock(mock.clone()).await;
    let uploader = uploader(&base);
    let store = InMemoryHistoryStore::new();
    store
        .set_setting(VECTOR_STORE_SETTING, "vs_deleted")
        .await
        .unwrap();

    let uploaded = uploader.upload(&store, "a.txt", b"a".to_vec()).await.unwrap();
    assert_eq!(uploaded.vector_store_id, "vs_1");
    assert_eq!(
        store.get_setting(VECTOR_STORE_SETTING).await.unwrap().as_deref(),
        Some("vs_1")
    );
}

#[tokio::test]
async fn test_vector_store_lookup_failure_is_not_masked() {
    let mock = MockFiles::default();
    mock.state.lock().unwrap().lookup_status = Some(500);
    let base = spawn_mock(mock.clone()).await;
    let uploader = uploader(&base);
    let store = InMemoryHistoryStore::new();
    store.set_setting(VECTOR_STORE_SETTING, "vs_1").await.unwrap();

    let err = uploader
        .upload(&store, "a.txt", b"a".to_vec())
        .await
        .unwrap_err();
    assert!(format!("{:#}", err).contains("500"));
    assert!(mock.state.lock().unwrap().stores.is_empty());
    assert_eq!(
        store.get_setting(VECTOR_STORE_SETTING).await.unwrap().as_deref(),
        Some("vs_1")
    );
}

#[tokio::test]
async fn test_upload_from_url_uses_last_path_segment() {
    let mock = MockFiles::default();
    let base = spawn_mock(mock.clone()).await;
    let uploader = uploader(&base);
    let store = InMemoryHistoryStore::new();

    let source = UploadSource::parse(&format!("{}/papers/clausius.txt", base));
    let uploaded = uploader.upload_source(&store, &source).await.unwrap();
    assert_eq!(uploaded.filename, "clausius.txt");

    let state = mock.state.lock().unwrap();
    assert!(state.uploads[0].contains("tends to a maximum"));
}

#[tokio::test]
async fn test_upload_from_missing_url_fails() {
    let mock = MockFiles::default();
    let base = spawn_mock(mock.clone()).await;
    let uploader = uploader(&base);
    let store = InMemoryHistoryStore::new();

    let source = UploadSource::parse(&format!("{}/papers/missing.txt", base));
    let err = uploader.upload_source(&store, &source).await.unwrap_err();
    assert!(err.to_string().contains("Failed to fetch file from URL"));
    assert!(mock.state.lock().unwrap().uploads.is_empty());
}

#[tokio::test]
async fn test_upload_from_local_path() {
    let mock = MockFiles::default();
    let base = spawn_mock(mock.clone()).await;
    let uploader = uploader(&base);
    let store = InMemoryHistoryStore::new();

    let tmp = tempfile::TempDir::new().unwrap();
    let path = tmp.path().join("boltzmann.md");
    std::fs::write(&path, "S = k log W").unwrap();

    let source = UploadSource::parse(path.to_str().unwrap());
    let uploaded = uploader.upload_source(&store, &source).await.unwrap();
    assert_eq!(uploaded.filename, "boltzmann.md");
    assert!(mock.state.lock().unwrap().uploads[0].contains("S = k log W"));
}
