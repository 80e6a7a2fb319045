//! End-to-end research flows with a stub model and a mock Docs API.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use axum::{extract::State, routing::post, Json, Router};
use serde_json::{json, Value};

use deep_research::config::{GoogleConfig, PdfConfig};
use deep_research::error::UpstreamError;
use deep_research::gdocs::{DocsSession, DocsState};
use deep_research::llm::{ModelClient, Provider};
use deep_research::models::{Confidence, HistoryKind};
use deep_research::oauth::AuthToken;
use deep_research::pdf::export_pdf;
use deep_research::research::{render_content, run_research, ResearchRequest};
use deep_research::store::{HistoryStore, InMemoryHistoryStore};

const ENTROPY_REPLY: &str = r#"{
  "content": {
    "title": "Entropy",
    "content": "<h1>Entropy</h1><p>Entropy measures disorder [1]. See https://en.wikipedia.org/wiki/Entropy for more [2].</p>"
  },
  "reasoning": "Start from thermodynamics.",
  "citations": [
    {"title": "Clausius 1865", "url": "https://example.org/clausius"},
    {"title": "Wikipedia", "url": "https://en.wikipedia.org/wiki/Entropy"}
  ],
  "assets": [{"url": "https://example.org/fig.png", "description": "T-S diagram"}]
}"#;

/// A reply shaped like [`ENTROPY_REPLY`] whose body runs to `paragraphs`
/// paragraphs, long enough to need several PDF pages.
fn long_entropy_reply(paragraphs: usize) -> String {
    let body: String = (1..=paragraphs)
        .map(|i| {
            format!(
                "<p>Section {}: in an isolated system the number of accessible microstates grows, \
                 and with it the entropy, until equilibrium is reached [1], see also [2].</p>",
                i
            )
        })
        .collect();
    json!({
        "content": { "title": "Entropy", "content": format!("<h1>Entropy</h1>{}", body) },
        "reasoning": "Start from thermodynamics.",
        "citations": [
            { "title": "Clausius 1865", "url": "https://example.org/clausius" },
            { "title": "Wikipedia", "url": "https://en.wikipedia.org/wiki/Entropy" }
        ],
        "assets": [{ "url": "https://example.org/fig.png", "description": "T-S diagram" }]
    })
    .to_string()
}

struct StubModel {
    replies: Mutex<Vec<String>>,
    bodies: Mutex<Vec<Value>>,
}

impl StubModel {
    fn new(replies: &[&str]) -> Self {
        Self {
            replies: Mutex::new(replies.iter().map(|r| r.to_string()).collect()),
            bodies: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl ModelClient for StubModel {
    fn provider(&self) -> Provider {
        Provider::OpenAiChat
    }

    fn model(&self) -> &str {
        "stub-model"
    }

    async fn send(&self, body: &Value) -> Result<Value, UpstreamError> {
        self.bodies.lock().unwrap().push(body.clone());
        let reply = self.replies.lock().unwrap().remove(0);
        Ok(json!({
            "id": format!("chatcmpl-{}", self.bodies.lock().unwrap().len()),
            "choices": [{ "message": { "role": "assistant", "content": reply } }]
        }))
    }
}

#[tokio::test]
async fn test_explain_entropy_to_pdf_history() {
    let reply = long_entropy_reply(120);
    let model = StubModel::new(&[&reply]);
    let store = InMemoryHistoryStore::new();

    let session = run_research(&model, 0.7, &ResearchRequest::new("Explain entropy"))
        .await
        .unwrap();
    assert_eq!(session.title, "Entropy");
    assert_eq!(session.confidence, Confidence::Parsed);
    assert_eq!(session.citations.len(), 2);
    assert_eq!(session.assets[0].description, "T-S diagram");
    assert_eq!(session.reasoning.as_deref(), Some("Start from thermodynamics."));

    let rendered = render_content(&session);
    assert!(rendered.contains(r#"<a href="https://example.org/clausius" target="_blank" rel="noopener noreferrer">[1]</a>"#));
    assert!(rendered.contains(r#"<a href="https://en.wikipedia.org/wiki/Entropy" target="_blank" rel="noopener noreferrer">[2]</a>"#));

    let body = &model.bodies.lock().unwrap()[0];
    assert_eq!(body["model"], "stub-model");
    assert_eq!(body["temperature"], 0.7);

    let export = export_pdf(&store, &session, &PdfConfig::default())
        .await
        .unwrap();
    assert!(export.pdf.bytes.starts_with(b"%PDF"));
    assert!(export.pdf.filename.starts_with("research-"));
    assert!(export.pdf.filename.ends_with(".pdf"));
    assert!(
        export.pdf.page_count > 1,
        "expected a multi-page paper, got {} page(s)",
        export.pdf.page_count
    );

    let id = export.history_id.expect("pdf recorded");
    let stored = store.get_pdf(id).await.unwrap().unwrap();
    assert_eq!(stored.query, "Explain entropy");
    assert_eq!(stored.pdf_data, export.pdf.bytes);

    let doc = lopdf::Document::load_mem(&stored.pdf_data).unwrap();
    assert_eq!(doc.get_pages().len(), export.pdf.page_count);
}

#[tokio::test]
async fn test_malformed_reply_still_produces_session() {
    let model = StubModel::new(&["<think>hmm</think>Entropy always increases in isolated systems."]);
    let session = run_research(&model, 0.7, &ResearchRequest::new("Explain entropy"))
        .await
        .unwrap();
    assert_eq!(session.confidence, Confidence::RawFallback);
    assert_eq!(
        session.content,
        "Entropy always increases in isolated systems."
    );
    assert!(session.citations.is_empty());
}

#[tokio::test]
async fn test_continuation_keeps_earlier_content() {
    let model = StubModel::new(&[
        ENTROPY_REPLY,
        r#"{"content":{"title":"Entropy","content":"<p>Boltzmann related entropy to microstates [1].</p>"},"citations":[{"title":"Boltzmann","url":"https://example.org/boltzmann"}],"assets":[]}"#,
    ]);

    let first = run_research(&model, 0.7, &ResearchRequest::new("Explain entropy"))
        .await
        .unwrap();
    let second = run_research(
        &model,
        0.7,
        &ResearchRequest {
            query: "Explain entropy".to_string(),
            temperature: None,
            previous: Some(first.clone()),
        },
    )
    .await
    .unwrap();

    assert!(second.content.starts_with(&first.content));
    assert!(second.content.contains("Boltzmann"));
    assert_eq!(second.citations.len(), 3);
    assert!(second.content.ends_with("microstates [3].</p>"));
    assert!(render_content(&second)
        .contains(r#"<a href="https://example.org/boltzmann" target="_blank" rel="noopener noreferrer">[3]</a>"#));
    assert!(render_content(&second)
        .contains(r#"<a href="https://example.org/clausius" target="_blank" rel="noopener noreferrer">[1]</a>"#));

    let bodies = model.bodies.lock().unwrap();
    let continuation_prompt = bodies[1].to_string();
    assert!(continuation_prompt.contains("Entropy measures disorder"));
}

// ============ Google Docs against a mock API ============

#[derive(Clone, Default)]
struct MockDocs {
    batch_updates: Arc<Mutex<Vec<Value>>>,
    reject_auth: bool,
}

async fn mock_create(State(mock): State<MockDocs>) -> Result<Json<Value>, axum::http::StatusCode> {
    if mock.reject_auth {
        return Err(axum::http::StatusCode::UNAUTHORIZED);
    }
    Ok(Json(json!({ "documentId": "doc-abc_123", "title": "Entropy" })))
}

async fn mock_batch_update(
    State(mock): State<MockDocs>,
    axum::extract::Path(doc): axum::extract::Path<String>,
    Json(body): Json<Value>,
) -> Json<Value> {
    mock.batch_updates
        .lock()
        .unwrap()
        .push(json!({ "path": doc, "body": body }));
    Json(json!({ "replies": [] }))
}

async fn spawn_mock_docs(mock: MockDocs) -> String {
    let app = Router::new()
        .route("/v1/documents", post(mock_create))
        .route("/v1/documents/{doc}", post(mock_batch_update))
        .with_state(mock);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{}/v1", addr)
}

fn token() -> AuthToken {
    AuthToken {
        access_token: "ya29.test".to_string(),
        refresh_token: None,
    }
}

#[tokio::test]
async fn test_google_doc_export_records_history() {
    let mock = MockDocs::default();
    let base = spawn_mock_docs(mock.clone()).await;
    let session = DocsSession::new(GoogleConfig {
        docs_api_base: base,
        ..Default::default()
    });
    session.set_token(token());
    let store = InMemoryHistoryStore::new();

    let export = session
        .export(
            &store,
            "Entropy",
            "<p>Read https://example.org/clausius now</p>",
        )
        .await
        .unwrap();

    assert_eq!(export.document_id, "doc-abc_123");
    assert_eq!(export.url, "https://docs.google.com/document/d/doc-abc_123/edit");
    assert_eq!(session.state(), DocsState::DocUpdated);

    let updates = mock.batch_updates.lock().unwrap();
    assert_eq!(updates.len(), 1);
    assert_eq!(updates[0]["path"], "doc-abc_123:batchUpdate");
    let requests = updates[0]["body"]["requests"].as_array().unwrap();
    let link = requests
        .iter()
        .find(|r| r.get("updateTextStyle").is_some())
        .unwrap();
    assert_eq!(
        link["updateTextStyle"]["textStyle"]["link"]["url"],
        "https://example.org/clausius"
    );

    let record = store.get_doc_export("Entropy").await.unwrap().unwrap();
    assert_eq!(record.doc_id, "doc-abc_123");
    assert_eq!(store.list_all().await.unwrap()[0].kind(), HistoryKind::DocExport);
}

#[tokio::test]
async fn test_google_doc_export_empty_content_still_returns_url() {
    let mock = MockDocs::default();
    let base = spawn_mock_docs(mock.clone()).await;
    let session = DocsSession::new(GoogleConfig {
        docs_api_base: base,
        ..Default::default()
    });
    session.set_token(token());
    let store = InMemoryHistoryStore::new();

    let export = session.export(&store, "Empty", "").await.unwrap();
    assert_eq!(export.url, "https://docs.google.com/document/d/doc-abc_123/edit");
    assert!(mock.batch_updates.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_second_export_restarts_progress() {
    let mock = MockDocs::default();
    let base = spawn_mock_docs(mock.clone()).await;
    let session = DocsSession::new(GoogleConfig {
        docs_api_base: base,
        ..Default::default()
    });
    session.set_token(token());
    let store = InMemoryHistoryStore::new();

    session.export(&store, "First", "some text").await.unwrap();
    assert_eq!(session.state(), DocsState::DocUpdated);

    // Nothing to insert, so the second document stops at DocCreated.
    session.export(&store, "Second", "").await.unwrap();
    assert_eq!(session.state(), DocsState::DocCreated);
    assert_eq!(mock.batch_updates.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn test_rejected_token_is_cleared() {
    let mock = MockDocs {
        reject_auth: true,
        ..Default::default()
    };
    let base = spawn_mock_docs(mock).await;
    let session = DocsSession::new(GoogleConfig {
        docs_api_base: base,
        ..Default::default()
    });
    session.set_token(token());
    let store = InMemoryHistoryStore::new();

    let err = session.export(&store, "Entropy", "text").await.unwrap_err();
    assert!(err.is_auth_failure());
    assert!(session.tokens().current().is_none());
    assert!(store.list_all().await.unwrap().is_empty());
}
