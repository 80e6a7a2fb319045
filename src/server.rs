//! HTTP API and backend proxy.
//!
//! The browser never sees model or Google secrets: model calls are proxied
//! with the server-held API key, and the OAuth code exchange runs here.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `POST` | `/api/research` | Forward a raw body to the model endpoint |
//! | `GET`  | `/api/google-docs/auth/url` | Google consent URL |
//! | `GET`  | `/api/google-docs/auth/callback` | OAuth redirect target (checks `state`) |
//! | `POST` | `/api/google-docs/auth/set-credentials` | Set tokens directly |
//! | `POST` | `/api/google-docs/create` | Create a doc with content |
//! | `GET`  | `/api/google-docs/{documentId}` | Fetch a doc |
//! | `POST` | `/api/sessions` | Run one research turn |
//! | `POST` | `/api/export/pdf` | Render and record a PDF |
//! | `POST` | `/api/export/google-doc` | Export to Google Docs and record |
//! | `POST` | `/api/files` | Upload a knowledge file to the vector store |
//! | `GET`  | `/api/history` | All history entries, newest first |
//! | `GET`  | `/api/history/pdfs/{id}` | Download a stored PDF |
//! | `DELETE` | `/api/history/pdfs/{id}` | Delete a stored PDF |
//! | `GET`  | `/health` | Health check (returns version) |
//!
//! # Error Contract
//!
//! ```json
//! { "error": "upstream error 429: ...", "details": { "...": "..." } }
//! ```
//!
//! Upstream failures keep the upstream status; validation errors are 400,
//! missing history entries 404, anything else 500. There are no retries.
//!
//! # CORS
//!
//! Origins come from `[server].allowed_origins`; `"*"` allows any origin.

use axum::{
    extract::{Path, Query, State},
    http::{header, HeaderValue, StatusCode},
    response::{Html, IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use base64::Engine;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};

use crate::config::Config;
use crate::error::UpstreamError;
use crate::gdocs::{DocExport, DocsSession};
use crate::llm::HttpModelClient;
use crate::models::{HistoryEntry, ResearchSession};
use crate::oauth::{authorization_url, exchange_code, AuthToken};
use crate::pdf::export_pdf;
use crate::research::{render_content, run_research, ResearchRequest};
use crate::store::{HistoryStore, SqliteHistoryStore};
use crate::upload::{FileUploader, UploadSource, UploadedFile};

/// Shared state passed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub store: Arc<dyn HistoryStore>,
    /// `None` when the model API key is not configured.
    pub model: Option<Arc<HttpModelClient>>,
    pub docs: Arc<DocsSession>,
    /// `None` when the files API key is not configured.
    pub uploader: Option<Arc<FileUploader>>,
    http: reqwest::Client,
}

impl AppState {
    pub fn new(config: Config, store: Arc<dyn HistoryStore>) -> Self {
        let model = match HttpModelClient::new(&config.llm) {
            Ok(client) => Some(Arc::new(client)),
            Err(e) => {
                tracing::warn!(error = %e, "model client unavailable; model routes will fail");
                None
            }
        };
        let docs = Arc::new(DocsSession::new(config.google.clone()));
        let uploader = match FileUploader::new(&config.files) {
            Ok(uploader) => Some(Arc::new(uploader)),
            Err(e) => {
                tracing::warn!(error = %e, "file uploader unavailable; uploads will fail");
                None
            }
        };

        Self {
            config: Arc::new(config),
            store,
            model,
            docs,
            uploader,
            http: reqwest::Client::new(),
        }
    }
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let allow_origin = if origins.iter().any(|o| o == "*") {
        AllowOrigin::any()
    } else {
        let values: Vec<HeaderValue> = origins
            .iter()
            .filter_map(|o| match HeaderValue::from_str(o) {
                Ok(v) => Some(v),
                Err(_) => {
                    tracing::warn!(origin = %o, "ignoring invalid CORS origin");
                    None
                }
            })
            .collect();
        AllowOrigin::list(values)
    };

    CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods(Any)
        .allow_headers(Any)
}

/// Builds the router with all routes and the CORS layer.
pub fn build_router(state: AppState) -> Router {
    let cors = cors_layer(&state.config.server.allowed_origins);

    Router::new()
        .route("/api/research", post(handle_research_proxy))
        .route("/api/google-docs/auth/url", get(handle_auth_url))
        .route("/api/google-docs/auth/callback", get(handle_auth_callback))
        .route(
            "/api/google-docs/auth/set-credentials",
            post(handle_set_credentials),
        )
        .route("/api/google-docs/create", post(handle_create_doc))
        .route("/api/google-docs/{document_id}", get(handle_get_doc))
        .route("/api/sessions", post(handle_session))
        .route("/api/export/pdf", post(handle_export_pdf))
        .route("/api/export/google-doc", post(handle_export_google_doc))
        .route("/api/files", post(handle_upload))
        .route("/api/history", get(handle_history))
        .route(
            "/api/history/pdfs/{id}",
            get(handle_get_pdf).delete(handle_delete_pdf),
        )
        .route("/health", get(handle_health))
        .layer(cors)
        .with_state(state)
}

/// Starts the HTTP server on `[server].bind` backed by the SQLite store.
///
/// Runs until the process is terminated.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let pool = crate::db::connect(config).await?;
    crate::migrate::apply_schema(&pool).await?;
    let store: Arc<dyn HistoryStore> = Arc::new(SqliteHistoryStore::new(pool));

    let bind_addr = config.server.bind.clone();
    let app = build_router(AppState::new(config.clone(), store));

    println!("Deep Research server listening on http://{}", bind_addr);

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<Value>,
}

/// Handler error that renders as `{error, details?}`.
#[derive(Debug)]
struct AppError {
    status: StatusCode,
    message: String,
    details: Option<Value>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: self.message,
            details: self.details,
        };
        (self.status, Json(body)).into_response()
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        message: message.into(),
        details: None,
    }
}

fn not_found(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::NOT_FOUND,
        message: message.into(),
        details: None,
    }
}

fn internal(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::INTERNAL_SERVER_ERROR,
        message: message.into(),
        details: None,
    }
}

impl From<UpstreamError> for AppError {
    fn from(err: UpstreamError) -> Self {
        let status = err
            .status()
            .and_then(|s| StatusCode::from_u16(s).ok())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        tracing::warn!(status = status.as_u16(), error = %err, "upstream call failed");
        AppError {
            status,
            message: err.to_string(),
            details: err.details(),
        }
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        match err.downcast_ref::<UpstreamError>() {
            Some(upstream) => {
                let mut app = AppError {
                    status: upstream
                        .status()
                        .and_then(|s| StatusCode::from_u16(s).ok())
                        .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
                    message: format!("{:#}", err),
                    details: upstream.details(),
                };
                if app.status.is_success() {
                    app.status = StatusCode::INTERNAL_SERVER_ERROR;
                }
                tracing::warn!(status = app.status.as_u16(), error = %app.message, "request failed");
                app
            }
            None => {
                tracing::error!(error = %format!("{:#}", err), "request failed");
                internal(format!("{:#}", err))
            }
        }
    }
}

fn require_model(state: &AppState) -> Result<Arc<HttpModelClient>, AppError> {
    state.model.clone().ok_or_else(|| {
        internal(format!(
            "model API key not configured (set {})",
            state.config.llm.api_key_env
        ))
    })
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

// ============ POST /api/research ============

/// Forwards the body unchanged; the upstream status is preserved.
async fn handle_research_proxy(
    State(state): State<AppState>,
    Json(body): Json<Value>,
) -> Result<Response, AppError> {
    let model = require_model(&state)?;
    let (status, json) = model.forward(&body).await?;
    let status = StatusCode::from_u16(status).unwrap_or(StatusCode::BAD_GATEWAY);

    if status.is_success() {
        Ok((status, Json(json)).into_response())
    } else {
        tracing::warn!(status = status.as_u16(), "model endpoint returned an error");
        Err(AppError {
            status,
            message: "Failed to get response from model API".to_string(),
            details: Some(json),
        })
    }
}

// ============ Google OAuth ============

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct AuthUrlResponse {
    auth_url: String,
}

async fn handle_auth_url(State(state): State<AppState>) -> Result<Json<AuthUrlResponse>, AppError> {
    let auth = authorization_url(state.docs.config())?;
    state.docs.remember_oauth_state(auth.state);
    Ok(Json(AuthUrlResponse { auth_url: auth.url }))
}

#[derive(Deserialize)]
struct CallbackParams {
    code: Option<String>,
    state: Option<String>,
}

/// Page that hands the result to the window that opened the consent popup.
fn callback_page(message: &Value) -> Html<String> {
    // `</` would end the script element early.
    let payload = message.to_string().replace("</", "<\\/");
    Html(format!(
        r#"<!DOCTYPE html>
<html>
  <body>
    <script>
      if (window.opener) {{
        window.opener.postMessage({}, '*');
      }}
      window.close();
    </script>
    <p>You can close this window.</p>
  </body>
</html>"#,
        payload
    ))
}

async fn handle_auth_callback(
    State(state): State<AppState>,
    Query(params): Query<CallbackParams>,
) -> Result<Html<String>, AppError> {
    let code = match params.code.filter(|c| !c.is_empty()) {
        Some(code) => code,
        None => return Err(bad_request("No authorization code provided")),
    };
    if !state
        .docs
        .take_oauth_state(params.state.as_deref().unwrap_or_default())
    {
        tracing::warn!("oauth callback with unknown state");
        return Err(bad_request("Invalid OAuth state"));
    }

    match exchange_code(&state.http, state.docs.config(), &code).await {
        Ok(token) => {
            state.docs.set_token(token);
            tracing::info!("google authentication completed");
            Ok(callback_page(&json!({ "code": code })))
        }
        Err(e) => {
            tracing::warn!(error = %format!("{:#}", e), "google token exchange failed");
            Ok(callback_page(&json!({ "error": format!("{:#}", e) })))
        }
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SetCredentialsRequest {
    access_token: Option<String>,
    refresh_token: Option<String>,
}

#[derive(Serialize)]
struct MessageResponse {
    message: String,
}

async fn handle_set_credentials(
    State(state): State<AppState>,
    Json(req): Json<SetCredentialsRequest>,
) -> Result<Json<MessageResponse>, AppError> {
    let access_token = req
        .access_token
        .filter(|t| !t.is_empty())
        .ok_or_else(|| bad_request("Access token is required"))?;

    state.docs.set_token(AuthToken {
        access_token,
        refresh_token: req.refresh_token,
    });

    Ok(Json(MessageResponse {
        message: "Credentials set successfully".to_string(),
    }))
}

// ============ Google Docs ============

#[derive(Deserialize)]
struct CreateDocRequest {
    #[serde(default)]
    content: String,
    title: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CreateDocResponse {
    document_id: String,
}

async fn handle_create_doc(
    State(state): State<AppState>,
    Json(req): Json<CreateDocRequest>,
) -> Result<Json<CreateDocResponse>, AppError> {
    let document_id = state
        .docs
        .create_with_content(&req.title, &req.content)
        .await?;
    Ok(Json(CreateDocResponse { document_id }))
}

async fn handle_get_doc(
    State(state): State<AppState>,
    Path(document_id): Path<String>,
) -> Result<Json<Value>, AppError> {
    Ok(Json(state.docs.get_document(&document_id).await?))
}

#[derive(Deserialize)]
struct ExportDocRequest {
    title: String,
    content: String,
}

async fn handle_export_google_doc(
    State(state): State<AppState>,
    Json(req): Json<ExportDocRequest>,
) -> Result<Json<DocExport>, AppError> {
    if req.title.trim().is_empty() {
        return Err(bad_request("title must not be empty"));
    }
    let export = state
        .docs
        .export(state.store.as_ref(), &req.title, &req.content)
        .await?;
    Ok(Json(export))
}

// ============ POST /api/sessions ============

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SessionRequest {
    query: String,
    temperature: Option<f64>,
    /// The session being continued, as returned by an earlier call.
    previous_session: Option<ResearchSession>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SessionResponse {
    #[serde(flatten)]
    session: ResearchSession,
    rendered_content: String,
}

async fn handle_session(
    State(state): State<AppState>,
    Json(req): Json<SessionRequest>,
) -> Result<Json<SessionResponse>, AppError> {
    if req.query.trim().is_empty() {
        return Err(bad_request("query must not be empty"));
    }
    let model = require_model(&state)?;

    let research = ResearchRequest {
        query: req.query,
        temperature: req.temperature,
        previous: req.previous_session,
    };

    let session = run_research(&*model, state.config.llm.temperature, &research).await?;

    let rendered_content = render_content(&session);
    Ok(Json(SessionResponse {
        session,
        rendered_content,
    }))
}

// ============ POST /api/export/pdf ============

#[derive(Deserialize)]
struct ExportPdfRequest {
    session: ResearchSession,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ExportPdfResponse {
    id: Option<i64>,
    filename: String,
    pdf_base64: String,
}

async fn handle_export_pdf(
    State(state): State<AppState>,
    Json(req): Json<ExportPdfRequest>,
) -> Result<Json<ExportPdfResponse>, AppError> {
    let export = export_pdf(state.store.as_ref(), &req.session, &state.config.pdf).await?;
    Ok(Json(ExportPdfResponse {
        id: export.history_id,
        filename: export.pdf.filename,
        pdf_base64: base64::engine::general_purpose::STANDARD.encode(&export.pdf.bytes),
    }))
}

// ============ POST /api/files ============

/// Either `url`, or `filename` plus base64 `contentBase64`.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct UploadRequest {
    url: Option<String>,
    filename: Option<String>,
    content_base64: Option<String>,
}

async fn handle_upload(
    State(state): State<AppState>,
    Json(req): Json<UploadRequest>,
) -> Result<Json<UploadedFile>, AppError> {
    let uploader = state.uploader.clone().ok_or_else(|| {
        internal(format!(
            "files API key not configured (set {})",
            state.config.files.api_key_env
        ))
    })?;

    let uploaded = match (req.url, req.filename, req.content_base64) {
        (Some(url), _, _) => match UploadSource::parse(&url) {
            source @ UploadSource::Url(_) => {
                uploader.upload_source(state.store.as_ref(), &source).await?
            }
            UploadSource::Path(_) => {
                return Err(bad_request("url must start with http:// or https://"))
            }
        },
        (None, Some(filename), Some(content)) => {
            let bytes = base64::engine::general_purpose::STANDARD
                .decode(content.as_bytes())
                .map_err(|e| bad_request(format!("contentBase64 is not valid base64: {}", e)))?;
            uploader
                .upload(state.store.as_ref(), &filename, bytes)
                .await?
        }
        _ => return Err(bad_request("either url or filename and contentBase64 is required")),
    };

    Ok(Json(uploaded))
}

// ============ History ============

async fn handle_history(State(state): State<AppState>) -> Result<Json<Vec<HistoryEntry>>, AppError> {
    Ok(Json(state.store.list_all().await?))
}

async fn handle_get_pdf(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Response, AppError> {
    let pdf = state
        .store
        .get_pdf(id)
        .await?
        .ok_or_else(|| not_found(format!("no stored pdf with id {}", id)))?;

    let disposition = format!("attachment; filename=\"{}\"", pdf.filename.replace('"', ""));
    Ok((
        [
            (header::CONTENT_TYPE, "application/pdf".to_string()),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        pdf.pdf_data,
    )
        .into_response())
}

async fn handle_delete_pdf(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<StatusCode, AppError> {
    if state.store.delete_pdf(id).await? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(not_found(format!("no stored pdf with id {}", id)))
    }
}
