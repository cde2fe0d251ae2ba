//! HTTP server for the browser extension.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `POST` | `/chat` | Answer a message using retrieved documents and page context |
//! | `POST` | `/generate` | Draft a value for a form field on the page |
//! | `GET`  | `/list_files` | List stored documents |
//! | `POST` | `/upload_files` | Ingest multipart `files` parts |
//! | `POST` | `/delete_file` | Remove a document and its chunks |
//! | `GET`  | `/get_env` | Which credentials are set (never their values) |
//! | `POST` | `/update_env` | Save credentials; does not rebuild the agent |
//! | `POST` | `/reinitialize_agent` | Rebuild the agent from stored credentials |
//! | `GET`  | `/agent_status` | Lifecycle state and active instance |
//! | `POST` | `/reindex` | Re-embed chunks from a previous embedding model |
//! | `GET`  | `/health` | Health check (returns version) |
//!
//! # Error Contract
//!
//! Endpoints that return data fail with:
//!
//! ```json
//! { "error": { "code": "not_ready", "message": "agent not ready: ..." } }
//! ```
//!
//! Endpoints that perform an action answer `{"success": bool, "error"?, "code"?}`
//! with the same status code the error kind maps to.
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted; the client is a browser extension.

use axum::{
    extract::{DefaultBodyLimit, Multipart, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::app::App;
use crate::chat::FieldRequest;
use crate::error::AgentError;
use crate::ingest::ReembedReport;
use crate::models::{CredentialStatus, CredentialUpdate, DocumentInfo, PageContext, UploadedFile};

/// Build the router with all routes and layers.
pub fn router(app: App) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);
    let upload_limit = app.config.server.max_upload_mb * 1024 * 1024;

    Router::new()
        .route("/chat", post(handle_chat))
        .route("/generate", post(handle_generate))
        .route("/list_files", get(handle_list_files))
        .route("/upload_files", post(handle_upload))
        .route("/delete_file", post(handle_delete))
        .route("/get_env", get(handle_get_env))
        .route("/update_env", post(handle_update_env))
        .route("/reinitialize_agent", post(handle_reinitialize))
        .route("/agent_status", get(handle_agent_status))
        .route("/reindex", post(handle_reindex))
        .route("/health", get(handle_health))
        .layer(DefaultBodyLimit::max(upload_limit))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(app)
}

/// Serve until the process is terminated.
pub async fn run_server(app: App) -> anyhow::Result<()> {
    let bind_addr = app.config.server.bind.clone();
    let router = router(app);

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    println!("Agent server listening on http://{}", bind_addr);
    tracing::info!(bind = %bind_addr, "server started");

    axum::serve(listener, router).await?;
    Ok(())
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

struct AppError {
    status: StatusCode,
    code: String,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code,
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

impl From<AgentError> for AppError {
    fn from(err: AgentError) -> Self {
        AppError {
            status: status_for(&err),
            code: err.code().to_string(),
            message: err.to_string(),
        }
    }
}

fn status_for(err: &AgentError) -> StatusCode {
    match err {
        AgentError::Validation(_) => StatusCode::BAD_REQUEST,
        AgentError::UnsupportedFormat(_) | AgentError::EmptyContent(_) => {
            StatusCode::UNPROCESSABLE_ENTITY
        }
        AgentError::Authentication(_) => StatusCode::UNAUTHORIZED,
        AgentError::Busy(_) | AgentError::Cancelled(_) => StatusCode::CONFLICT,
        AgentError::NotReady(_) | AgentError::DependencyUnavailable(_) => {
            StatusCode::SERVICE_UNAVAILABLE
        }
        AgentError::EmbeddingFailure(_) | AgentError::Upstream(_) => StatusCode::BAD_GATEWAY,
        AgentError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// `{success}`-shaped body for action endpoints.
#[derive(Serialize)]
struct ActionResponse {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    code: Option<&'static str>,
}

impl ActionResponse {
    fn ok() -> (StatusCode, Json<Self>) {
        (
            StatusCode::OK,
            Json(Self {
                success: true,
                error: None,
                code: None,
            }),
        )
    }

    fn failed(err: &AgentError) -> (StatusCode, Json<Self>) {
        (
            status_for(err),
            Json(Self {
                success: false,
                error: Some(err.to_string()),
                code: Some(err.code()),
            }),
        )
    }
}

// ============ POST /chat, POST /generate ============

#[derive(Deserialize)]
struct ChatRequest {
    message: String,
    #[serde(default)]
    context: PageContext,
}

#[derive(Serialize)]
struct ChatResponse {
    response: String,
}

async fn handle_chat(
    State(app): State<App>,
    Json(req): Json<ChatRequest>,
) -> Result<Json<ChatResponse>, AppError> {
    let turn = app.chat.respond(&req.message, req.context).await?;
    Ok(Json(ChatResponse {
        response: turn.response,
    }))
}

async fn handle_generate(
    State(app): State<App>,
    Json(req): Json<FieldRequest>,
) -> Result<Json<ChatResponse>, AppError> {
    let turn = app.chat.generate_field(req).await?;
    Ok(Json(ChatResponse {
        response: turn.response,
    }))
}

// ============ GET /list_files ============

#[derive(Serialize)]
struct FileListResponse {
    files: Vec<DocumentInfo>,
}

async fn handle_list_files(State(app): State<App>) -> Result<Json<FileListResponse>, AppError> {
    let files = app.pipeline.list().await?;
    Ok(Json(FileListResponse { files }))
}

// ============ POST /upload_files ============

#[derive(Serialize)]
struct UploadResponse {
    success: bool,
    results: Vec<UploadResult>,
}

#[derive(Serialize)]
struct UploadResult {
    name: String,
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    chunks: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    code: Option<&'static str>,
}

async fn handle_upload(
    State(app): State<App>,
    mut multipart: Multipart,
) -> Result<Json<UploadResponse>, AppError> {
    let mut files = Vec::new();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AgentError::Validation(format!("malformed multipart body: {}", e)))?
    {
        if field.name() != Some("files") {
            continue;
        }
        let name = field.file_name().unwrap_or_default().to_string();
        let bytes = field
            .bytes()
            .await
            .map_err(|e| AgentError::Validation(format!("failed to read upload: {}", e)))?;
        files.push(UploadedFile::new(name, bytes.to_vec()));
    }

    if files.is_empty() {
        return Err(AgentError::Validation("no files were uploaded".to_string()).into());
    }

    let outcomes = app.pipeline.ingest(files).await;
    let results: Vec<UploadResult> = outcomes
        .into_iter()
        .map(|outcome| match outcome.result {
            Ok(chunks) => UploadResult {
                name: outcome.name,
                success: true,
                chunks: Some(chunks),
                error: None,
                code: None,
            },
            Err(e) => UploadResult {
                name: outcome.name,
                success: false,
                chunks: None,
                error: Some(e.to_string()),
                code: Some(e.code()),
            },
        })
        .collect();

    Ok(Json(UploadResponse {
        success: results.iter().all(|r| r.success),
        results,
    }))
}

// ============ POST /delete_file ============

#[derive(Deserialize)]
struct DeleteRequest {
    filename: String,
}

async fn handle_delete(
    State(app): State<App>,
    Json(req): Json<DeleteRequest>,
) -> (StatusCode, Json<ActionResponse>) {
    match app.pipeline.delete(&req.filename).await {
        Ok(true) => ActionResponse::ok(),
        Ok(false) => (
            StatusCode::NOT_FOUND,
            Json(ActionResponse {
                success: false,
                error: Some(format!("file not found: {}", req.filename)),
                code: Some("not_found"),
            }),
        ),
        Err(e) => ActionResponse::failed(&e),
    }
}

// ============ GET /get_env, POST /update_env ============

#[derive(Serialize)]
struct EnvStatusResponse {
    success: bool,
    #[serde(flatten)]
    status: CredentialStatus,
}

async fn handle_get_env(State(app): State<App>) -> Result<Json<EnvStatusResponse>, AppError> {
    let status = app.credentials.status().await?;
    Ok(Json(EnvStatusResponse {
        success: true,
        status,
    }))
}

async fn handle_update_env(
    State(app): State<App>,
    Json(update): Json<CredentialUpdate>,
) -> (StatusCode, Json<ActionResponse>) {
    match app.credentials.update(update).await {
        Ok(_) => ActionResponse::ok(),
        Err(e) => ActionResponse::failed(&e),
    }
}

// ============ POST /reinitialize_agent, GET /agent_status ============

async fn handle_reinitialize(State(app): State<App>) -> (StatusCode, Json<ActionResponse>) {
    match app.lifecycle.reinitialize().await {
        Ok(_) => ActionResponse::ok(),
        Err(e) => ActionResponse::failed(&e),
    }
}

async fn handle_agent_status(State(app): State<App>) -> impl IntoResponse {
    Json(app.lifecycle.status())
}

// ============ POST /reindex ============

#[derive(Serialize)]
struct ReindexResponse {
    success: bool,
    #[serde(flatten)]
    report: ReembedReport,
}

async fn handle_reindex(State(app): State<App>) -> Result<Json<ReindexResponse>, AppError> {
    let report = app.pipeline.reembed_stale().await?;
    Ok(Json(ReindexResponse {
        success: report.failed == 0,
        report,
    }))
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
