//! JSON HTTP API.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`  | `/` | Service name, version, and endpoint list |
//! | `GET`  | `/health` | Health check |
//! | `POST` | `/api/analyze` | Analyze a project directory |
//! | `GET`  | `/api/projects` | All projects, newest first |
//! | `GET`  | `/api/docs/{id}` | Documentation and file facts |
//! | `GET`  | `/api/kt/{id}` | KT plan and progress |
//! | `POST` | `/api/progress/{id}?day=&completed=&notes=` | Update one plan day |
//! | `POST` | `/api/chat` | Ask a question about a project |
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "not_found", "message": "project not found: 42" } }
//! ```
//!
//! Error codes: `bad_request` (400), `not_found` (404),
//! `plan_parse_error` (502), `internal` (500).

use axum::{
    extract::{rejection::JsonRejection, rejection::QueryRejection, Path, Query, State},
    http::{HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};

use crate::chat::{self, InvalidQuestion};
use crate::pipeline::{self, AnalysisError, AppContext};
use crate::plan::PlanParseError;
use crate::store::{self, StoreError};

const ENDPOINTS: [&str; 8] = [
    "/",
    "/health",
    "/api/analyze",
    "/api/projects",
    "/api/docs/{project_id}",
    "/api/kt/{project_id}",
    "/api/progress/{project_id}",
    "/api/chat",
];

/// Bind `[server].bind` and serve until the process exits.
pub async fn run_server(ctx: AppContext) -> anyhow::Result<()> {
    let bind_addr = ctx.config.server.bind.clone();
    let app = router(ctx)?;

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    tracing::info!(addr = %bind_addr, "server listening");
    println!("codekt API listening on http://{}", bind_addr);

    axum::serve(listener, app).await?;
    Ok(())
}

pub fn router(ctx: AppContext) -> anyhow::Result<Router> {
    let cors = cors_layer(&ctx.config.server.cors_origins)?;

    Ok(Router::new()
        .route("/", get(handle_root))
        .route("/health", get(handle_health))
        .route("/api/analyze", post(handle_analyze))
        .route("/api/projects", get(handle_projects))
        .route("/api/docs/{id}", get(handle_docs))
        .route("/api/kt/{id}", get(handle_kt))
        .route("/api/progress/{id}", post(handle_progress))
        .route("/api/chat", post(handle_chat))
        .layer(cors)
        .with_state(ctx))
}

/// An empty origin list allows any origin.
fn cors_layer(origins: &[String]) -> anyhow::Result<CorsLayer> {
    let layer = CorsLayer::new().allow_methods(Any).allow_headers(Any);
    if origins.is_empty() {
        return Ok(layer.allow_origin(Any));
    }

    let values = origins
        .iter()
        .map(|o| {
            o.parse::<HeaderValue>()
                .map_err(|_| anyhow::anyhow!("invalid CORS origin: {}", o))
        })
        .collect::<anyhow::Result<Vec<_>>>()?;
    Ok(layer.allow_origin(AllowOrigin::list(values)))
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

#[derive(Debug)]
struct AppError {
    status: StatusCode,
    code: &'static str,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code.to_string(),
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        code: "bad_request",
        message: message.into(),
    }
}

fn not_found(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::NOT_FOUND,
        code: "not_found",
        message: message.into(),
    }
}

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound { .. } => not_found(err.to_string()),
            other => internal(other.to_string()),
        }
    }
}

fn internal(message: String) -> AppError {
    tracing::error!(%message, "request failed");
    AppError {
        status: StatusCode::INTERNAL_SERVER_ERROR,
        code: "internal",
        message,
    }
}

/// Map typed failures carried by an `anyhow::Error` onto status codes.
impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        if let Some(StoreError::NotFound { .. }) = err.downcast_ref::<StoreError>() {
            return not_found(err.to_string());
        }
        if err.downcast_ref::<AnalysisError>().is_some()
            || err.downcast_ref::<InvalidQuestion>().is_some()
        {
            return bad_request(err.to_string());
        }
        if let Some(parse) = err.downcast_ref::<PlanParseError>() {
            return AppError {
                status: StatusCode::BAD_GATEWAY,
                code: "plan_parse_error",
                message: parse.to_string(),
            };
        }
        internal(format!("{:#}", err))
    }
}

// ============ Handlers ============

async fn handle_root() -> Json<serde_json::Value> {
    Json(json!({
        "message": "Code KT Generator API",
        "name": env!("CARGO_PKG_NAME"),
        "version": env!("CARGO_PKG_VERSION"),
        "endpoints": ENDPOINTS,
    }))
}

async fn handle_health() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok", "version": env!("CARGO_PKG_VERSION") }))
}

fn default_role() -> String {
    "fullstack".to_string()
}

#[derive(Deserialize)]
struct AnalyzeRequest {
    path: String,
    #[serde(default = "default_role")]
    role: String,
}

async fn handle_analyze(
    State(ctx): State<AppContext>,
    body: Result<Json<AnalyzeRequest>, JsonRejection>,
) -> Result<Json<serde_json::Value>, AppError> {
    let Json(request) = body.map_err(|e| bad_request(e.body_text()))?;
    let summary =
        pipeline::run_analysis(&ctx, std::path::Path::new(&request.path), &request.role).await?;

    Ok(Json(json!({
        "project_id": summary.project_id,
        "files_analyzed": summary.files_analyzed,
        "status": summary.status,
    })))
}

async fn handle_projects(
    State(ctx): State<AppContext>,
) -> Result<Json<serde_json::Value>, AppError> {
    let projects = store::list_projects(&ctx.pool).await?;
    Ok(Json(json!({ "projects": projects })))
}

async fn handle_docs(
    State(ctx): State<AppContext>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, AppError> {
    let project = store::get_project(&ctx.pool, &id).await?;
    let documentation = store::get_documentation(&ctx.pool, &id).await?;
    let files = store::get_files(&ctx.pool, &id).await?;

    Ok(Json(json!({
        "project": project,
        "documentation": documentation,
        "files": files,
    })))
}

async fn handle_kt(
    State(ctx): State<AppContext>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, AppError> {
    let project = store::get_project(&ctx.pool, &id).await?;
    let kt_plan = store::get_kt_plan(&ctx.pool, &id).await?;
    let progress = store::get_progress(&ctx.pool, &id).await?;

    Ok(Json(json!({
        "project": project,
        "kt_plan": kt_plan,
        "progress": progress,
    })))
}

#[derive(Deserialize)]
struct ProgressParams {
    day: i64,
    completed: bool,
    notes: Option<String>,
}

async fn handle_progress(
    State(ctx): State<AppContext>,
    Path(id): Path<String>,
    params: Result<Query<ProgressParams>, QueryRejection>,
) -> Result<Json<serde_json::Value>, AppError> {
    let Query(params) = params.map_err(|e| bad_request(e.body_text()))?;
    store::update_progress(
        &ctx.pool,
        &id,
        params.day,
        params.completed,
        params.notes.as_deref(),
    )
    .await?;

    Ok(Json(json!({ "status": "success", "message": "Progress updated" })))
}

#[derive(Deserialize)]
struct ChatRequest {
    question: String,
    project_id: String,
}

async fn handle_chat(
    State(ctx): State<AppContext>,
    body: Result<Json<ChatRequest>, JsonRejection>,
) -> Result<Json<chat::ChatAnswer>, AppError> {
    let Json(request) = body.map_err(|e| bad_request(e.body_text()))?;
    let answer = chat::ask(
        &ctx.pool,
        &ctx.config,
        ctx.llm.chat.as_deref(),
        &request.project_id,
        &request.question,
    )
    .await?;
    Ok(Json(answer))
}
