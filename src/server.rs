//! JSON HTTP API over the retrieval engine and indexer.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `POST` | `/retrieve` | Ranked passages for a query, scoped to one user |
//! | `POST` | `/documents/{id}/index` | Index a document from the record store |
//! | `DELETE` | `/documents/{id}/index` | Remove a document's chunks from the index |
//! | `GET`  | `/documents/{id}/status` | Extraction state of a document in this process |
//! | `GET`  | `/health` | Health check (returns version) |
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "bad_request", "message": "query must not be empty" } }
//! ```
//!
//! Error codes: `bad_request` (400), `index_disabled` (400), `not_found` (404),
//! `internal` (500).
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted so browser clients can
//! call the API directly.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

use crate::config::Config;
use crate::db;
use crate::index::create_gateway;
use crate::indexer::{IndexReport, Indexer};
use crate::library::{Library, LibraryScope, SqliteLibrary};
use crate::migrate;
use crate::models::{ExtractionState, SearchResult};
use crate::retrieval::RetrievalEngine;

/// Shared application state passed to all route handlers via Axum's `State` extractor.
#[derive(Clone)]
pub struct AppState {
    library: Arc<dyn Library>,
    engine: Arc<RetrievalEngine>,
    /// `None` when the index backend is disabled.
    indexer: Option<Arc<Indexer>>,
    default_top_k: usize,
}

impl AppState {
    pub fn new(
        library: Arc<dyn Library>,
        engine: Arc<RetrievalEngine>,
        indexer: Option<Arc<Indexer>>,
        default_top_k: usize,
    ) -> Self {
        Self {
            library,
            engine,
            indexer,
            default_top_k,
        }
    }
}

/// Build the router with all routes and CORS.
pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/retrieve", post(handle_retrieve))
        .route(
            "/documents/{id}/index",
            post(handle_index_document).delete(handle_deindex_document),
        )
        .route("/documents/{id}/status", get(handle_status))
        .route("/health", get(handle_health))
        .layer(cors)
        .with_state(state)
}

/// Starts the HTTP server on `[server].bind`.
///
/// Opens the record store (running migrations), connects the index
/// backend and starts the extraction workers. An index that cannot be
/// reached at startup is logged and retried lazily; retrieval falls back
/// to scanning until it comes up.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let pool = db::connect(config).await?;
    migrate::migrate_pool(&pool).await?;
    let library: Arc<dyn Library> = Arc::new(SqliteLibrary::new(pool));

    let gateway = create_gateway(&config.index)?;
    if let Some(gateway) = &gateway {
        if let Err(e) = gateway.ensure_schema().await {
            tracing::warn!(error = %e, "index schema not ensured, retrieval will scan until the index is reachable");
        }
    }

    let engine = Arc::new(RetrievalEngine::from_config(config, gateway.clone())?);
    let indexer = match gateway {
        Some(gateway) => Some(Arc::new(Indexer::from_config(config, gateway)?)),
        None => None,
    };

    let state = AppState::new(library, engine, indexer, config.retrieval.top_k);
    let app = router(state);

    let bind_addr = &config.server.bind;
    let listener = tokio::net::TcpListener::bind(bind_addr).await?;
    tracing::info!(bind = %bind_addr, "server listening");
    println!("Shelf server listening on http://{}", bind_addr);

    axum::serve(listener, app).await?;
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

/// Internal error type that converts into an Axum HTTP response.
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

fn bad_request(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        code: "bad_request".to_string(),
        message: message.into(),
    }
}

fn not_found(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::NOT_FOUND,
        code: "not_found".to_string(),
        message: message.into(),
    }
}

fn index_disabled() -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        code: "index_disabled".to_string(),
        message: "the index backend is disabled in [index]".to_string(),
    }
}

fn internal(err: anyhow::Error) -> AppError {
    tracing::error!(error = %err, "request failed");
    AppError {
        status: StatusCode::INTERNAL_SERVER_ERROR,
        code: "internal".to_string(),
        message: err.to_string(),
    }
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

// ============ POST /retrieve ============

#[derive(Deserialize)]
struct RetrieveRequest {
    query: String,
    user_id: String,
    #[serde(default)]
    session_id: Option<String>,
    #[serde(default)]
    top_k: Option<usize>,
}

#[derive(Serialize)]
struct RetrieveResponse {
    results: Vec<SearchResult>,
}

/// Never fails once the request is valid; the worst case is no results.
async fn handle_retrieve(
    State(state): State<AppState>,
    Json(req): Json<RetrieveRequest>,
) -> Result<Json<RetrieveResponse>, AppError> {
    if req.query.trim().is_empty() {
        return Err(bad_request("query must not be empty"));
    }
    if req.user_id.trim().is_empty() {
        return Err(bad_request("user_id must not be empty"));
    }
    let top_k = req.top_k.unwrap_or(state.default_top_k);
    if top_k == 0 {
        return Err(bad_request("top_k must be >= 1"));
    }

    let scope = LibraryScope::from_session(req.session_id);
    let results = state
        .engine
        .retrieve_library(state.library.as_ref(), &req.query, &req.user_id, &scope, top_k)
        .await;
    Ok(Json(RetrieveResponse { results }))
}

// ============ /documents/{id}/index ============

async fn handle_index_document(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<IndexReport>, AppError> {
    let indexer = state.indexer.as_ref().ok_or_else(index_disabled)?;
    let doc = state
        .library
        .get_document(&id)
        .await
        .map_err(internal)?
        .ok_or_else(|| not_found(format!("document not found: {}", id)))?;

    Ok(Json(indexer.index_document(&doc).await))
}

#[derive(Serialize)]
struct DeindexResponse {
    document_id: String,
    removed: bool,
}

async fn handle_deindex_document(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<DeindexResponse>, AppError> {
    let indexer = state.indexer.as_ref().ok_or_else(index_disabled)?;
    let removed = indexer.deindex_document(&id).await;
    Ok(Json(DeindexResponse {
        document_id: id,
        removed,
    }))
}

// ============ GET /documents/{id}/status ============

#[derive(Serialize)]
struct StatusResponse {
    document_id: String,
    state: ExtractionState,
}

async fn handle_status(State(state): State<AppState>, Path(id): Path<String>) -> Json<StatusResponse> {
    let extraction = state.engine.cache().state(&id);
    Json(StatusResponse {
        document_id: id,
        state: extraction,
    })
}
