use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use anyhow::Context;
use axum::{
    Json, Router,
    body::Bytes,
    extract::{Path, Request, State},
    http::{HeaderValue, StatusCode, header},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::get,
};
use serde::Serialize;
use serde_json::Value;
use tower_http::limit::RequestBodyLimitLayer;
use tracing::{debug, error, info, warn};

use pacer_core::db::Database;
use pacer_core::remote::{Document, paths};

const BODY_LIMIT: usize = 2 * 1024 * 1024; // 2 MB

#[derive(Clone)]
struct AppState {
    db: Arc<Mutex<Database>>,
    api_key: Option<String>,
}

impl AppState {
    fn db(&self) -> MutexGuard<'_, Database> {
        self.db.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

#[derive(Serialize)]
struct DeletedResponse {
    deleted: usize,
}

// --- Error handling ---

enum ApiError {
    NotFound(String),
    BadRequest(String),
    Internal(anyhow::Error),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            Self::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            Self::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            Self::Internal(err) => {
                error!("Internal server error: {err:#}");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_string(),
                )
            }
        };
        (status, Json(ErrorResponse { error: message })).into_response()
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        Self::Internal(err)
    }
}

// --- Middleware ---

async fn require_auth(State(state): State<AppState>, request: Request, next: Next) -> Response {
    if let Some(ref expected_key) = state.api_key {
        let authorized = request
            .headers()
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .is_some_and(|token| token == expected_key);

        if !authorized {
            return (
                StatusCode::UNAUTHORIZED,
                Json(ErrorResponse {
                    error: "Invalid or missing API key".to_string(),
                }),
            )
                .into_response();
        }
    }
    next.run(request).await
}

async fn security_headers(request: Request, next: Next) -> Response {
    let mut response = next.run(request).await;
    let headers = response.headers_mut();
    headers.insert(
        "x-content-type-options",
        HeaderValue::from_static("nosniff"),
    );
    headers.insert("x-frame-options", HeaderValue::from_static("DENY"));
    headers.insert(
        "content-security-policy",
        HeaderValue::from_static("default-src 'none'"),
    );
    response
}

// --- Paths ---

fn check_segments(raw: &str) -> Result<(), ApiError> {
    let raw = raw.trim_matches('/');
    if raw.is_empty()
        || raw
            .split('/')
            .any(|s| s.is_empty() || s == "." || s == "..")
    {
        return Err(ApiError::BadRequest(format!("Invalid path '{raw}'")));
    }
    Ok(())
}

/// A document path is a collection path plus one id segment.
fn document_path(raw: &str) -> Result<(String, String), ApiError> {
    check_segments(raw)?;
    let path = raw.trim_matches('/');
    let (collection, _) = paths::split(path)
        .ok_or_else(|| ApiError::BadRequest(format!("'{path}' is not a document path")))?;
    Ok((path.to_string(), collection.to_string()))
}

fn collection_path(raw: &str) -> Result<String, ApiError> {
    check_segments(raw)?;
    Ok(raw.trim_matches('/').to_string())
}

// --- Handlers ---

async fn get_document(
    State(state): State<AppState>,
    Path(raw): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let (path, _) = document_path(&raw)?;
    let body = state
        .db()
        .get_document(&path)
        .context("database error")?
        .ok_or_else(|| ApiError::NotFound(format!("Document {path} not found")))?;
    let value = serde_json::from_str(&body).context("stored document is not valid JSON")?;
    Ok(Json(value))
}

async fn put_document(
    State(state): State<AppState>,
    Path(raw): Path<String>,
    body: Bytes,
) -> Result<StatusCode, ApiError> {
    let (path, collection) = document_path(&raw)?;
    let value: Value = serde_json::from_slice(&body)
        .map_err(|e| ApiError::BadRequest(format!("Invalid JSON body: {e}")))?;
    if !value.is_object() {
        return Err(ApiError::BadRequest(
            "Document body must be a JSON object".to_string(),
        ));
    }
    let body = serde_json::to_string(&value).context("failed to serialize document")?;
    state
        .db()
        .put_document(&path, &collection, &body)
        .context("database error")?;
    debug!(path = %path, "Document written");
    Ok(StatusCode::NO_CONTENT)
}

/// Deleting a missing document succeeds, so retries are harmless.
async fn delete_document(
    State(state): State<AppState>,
    Path(raw): Path<String>,
) -> Result<StatusCode, ApiError> {
    let (path, _) = document_path(&raw)?;
    let existed = state
        .db()
        .delete_document(&path)
        .context("database error")?;
    debug!(path = %path, existed, "Document deleted");
    Ok(StatusCode::NO_CONTENT)
}

async fn list_collection(
    State(state): State<AppState>,
    Path(raw): Path<String>,
) -> Result<Json<Vec<Document>>, ApiError> {
    let collection = collection_path(&raw)?;
    let rows = state
        .db()
        .list_documents(&collection)
        .context("database error")?;
    let mut docs = Vec::with_capacity(rows.len());
    for (path, body) in rows {
        let Some((_, id)) = paths::split(&path) else {
            warn!(path = %path, "Skipping stored document with malformed path");
            continue;
        };
        let data = serde_json::from_str(&body)
            .with_context(|| format!("stored document {path} is not valid JSON"))?;
        docs.push(Document {
            id: id.to_string(),
            data,
        });
    }
    Ok(Json(docs))
}

async fn delete_collection(
    State(state): State<AppState>,
    Path(raw): Path<String>,
) -> Result<Json<DeletedResponse>, ApiError> {
    let collection = collection_path(&raw)?;
    let deleted = state
        .db()
        .delete_collection(&collection)
        .context("database error")?;
    debug!(collection = %collection, deleted, "Collection cleared");
    Ok(Json(DeletedResponse { deleted }))
}

pub(crate) fn build_router(db: Database, api_key: Option<String>) -> Router {
    let state = AppState {
        db: Arc::new(Mutex::new(db)),
        api_key,
    };
    Router::new()
        .route(
            "/api/docs/{*path}",
            get(get_document)
                .put(put_document)
                .delete(delete_document),
        )
        .route(
            "/api/collections/{*path}",
            get(list_collection).delete(delete_collection),
        )
        .route_layer(middleware::from_fn_with_state(state.clone(), require_auth))
        .layer(RequestBodyLimitLayer::new(BODY_LIMIT))
        .layer(middleware::from_fn(security_headers))
        .with_state(state)
}

// --- Server startup ---

pub async fn start_server(
    db: Database,
    port: u16,
    bind: &str,
    api_key: Option<String>,
) -> anyhow::Result<()> {
    if let Some(ref key) = api_key {
        let tail = key.len().saturating_sub(4);
        eprintln!(
            "API key: {}...{} (see api_key file in data directory)",
            key.get(..4).unwrap_or_default(),
            key.get(tail..).unwrap_or_default(),
        );
    } else {
        eprintln!("Warning: Authentication disabled (--no-auth). API is open to anyone.");
    }

    if bind != "127.0.0.1" && bind != "localhost" && api_key.is_none() {
        eprintln!(
            "Warning: Listening on {bind} with no authentication. Any device on your network can access this API."
        );
    }

    let app = build_router(db, api_key);
    let listener = tokio::net::TcpListener::bind(format!("{bind}:{port}"))
        .await
        .with_context(|| format!("failed to bind {bind}:{port}"))?;
    info!(bind, port, "Document server listening");
    eprintln!("Listening on http://{bind}:{port}");
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;
    info!("Document server stopped");

    Ok(())
}
