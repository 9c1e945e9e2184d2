//! `/api/upload/*` handlers (spec §6): initialize, chunk, status.

use std::sync::Arc;

use axum::extract::State;
use axum::http::HeaderMap;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::error::IngestError;
use crate::server::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/initialize", post(initialize))
        .route("/chunk", post(chunk))
        .route("/status", get(status))
}

#[derive(Debug, Deserialize)]
struct InitializeRequest {
    #[serde(rename = "fileName")]
    file_name: String,
    #[serde(rename = "fileSize")]
    file_size: u64,
    // Authoritative total_chunks is computed server-side; the client's
    // hint is accepted but ignored (spec §4.4.2 step 3).
    #[serde(rename = "totalChunks", default)]
    #[allow(dead_code)]
    total_chunks_hint: Option<u32>,
}

async fn initialize(
    State(state): State<Arc<AppState>>,
    Json(body): Json<InitializeRequest>,
) -> Result<Json<serde_json::Value>, IngestError> {
    let outcome = state
        .coordinator
        .initialize(&body.file_name, body.file_size)
        .await?;

    Ok(Json(json!({
        "fileId": outcome.file_id,
        "fileName": outcome.file_name,
        "fileSize": outcome.total_size,
        "totalChunks": outcome.total_chunks,
        "chunkSize": outcome.chunk_size,
    })))
}

fn require_header<'a>(headers: &'a HeaderMap, name: &'static str) -> Result<&'a str, IngestError> {
    headers
        .get(name)
        .ok_or(IngestError::MissingHeader(name))?
        .to_str()
        .map_err(|_| IngestError::InvalidRequestBody(format!("header '{}' is not valid utf-8", name)))
}

async fn chunk(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: axum::body::Bytes,
) -> Result<Json<serde_json::Value>, IngestError> {
    let file_id = require_header(&headers, "X-File-Id")?.to_string();
    let chunk_index: u32 = require_header(&headers, "X-Chunk-Index")?
        .parse()
        .map_err(|_| IngestError::InvalidRequestBody("X-Chunk-Index is not a valid integer".to_string()))?;

    let outcome = state.coordinator.chunk(&file_id, chunk_index, &body).await?;

    Ok(Json(json!({
        "received": true,
        "status": outcome.status.as_wire_str(),
        "progress": outcome.progress,
        "uploadedSize": outcome.uploaded_size,
        "totalSize": outcome.total_size,
        "message": format!("{}/{} chunks received", outcome.uploaded_chunks, outcome.total_chunks),
    })))
}

#[derive(Debug, Serialize)]
struct StatusResponse {
    status: &'static str,
    progress: u64,
    #[serde(rename = "uploadedSize")]
    uploaded_size: u64,
    #[serde(rename = "totalSize")]
    total_size: u64,
    #[serde(rename = "totalChunks")]
    total_chunks: u32,
    #[serde(rename = "uploadedChunks")]
    uploaded_chunks: u32,
}

async fn status(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<StatusResponse>, IngestError> {
    let file_id = require_header(&headers, "X-File-Id")?;

    let session = state.coordinator.status(file_id).await?;
    Ok(Json(StatusResponse {
        status: session.status.as_wire_str(),
        progress: session.progress(),
        uploaded_size: session.uploaded_size,
        total_size: session.total_size,
        total_chunks: session.total_chunks,
        uploaded_chunks: session.uploaded_chunks,
    }))
}
