//! `/api/video/*` handlers (spec §6): trim, join.

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::post;
use axum::{Json, Router};
use serde::Deserialize;

use crate::error::MediaError;
use crate::server::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/trim", post(trim))
        .route("/join", post(join))
}

#[derive(Debug, Deserialize)]
struct TrimRequest {
    #[serde(rename = "fileName")]
    file_name: String,
    start_time: f64,
    duration: f64,
    #[serde(rename = "outputFile")]
    output_file: String,
}

async fn trim(
    State(state): State<Arc<AppState>>,
    Json(body): Json<TrimRequest>,
) -> Result<StatusCode, MediaError> {
    let src = state.coordinator.final_path(&body.file_name);
    let dest = state.coordinator.final_path(&body.output_file);

    state.media.trim(&src, &dest, body.start_time, body.duration).await?;

    Ok(StatusCode::OK)
}

#[derive(Debug, Deserialize)]
struct JoinRequest {
    parts: Vec<String>,
    #[serde(rename = "outputFile")]
    output_file: String,
}

async fn join(
    State(state): State<Arc<AppState>>,
    Json(body): Json<JoinRequest>,
) -> Result<StatusCode, MediaError> {
    if body.parts.len() < 2 {
        return Err(MediaError::NotEnoughParts);
    }

    let parts: Vec<_> = body
        .parts
        .iter()
        .map(|name| state.coordinator.final_path(name))
        .collect();
    let dest = state.coordinator.final_path(&body.output_file);

    state.media.join(&parts, &dest).await?;

    Ok(StatusCode::OK)
}
