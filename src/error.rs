//! Error taxonomy for the ingest API.
//!
//! Handlers return `Result<T, IngestError>`; the `IntoResponse` impl below
//! is the single place that turns a typed error into the wire format
//! `{"status":"error","error":"<message>","code":<int>}`.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("declared file size exceeds the maximum allowed")]
    FileTooLarge,

    #[error("invalid request: {0}")]
    InvalidRequestBody(String),

    #[error("missing header: {0}")]
    MissingHeader(&'static str),

    #[error("no upload session for this file id")]
    InvalidSession,

    #[error("unauthorized")]
    Unauthorized,

    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl IngestError {
    fn status(&self) -> StatusCode {
        match self {
            IngestError::FileTooLarge
            | IngestError::InvalidRequestBody(_)
            | IngestError::MissingHeader(_)
            | IngestError::InvalidSession => StatusCode::BAD_REQUEST,
            IngestError::Unauthorized => StatusCode::UNAUTHORIZED,
            IngestError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for IngestError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = json!({
            "status": "error",
            "error": self.to_string(),
            "code": status.as_u16(),
        });
        (status, Json(body)).into_response()
    }
}

/// Errors raised by the external media-processing collaborator (trim/join).
#[derive(Debug, Error)]
pub enum MediaError {
    #[error("duration must be greater than zero")]
    InvalidDuration,

    #[error("duration exceeds the maximum allowed ({max}s)")]
    DurationTooLong { max: f64 },

    #[error("start_time + duration exceeds the source video's length")]
    InvalidTrimRange,

    #[error("failed to probe video duration: {0}")]
    VideoInfoError(String),

    #[error("trim operation failed: {0}")]
    TrimError(String),

    #[error("join requires at least two parts")]
    NotEnoughParts,

    #[error("join operation failed: {0}")]
    JoinError(String),
}

impl MediaError {
    fn status(&self) -> StatusCode {
        StatusCode::BAD_REQUEST
    }
}

impl IntoResponse for MediaError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = json!({
            "status": "error",
            "error": self.to_string(),
            "code": status.as_u16(),
        });
        (status, Json(body)).into_response()
    }
}
