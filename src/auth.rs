//! Bearer token authentication against a fixed in-memory allowlist.
//!
//! Token provisioning is out of scope for this crate (see spec §1); the
//! allowlist is handed to the replica at startup via [`crate::config::ReplicaConfig`].

use std::sync::Arc;

use axum::extract::{Request, State};
use axum::http::HeaderMap;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};

use crate::error::IngestError;
use crate::server::AppState;

/// Extract and validate the bearer token from an `Authorization` header.
///
/// Returns `Ok(())` if a token is present and belongs to `allowlist`.
pub fn check_bearer_token(headers: &HeaderMap, allowlist: &[String]) -> Result<(), IngestError> {
    let token = extract_bearer(headers).ok_or(IngestError::Unauthorized)?;

    if allowlist.iter().any(|t| t == token) {
        Ok(())
    } else {
        Err(IngestError::Unauthorized)
    }
}

fn extract_bearer(headers: &HeaderMap) -> Option<&str> {
    let value = headers.get(axum::http::header::AUTHORIZATION)?.to_str().ok()?;
    value.strip_prefix("Bearer ")
}

/// Router middleware enforcing P8: the token is checked against the
/// request's headers before `next` runs, so an unauthorized request
/// never reaches a handler's body extractor. Applied as a
/// `route_layer` over the upload and video routers in
/// [`crate::server::build_router`].
pub async fn require_bearer_token(State(state): State<Arc<AppState>>, req: Request, next: Next) -> Response {
    match check_bearer_token(req.headers(), &state.bearer_tokens) {
        Ok(()) => next.run(req).await,
        Err(err) => err.into_response(),
    }
}
