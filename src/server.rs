//! Axum HTTP server wiring: shared application state, router
//! construction, and the cross-cutting middleware layers (spec §4.5,
//! §6). The teacher's own API tree is built on a vendor-specific
//! router/schema macro framework that has no equivalent outside that
//! project; this replica's surface is plain REST, so it is served with
//! `axum` instead, the same way the teacher's own HTTP client code
//! already layers on `hyper` and `tower`.

use std::sync::Arc;
use std::time::Duration;

use axum::http::{header, HeaderName, Method};
use axum::middleware;
use axum::routing::get;
use axum::Router;
use tower_http::cors::{Any, CorsLayer};

use crate::config::ReplicaConfig;
use crate::ingest::catalog::CatalogPool;
use crate::ingest::chunk_store::ChunkStore;
use crate::ingest::coordinator::UploadCoordinator;
use crate::ingest::media::{FfmpegTool, MediaTool};
use crate::ingest::session_store::RedisSessionStore;

pub struct AppState {
    pub coordinator: UploadCoordinator,
    pub media: Box<dyn MediaTool>,
    pub bearer_tokens: Vec<String>,
}

impl AppState {
    pub async fn build(config: &ReplicaConfig) -> anyhow::Result<Self> {
        let session_store = RedisSessionStore::connect(&config.redis_url).await?;
        let catalog = CatalogPool::open(
            &config.catalog_path,
            config.catalog_max_connections,
            config.catalog_idle_timeout,
        )
        .await?;
        let chunk_store = ChunkStore::new(config.upload_dir.clone());

        let coordinator = UploadCoordinator::new(
            Arc::new(session_store),
            Arc::new(catalog),
            Arc::new(chunk_store),
            config.indexer_base_url.clone(),
        );

        let media = FfmpegTool::new(config.ffmpeg_path.clone(), config.ffprobe_path.clone());

        Ok(AppState {
            coordinator,
            media: Box::new(media),
            bearer_tokens: config.bearer_tokens.clone(),
        })
    }
}

/// Builds the full request router: health check plus the upload and
/// video API surfaces, wrapped in a permissive CORS layer and a
/// per-request timeout so a wedged ffmpeg invocation cannot pin a
/// worker indefinitely.
pub fn build_router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([
            header::CONTENT_TYPE,
            HeaderName::from_static("x-file-id"),
            HeaderName::from_static("x-chunk-index"),
            header::ACCEPT,
            header::AUTHORIZATION,
        ])
        .expose_headers([header::AUTHORIZATION]);

    // P8: the bearer check runs as a `route_layer`, outside the handlers'
    // own extractors, so a missing/invalid token is rejected before any
    // handler gets a chance to read the request body.
    let upload_router = crate::api2::upload::router()
        .route_layer(middleware::from_fn_with_state(state.clone(), crate::auth::require_bearer_token));
    let video_router = crate::api2::video::router()
        .route_layer(middleware::from_fn_with_state(state.clone(), crate::auth::require_bearer_token));

    Router::new()
        .route("/", get(health))
        .nest("/api/upload", upload_router)
        .nest("/api/video", video_router)
        .layer(cors)
        .layer(tower::timeout::TimeoutLayer::new(Duration::from_secs(120)))
        .with_state(state)
}

async fn health() -> &'static str {
    "ok"
}
