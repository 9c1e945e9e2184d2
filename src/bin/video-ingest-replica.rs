//! Replica entry point: loads configuration from the environment, wires
//! up storage adapters, and serves the HTTP API until signalled to stop.

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;

use video_ingest::config::ReplicaConfig;
use video_ingest::server::{build_router, AppState};

#[derive(Parser, Debug)]
#[command(name = "video-ingest-replica", about = "Resumable chunked upload replica")]
struct Cli {
    /// Override the bind address (otherwise VIDEO_INGEST_BIND_ADDR / default).
    #[arg(long)]
    bind: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let mut config = ReplicaConfig::from_env().context("loading configuration")?;
    if let Some(bind) = cli.bind {
        config.bind_addr = bind;
    }

    log::info!("starting replica, binding {}", config.bind_addr);

    let state = Arc::new(AppState::build(&config).await.context("building app state")?);
    let router = build_router(state);

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .with_context(|| format!("binding {}", config.bind_addr))?;

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("serving http")?;

    Ok(())
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    log::info!("received shutdown signal");
}
