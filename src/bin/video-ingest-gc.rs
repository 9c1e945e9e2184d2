//! Maintenance binary: sweeps `<upload_dir>/<file_id>/` staging
//! directories whose session no longer exists in the shared store (a
//! replica that crashed between writing a chunk and calling
//! `apply_chunk`, or a session explicitly marked `failed` and never
//! retried) and removes them.

use anyhow::{Context, Result};
use clap::Parser;

use video_ingest::config::ReplicaConfig;
use video_ingest::ingest::chunk_store::ChunkStore;
use video_ingest::ingest::session_store::{RedisSessionStore, SessionStore, SessionStoreError};

#[derive(Parser, Debug)]
#[command(name = "video-ingest-gc", about = "Remove orphaned upload staging directories")]
struct Cli {
    /// Report what would be removed without deleting anything.
    #[arg(long)]
    dry_run: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let config = ReplicaConfig::from_env().context("loading configuration")?;

    let session_store = RedisSessionStore::connect(&config.redis_url)
        .await
        .context("connecting to session store")?;
    let chunk_store = ChunkStore::new(config.upload_dir.clone());

    let file_ids = chunk_store
        .list_staging_file_ids()
        .await
        .context("listing staging directories")?;

    let mut removed = 0usize;
    for file_id in file_ids {
        match session_store.load(&file_id).await {
            Ok(_) => continue,
            Err(SessionStoreError::NotFound(_)) => {
                log::info!("orphaned staging dir for {}", file_id);
                if !cli.dry_run {
                    chunk_store
                        .cleanup_staging(&file_id)
                        .await
                        .with_context(|| format!("removing staging dir for {}", file_id))?;
                }
                removed += 1;
            }
            Err(err) => {
                log::warn!("could not check session {}: {}", file_id, err);
            }
        }
    }

    log::info!("gc complete, {} staging dirs removed", removed);
    Ok(())
}
