//! Search Indexer: best-effort, fire-and-forget notifications to an
//! external search/indexing service (spec §4.3).
//!
//! A single `reqwest::Client` is shared process-wide behind a
//! `once_cell::sync::OnceCell`, mirroring the way other long-lived
//! handles in this crate are lazily built once and reused rather than
//! recreated per request. Indexing failures are logged and swallowed:
//! the upload protocol's correctness never depends on the indexer being
//! reachable.

use std::path::PathBuf;
use std::time::Duration;

use once_cell::sync::OnceCell;
use reqwest::Client;
use serde_json::{json, Value};

static CLIENT: OnceCell<Client> = OnceCell::new();

fn client() -> &'static Client {
    CLIENT.get_or_init(|| {
        Client::builder()
            .timeout(Duration::from_secs(5))
            .build()
            .expect("building the indexer http client")
    })
}

/// Lifecycle events reported to the indexer, carrying the per-event
/// fields the indexer's document body requires (spec §4.3). Matches the
/// coordinator's state machine transitions one-for-one (spec §4.4).
#[derive(Debug, Clone)]
pub enum IndexEvent {
    InitializeUpload {
        directory: PathBuf,
        file_name: String,
        file_size: u64,
    },
    ChunkUpload {
        chunk_index: u32,
        chunk_path: PathBuf,
        file_name: String,
    },
    CompleteUpload {
        directory: PathBuf,
        file_name: String,
        file_size: u64,
        total_chunks: u32,
    },
}

impl IndexEvent {
    fn as_str(&self) -> &'static str {
        match self {
            IndexEvent::InitializeUpload { .. } => "initialize_upload",
            IndexEvent::ChunkUpload { .. } => "chunk_upload",
            IndexEvent::CompleteUpload { .. } => "complete_upload",
        }
    }

    /// The indexer's document id: the file itself for initialize/complete,
    /// one document per chunk for chunk uploads.
    fn doc_id(&self, file_id: &str) -> String {
        match self {
            IndexEvent::ChunkUpload { chunk_index, .. } => format!("{}_{}", file_id, chunk_index),
            _ => file_id.to_string(),
        }
    }

    fn body(&self) -> Value {
        match self {
            IndexEvent::InitializeUpload {
                directory,
                file_name,
                file_size,
            } => json!({
                "directory": directory.to_string_lossy(),
                "file_name": file_name,
                "file_size": file_size,
            }),
            IndexEvent::ChunkUpload {
                chunk_path,
                file_name,
                chunk_index,
            } => json!({
                "chunk_path": chunk_path.to_string_lossy(),
                "file_name": file_name,
                "chunk_index": chunk_index,
            }),
            IndexEvent::CompleteUpload {
                directory,
                file_name,
                file_size,
                total_chunks,
            } => json!({
                "directory": directory.to_string_lossy(),
                "file_name": file_name,
                "file_size": file_size,
                "total_chunks": total_chunks,
            }),
        }
    }
}

/// Sends one best-effort indexing call. If `base_url` is `None` (no
/// indexer configured for this replica) this is a no-op.
///
/// Spawns the request on a detached task so callers never block the
/// request path on the indexer's latency or availability.
pub fn notify(base_url: Option<String>, file_id: &str, event: IndexEvent) {
    let Some(base_url) = base_url else {
        return;
    };
    let file_id = file_id.to_string();

    tokio::spawn(async move {
        let event_name = event.as_str();
        let doc_id = event.doc_id(&file_id);
        let body = event.body();
        let url = format!("{}/index/{}", base_url.trim_end_matches('/'), doc_id);

        match client().put(&url).json(&body).send().await {
            Ok(resp) if !resp.status().is_success() => {
                log::warn!(
                    "indexer responded with {} for event {} doc_id={}",
                    resp.status(),
                    event_name,
                    doc_id
                );
            }
            Ok(_) => {}
            Err(err) => {
                log::warn!(
                    "indexer request failed for event {} doc_id={}: {}",
                    event_name,
                    doc_id,
                    err
                );
            }
        }
    });
}
