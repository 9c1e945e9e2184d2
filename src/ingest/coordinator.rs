//! Upload Coordinator: composes the session store, catalog, chunk store
//! and indexer into the `init -> uploading -> finalizing -> completed`
//! state machine (spec §4.4).
//!
//! The coordinator itself carries no per-upload state in replica
//! memory; every field that matters survives a request landing on a
//! different replica because it lives in the session store, the
//! catalog, or the filesystem.

use std::path::PathBuf;
use std::sync::Arc;

use rand::RngCore;

use crate::buildcfg::{CHUNK_SIZE, MAX_FILE_SIZE};
use crate::error::IngestError;
use crate::ingest::catalog::CatalogPool;
use crate::ingest::chunk_store::ChunkStore;
use crate::ingest::indexer::{self, IndexEvent};
use crate::ingest::session::{SessionStatus, UploadSession};
use crate::ingest::session_store::{SessionStore, SessionStoreError};

const FILE_ID_COLLISION_RETRIES: u32 = 3;

pub struct UploadCoordinator {
    session_store: Arc<dyn SessionStore>,
    catalog: Arc<CatalogPool>,
    chunk_store: Arc<ChunkStore>,
    indexer_base_url: Option<String>,
}

pub struct InitOutcome {
    pub file_id: String,
    pub file_name: String,
    pub total_size: u64,
    pub total_chunks: u32,
    pub chunk_size: u64,
}

pub struct ChunkOutcome {
    pub status: SessionStatus,
    pub uploaded_chunks: u32,
    pub total_chunks: u32,
    pub progress: u64,
    pub uploaded_size: u64,
    pub total_size: u64,
    pub completed: bool,
}

impl From<SessionStoreError> for IngestError {
    fn from(err: SessionStoreError) -> Self {
        match err {
            SessionStoreError::NotFound(_) => IngestError::InvalidSession,
            SessionStoreError::AlreadyExists(id) => {
                IngestError::Internal(anyhow::anyhow!("session '{}' already exists", id))
            }
            SessionStoreError::Corrupt(_, _) | SessionStoreError::Unavailable(_) => {
                IngestError::Internal(anyhow::anyhow!(err))
            }
        }
    }
}

impl UploadCoordinator {
    pub fn new(
        session_store: Arc<dyn SessionStore>,
        catalog: Arc<CatalogPool>,
        chunk_store: Arc<ChunkStore>,
        indexer_base_url: Option<String>,
    ) -> Self {
        UploadCoordinator {
            session_store,
            catalog,
            chunk_store,
            indexer_base_url,
        }
    }

    /// I2: new uploads are rejected up front if the declared size
    /// exceeds the configured maximum, before any storage is touched.
    pub async fn initialize(&self, file_name: &str, total_size: u64) -> Result<InitOutcome, IngestError> {
        if total_size > MAX_FILE_SIZE {
            return Err(IngestError::FileTooLarge);
        }
        if total_size == 0 {
            return Err(IngestError::InvalidRequestBody(
                "file_size must be greater than zero".to_string(),
            ));
        }
        if file_name.is_empty() {
            return Err(IngestError::InvalidRequestBody(
                "file_name must not be empty".to_string(),
            ));
        }

        let mut last_collision = None;
        for _ in 0..FILE_ID_COLLISION_RETRIES {
            let file_id = generate_file_id();
            let session =
                UploadSession::new(file_id.clone(), file_name.to_string(), total_size, CHUNK_SIZE);

            match self.session_store.create(&session).await {
                Ok(()) => {
                    self.chunk_store
                        .ensure_staging_dir(&file_id)
                        .await
                        .map_err(IngestError::Internal)?;

                    indexer::notify(
                        self.indexer_base_url.clone(),
                        &file_id,
                        IndexEvent::InitializeUpload {
                            directory: self.chunk_store.staging_dir(&file_id),
                            file_name: file_name.to_string(),
                            file_size: total_size,
                        },
                    );

                    return Ok(InitOutcome {
                        file_id,
                        file_name: file_name.to_string(),
                        total_size,
                        total_chunks: session.total_chunks,
                        chunk_size: session.chunk_size,
                    });
                }
                Err(SessionStoreError::AlreadyExists(id)) => {
                    last_collision = Some(id);
                    continue;
                }
                Err(err) => return Err(err.into()),
            }
        }

        Err(IngestError::Internal(anyhow::anyhow!(
            "file_id collided {} times in a row (last: {:?})",
            FILE_ID_COLLISION_RETRIES,
            last_collision
        )))
    }

    /// I1/I3/I4/I5/P3/P4: apply one chunk, persist it, and — if this
    /// call was the one that completed the bitmap — assemble the final
    /// file and retire the session.
    pub async fn chunk(&self, file_id: &str, chunk_index: u32, data: &[u8]) -> Result<ChunkOutcome, IngestError> {
        let session = self.session_store.load(file_id).await?;

        if session.status.is_terminal() {
            return Err(IngestError::InvalidSession);
        }
        if chunk_index >= session.total_chunks {
            return Err(IngestError::InvalidRequestBody(format!(
                "chunk_index {} out of range (total_chunks={})",
                chunk_index, session.total_chunks
            )));
        }

        self.chunk_store
            .write_chunk(file_id, chunk_index, data)
            .await
            .map_err(IngestError::Internal)?;

        let outcome = self
            .session_store
            .apply_chunk(file_id, chunk_index, data.len() as u64)
            .await?;

        // Best-effort: a catalog hiccup does not fail the request, the
        // chunk is already durable on disk and in the session store.
        let chunk_path = self.chunk_store.chunk_blob_path(file_id, chunk_index);
        if let Err(err) = self
            .catalog
            .upsert_chunk(
                file_id,
                session.total_chunks,
                chunk_index,
                &chunk_path.to_string_lossy(),
                true,
            )
            .await
        {
            log::warn!("catalog upsert_chunk failed for {}/{}: {}", file_id, chunk_index, err);
        }

        indexer::notify(
            self.indexer_base_url.clone(),
            file_id,
            IndexEvent::ChunkUpload {
                chunk_index,
                chunk_path,
                file_name: session.file_name.clone(),
            },
        );

        let mut status = outcome.session.status;
        if outcome.just_completed {
            self.finalize(file_id, &outcome.session).await?;
            status = SessionStatus::Completed;
        }

        Ok(ChunkOutcome {
            status,
            uploaded_chunks: outcome.session.uploaded_chunks,
            total_chunks: outcome.session.total_chunks,
            progress: outcome.session.progress(),
            uploaded_size: outcome.session.uploaded_size,
            total_size: outcome.session.total_size,
            completed: outcome.just_completed,
        })
    }

    /// Assembly: the election winner (the single caller for whom
    /// `apply_chunk` reported `just_completed`) streams the staged
    /// chunks into the final artifact and records it in the catalog.
    /// On failure the session is marked `failed` and the staging
    /// directory is left in place for operator inspection.
    async fn finalize(&self, file_id: &str, session: &UploadSession) -> Result<(), IngestError> {
        let final_path = match self
            .chunk_store
            .assemble(file_id, &session.file_name, session.total_chunks)
            .await
        {
            Ok(path) => path,
            Err(err) => {
                log::error!("assembly failed for {}: {:#}", file_id, err);
                let _ = self.session_store.mark_failed(file_id).await;
                return Err(IngestError::Internal(err));
            }
        };

        if let Err(err) = self
            .catalog
            .upsert_final(file_id, session.total_size, &final_path.to_string_lossy())
            .await
        {
            log::warn!("catalog upsert_final failed for {}: {}", file_id, err);
        }

        indexer::notify(
            self.indexer_base_url.clone(),
            file_id,
            IndexEvent::CompleteUpload {
                directory: self.chunk_store.staging_dir(file_id),
                file_name: session.file_name.clone(),
                file_size: session.total_size,
                total_chunks: session.total_chunks,
            },
        );

        if let Err(err) = self.chunk_store.cleanup_staging(file_id).await {
            log::warn!("removing staging dir failed for {}: {:#}", file_id, err);
        }

        self.session_store.delete(file_id).await?;
        Ok(())
    }

    pub async fn status(&self, file_id: &str) -> Result<UploadSession, IngestError> {
        Ok(self.session_store.load(file_id).await?)
    }

    /// Path to the final artifact for a completed session, used by the
    /// trim/join handlers to locate source material.
    pub fn final_path(&self, file_name: &str) -> PathBuf {
        self.chunk_store.upload_dir().join(file_name)
    }
}

fn generate_file_id() -> String {
    let mut bytes = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::session_store::InMemorySessionStore;
    use std::time::Duration;

    async fn test_coordinator() -> (UploadCoordinator, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let catalog = CatalogPool::open(&dir.path().join("catalog.sqlite"), 4, Duration::from_secs(300))
            .await
            .unwrap();
        let chunk_store = ChunkStore::new(dir.path().join("uploads"));
        let coordinator = UploadCoordinator::new(
            Arc::new(InMemorySessionStore::new()),
            Arc::new(catalog),
            Arc::new(chunk_store),
            None,
        );
        (coordinator, dir)
    }

    #[tokio::test]
    async fn initialize_rejects_oversized_files() {
        let (coordinator, _dir) = test_coordinator().await;
        let err = coordinator
            .initialize("f.bin", MAX_FILE_SIZE + 1)
            .await
            .unwrap_err();
        assert!(matches!(err, IngestError::FileTooLarge));
    }

    #[tokio::test]
    async fn initialize_rejects_zero_byte_files_distinctly() {
        let (coordinator, _dir) = test_coordinator().await;
        let err = coordinator.initialize("f.bin", 0).await.unwrap_err();
        assert!(matches!(err, IngestError::InvalidRequestBody(_)));
    }

    #[tokio::test]
    async fn full_upload_assembles_final_file_and_retires_session() {
        let (coordinator, _dir) = test_coordinator().await;
        let total_size = (CHUNK_SIZE * 2) + 10;
        let init = coordinator.initialize("clip.mp4", total_size).await.unwrap();
        assert_eq!(init.total_chunks, 3);

        let chunk0 = vec![1u8; CHUNK_SIZE as usize];
        let chunk1 = vec![2u8; CHUNK_SIZE as usize];
        let chunk2 = vec![3u8; 10];

        let out0 = coordinator.chunk(&init.file_id, 0, &chunk0).await.unwrap();
        assert!(!out0.completed);
        let out1 = coordinator.chunk(&init.file_id, 1, &chunk1).await.unwrap();
        assert!(!out1.completed);
        let out2 = coordinator.chunk(&init.file_id, 2, &chunk2).await.unwrap();
        assert!(out2.completed);
        assert_eq!(out2.progress, 100);
        assert_eq!(out2.status, SessionStatus::Completed);

        // The session is retired on completion (§4.4.4 step 7).
        let err = coordinator.status(&init.file_id).await.unwrap_err();
        assert!(matches!(err, IngestError::InvalidSession));

        let final_path = coordinator.final_path("clip.mp4");
        let bytes = tokio::fs::read(&final_path).await.unwrap();
        assert_eq!(bytes.len(), total_size as usize);
        assert_eq!(&bytes[0..4], &[1, 1, 1, 1]);
    }

    /// P3: re-sending an already-applied chunk mid-upload does not
    /// disturb progress or trigger a spurious finalization.
    #[tokio::test]
    async fn duplicate_chunk_is_idempotent() {
        let (coordinator, _dir) = test_coordinator().await;
        let init = coordinator
            .initialize("small.bin", CHUNK_SIZE + 10)
            .await
            .unwrap();
        assert_eq!(init.total_chunks, 2);
        let data = vec![9u8; CHUNK_SIZE as usize];

        let first = coordinator.chunk(&init.file_id, 0, &data).await.unwrap();
        assert!(!first.completed);

        let second = coordinator.chunk(&init.file_id, 0, &data).await.unwrap();
        assert!(!second.completed);
        assert_eq!(second.uploaded_chunks, 1);
    }

    #[tokio::test]
    async fn chunk_index_out_of_range_is_rejected() {
        let (coordinator, _dir) = test_coordinator().await;
        let init = coordinator.initialize("small.bin", 5).await.unwrap();
        let err = coordinator.chunk(&init.file_id, 5, &[1, 2, 3]).await.unwrap_err();
        assert!(matches!(err, IngestError::InvalidRequestBody(_)));
    }

    #[tokio::test]
    async fn chunk_on_unknown_session_is_invalid() {
        let (coordinator, _dir) = test_coordinator().await;
        let err = coordinator.chunk("no-such-id", 0, &[1]).await.unwrap_err();
        assert!(matches!(err, IngestError::InvalidSession));
    }
}
