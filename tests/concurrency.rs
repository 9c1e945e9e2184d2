//! Integration tests for the scenarios spelled out in spec §8: these
//! exercise the coordinator the way two independent replicas sharing
//! the same session store and upload directory would, rather than
//! through any one component in isolation.

use std::sync::Arc;
use std::time::Duration;

use video_ingest::ingest::catalog::CatalogPool;
use video_ingest::ingest::chunk_store::ChunkStore;
use video_ingest::ingest::coordinator::UploadCoordinator;
use video_ingest::ingest::session::SessionStatus;
use video_ingest::ingest::session_store::{InMemorySessionStore, SessionStore};

async fn shared_replicas(dir: &std::path::Path) -> (UploadCoordinator, UploadCoordinator) {
    let session_store: Arc<dyn SessionStore> = Arc::new(InMemorySessionStore::new());
    let catalog = Arc::new(
        CatalogPool::open(&dir.join("catalog.sqlite"), 8, Duration::from_secs(300))
            .await
            .unwrap(),
    );
    let chunk_store = Arc::new(ChunkStore::new(dir.join("uploads")));

    let replica_a = UploadCoordinator::new(
        Arc::clone(&session_store),
        Arc::clone(&catalog),
        Arc::clone(&chunk_store),
        None,
    );
    let replica_b = UploadCoordinator::new(session_store, catalog, chunk_store, None);
    (replica_a, replica_b)
}

/// Scenario 3: out-of-order, concurrent chunk delivery across two
/// simulated replicas still yields exactly one assembly and a
/// byte-for-byte correct final file.
#[tokio::test]
async fn out_of_order_concurrent_upload_across_replicas_completes_once() {
    let dir = tempfile::tempdir().unwrap();
    let (replica_a, replica_b) = shared_replicas(dir.path()).await;

    let chunk_size = video_ingest::buildcfg::CHUNK_SIZE;
    let total_size = chunk_size * 3;
    let init = replica_a.initialize("movie.mp4", total_size).await.unwrap();
    assert_eq!(init.total_chunks, 3);

    let part0 = vec![0xAAu8; chunk_size as usize];
    let part1 = vec![0xBBu8; chunk_size as usize];
    let part2 = vec![0xCCu8; chunk_size as usize];

    let file_id = init.file_id.clone();
    let (p0, p1, p2) = (part0.clone(), part1.clone(), part2.clone());

    let id_a = file_id.clone();
    let id_b = file_id.clone();
    let id_c = file_id.clone();

    let h2 = tokio::spawn(async move { replica_b.chunk(&id_a, 2, &p2).await.unwrap() });
    let h0 = tokio::spawn(async move { replica_a.chunk(&id_b, 0, &p0).await.unwrap() });

    // Drive the third chunk through a freshly built handle pointed at
    // the same shared state, mimicking a third replica instance.
    let (replica_c, _unused) = shared_replicas(dir.path()).await;
    drop(_unused);
    let h1 = tokio::spawn(async move { replica_c.chunk(&id_c, 1, &p1).await.unwrap() });

    let out2 = h2.await.unwrap();
    let out0 = h0.await.unwrap();
    let out1 = h1.await.unwrap();

    let completions = [out0.completed, out1.completed, out2.completed]
        .iter()
        .filter(|c| **c)
        .count();
    assert_eq!(completions, 1, "exactly one caller must observe completion");

    let final_path = dir.path().join("uploads").join("movie.mp4");
    let bytes = tokio::fs::read(&final_path).await.unwrap();
    assert_eq!(bytes.len(), total_size as usize);
    assert_eq!(&bytes[0..chunk_size as usize], part0.as_slice());
    assert_eq!(&bytes[chunk_size as usize..(chunk_size * 2) as usize], part1.as_slice());
    assert_eq!(&bytes[(chunk_size * 2) as usize..], part2.as_slice());
}

/// Scenario 4: re-delivering an identical chunk does not inflate
/// uploaded_size or uploaded_chunks, and the upload still completes.
#[tokio::test]
async fn duplicate_delivery_does_not_double_count_and_still_completes() {
    let dir = tempfile::tempdir().unwrap();
    let (replica, _other) = shared_replicas(dir.path()).await;

    let chunk_size = video_ingest::buildcfg::CHUNK_SIZE;
    let total_size = chunk_size * 2;
    let init = replica.initialize("clip.mp4", total_size).await.unwrap();

    let part0 = vec![1u8; chunk_size as usize];
    let part1 = vec![2u8; chunk_size as usize];

    let out = replica.chunk(&init.file_id, 1, &part1).await.unwrap();
    assert!(!out.completed);
    assert_eq!(out.uploaded_chunks, 1);

    // Re-send chunk 1 before chunk 0 arrives.
    let out = replica.chunk(&init.file_id, 1, &part1).await.unwrap();
    assert!(!out.completed);
    assert_eq!(out.uploaded_chunks, 1);
    assert_eq!(out.uploaded_size, chunk_size);

    let out = replica.chunk(&init.file_id, 0, &part0).await.unwrap();
    assert!(out.completed);
    assert_eq!(out.status, SessionStatus::Completed);
    assert_eq!(out.uploaded_size, total_size);
}

/// Scenario 1: a single-chunk upload completes immediately and the
/// final file matches the declared size exactly.
#[tokio::test]
async fn single_chunk_upload_completes_immediately() {
    let dir = tempfile::tempdir().unwrap();
    let (replica, _other) = shared_replicas(dir.path()).await;

    let init = replica.initialize("a.txt", 500).await.unwrap();
    assert_eq!(init.total_chunks, 1);
    assert_eq!(init.chunk_size, video_ingest::buildcfg::CHUNK_SIZE);

    let data = vec![7u8; 500];
    let out = replica.chunk(&init.file_id, 0, &data).await.unwrap();
    assert!(out.completed);

    let final_path = dir.path().join("uploads").join("a.txt");
    let bytes = tokio::fs::read(&final_path).await.unwrap();
    assert_eq!(bytes.len(), 500);

    // Session is retired; a further status lookup must fail.
    assert!(replica.status(&init.file_id).await.is_err());
}
