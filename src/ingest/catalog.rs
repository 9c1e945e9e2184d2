//! Catalog Writer: a small, bounded pool of blocking SQLite connections
//! used to persist per-chunk and per-file metadata rows (spec §4.2).
//!
//! SQLite only tolerates one writer at a time, so unlike the Redis
//! client (which multiplexes over one async connection) this pool hands
//! out exclusive, blocking `rusqlite::Connection` handles and runs every
//! query inside [`tokio::task::spawn_blocking`]. The pool itself is a
//! `Vec` behind a `Mutex`, sized by `catalog_max_connections`; idle
//! connections older than `catalog_idle_timeout` are dropped on return
//! rather than being pooled back, a cheap stand-in for a reaper thread.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use rusqlite::Connection;
use tokio::sync::Mutex;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS video_chunk_data (
    file_id TEXT,
    total_chunks INTEGER NOT NULL,
    chunk_id INTEGER DEFAULT 0,
    chunk_locations TEXT,
    created_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP,
    updated_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP,
    is_complete BOOLEAN DEFAULT FALSE,
    PRIMARY KEY (file_id, chunk_id)
);

CREATE TABLE IF NOT EXISTS video_final_data (
    file_id TEXT PRIMARY KEY,
    file_size INTEGER NOT NULL,
    file_locations TEXT,
    created_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP
);
"#;

struct PooledConn {
    conn: Connection,
    idle_since: Instant,
}

struct Inner {
    path: PathBuf,
    idle_timeout: Duration,
    idle: Vec<PooledConn>,
    max_connections: usize,
    open_count: usize,
}

/// Bounded pool of SQLite connections, all pointed at the same on-disk
/// catalog file.
pub struct CatalogPool {
    inner: Arc<Mutex<Inner>>,
}

/// RAII handle to a checked-out connection. Returns the connection to
/// the pool on drop unless it has gone idle past the configured timeout,
/// in which case it is simply closed.
pub struct ConnGuard {
    conn: Option<Connection>,
    inner: Arc<Mutex<Inner>>,
}

impl ConnGuard {
    pub fn as_ref(&self) -> &Connection {
        self.conn.as_ref().expect("connection taken only on drop")
    }
}

impl Drop for ConnGuard {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            let inner = Arc::clone(&self.inner);
            // Returning the connection requires the async mutex; spawn a
            // detached task since `Drop` cannot be async.
            tokio::spawn(async move {
                let mut inner = inner.lock().await;
                inner.idle.push(PooledConn {
                    conn,
                    idle_since: Instant::now(),
                });
            });
        }
    }
}

impl CatalogPool {
    /// Opens (creating if necessary) the catalog database at `path` and
    /// applies the schema and pragmas. Does not pre-open the full pool;
    /// connections are created lazily up to `max_connections`.
    pub async fn open(path: &Path, max_connections: usize, idle_timeout: Duration) -> Result<Self> {
        let path = path.to_path_buf();
        let bootstrap_path = path.clone();

        let conn = tokio::task::spawn_blocking(move || -> Result<Connection> {
            let conn = open_connection(&bootstrap_path)?;
            conn.execute_batch(SCHEMA)
                .context("creating catalog schema")?;
            Ok(conn)
        })
        .await
        .context("catalog bootstrap task panicked")??;

        let inner = Inner {
            path,
            idle_timeout,
            idle: vec![PooledConn {
                conn,
                idle_since: Instant::now(),
            }],
            max_connections,
            open_count: 1,
        };

        Ok(CatalogPool {
            inner: Arc::new(Mutex::new(inner)),
        })
    }

    /// Checks out a connection, opening a fresh one if the pool has
    /// spare capacity and no idle connection is available.
    pub async fn get(&self) -> Result<ConnGuard> {
        let mut inner = self.inner.lock().await;

        while let Some(pooled) = inner.idle.pop() {
            if pooled.idle_since.elapsed() > inner.idle_timeout {
                inner.open_count -= 1;
                continue;
            }
            return Ok(ConnGuard {
                conn: Some(pooled.conn),
                inner: Arc::clone(&self.inner),
            });
        }

        if inner.open_count >= inner.max_connections {
            anyhow::bail!(
                "catalog pool exhausted ({} connections in use)",
                inner.max_connections
            );
        }

        let path = inner.path.clone();
        let conn = tokio::task::spawn_blocking(move || open_connection(&path))
            .await
            .context("opening catalog connection panicked")??;
        inner.open_count += 1;

        Ok(ConnGuard {
            conn: Some(conn),
            inner: Arc::clone(&self.inner),
        })
    }

    /// Upserts a chunk's row: on-disk location, the total chunk count the
    /// session was initialized with, and whether the chunk write
    /// completed. Runs off the async executor since `rusqlite` is
    /// blocking.
    pub async fn upsert_chunk(
        &self,
        file_id: &str,
        total_chunks: u32,
        chunk_id: u32,
        chunk_path: &str,
        is_complete: bool,
    ) -> Result<()> {
        let guard = self.get().await?;
        let file_id = file_id.to_string();
        let chunk_path = chunk_path.to_string();

        tokio::task::spawn_blocking(move || -> Result<()> {
            guard.as_ref().execute(
                "INSERT OR REPLACE INTO video_chunk_data
                   (file_id, total_chunks, chunk_id, chunk_locations, is_complete)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                rusqlite::params![file_id, total_chunks, chunk_id, chunk_path, is_complete],
            )?;
            Ok(())
        })
        .await
        .context("upsert_chunk task panicked")??;
        Ok(())
    }

    /// Upserts the final assembled artifact's row once a file completes.
    pub async fn upsert_final(&self, file_id: &str, file_size: u64, file_path: &str) -> Result<()> {
        let guard = self.get().await?;
        let file_id = file_id.to_string();
        let file_path = file_path.to_string();

        tokio::task::spawn_blocking(move || -> Result<()> {
            guard.as_ref().execute(
                "INSERT OR REPLACE INTO video_final_data (file_id, file_size, file_locations)
                 VALUES (?1, ?2, ?3)",
                rusqlite::params![file_id, file_size as i64, file_path],
            )?;
            Ok(())
        })
        .await
        .context("upsert_final task panicked")??;
        Ok(())
    }

    /// Number of chunk rows recorded for `file_id`. Used by tests and by
    /// the garbage-collection binary to cross-check against the session
    /// store's bitmap.
    pub async fn chunk_count(&self, file_id: &str) -> Result<u32> {
        let guard = self.get().await?;
        let file_id = file_id.to_string();

        let count = tokio::task::spawn_blocking(move || -> Result<u32> {
            let count: i64 = guard.as_ref().query_row(
                "SELECT COUNT(*) FROM video_chunk_data WHERE file_id = ?1",
                rusqlite::params![file_id],
                |row| row.get(0),
            )?;
            Ok(count as u32)
        })
        .await
        .context("chunk_count task panicked")??;
        Ok(count)
    }
}

fn open_connection(path: &Path) -> Result<Connection> {
    let conn = Connection::open(path).with_context(|| format!("opening catalog at {:?}", path))?;
    conn.pragma_update(None, "journal_mode", "WAL")
        .context("setting WAL mode")?;
    conn.busy_timeout(Duration::from_millis(5000))
        .context("setting busy timeout")?;
    Ok(conn)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn schema_is_idempotent_and_records_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("catalog.sqlite");

        let pool = CatalogPool::open(&path, 4, Duration::from_secs(300))
            .await
            .unwrap();
        pool.upsert_chunk("f1", 2, 0, "/tmp/f1/chunk_0", true).await.unwrap();
        pool.upsert_chunk("f1", 2, 1, "/tmp/f1/chunk_1", true).await.unwrap();
        // Re-upserting the same chunk_id should replace, not duplicate.
        pool.upsert_chunk("f1", 2, 0, "/tmp/f1/chunk_0", true).await.unwrap();

        assert_eq!(pool.chunk_count("f1").await.unwrap(), 2);

        pool.upsert_final("f1", 1536, "/tmp/movie.mp4").await.unwrap();

        // Reopening against the same file should not fail on existing
        // tables.
        let pool2 = CatalogPool::open(&path, 4, Duration::from_secs(300))
            .await
            .unwrap();
        assert_eq!(pool2.chunk_count("f1").await.unwrap(), 2);
    }

    #[tokio::test]
    async fn pool_exhaustion_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("catalog.sqlite");
        let pool = CatalogPool::open(&path, 1, Duration::from_secs(300))
            .await
            .unwrap();

        let guard = pool.get().await.unwrap();
        let err = pool.get().await.unwrap_err();
        assert!(err.to_string().contains("exhausted"));
        drop(guard);
    }
}
