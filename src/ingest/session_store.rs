//! Session Store Adapter: atomic session operations over a shared KV store.
//!
//! The store is keyed by `upload:<file_id>` (see
//! [`crate::buildcfg::SESSION_KEY_PREFIX`]). `apply_chunk` is the one
//! operation that must be atomic across replicas (spec §4.1, §9): this
//! implementation uses a single Redis `EVAL` script that reads the
//! session hash, flips the chunk-status bit, recomputes the derived
//! counters, and decides the `finalizing` transition, all inside one
//! round trip that Redis executes to completion before the next command
//! on that key is served. No client-side compare-and-swap retry loop is
//! needed; this is option (b) from spec §4.1, chosen to fix the source
//! system's racy fetch-then-set.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;

use crate::buildcfg::SESSION_KEY_PREFIX;
use crate::ingest::session::{SessionStatus, UploadSession};

#[derive(Debug, thiserror::Error)]
pub enum SessionStoreError {
    #[error("session '{0}' already exists")]
    AlreadyExists(String),
    #[error("session '{0}' not found")]
    NotFound(String),
    #[error("session '{0}' is corrupt: {1}")]
    Corrupt(String, String),
    #[error("session store unavailable: {0}")]
    Unavailable(#[from] anyhow::Error),
}

/// Outcome of an `apply_chunk` call: the refreshed session plus the
/// election signal described in spec §4.1.
pub struct ApplyChunkOutcome {
    pub session: UploadSession,
    pub just_completed: bool,
}

/// Atomic per-upload session operations. Implemented against Redis in
/// production; an in-memory fake (below) backs the coordinator's unit
/// and concurrency tests.
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn create(&self, session: &UploadSession) -> Result<(), SessionStoreError>;
    async fn load(&self, file_id: &str) -> Result<UploadSession, SessionStoreError>;
    async fn apply_chunk(
        &self,
        file_id: &str,
        chunk_index: u32,
        chunk_len: u64,
    ) -> Result<ApplyChunkOutcome, SessionStoreError>;
    async fn delete(&self, file_id: &str) -> Result<(), SessionStoreError>;
    async fn mark_failed(&self, file_id: &str) -> Result<(), SessionStoreError>;
}

fn session_key(file_id: &str) -> String {
    format!("{}{}", SESSION_KEY_PREFIX, file_id)
}

/// Atomic read-modify-write-and-decide script. Keys: `[1] = session key`.
/// Argv: `[1] = chunk_index, 2 = chunk_len, 3 = now]`.
///
/// Returns `1` if this call was the one that flipped the session into
/// `finalizing` (JUST_COMPLETED), `0` otherwise. Returns `-1` if the key
/// does not exist.
const APPLY_CHUNK_SCRIPT: &str = r#"
local key = KEYS[1]
local chunk_index = tonumber(ARGV[1])
local chunk_len = tonumber(ARGV[2])
local now = ARGV[3]

if redis.call("EXISTS", key) == 0 then
    return -1
end

local total_chunks = tonumber(redis.call("HGET", key, "total_chunks"))
local chunk_status = redis.call("HGET", key, "chunk_status")

-- chunk_status is stored as one byte ('0'/'1') per index
local already_set = string.sub(chunk_status, chunk_index + 1, chunk_index + 1) == "1"

if not already_set then
    chunk_status = string.sub(chunk_status, 1, chunk_index)
        .. "1"
        .. string.sub(chunk_status, chunk_index + 2)

    local uploaded_chunks = tonumber(redis.call("HGET", key, "uploaded_chunks")) + 1
    local uploaded_size = tonumber(redis.call("HGET", key, "uploaded_size")) + chunk_len

    redis.call("HSET", key,
        "chunk_status", chunk_status,
        "uploaded_chunks", uploaded_chunks,
        "uploaded_size", uploaded_size,
        "updated_at", now)

    if uploaded_chunks == total_chunks then
        redis.call("HSET", key, "status", "finalizing")
        return 1
    end
end

return 0
"#;

/// Redis-backed implementation of [`SessionStore`].
pub struct RedisSessionStore {
    conn: ConnectionManager,
    apply_chunk_script: redis::Script,
}

impl RedisSessionStore {
    pub async fn connect(redis_url: &str) -> Result<Self> {
        let client = redis::Client::open(redis_url)
            .with_context(|| format!("invalid redis url '{}'", redis_url))?;
        let conn = client
            .get_connection_manager()
            .await
            .context("connecting to redis")?;
        Ok(RedisSessionStore {
            conn,
            apply_chunk_script: redis::Script::new(APPLY_CHUNK_SCRIPT),
        })
    }

    fn conn(&self) -> ConnectionManager {
        self.conn.clone()
    }
}

#[async_trait]
impl SessionStore for RedisSessionStore {
    async fn create(&self, session: &UploadSession) -> Result<(), SessionStoreError> {
        let key = session_key(&session.file_id);
        let mut conn = self.conn();

        let exists: bool = conn
            .exists(&key)
            .await
            .map_err(|err| SessionStoreError::Unavailable(err.into()))?;
        if exists {
            return Err(SessionStoreError::AlreadyExists(session.file_id.clone()));
        }

        let fields = session.to_fields();
        let _: () = conn
            .hset_multiple(&key, &fields)
            .await
            .map_err(|err| SessionStoreError::Unavailable(err.into()))?;
        Ok(())
    }

    async fn load(&self, file_id: &str) -> Result<UploadSession, SessionStoreError> {
        let key = session_key(file_id);
        let mut conn = self.conn();

        let raw: HashMap<String, Vec<u8>> = conn
            .hgetall(&key)
            .await
            .map_err(|err| SessionStoreError::Unavailable(err.into()))?;
        if raw.is_empty() {
            return Err(SessionStoreError::NotFound(file_id.to_string()));
        }

        UploadSession::from_fields(raw)
            .map_err(|err| SessionStoreError::Corrupt(file_id.to_string(), err.to_string()))
    }

    async fn apply_chunk(
        &self,
        file_id: &str,
        chunk_index: u32,
        chunk_len: u64,
    ) -> Result<ApplyChunkOutcome, SessionStoreError> {
        let key = session_key(file_id);
        let mut conn = self.conn();
        let now = crate::ingest::session::now_unix();

        let result: i64 = self
            .apply_chunk_script
            .key(&key)
            .arg(chunk_index)
            .arg(chunk_len)
            .arg(now)
            .invoke_async(&mut conn)
            .await
            .map_err(|err| SessionStoreError::Unavailable(err.into()))?;

        if result == -1 {
            return Err(SessionStoreError::NotFound(file_id.to_string()));
        }

        let session = self.load(file_id).await?;
        Ok(ApplyChunkOutcome {
            session,
            just_completed: result == 1,
        })
    }

    async fn delete(&self, file_id: &str) -> Result<(), SessionStoreError> {
        let key = session_key(file_id);
        let mut conn = self.conn();
        let _: () = conn
            .del(&key)
            .await
            .map_err(|err| SessionStoreError::Unavailable(err.into()))?;
        Ok(())
    }

    async fn mark_failed(&self, file_id: &str) -> Result<(), SessionStoreError> {
        let key = session_key(file_id);
        let mut conn = self.conn();
        let exists: bool = conn
            .exists(&key)
            .await
            .map_err(|err| SessionStoreError::Unavailable(err.into()))?;
        if !exists {
            return Err(SessionStoreError::NotFound(file_id.to_string()));
        }
        let _: () = conn
            .hset(&key, "status", SessionStatus::Failed.as_wire_str())
            .await
            .map_err(|err| SessionStoreError::Unavailable(err.into()))?;
        Ok(())
    }
}

/// In-memory, mutex-per-key-free implementation used by tests. It models
/// the same atomicity contract as the Redis script (a single global lock
/// around the read-modify-write), so the concurrency property test in
/// `tests/` exercises the real election logic without a live Redis
/// instance.
pub struct InMemorySessionStore {
    sessions: Arc<tokio::sync::Mutex<HashMap<String, UploadSession>>>,
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        InMemorySessionStore {
            sessions: Arc::new(tokio::sync::Mutex::new(HashMap::new())),
        }
    }
}

impl Default for InMemorySessionStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn create(&self, session: &UploadSession) -> Result<(), SessionStoreError> {
        let mut sessions = self.sessions.lock().await;
        if sessions.contains_key(&session.file_id) {
            return Err(SessionStoreError::AlreadyExists(session.file_id.clone()));
        }
        sessions.insert(session.file_id.clone(), session.clone());
        Ok(())
    }

    async fn load(&self, file_id: &str) -> Result<UploadSession, SessionStoreError> {
        let sessions = self.sessions.lock().await;
        sessions
            .get(file_id)
            .cloned()
            .ok_or_else(|| SessionStoreError::NotFound(file_id.to_string()))
    }

    async fn apply_chunk(
        &self,
        file_id: &str,
        chunk_index: u32,
        chunk_len: u64,
    ) -> Result<ApplyChunkOutcome, SessionStoreError> {
        let mut sessions = self.sessions.lock().await;
        let session = sessions
            .get_mut(file_id)
            .ok_or_else(|| SessionStoreError::NotFound(file_id.to_string()))?;

        let mut just_completed = false;
        if session.chunk_status.set(chunk_index) {
            session.uploaded_chunks += 1;
            session.uploaded_size += chunk_len;
            session.updated_at = crate::ingest::session::now_unix();

            if session.uploaded_chunks == session.total_chunks {
                session.status = SessionStatus::Finalizing;
                just_completed = true;
            }
        }

        Ok(ApplyChunkOutcome {
            session: session.clone(),
            just_completed,
        })
    }

    async fn delete(&self, file_id: &str) -> Result<(), SessionStoreError> {
        let mut sessions = self.sessions.lock().await;
        sessions.remove(file_id);
        Ok(())
    }

    async fn mark_failed(&self, file_id: &str) -> Result<(), SessionStoreError> {
        let mut sessions = self.sessions.lock().await;
        let session = sessions
            .get_mut(file_id)
            .ok_or_else(|| SessionStoreError::NotFound(file_id.to_string()))?;
        session.status = SessionStatus::Failed;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::session::UploadSession;
    use std::sync::Arc as StdArc;

    fn new_session(file_id: &str, total_size: u64) -> UploadSession {
        UploadSession::new(file_id.to_string(), "f.bin".to_string(), total_size, 10)
    }

    #[tokio::test]
    async fn create_then_load_round_trips() {
        let store = InMemorySessionStore::new();
        let session = new_session("abc", 25);
        store.create(&session).await.unwrap();
        let loaded = store.load("abc").await.unwrap();
        assert_eq!(loaded, session);
    }

    #[tokio::test]
    async fn create_twice_fails() {
        let store = InMemorySessionStore::new();
        let session = new_session("abc", 25);
        store.create(&session).await.unwrap();
        let err = store.create(&session).await.unwrap_err();
        assert!(matches!(err, SessionStoreError::AlreadyExists(_)));
    }

    /// P3: idempotent re-application of the same chunk.
    #[tokio::test]
    async fn duplicate_chunk_does_not_double_count() {
        let store = InMemorySessionStore::new();
        let session = new_session("abc", 25); // 3 chunks of size 10
        store.create(&session).await.unwrap();

        store.apply_chunk("abc", 0, 10).await.unwrap();
        let outcome = store.apply_chunk("abc", 0, 10).await.unwrap();

        assert_eq!(outcome.session.uploaded_chunks, 1);
        assert_eq!(outcome.session.uploaded_size, 10);
        assert!(!outcome.just_completed);
    }

    /// P4: under concurrent apply_chunk calls that collectively complete
    /// a session, exactly one caller observes JUST_COMPLETED=true.
    #[tokio::test]
    async fn exactly_one_caller_observes_just_completed() {
        let store = StdArc::new(InMemorySessionStore::new());
        let session = new_session("abc", 30); // 3 chunks of size 10
        store.create(&session).await.unwrap();

        let mut handles = Vec::new();
        for idx in [2u32, 0, 1] {
            let store = StdArc::clone(&store);
            handles.push(tokio::spawn(async move {
                store.apply_chunk("abc", idx, 10).await.unwrap().just_completed
            }));
        }

        let mut completions = 0;
        for handle in handles {
            if handle.await.unwrap() {
                completions += 1;
            }
        }
        assert_eq!(completions, 1);

        let session = store.load("abc").await.unwrap();
        assert_eq!(session.uploaded_chunks, 3);
        assert_eq!(session.chunk_status.popcount(), 3);
    }
}
