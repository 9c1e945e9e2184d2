//! The `UploadSession` record and its wire encoding.
//!
//! Sessions are the central entity tracked in the shared KV store (see
//! [`super::session_store`]). The encoding here is deliberately flat and
//! linear in the number of chunks: the `chunk_status` bitmap is carried as
//! one byte per chunk index (`0` or `1`), not a JSON array of booleans,
//! to keep the wire size proportional to `total_chunks` rather than to
//! some JSON array overhead multiplier.

use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::{bail, Context, Result};

/// Tagged session lifecycle state.
///
/// Travels on the wire as a lowercase string tag; internally this is a
/// closed sum type so invalid states cannot be represented in memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    Initializing,
    Uploading,
    Finalizing,
    Completed,
    Failed,
}

impl SessionStatus {
    pub fn as_wire_str(self) -> &'static str {
        match self {
            SessionStatus::Initializing => "initializing",
            SessionStatus::Uploading => "uploading",
            SessionStatus::Finalizing => "finalizing",
            SessionStatus::Completed => "completed",
            SessionStatus::Failed => "failed",
        }
    }

    pub fn from_wire_str(s: &str) -> Result<Self> {
        Ok(match s {
            "initializing" => SessionStatus::Initializing,
            "uploading" => SessionStatus::Uploading,
            "finalizing" => SessionStatus::Finalizing,
            "completed" => SessionStatus::Completed,
            "failed" => SessionStatus::Failed,
            other => bail!("unknown session status '{}'", other),
        })
    }

    /// I4: sessions in a terminal state accept no further mutation and
    /// are eligible for deletion.
    pub fn is_terminal(self) -> bool {
        matches!(self, SessionStatus::Completed | SessionStatus::Failed)
    }
}

/// Bit-per-chunk record of which indices have been received.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkBitmap(Vec<u8>);

impl ChunkBitmap {
    pub fn zeroed(total_chunks: u32) -> Self {
        ChunkBitmap(vec![0u8; total_chunks as usize])
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn is_set(&self, index: u32) -> bool {
        self.0.get(index as usize).copied().unwrap_or(0) != 0
    }

    /// Sets the bit for `index`. Returns `true` if this call actually
    /// changed the bitmap (the index was not already set) so callers can
    /// implement idempotent counting (P3).
    pub fn set(&mut self, index: u32) -> bool {
        match self.0.get_mut(index as usize) {
            Some(bit) if *bit == 0 => {
                *bit = 1;
                true
            }
            Some(_) => false,
            None => false,
        }
    }

    /// I1: the distinct-chunk count equals the bitmap's popcount.
    pub fn popcount(&self) -> u32 {
        self.0.iter().filter(|&&b| b != 0).count() as u32
    }

    pub fn all_set(&self) -> bool {
        !self.0.is_empty() && self.0.iter().all(|&b| b != 0)
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        self.0.clone()
    }

    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        ChunkBitmap(bytes)
    }
}

/// The per-upload progress record, source of truth held in the shared KV
/// store.
#[derive(Debug, Clone, PartialEq)]
pub struct UploadSession {
    pub file_id: String,
    pub file_name: String,
    pub total_size: u64,
    pub chunk_size: u64,
    pub total_chunks: u32,
    pub uploaded_chunks: u32,
    pub uploaded_size: u64,
    pub chunk_status: ChunkBitmap,
    pub status: SessionStatus,
    pub created_at: i64,
    pub updated_at: i64,
}

impl Default for ChunkBitmap {
    fn default() -> Self {
        ChunkBitmap(Vec::new())
    }
}

pub fn now_unix() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64
}

impl UploadSession {
    pub fn new(file_id: String, file_name: String, total_size: u64, chunk_size: u64) -> Self {
        let total_chunks = div_ceil(total_size, chunk_size) as u32;
        let now = now_unix();
        UploadSession {
            file_id,
            file_name,
            total_size,
            chunk_size,
            total_chunks,
            uploaded_chunks: 0,
            uploaded_size: 0,
            chunk_status: ChunkBitmap::zeroed(total_chunks),
            status: SessionStatus::Initializing,
            created_at: now,
            updated_at: now,
        }
    }

    /// Field names are stable wire identifiers: this is the flat
    /// representation stored as a Redis hash (`HSET upload:<file_id> ...`).
    pub fn to_fields(&self) -> Vec<(&'static str, Vec<u8>)> {
        vec![
            ("file_id", self.file_id.clone().into_bytes()),
            ("file_name", self.file_name.clone().into_bytes()),
            ("total_size", self.total_size.to_string().into_bytes()),
            ("chunk_size", self.chunk_size.to_string().into_bytes()),
            ("total_chunks", self.total_chunks.to_string().into_bytes()),
            (
                "uploaded_chunks",
                self.uploaded_chunks.to_string().into_bytes(),
            ),
            ("uploaded_size", self.uploaded_size.to_string().into_bytes()),
            ("chunk_status", self.chunk_status.to_bytes()),
            ("status", self.status.as_wire_str().as_bytes().to_vec()),
            ("created_at", self.created_at.to_string().into_bytes()),
            ("updated_at", self.updated_at.to_string().into_bytes()),
        ]
    }

    pub fn from_fields(mut fields: HashMap<String, Vec<u8>>) -> Result<Self> {
        let take_string = |fields: &mut HashMap<String, Vec<u8>>, key: &str| -> Result<String> {
            let raw = fields
                .remove(key)
                .with_context(|| format!("missing field '{}'", key))?;
            String::from_utf8(raw).with_context(|| format!("field '{}' is not valid utf-8", key))
        };
        let take_parsed = |fields: &mut HashMap<String, Vec<u8>>, key: &str| -> Result<i64> {
            take_string(fields, key)?
                .parse()
                .with_context(|| format!("field '{}' is not a valid integer", key))
        };

        let file_id = take_string(&mut fields, "file_id")?;
        let file_name = take_string(&mut fields, "file_name")?;
        let total_size = take_parsed(&mut fields, "total_size")? as u64;
        let chunk_size = take_parsed(&mut fields, "chunk_size")? as u64;
        let total_chunks = take_parsed(&mut fields, "total_chunks")? as u32;
        let uploaded_chunks = take_parsed(&mut fields, "uploaded_chunks")? as u32;
        let uploaded_size = take_parsed(&mut fields, "uploaded_size")? as u64;
        let chunk_status = fields
            .remove("chunk_status")
            .context("missing field 'chunk_status'")?;
        let status = SessionStatus::from_wire_str(&take_string(&mut fields, "status")?)?;
        let created_at = take_parsed(&mut fields, "created_at")?;
        let updated_at = take_parsed(&mut fields, "updated_at")?;

        Ok(UploadSession {
            file_id,
            file_name,
            total_size,
            chunk_size,
            total_chunks,
            uploaded_chunks,
            uploaded_size,
            chunk_status: ChunkBitmap::from_bytes(chunk_status),
            status,
            created_at,
            updated_at,
        })
    }

    /// Progress percentage as reported to clients (floor division).
    pub fn progress(&self) -> u64 {
        if self.total_size == 0 {
            return 100;
        }
        (100 * self.uploaded_size) / self.total_size
    }
}

fn div_ceil(a: u64, b: u64) -> u64 {
    (a + b - 1) / b
}
