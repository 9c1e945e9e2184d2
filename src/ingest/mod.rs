//! Ingest subsystem: session bookkeeping, storage adapters, and the
//! coordinator that composes them into the upload/trim/join protocol.

pub mod catalog;
pub mod chunk_store;
pub mod coordinator;
pub mod indexer;
pub mod media;
pub mod session;
pub mod session_store;

pub use coordinator::{ChunkOutcome, InitOutcome, UploadCoordinator};
pub use session::{SessionStatus, UploadSession};
pub use session_store::{ApplyChunkOutcome, SessionStore, SessionStoreError};
