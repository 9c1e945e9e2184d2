//! Compile-time constants shared across the replica binaries.

/// Size of every chunk except possibly the last one.
pub const CHUNK_SIZE: u64 = 1024 * 1024;

/// Upper bound on a declared upload size, enforced at `initialize`.
pub const MAX_FILE_SIZE: u64 = 1000 * 1024 * 1024;

/// Upper bound on a trim operation's requested duration, in seconds.
pub const MAX_TRIM_DURATION: f64 = 3600.0;

/// Default bind address for the replica's HTTP listener.
pub const DEFAULT_BIND_ADDR: &str = "0.0.0.0:5000";

/// Default local path for the embedded catalog database.
pub const DEFAULT_CATALOG_PATH: &str = "./video-ingest-catalog.sqlite";

/// Default staging/final-artifact directory.
pub const DEFAULT_UPLOAD_DIR: &str = "./uploads";

/// Default bounded size of the catalog connection pool.
pub const DEFAULT_CATALOG_MAX_CONNECTIONS: usize = 8;

/// Default idle timeout before the catalog pool reaps a connection.
pub const DEFAULT_CATALOG_IDLE_TIMEOUT_SECS: u64 = 300;

/// Key prefix under which sessions live in the shared KV store.
pub const SESSION_KEY_PREFIX: &str = "upload:";
