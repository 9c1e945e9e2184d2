//! Resumable chunked upload and trim/join service, distributed across
//! stateless replicas behind a round-robin edge router.
//!
//! The replica binary (`src/bin/video-ingest-replica.rs`) wires
//! [`server::AppState`] and [`server::build_router`] together; the
//! maintenance binary (`src/bin/video-ingest-gc.rs`) sweeps orphaned
//! staging directories.

pub mod api2;
pub mod auth;
pub mod buildcfg;
pub mod config;
pub mod error;
pub mod ingest;
pub mod server;
