//! Replica configuration, loaded once at process start from the
//! environment. A container-first horizontally scaled service has no
//! single host to carry a packaged `/etc` config file, so unlike most of
//! this crate's ancestry we read `std::env` directly rather than a
//! section-config file.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};

use crate::buildcfg;

/// Process-wide, read-only configuration for one replica.
#[derive(Debug, Clone)]
pub struct ReplicaConfig {
    pub bind_addr: String,
    pub redis_url: String,
    pub catalog_path: PathBuf,
    pub catalog_max_connections: usize,
    pub catalog_idle_timeout: Duration,
    pub indexer_base_url: Option<String>,
    pub upload_dir: PathBuf,
    pub bearer_tokens: Vec<String>,
    pub ffmpeg_path: PathBuf,
    pub ffprobe_path: PathBuf,
}

impl ReplicaConfig {
    /// Build a config from environment variables, falling back to the
    /// compiled-in defaults in [`buildcfg`].
    pub fn from_env() -> Result<Self> {
        Ok(ReplicaConfig {
            bind_addr: env_or("VIDEO_INGEST_BIND_ADDR", buildcfg::DEFAULT_BIND_ADDR),
            redis_url: env_or("VIDEO_INGEST_REDIS_URL", "redis://127.0.0.1/"),
            catalog_path: PathBuf::from(env_or(
                "VIDEO_INGEST_CATALOG_PATH",
                buildcfg::DEFAULT_CATALOG_PATH,
            )),
            catalog_max_connections: env_parse_or(
                "VIDEO_INGEST_CATALOG_MAX_CONNECTIONS",
                buildcfg::DEFAULT_CATALOG_MAX_CONNECTIONS,
            )?,
            catalog_idle_timeout: Duration::from_secs(env_parse_or(
                "VIDEO_INGEST_CATALOG_IDLE_TIMEOUT_SECS",
                buildcfg::DEFAULT_CATALOG_IDLE_TIMEOUT_SECS,
            )?),
            indexer_base_url: std::env::var("VIDEO_INGEST_INDEXER_URL").ok(),
            upload_dir: PathBuf::from(env_or(
                "VIDEO_INGEST_UPLOAD_DIR",
                buildcfg::DEFAULT_UPLOAD_DIR,
            )),
            bearer_tokens: parse_token_allowlist(&env_or("VIDEO_INGEST_TOKENS", "")),
            ffmpeg_path: PathBuf::from(env_or("VIDEO_INGEST_FFMPEG", "ffmpeg")),
            ffprobe_path: PathBuf::from(env_or("VIDEO_INGEST_FFPROBE", "ffprobe")),
        })
    }
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_owned())
}

fn env_parse_or<T: std::str::FromStr>(key: &str, default: T) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(val) => val
            .parse()
            .map_err(|err| anyhow::anyhow!("invalid value for {}: {}", key, err))
            .with_context(|| format!("parsing environment variable {}", key)),
        Err(_) => Ok(default),
    }
}

fn parse_token_allowlist(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_owned)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_allowlist_ignores_blank_entries() {
        let tokens = parse_token_allowlist(" tok-a ,, tok-b,");
        assert_eq!(tokens, vec!["tok-a".to_string(), "tok-b".to_string()]);
    }
}
