//! Chunk Store: filesystem staging and assembly of uploaded chunks
//! (spec §4.4.3-4.4.4).
//!
//! Each file being uploaded gets a staging directory
//! `<upload_dir>/<file_id>/` holding one blob per chunk, named
//! `chunk_<index>`. Assembly streams those blobs in order into a
//! `.{file_name}.part` file and only then renames it into place, so a
//! reader can never observe a partially-written final file — the same
//! temp-then-rename discipline the catalog's ancestor used for config
//! writes.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tokio::fs;
use tokio::io::AsyncWriteExt;

pub struct ChunkStore {
    upload_dir: PathBuf,
}

impl ChunkStore {
    pub fn new(upload_dir: PathBuf) -> Self {
        ChunkStore { upload_dir }
    }

    /// The per-file staging directory, exposed so the coordinator can pass
    /// it through to the indexer's `directory` field.
    pub fn staging_dir(&self, file_id: &str) -> PathBuf {
        self.upload_dir.join(file_id)
    }

    fn chunk_path(&self, file_id: &str, chunk_index: u32) -> PathBuf {
        self.staging_dir(file_id).join(format!("chunk_{}", chunk_index))
    }

    /// The on-disk path of a chunk blob, exposed so the coordinator can
    /// pass it through to the catalog's `chunk_locations` column.
    pub fn chunk_blob_path(&self, file_id: &str, chunk_index: u32) -> PathBuf {
        self.chunk_path(file_id, chunk_index)
    }

    fn final_path(&self, file_name: &str) -> PathBuf {
        self.upload_dir.join(file_name)
    }

    fn part_path(&self, file_name: &str) -> PathBuf {
        self.upload_dir.join(format!(".{}.part", file_name))
    }

    /// Creates the staging directory for a freshly initialized upload.
    /// Idempotent: a pre-existing directory (e.g. from a crashed replica
    /// that already took the first chunk) is not an error.
    pub async fn ensure_staging_dir(&self, file_id: &str) -> Result<()> {
        let dir = self.staging_dir(file_id);
        fs::create_dir_all(&dir)
            .await
            .with_context(|| format!("creating staging dir {:?}", dir))
    }

    /// Writes one chunk's bytes to its slot in the staging directory.
    /// Safe to call more than once for the same index (last write wins),
    /// matching the session store's idempotent bit-set semantics.
    pub async fn write_chunk(&self, file_id: &str, chunk_index: u32, data: &[u8]) -> Result<()> {
        let dir = self.staging_dir(file_id);
        fs::create_dir_all(&dir)
            .await
            .with_context(|| format!("creating staging dir {:?}", dir))?;

        let path = self.chunk_path(file_id, chunk_index);
        let tmp_path = dir.join(format!("chunk_{}.tmp", chunk_index));

        let mut tmp = fs::File::create(&tmp_path)
            .await
            .with_context(|| format!("creating {:?}", tmp_path))?;
        tmp.write_all(data)
            .await
            .with_context(|| format!("writing {:?}", tmp_path))?;
        tmp.flush().await?;
        drop(tmp);

        fs::rename(&tmp_path, &path)
            .await
            .with_context(|| format!("renaming {:?} to {:?}", tmp_path, path))?;
        Ok(())
    }

    /// Streams the staged chunks, in order, into the final artifact path
    /// via a `.part` temp file and an atomic rename. Returns the final
    /// path on success. Callers are responsible for removing the staging
    /// directory afterwards, once any catalog/indexer bookkeeping that
    /// still needs the staging path has run.
    pub async fn assemble(&self, file_id: &str, file_name: &str, total_chunks: u32) -> Result<PathBuf> {
        let part_path = self.part_path(file_name);
        let final_path = self.final_path(file_name);

        if let Some(parent) = final_path.parent() {
            fs::create_dir_all(parent)
                .await
                .with_context(|| format!("creating final dir {:?}", parent))?;
        }

        {
            let mut out = fs::File::create(&part_path)
                .await
                .with_context(|| format!("creating {:?}", part_path))?;

            for index in 0..total_chunks {
                let chunk_path = self.chunk_path(file_id, index);
                let mut chunk = fs::File::open(&chunk_path)
                    .await
                    .with_context(|| format!("opening chunk {:?}", chunk_path))?;
                tokio::io::copy(&mut chunk, &mut out)
                    .await
                    .with_context(|| format!("copying chunk {:?} into assembly", chunk_path))?;
            }
            out.flush().await?;
        }

        fs::rename(&part_path, &final_path)
            .await
            .with_context(|| format!("renaming {:?} to {:?}", part_path, final_path))?;

        Ok(final_path)
    }

    /// Removes the staging directory for `file_id`. Called after a
    /// successful assembly and also by the garbage-collection binary for
    /// abandoned/failed sessions.
    pub async fn cleanup_staging(&self, file_id: &str) -> Result<()> {
        let dir = self.staging_dir(file_id);
        match fs::remove_dir_all(&dir).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err).with_context(|| format!("removing staging dir {:?}", dir)),
        }
    }

    /// Lists staging directories directly under `<upload_dir>/`, for use
    /// by the garbage collector. Assembled final artifacts live in the
    /// same root but as plain files, so filtering to directory entries
    /// is sufficient to distinguish the two.
    pub async fn list_staging_file_ids(&self) -> Result<Vec<String>> {
        let root = &self.upload_dir;
        let mut entries = match fs::read_dir(&root).await {
            Ok(entries) => entries,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(err).with_context(|| format!("reading {:?}", root)),
        };

        let mut ids = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            if entry.file_type().await?.is_dir() {
                if let Some(name) = entry.file_name().to_str() {
                    ids.push(name.to_string());
                }
            }
        }
        Ok(ids)
    }

    pub fn upload_dir(&self) -> &Path {
        &self.upload_dir
    }
}
