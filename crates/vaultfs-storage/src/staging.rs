//! Staging area for server-relay upload chunks.
//!
//! Each session owns a directory `{root}/{session_id}` holding one file per
//! chunk, named by its zero-padded index. Chunks are written to a temp file
//! and renamed into place, so a chunk file is either absent or complete.
//! Assembly is a lazy concatenation of the chunk files in index order.

use std::path::{Path, PathBuf};

use bytes::Bytes;
use futures::StreamExt;
use futures::stream;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio_util::io::ReaderStream;
use tracing::debug;
use uuid::Uuid;

use vaultfs_core::error::{AppError, ErrorKind};
use vaultfs_core::result::AppResult;

use crate::provider::ByteStream;

/// Local directory of staged chunks.
#[derive(Debug, Clone)]
pub struct ChunkStaging {
    root: PathBuf,
}

impl ChunkStaging {
    /// Create the staging root if needed.
    pub async fn new(root: impl Into<PathBuf>) -> AppResult<Self> {
        let root = root.into();
        fs::create_dir_all(&root).await.map_err(|e| {
            AppError::with_source(
                ErrorKind::Configuration,
                format!("Failed to create staging root: {}", root.display()),
                e,
            )
        })?;
        Ok(Self { root })
    }

    fn session_dir(&self, session_id: Uuid) -> PathBuf {
        self.root.join(session_id.to_string())
    }

    fn chunk_path(&self, session_id: Uuid, index: u32) -> PathBuf {
        self.session_dir(session_id).join(format!("{index:06}"))
    }

    /// Write chunk `index`, requiring exactly `expected_len` bytes.
    ///
    /// A chunk already staged is left untouched and reported as written.
    pub async fn write_chunk(
        &self,
        session_id: Uuid,
        index: u32,
        expected_len: u64,
        mut body: ByteStream,
    ) -> AppResult<u64> {
        let path = self.chunk_path(session_id, index);
        if let Ok(meta) = fs::metadata(&path).await {
            if meta.len() == expected_len {
                debug!(session_id = %session_id, index, "Chunk already staged");
                return Ok(expected_len);
            }
        }

        let dir = self.session_dir(session_id);
        fs::create_dir_all(&dir).await?;
        let tmp = dir.join(format!("{index:06}.{}.part", Uuid::new_v4().simple()));
        let mut file = fs::File::create(&tmp).await?;

        let mut written = 0u64;
        let result: AppResult<()> = async {
            while let Some(chunk) = body.next().await {
                let chunk = chunk.map_err(|e| {
                    AppError::with_source(ErrorKind::BackendUnavailable, "Chunk body read error", e)
                })?;
                written += chunk.len() as u64;
                if written > expected_len {
                    return Err(AppError::validation(format!(
                        "Chunk {index} exceeds its expected length of {expected_len} bytes"
                    )));
                }
                file.write_all(&chunk).await?;
            }
            file.flush().await?;
            Ok(())
        }
        .await;
        drop(file);

        if let Err(e) = result {
            let _ = fs::remove_file(&tmp).await;
            return Err(e);
        }
        if written != expected_len {
            let _ = fs::remove_file(&tmp).await;
            return Err(AppError::validation(format!(
                "Chunk {index} has {written} bytes, expected {expected_len}"
            )));
        }

        fs::rename(&tmp, &path).await?;
        debug!(session_id = %session_id, index, bytes = written, "Staged chunk");
        Ok(written)
    }

    /// Size of a staged chunk, if present.
    pub async fn chunk_len(&self, session_id: Uuid, index: u32) -> Option<u64> {
        fs::metadata(self.chunk_path(session_id, index))
            .await
            .ok()
            .map(|m| m.len())
    }

    /// Total bytes staged across chunks `0..count`.
    pub async fn staged_size(&self, session_id: Uuid, count: u32) -> AppResult<u64> {
        let mut total = 0u64;
        for index in 0..count {
            total += self.chunk_len(session_id, index).await.ok_or_else(|| {
                AppError::not_found(format!("Chunk {index} of upload {session_id} is not staged"))
            })?;
        }
        Ok(total)
    }

    /// Stream chunks `0..count` back to back.
    pub fn assembled(&self, session_id: Uuid, count: u32) -> ByteStream {
        let paths: Vec<PathBuf> = (0..count).map(|i| self.chunk_path(session_id, i)).collect();
        let chained = stream::iter(paths)
            .then(|path| async move { fs::File::open(path).await })
            .map(|opened| match opened {
                Ok(file) => ReaderStream::new(file).left_stream(),
                Err(e) => stream::once(async move { Err::<Bytes, _>(e) }).right_stream(),
            })
            .flatten();
        Box::pin(chained)
    }

    /// Remove everything staged for a session.
    pub async fn release(&self, session_id: Uuid) -> AppResult<()> {
        let dir = self.session_dir(session_id);
        match fs::remove_dir_all(&dir).await {
            Ok(()) => {
                debug!(session_id = %session_id, "Released staged chunks");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// The staging root.
    pub fn root(&self) -> &Path {
        &self.root
    }
}
