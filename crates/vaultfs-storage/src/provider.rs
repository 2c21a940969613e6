//! Storage provider trait for pluggable physical backends.

use std::pin::Pin;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncWrite, AsyncWriteExt};
use uuid::Uuid;

use vaultfs_core::error::{AppError, ErrorKind};
use vaultfs_core::result::AppResult;
use vaultfs_entity::storage::{PolicyType, StoragePolicy};

/// A byte stream type used for reading and writing object contents.
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, std::io::Error>> + Send>>;

/// One immediate child returned by [`StorageProvider::list`], or the
/// result of [`StorageProvider::stat`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObjectInfo {
    /// Full physical key.
    pub source: String,
    /// Last path segment.
    pub name: String,
    /// Size in bytes (0 for directories).
    pub size: u64,
    /// Whether this is a directory or common prefix.
    pub is_dir: bool,
    /// MIME type when known.
    pub mime_type: Option<String>,
    /// Last modification time when known.
    pub modified: Option<DateTime<Utc>>,
}

/// What [`StorageProvider::upload`] wrote.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadedObject {
    /// Physical key the object was written to.
    pub source: String,
    /// Number of bytes written.
    pub size: u64,
    /// MIME type guessed from the key.
    pub mime_type: String,
    /// Hex SHA-256 of the content when the backend computed it on the way through.
    pub checksum: Option<String>,
}

/// Options for [`StorageProvider::download_url`].
#[derive(Debug, Clone)]
pub struct DownloadUrlOptions {
    /// Logical file the URL is issued for.
    pub file_id: Uuid,
    /// File name offered to the browser.
    pub file_name: String,
    /// How long the URL stays valid.
    pub expires_in: Duration,
}

/// A backend-side upload the client writes to directly.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientUpload {
    /// Multipart upload ID (S3) or upload session URL (OneDrive).
    pub upload_id: String,
    /// One presigned URL per chunk (S3) or the single session URL (OneDrive).
    pub urls: Vec<String>,
}

/// Trait for physical storage backends.
///
/// One implementation exists per backend type. Credentials and base paths
/// come from the `policy` argument of every call, never from provider
/// state, so a single instance serves every policy of its type. Sources
/// are pre-resolved physical keys; providers know nothing of the virtual
/// tree. Dropping a returned future cancels the backend call.
#[async_trait]
pub trait StorageProvider: Send + Sync + std::fmt::Debug + 'static {
    /// The backend type this provider serves.
    fn provider_type(&self) -> PolicyType;

    /// Check that the backend behind `policy` is reachable.
    async fn health_check(&self, policy: &StoragePolicy) -> AppResult<()>;

    /// Stream `body`, declared to be `size` bytes long, to `source`.
    ///
    /// Never buffers the whole payload. The returned size is what was
    /// actually written; callers compare it with the declaration.
    async fn upload(
        &self,
        policy: &StoragePolicy,
        source: &str,
        size: u64,
        body: ByteStream,
    ) -> AppResult<UploadedObject>;

    /// Open the object at `source` as a byte stream.
    async fn get(&self, policy: &StoragePolicy, source: &str) -> AppResult<ByteStream>;

    /// Copy the object at `source` into `sink`, returning the byte count.
    async fn stream(
        &self,
        policy: &StoragePolicy,
        source: &str,
        sink: &mut (dyn AsyncWrite + Send + Unpin),
    ) -> AppResult<u64> {
        let mut body = self.get(policy, source).await?;
        let mut written = 0u64;
        while let Some(chunk) = body.next().await {
            let chunk = chunk.map_err(|e| {
                AppError::with_source(ErrorKind::BackendUnavailable, "Stream read error", e)
            })?;
            sink.write_all(&chunk).await?;
            written += chunk.len() as u64;
        }
        sink.flush().await?;
        Ok(written)
    }

    /// Immediate children of the directory or prefix at `source`.
    async fn list(&self, policy: &StoragePolicy, source: &str) -> AppResult<Vec<ObjectInfo>>;

    /// Delete objects, returning the sources that could not be deleted.
    async fn delete(&self, policy: &StoragePolicy, sources: &[String]) -> AppResult<Vec<String>>;

    /// Create a directory and any missing parents.
    async fn create_directory(&self, policy: &StoragePolicy, source: &str) -> AppResult<()>;

    /// Delete a directory and everything below it.
    async fn delete_directory(&self, policy: &StoragePolicy, source: &str) -> AppResult<()>;

    /// Move an object or directory to a new key.
    async fn rename(&self, policy: &StoragePolicy, from: &str, to: &str) -> AppResult<()>;

    /// Whether an object exists at `source`.
    async fn exists(&self, policy: &StoragePolicy, source: &str) -> AppResult<bool>;

    /// Size and type of the object at `source`.
    async fn stat(&self, policy: &StoragePolicy, source: &str) -> AppResult<ObjectInfo>;

    /// A URL the client can fetch the object from.
    ///
    /// Private policies, and public ones with `source_auth`, get a
    /// time-boxed signed URL; public policies get a direct or CDN URL.
    async fn download_url(
        &self,
        policy: &StoragePolicy,
        source: &str,
        options: &DownloadUrlOptions,
    ) -> AppResult<String>;

    /// A backend-rendered thumbnail of at most `width`x`height`.
    async fn thumbnail(
        &self,
        _policy: &StoragePolicy,
        _source: &str,
        _width: u32,
        _height: u32,
    ) -> AppResult<ByteStream> {
        Err(AppError::feature_not_supported(format!(
            "{} storage has no native thumbnails",
            self.provider_type()
        )))
    }

    /// Start an upload the client writes straight to the backend.
    async fn begin_client_upload(
        &self,
        _policy: &StoragePolicy,
        _source: &str,
        _size: u64,
        _chunk_size: u64,
        _expires_in: Duration,
    ) -> AppResult<ClientUpload> {
        Err(AppError::feature_not_supported(format!(
            "{} storage does not accept client-direct uploads",
            self.provider_type()
        )))
    }

    /// Finalize a client-direct upload from its part tags.
    async fn complete_client_upload(
        &self,
        _policy: &StoragePolicy,
        _source: &str,
        _upload_id: &str,
        _tags: &[String],
    ) -> AppResult<()> {
        Err(AppError::feature_not_supported(format!(
            "{} storage does not accept client-direct uploads",
            self.provider_type()
        )))
    }

    /// Discard a client-direct upload and any parts already written.
    async fn abort_client_upload(
        &self,
        _policy: &StoragePolicy,
        _source: &str,
        _upload_id: &str,
    ) -> AppResult<()> {
        Ok(())
    }
}

/// Guess a MIME type from a key's extension.
pub fn guess_mime(source: &str) -> String {
    mime_guess::from_path(source)
        .first_or_octet_stream()
        .essence_str()
        .to_string()
}

/// The last `/`-separated segment of a key.
pub fn key_name(source: &str) -> &str {
    source
        .trim_end_matches('/')
        .rsplit('/')
        .next()
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_guess_mime() {
        assert_eq!(guess_mime("a/b/photo.JPG"), "image/jpeg");
        assert_eq!(guess_mime("docs/readme"), "application/octet-stream");
    }

    #[test]
    fn test_key_name() {
        assert_eq!(key_name("users/a/b.txt"), "b.txt");
        assert_eq!(key_name("users/a/"), "a");
        assert_eq!(key_name("plain"), "plain");
    }
}
