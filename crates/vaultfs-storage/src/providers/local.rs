//! Local filesystem storage provider.
//!
//! Sources are filesystem paths built from the policy's base path. Writes
//! land in a sibling temp file first and are renamed into place, so a
//! reader never sees a half-written object.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::StreamExt;
use sha2::{Digest, Sha256};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio_util::io::ReaderStream;
use tracing::debug;
use uuid::Uuid;

use vaultfs_core::error::{AppError, ErrorKind};
use vaultfs_core::result::AppResult;
use vaultfs_entity::storage::{PolicyType, StoragePolicy};

use crate::provider::{
    ByteStream, DownloadUrlOptions, ObjectInfo, StorageProvider, UploadedObject, guess_mime,
    key_name,
};
use crate::signer::UrlSigner;

/// Local filesystem storage provider.
#[derive(Debug, Clone)]
pub struct LocalStorageProvider {
    /// Signs relay URLs served by the content endpoint.
    signer: Arc<UrlSigner>,
}

impl LocalStorageProvider {
    /// Create a new local storage provider.
    pub fn new(signer: Arc<UrlSigner>) -> Self {
        Self { signer }
    }

    /// Resolve a source to a filesystem path.
    fn resolve(&self, source: &str) -> PathBuf {
        PathBuf::from(source)
    }

    /// Ensure the parent directory of a path exists.
    async fn ensure_parent(&self, path: &Path) -> AppResult<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await.map_err(|e| {
                AppError::with_source(
                    ErrorKind::BackendUnavailable,
                    format!("Failed to create parent directory: {}", parent.display()),
                    e,
                )
            })?;
        }
        Ok(())
    }

    fn io_error(action: &str, source: &str, e: std::io::Error) -> AppError {
        if e.kind() == std::io::ErrorKind::NotFound {
            AppError::not_found(format!("Object not found: {source}"))
        } else {
            AppError::with_source(
                ErrorKind::BackendUnavailable,
                format!("Failed to {action}: {source}"),
                e,
            )
        }
    }

    fn info_from(source: String, meta: &std::fs::Metadata) -> ObjectInfo {
        let is_dir = meta.is_dir();
        ObjectInfo {
            name: key_name(&source).to_string(),
            size: if is_dir { 0 } else { meta.len() },
            is_dir,
            mime_type: (!is_dir).then(|| guess_mime(&source)),
            modified: meta.modified().ok().map(chrono::DateTime::<chrono::Utc>::from),
            source,
        }
    }
}

#[async_trait]
impl StorageProvider for LocalStorageProvider {
    fn provider_type(&self) -> PolicyType {
        PolicyType::Local
    }

    async fn health_check(&self, policy: &StoragePolicy) -> AppResult<()> {
        let root = self.resolve(&policy.base_path);
        fs::create_dir_all(&root)
            .await
            .map_err(|e| Self::io_error("prepare base path", &policy.base_path, e))?;
        let probe = root.join(format!(".probe-{}", Uuid::new_v4().simple()));
        fs::write(&probe, b"ok")
            .await
            .map_err(|e| Self::io_error("write probe", &policy.base_path, e))?;
        let _ = fs::remove_file(&probe).await;
        Ok(())
    }

    async fn upload(
        &self,
        _policy: &StoragePolicy,
        source: &str,
        _size: u64,
        mut body: ByteStream,
    ) -> AppResult<UploadedObject> {
        let full_path = self.resolve(source);
        self.ensure_parent(&full_path).await?;

        let file_name = full_path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        let tmp = full_path.with_file_name(format!(".{file_name}.{}.tmp", Uuid::new_v4().simple()));
        let mut file = fs::File::create(&tmp)
            .await
            .map_err(|e| Self::io_error("create file", source, e))?;

        let mut hasher = Sha256::new();
        let mut total_bytes = 0u64;
        let written: AppResult<()> = async {
            while let Some(chunk) = body.next().await {
                let chunk = chunk.map_err(|e| {
                    AppError::with_source(ErrorKind::BackendUnavailable, "Stream read error", e)
                })?;
                hasher.update(&chunk);
                total_bytes += chunk.len() as u64;
                file.write_all(&chunk)
                    .await
                    .map_err(|e| Self::io_error("write chunk", source, e))?;
            }
            file.flush()
                .await
                .map_err(|e| Self::io_error("flush file", source, e))?;
            Ok(())
        }
        .await;
        drop(file);

        if let Err(e) = written {
            let _ = fs::remove_file(&tmp).await;
            return Err(e);
        }
        fs::rename(&tmp, &full_path)
            .await
            .map_err(|e| Self::io_error("commit file", source, e))?;

        debug!(source, bytes = total_bytes, "Wrote file from stream");
        Ok(UploadedObject {
            source: source.to_string(),
            size: total_bytes,
            mime_type: guess_mime(source),
            checksum: Some(hex::encode(hasher.finalize())),
        })
    }

    async fn get(&self, _policy: &StoragePolicy, source: &str) -> AppResult<ByteStream> {
        let file = fs::File::open(self.resolve(source))
            .await
            .map_err(|e| Self::io_error("open file", source, e))?;
        Ok(Box::pin(ReaderStream::new(file)))
    }

    async fn list(&self, _policy: &StoragePolicy, source: &str) -> AppResult<Vec<ObjectInfo>> {
        let full_path = self.resolve(source);
        let mut dir = match fs::read_dir(&full_path).await {
            Ok(dir) => dir,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(Self::io_error("list directory", source, e)),
        };

        let mut entries = Vec::new();
        while let Some(entry) = dir
            .next_entry()
            .await
            .map_err(|e| Self::io_error("read directory entry", source, e))?
        {
            let name = entry.file_name().to_string_lossy().to_string();
            if name.starts_with('.') && name.ends_with(".tmp") {
                continue;
            }
            let meta = entry
                .metadata()
                .await
                .map_err(|e| Self::io_error("read entry metadata", source, e))?;
            let child = format!("{}/{}", source.trim_end_matches('/'), name);
            entries.push(Self::info_from(child, &meta));
        }

        entries.sort_by(|a, b| b.is_dir.cmp(&a.is_dir).then(a.name.cmp(&b.name)));
        Ok(entries)
    }

    async fn delete(&self, _policy: &StoragePolicy, sources: &[String]) -> AppResult<Vec<String>> {
        let mut failed = Vec::new();
        for source in sources {
            match fs::remove_file(self.resolve(source)).await {
                Ok(()) => debug!(source = %source, "Deleted file"),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => {
                    tracing::warn!(source = %source, error = %e, "Failed to delete file");
                    failed.push(source.clone());
                }
            }
        }
        Ok(failed)
    }

    async fn create_directory(&self, _policy: &StoragePolicy, source: &str) -> AppResult<()> {
        fs::create_dir_all(self.resolve(source))
            .await
            .map_err(|e| Self::io_error("create directory", source, e))
    }

    async fn delete_directory(&self, _policy: &StoragePolicy, source: &str) -> AppResult<()> {
        match fs::remove_dir_all(self.resolve(source)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Self::io_error("delete directory", source, e)),
        }
    }

    async fn rename(&self, _policy: &StoragePolicy, from: &str, to: &str) -> AppResult<()> {
        let to_path = self.resolve(to);
        self.ensure_parent(&to_path).await?;
        fs::rename(self.resolve(from), &to_path)
            .await
            .map_err(|e| Self::io_error("rename", from, e))
    }

    async fn exists(&self, _policy: &StoragePolicy, source: &str) -> AppResult<bool> {
        Ok(fs::try_exists(self.resolve(source)).await.unwrap_or(false))
    }

    async fn stat(&self, _policy: &StoragePolicy, source: &str) -> AppResult<ObjectInfo> {
        let meta = fs::metadata(self.resolve(source))
            .await
            .map_err(|e| Self::io_error("stat", source, e))?;
        Ok(Self::info_from(source.to_string(), &meta))
    }

    async fn download_url(
        &self,
        _policy: &StoragePolicy,
        _source: &str,
        options: &DownloadUrlOptions,
    ) -> AppResult<String> {
        // Local objects are never exposed directly; every read goes through
        // the signed content endpoint.
        Ok(self.signer.content_url(options.file_id, options.expires_in))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use std::time::Duration;
    use vaultfs_core::config::PolicyConfig;

    fn policy(base: &Path) -> StoragePolicy {
        StoragePolicy::from_config(&PolicyConfig {
            name: "local".into(),
            policy_type: "local".into(),
            server: String::new(),
            bucket: String::new(),
            region: String::new(),
            base_path: base.to_string_lossy().to_string(),
            access_key: String::new(),
            secret_key: String::new(),
            refresh_token: String::new(),
            is_private: true,
            source_auth: false,
            chunk_size: None,
            upload_mode: None,
            cdn_domain: None,
            max_size: 0,
            allowed_extensions: Vec::new(),
        })
        .unwrap()
    }

    fn provider() -> LocalStorageProvider {
        LocalStorageProvider::new(Arc::new(UrlSigner::new("k", "http://h").unwrap()))
    }

    fn body(data: &'static str) -> ByteStream {
        Box::pin(futures::stream::iter(vec![Ok(Bytes::from(data))]))
    }

    #[tokio::test]
    async fn test_upload_get_delete() {
        let dir = tempfile::tempdir().unwrap();
        let policy = policy(dir.path());
        let provider = provider();
        let key = policy.physical_key("test/file.txt");

        let uploaded = provider.upload(&policy, &key, 11, body("hello world")).await.unwrap();
        assert_eq!(uploaded.size, 11);
        assert_eq!(uploaded.mime_type, "text/plain");
        assert_eq!(
            uploaded.checksum.as_deref(),
            Some("b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9")
        );
        assert!(provider.exists(&policy, &key).await.unwrap());

        let mut sink = Vec::new();
        let n = provider.stream(&policy, &key, &mut sink).await.unwrap();
        assert_eq!(n, 11);
        assert_eq!(sink, b"hello world");

        let failed = provider.delete(&policy, &[key.clone()]).await.unwrap();
        assert!(failed.is_empty());
        assert!(!provider.exists(&policy, &key).await.unwrap());

        let err = provider.get(&policy, &key).await.err().unwrap();
        assert_eq!(err.kind, ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn test_list_immediate_children() {
        let dir = tempfile::tempdir().unwrap();
        let policy = policy(dir.path());
        let provider = provider();

        provider
            .upload(&policy, &policy.physical_key("listdir/a.txt"), 1, body("a"))
            .await
            .unwrap();
        provider
            .upload(&policy, &policy.physical_key("listdir/sub/deep.txt"), 1, body("b"))
            .await
            .unwrap();

        let entries = provider
            .list(&policy, &policy.physical_key("listdir"))
            .await
            .unwrap();
        assert_eq!(entries.len(), 2);
        assert!(entries[0].is_dir);
        assert_eq!(entries[0].name, "sub");
        assert_eq!(entries[1].name, "a.txt");
        assert_eq!(entries[1].size, 1);

        let missing = provider
            .list(&policy, &policy.physical_key("nope"))
            .await
            .unwrap();
        assert!(missing.is_empty());
    }

    #[tokio::test]
    async fn test_rename_and_directories() {
        let dir = tempfile::tempdir().unwrap();
        let policy = policy(dir.path());
        let provider = provider();
        let from = policy.physical_key("d1/orig.txt");
        let to = policy.physical_key("d2/moved.txt");

        provider.upload(&policy, &from, 7, body("content")).await.unwrap();
        provider.rename(&policy, &from, &to).await.unwrap();
        assert!(!provider.exists(&policy, &from).await.unwrap());
        assert_eq!(provider.stat(&policy, &to).await.unwrap().size, 7);

        provider
            .delete_directory(&policy, &policy.physical_key("d2"))
            .await
            .unwrap();
        assert!(!provider.exists(&policy, &to).await.unwrap());
        provider.health_check(&policy).await.unwrap();
    }

    #[tokio::test]
    async fn test_download_url_is_signed_and_no_thumbnail() {
        let dir = tempfile::tempdir().unwrap();
        let policy = policy(dir.path());
        let provider = provider();
        let options = DownloadUrlOptions {
            file_id: Uuid::nil(),
            file_name: "a.txt".into(),
            expires_in: Duration::from_secs(60),
        };

        let url = provider.download_url(&policy, "x", &options).await.unwrap();
        assert!(url.contains("sign="));

        let err = provider.thumbnail(&policy, "x", 10, 10).await.err().unwrap();
        assert_eq!(err.kind, ErrorKind::FeatureNotSupported);
    }
}
