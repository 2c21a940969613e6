//! Resumable upload sessions through the relay and client-direct paths.

mod helpers;

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Duration, Utc};
use futures::StreamExt;
use helpers::{TestApp, body, path, pattern, read_all};
use uuid::Uuid;
use vaultfs_core::config::{PolicyConfig, UploadConfig};
use vaultfs_core::error::{AppError, ErrorKind};
use vaultfs_core::result::AppResult;
use vaultfs_database::repositories::{ChunkMark, SessionRepository};
use vaultfs_database::{MemoryStore, Store};
use vaultfs_entity::storage::{PolicyType, StoragePolicy};
use vaultfs_entity::upload::{UploadSession, UploadState};
use vaultfs_entity::user::{Group, User};
use vaultfs_service::OpenUpload;
use vaultfs_storage::{
    ByteStream, ClientUpload, DownloadUrlOptions, ObjectInfo, StorageProvider, UploadedObject,
};

const MIB: usize = 1024 * 1024;

fn request(app: &TestApp, raw: &str, size: u64) -> OpenUpload {
    OpenUpload {
        owner_id: app.owner,
        path: path(raw),
        size,
        policy_id: None,
    }
}

#[tokio::test]
async fn test_out_of_order_chunks_assemble_in_index_order() {
    let app = TestApp::new().await;
    let data = pattern(10 * MIB);
    let ctx = app.ctx();
    let ticket = app
        .uploads
        .open(&ctx, request(&app, "/media/video.bin", data.len() as u64))
        .await
        .unwrap();
    assert_eq!(ticket.chunk_size, 4 * MIB as u64);
    assert_eq!(ticket.chunk_count, 3);
    assert!(ticket.client_upload.is_none());

    let slice = |i: usize| &data[i * 4 * MIB..((i + 1) * 4 * MIB).min(data.len())];
    let r2 = app
        .uploads
        .put_chunk(&ctx, ticket.session_id, 2, body(slice(2)))
        .await
        .unwrap();
    let r0 = app
        .uploads
        .put_chunk(&ctx, ticket.session_id, 0, body(slice(0)))
        .await
        .unwrap();
    assert!(r2.completed.is_none() && r0.completed.is_none());

    let last = app
        .uploads
        .put_chunk(&ctx, ticket.session_id, 1, body(slice(1)))
        .await
        .unwrap();
    let result = last.completed.expect("last chunk completes the upload");
    assert_eq!(result.size, 10_485_760);

    let session = app.uploads.session(&ctx, ticket.session_id).await.unwrap();
    assert_eq!(session.state, UploadState::Completed);

    let file = app
        .vfs
        .stat(&ctx, app.owner, &path("/media/video.bin"))
        .await
        .unwrap();
    assert_eq!(file.id, result.file_id);
    assert_eq!(file.size, 10_485_760);
    let opened = app.vfs.open(&ctx, result.file_id).await.unwrap();
    assert_eq!(read_all(opened.body).await, data);
}

#[tokio::test]
async fn test_duplicate_chunk_is_idempotent() {
    let app = TestApp::with_upload_config(UploadConfig {
        chunk_size_bytes: 4,
        ..UploadConfig::default()
    })
    .await;
    let ctx = app.ctx();
    let ticket = app
        .uploads
        .open(&ctx, request(&app, "/a.txt", 8))
        .await
        .unwrap();

    let first = app
        .uploads
        .put_chunk(&ctx, ticket.session_id, 0, body(b"abcd"))
        .await
        .unwrap();
    assert!(first.accepted && !first.duplicate);
    let again = app
        .uploads
        .put_chunk(&ctx, ticket.session_id, 0, body(b"abcd"))
        .await
        .unwrap();
    assert!(again.accepted && again.duplicate);
    assert!(again.completed.is_none());

    let session = app.uploads.session(&ctx, ticket.session_id).await.unwrap();
    assert_eq!(session.received, vec![0]);

    let done = app
        .uploads
        .put_chunk(&ctx, ticket.session_id, 1, body(b"efgh"))
        .await
        .unwrap()
        .completed
        .unwrap();

    // Chunks replayed after completion return the stored result.
    let replay = app
        .uploads
        .put_chunk(&ctx, ticket.session_id, 1, body(b"efgh"))
        .await
        .unwrap();
    assert!(replay.duplicate);
    assert_eq!(replay.completed.unwrap().entity_id, done.entity_id);
    let repeat = app.uploads.complete(&ctx, ticket.session_id).await.unwrap();
    assert_eq!(repeat.file_id, done.file_id);

    let versions = app.vfs.versions(&ctx, done.file_id).await.unwrap();
    assert_eq!(versions.len(), 1);
}

#[tokio::test]
async fn test_complete_with_missing_chunks_is_rejected() {
    let app = TestApp::with_upload_config(UploadConfig {
        chunk_size_bytes: 4,
        ..UploadConfig::default()
    })
    .await;
    let ctx = app.ctx();
    let ticket = app
        .uploads
        .open(&ctx, request(&app, "/partial.bin", 10))
        .await
        .unwrap();
    app.uploads
        .put_chunk(&ctx, ticket.session_id, 1, body(b"4567"))
        .await
        .unwrap();

    let err = app
        .uploads
        .complete(&ctx, ticket.session_id)
        .await
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::InvalidOperation);

    let err = app
        .uploads
        .put_chunk(&ctx, ticket.session_id, 3, body(b"x"))
        .await
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::Validation);

    let err = app
        .uploads
        .put_chunk(&ctx, ticket.session_id, 2, body(b"too long"))
        .await
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::Validation);
}

#[tokio::test]
async fn test_abort_releases_staging() {
    let app = TestApp::with_upload_config(UploadConfig {
        chunk_size_bytes: 4,
        ..UploadConfig::default()
    })
    .await;
    let ctx = app.ctx();
    let ticket = app
        .uploads
        .open(&ctx, request(&app, "/gone.bin", 8))
        .await
        .unwrap();
    app.uploads
        .put_chunk(&ctx, ticket.session_id, 0, body(b"abcd"))
        .await
        .unwrap();
    let staged = app
        .dir
        .path()
        .join("staging")
        .join(ticket.session_id.to_string());
    assert!(staged.exists());

    app.uploads.abort(&ctx, ticket.session_id).await.unwrap();
    app.uploads.abort(&ctx, ticket.session_id).await.unwrap();
    assert!(!staged.exists());

    let session = app.uploads.session(&ctx, ticket.session_id).await.unwrap();
    assert_eq!(session.state, UploadState::Aborted);
    let err = app
        .uploads
        .put_chunk(&ctx, ticket.session_id, 1, body(b"efgh"))
        .await
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::InvalidOperation);
    assert!(
        app.vfs
            .stat(&ctx, app.owner, &path("/gone.bin"))
            .await
            .unwrap_err()
            .is(ErrorKind::NotFound)
    );
}

#[tokio::test]
async fn test_sweep_expires_stale_sessions() {
    let app = TestApp::with_upload_config(UploadConfig {
        chunk_size_bytes: 4,
        session_ttl_seconds: 60,
        ..UploadConfig::default()
    })
    .await;
    let ctx = app.ctx();
    let stale = app
        .uploads
        .open(&ctx, request(&app, "/stale.bin", 8))
        .await
        .unwrap();

    assert_eq!(app.uploads.sweep_expired(Utc::now()).await.unwrap(), 0);
    let later = Utc::now() + Duration::seconds(120);
    assert_eq!(app.uploads.sweep_expired(later).await.unwrap(), 1);
    assert_eq!(app.uploads.sweep_expired(later).await.unwrap(), 0);

    let session = app.uploads.session(&ctx, stale.session_id).await.unwrap();
    assert_eq!(session.state, UploadState::Expired);
}

#[tokio::test]
async fn test_group_quota_is_enforced_at_open() {
    let app = TestApp::new().await;
    let group_id = Uuid::new_v4();
    app.store
        .users
        .upsert_group(Group {
            id: group_id,
            name: "small".to_string(),
            max_storage: 16,
            speed_limit: 0,
        })
        .await
        .unwrap();
    app.store
        .users
        .upsert_user(User {
            id: app.owner,
            group_id,
        })
        .await
        .unwrap();

    app.upload("/fits.bin", &[1u8; 10]).await;
    let err = app
        .uploads
        .open(&app.ctx(), request(&app, "/overflow.bin", 10))
        .await
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::QuotaExceeded);

    // Overwriting charges only the growth.
    app.upload("/fits.bin", &[2u8; 16]).await;
}

#[tokio::test]
async fn test_other_users_cannot_touch_a_session() {
    let app = TestApp::new().await;
    let ticket = app
        .uploads
        .open(&app.ctx(), request(&app, "/private.bin", 3))
        .await
        .unwrap();

    let stranger = vaultfs_service::RequestContext::user(Uuid::new_v4());
    let err = app
        .uploads
        .put_chunk(&stranger, ticket.session_id, 0, body(b"abc"))
        .await
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::Forbidden);
}

/// Session store where an abort lands between staging a chunk and recording it.
#[derive(Debug)]
struct AbortBeforeMark(Arc<MemoryStore>);

#[async_trait]
impl SessionRepository for AbortBeforeMark {
    async fn insert(&self, session: UploadSession) -> AppResult<UploadSession> {
        SessionRepository::insert(&*self.0, session).await
    }

    async fn find(&self, id: Uuid) -> AppResult<Option<UploadSession>> {
        SessionRepository::find(&*self.0, id).await
    }

    async fn mark_chunk(&self, id: Uuid, index: u32, tag: Option<String>) -> AppResult<ChunkMark> {
        self.0
            .transition(id, &[UploadState::Receiving], UploadState::Aborted)
            .await?;
        self.0.mark_chunk(id, index, tag).await
    }

    async fn transition(
        &self,
        id: Uuid,
        from: &[UploadState],
        to: UploadState,
    ) -> AppResult<Option<UploadSession>> {
        self.0.transition(id, from, to).await
    }

    async fn set_backend_upload_id(&self, id: Uuid, upload_id: &str) -> AppResult<()> {
        self.0.set_backend_upload_id(id, upload_id).await
    }

    async fn find_expired(&self, now: DateTime<Utc>) -> AppResult<Vec<UploadSession>> {
        self.0.find_expired(now).await
    }
}

#[tokio::test]
async fn test_chunk_staged_after_abort_is_released() {
    let backend = Arc::new(MemoryStore::new());
    let mut store = Store::from_backend(backend.clone());
    store.sessions = Arc::new(AbortBeforeMark(backend));
    let app = TestApp::build(
        UploadConfig {
            chunk_size_bytes: 4,
            ..UploadConfig::default()
        },
        store,
        Vec::new(),
    )
    .await;
    let ctx = app.ctx();
    let ticket = app
        .uploads
        .open(&ctx, request(&app, "/late.bin", 8))
        .await
        .unwrap();

    let err = app
        .uploads
        .put_chunk(&ctx, ticket.session_id, 0, body(b"abcd"))
        .await
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::InvalidOperation);

    let session = app.uploads.session(&ctx, ticket.session_id).await.unwrap();
    assert_eq!(session.state, UploadState::Aborted);
    let staged = app
        .dir
        .path()
        .join("staging")
        .join(ticket.session_id.to_string());
    assert!(!staged.exists());
}

/// An S3-like backend the client writes parts to directly.
#[derive(Debug, Default)]
struct DirectBackend {
    objects: Mutex<HashMap<String, Vec<u8>>>,
    parts: Mutex<HashMap<String, BTreeMap<u32, Vec<u8>>>>,
    failing_completes: AtomicUsize,
    deleted: Mutex<Vec<String>>,
    aborted: Mutex<Vec<String>>,
}

impl DirectBackend {
    /// What a client PUT to a presigned part URL does.
    fn put_part(&self, upload_id: &str, index: u32, data: &[u8]) {
        self.parts
            .lock()
            .unwrap()
            .entry(upload_id.to_string())
            .or_default()
            .insert(index, data.to_vec());
    }

    fn object(&self, source: &str) -> Option<Vec<u8>> {
        self.objects.lock().unwrap().get(source).cloned()
    }
}

#[async_trait]
impl StorageProvider for DirectBackend {
    fn provider_type(&self) -> PolicyType {
        PolicyType::S3
    }

    async fn health_check(&self, _policy: &StoragePolicy) -> AppResult<()> {
        Ok(())
    }

    async fn upload(
        &self,
        _policy: &StoragePolicy,
        source: &str,
        _size: u64,
        mut body: ByteStream,
    ) -> AppResult<UploadedObject> {
        let mut data = Vec::new();
        while let Some(chunk) = body.next().await {
            data.extend_from_slice(&chunk?);
        }
        let size = data.len() as u64;
        self.objects.lock().unwrap().insert(source.to_string(), data);
        Ok(UploadedObject {
            source: source.to_string(),
            size,
            mime_type: "application/octet-stream".to_string(),
            checksum: None,
        })
    }

    async fn get(&self, _policy: &StoragePolicy, source: &str) -> AppResult<ByteStream> {
        let data = self
            .object(source)
            .ok_or_else(|| AppError::not_found(format!("No object at {source}")))?;
        let data = Bytes::from(data);
        Ok(Box::pin(futures::stream::once(async move { Ok(data) })))
    }

    async fn list(&self, _policy: &StoragePolicy, _source: &str) -> AppResult<Vec<ObjectInfo>> {
        Ok(Vec::new())
    }

    async fn delete(&self, _policy: &StoragePolicy, sources: &[String]) -> AppResult<Vec<String>> {
        let mut objects = self.objects.lock().unwrap();
        for source in sources {
            objects.remove(source);
        }
        self.deleted.lock().unwrap().extend_from_slice(sources);
        Ok(Vec::new())
    }

    async fn create_directory(&self, _policy: &StoragePolicy, _source: &str) -> AppResult<()> {
        Ok(())
    }

    async fn delete_directory(&self, _policy: &StoragePolicy, _source: &str) -> AppResult<()> {
        Ok(())
    }

    async fn rename(&self, _policy: &StoragePolicy, from: &str, to: &str) -> AppResult<()> {
        let mut objects = self.objects.lock().unwrap();
        let data = objects
            .remove(from)
            .ok_or_else(|| AppError::not_found(format!("No object at {from}")))?;
        objects.insert(to.to_string(), data);
        Ok(())
    }

    async fn exists(&self, _policy: &StoragePolicy, source: &str) -> AppResult<bool> {
        Ok(self.objects.lock().unwrap().contains_key(source))
    }

    async fn stat(&self, _policy: &StoragePolicy, source: &str) -> AppResult<ObjectInfo> {
        let data = self
            .object(source)
            .ok_or_else(|| AppError::not_found(format!("No object at {source}")))?;
        Ok(ObjectInfo {
            source: source.to_string(),
            name: vaultfs_storage::provider::key_name(source).to_string(),
            size: data.len() as u64,
            is_dir: false,
            mime_type: None,
            modified: None,
        })
    }

    async fn download_url(
        &self,
        _policy: &StoragePolicy,
        source: &str,
        _options: &DownloadUrlOptions,
    ) -> AppResult<String> {
        Ok(format!("https://direct.test/{source}"))
    }

    async fn begin_client_upload(
        &self,
        _policy: &StoragePolicy,
        source: &str,
        size: u64,
        chunk_size: u64,
        _expires_in: std::time::Duration,
    ) -> AppResult<ClientUpload> {
        let upload_id = Uuid::new_v4().simple().to_string();
        let count = size.div_ceil(chunk_size);
        self.parts
            .lock()
            .unwrap()
            .insert(upload_id.clone(), BTreeMap::new());
        Ok(ClientUpload {
            urls: (0..count)
                .map(|i| format!("https://direct.test/{source}?uploadId={upload_id}&part={}", i + 1))
                .collect(),
            upload_id,
        })
    }

    async fn complete_client_upload(
        &self,
        _policy: &StoragePolicy,
        source: &str,
        upload_id: &str,
        tags: &[String],
    ) -> AppResult<()> {
        if self
            .failing_completes
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(AppError::backend_unavailable("Connection reset by peer"));
        }
        let parts = self
            .parts
            .lock()
            .unwrap()
            .remove(upload_id)
            .ok_or_else(|| AppError::not_found(format!("No upload {upload_id}")))?;
        assert!(tags.iter().all(|t| t.starts_with("etag-")));
        let data = parts.into_values().flatten().collect();
        self.objects.lock().unwrap().insert(source.to_string(), data);
        Ok(())
    }

    async fn abort_client_upload(
        &self,
        _policy: &StoragePolicy,
        _source: &str,
        upload_id: &str,
    ) -> AppResult<()> {
        self.parts.lock().unwrap().remove(upload_id);
        self.aborted.lock().unwrap().push(upload_id.to_string());
        Ok(())
    }
}

async fn direct_app() -> (TestApp, Arc<DirectBackend>, Arc<StoragePolicy>) {
    let backend = Arc::new(DirectBackend::default());
    let app = TestApp::build(UploadConfig::default(), Store::memory(), vec![backend.clone()]).await;
    let policy = StoragePolicy::from_config(&PolicyConfig {
        name: "bucket".to_string(),
        policy_type: "s3".to_string(),
        server: "https://direct.test".to_string(),
        bucket: "vault".to_string(),
        region: "us-east-1".to_string(),
        base_path: "users".to_string(),
        access_key: "key".to_string(),
        secret_key: "secret".to_string(),
        refresh_token: String::new(),
        is_private: true,
        source_auth: false,
        chunk_size: Some(4),
        upload_mode: Some("direct".to_string()),
        cdn_domain: None,
        max_size: 0,
        allowed_extensions: Vec::new(),
    })
    .unwrap();
    let policy = app.registry.upsert(policy).await.unwrap();
    (app, backend, policy)
}

fn direct_request(app: &TestApp, policy: &StoragePolicy, raw: &str, size: u64) -> OpenUpload {
    OpenUpload {
        policy_id: Some(policy.id),
        ..request(app, raw, size)
    }
}

#[tokio::test]
async fn test_direct_upload_survives_failed_backend_completion() {
    let (app, backend, policy) = direct_app().await;
    let ctx = app.ctx();
    let ticket = app
        .uploads
        .open(&ctx, direct_request(&app, &policy, "/direct/notes.txt", 8))
        .await
        .unwrap();
    let client = ticket.client_upload.clone().expect("direct sessions hand out part URLs");
    assert_eq!(ticket.chunk_count, 2);
    assert_eq!(client.urls.len(), 2);

    let err = app
        .uploads
        .put_chunk(&ctx, ticket.session_id, 0, body(b"abcd"))
        .await
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::InvalidOperation);

    backend.failing_completes.store(1, Ordering::SeqCst);
    backend.put_part(&client.upload_id, 0, b"abcd");
    backend.put_part(&client.upload_id, 1, b"efgh");
    let first = app
        .uploads
        .report_chunk(&ctx, ticket.session_id, 0, Some("etag-1".to_string()))
        .await
        .unwrap();
    assert!(first.completed.is_none());
    let err = app
        .uploads
        .report_chunk(&ctx, ticket.session_id, 1, Some("etag-2".to_string()))
        .await
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::BackendUnavailable);

    let session = app.uploads.session(&ctx, ticket.session_id).await.unwrap();
    assert_eq!(session.state, UploadState::Receiving);
    assert!(session.all_received());
    assert!(backend.aborted.lock().unwrap().is_empty());

    let result = app.uploads.complete(&ctx, ticket.session_id).await.unwrap();
    assert_eq!(result.size, 8);
    let opened = app.vfs.open(&ctx, result.file_id).await.unwrap();
    assert_eq!(opened.entity.unwrap().policy_id, policy.id);
    assert_eq!(read_all(opened.body).await, b"abcdefgh");
    assert!(backend.deleted.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_direct_upload_with_lost_part_is_aborted() {
    let (app, backend, policy) = direct_app().await;
    let ctx = app.ctx();
    let ticket = app
        .uploads
        .open(&ctx, direct_request(&app, &policy, "/direct/short.bin", 8))
        .await
        .unwrap();
    let client = ticket.client_upload.clone().unwrap();

    // The client reports both parts but only the first reached the bucket.
    backend.put_part(&client.upload_id, 0, b"abcd");
    app.uploads
        .report_chunk(&ctx, ticket.session_id, 0, Some("etag-1".to_string()))
        .await
        .unwrap();
    let err = app
        .uploads
        .report_chunk(&ctx, ticket.session_id, 1, Some("etag-2".to_string()))
        .await
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::ChecksumMismatch);

    let session = app.uploads.session(&ctx, ticket.session_id).await.unwrap();
    assert_eq!(session.state, UploadState::Aborted);
    assert_eq!(*backend.deleted.lock().unwrap(), vec![session.physical_key.clone()]);
    assert!(backend.object(&session.physical_key).is_none());
    assert_eq!(*backend.aborted.lock().unwrap(), vec![client.upload_id]);
    let err = app
        .vfs
        .stat(&ctx, app.owner, &path("/direct/short.bin"))
        .await
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::NotFound);
}

#[tokio::test]
async fn test_direct_upload_rechecks_quota_at_commit() {
    let (app, backend, policy) = direct_app().await;
    let group_id = Uuid::new_v4();
    app.store
        .users
        .upsert_group(Group {
            id: group_id,
            name: "tight".to_string(),
            max_storage: 10,
            speed_limit: 0,
        })
        .await
        .unwrap();
    app.store
        .users
        .upsert_user(User {
            id: app.owner,
            group_id,
        })
        .await
        .unwrap();
    let ctx = app.ctx();
    let ticket = app
        .uploads
        .open(&ctx, direct_request(&app, &policy, "/direct/big.bin", 8))
        .await
        .unwrap();
    let client = ticket.client_upload.clone().unwrap();

    // Another upload takes the room while the client is still sending parts.
    app.upload("/relay.bin", &[7u8; 5]).await;

    backend.put_part(&client.upload_id, 0, b"abcd");
    backend.put_part(&client.upload_id, 1, b"efgh");
    app.uploads
        .report_chunk(&ctx, ticket.session_id, 0, Some("etag-1".to_string()))
        .await
        .unwrap();
    let err = app
        .uploads
        .report_chunk(&ctx, ticket.session_id, 1, Some("etag-2".to_string()))
        .await
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::QuotaExceeded);

    let session = app.uploads.session(&ctx, ticket.session_id).await.unwrap();
    assert_eq!(session.state, UploadState::Aborted);
    assert_eq!(*backend.deleted.lock().unwrap(), vec![session.physical_key.clone()]);
    assert!(backend.object(&session.physical_key).is_none());
    assert_eq!(app.store.files.used_storage(app.owner).await.unwrap(), 5);
}
