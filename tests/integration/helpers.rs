//! Shared test harness: the full engine over the in-memory store and a
//! local-disk policy in a temp directory.
#![allow(dead_code)]

use std::sync::Arc;

use axum::Router;
use bytes::Bytes;
use futures::StreamExt;
use tempfile::TempDir;
use uuid::Uuid;

use vaultfs_api::{AppState, build_router};
use vaultfs_core::Settings;
use vaultfs_core::config::{
    SigningConfig, StorageConfig, ThumbnailConfig, UploadConfig, WorkerConfig,
};
use vaultfs_core::events::BroadcastEventBus;
use vaultfs_core::traits::{EventPublisher, JobEnqueuer};
use vaultfs_core::types::VfsPath;
use vaultfs_database::Store;
use vaultfs_service::{
    DirectLinkService, OpenUpload, PathLocker, RequestContext, ThumbnailService, UploadResult,
    UploadSessionManager, VfsService,
};
use vaultfs_storage::providers::LocalStorageProvider;
use vaultfs_storage::thumbnail::ThumbnailPipeline;
use vaultfs_storage::{ByteStream, ChunkStaging, PolicyRegistry, StorageProvider, UrlSigner};

pub const SECRET: &str = "integration-secret";
pub const BASE_URL: &str = "http://vaultfs.test";

/// A fully wired engine.
pub struct TestApp {
    pub store: Store,
    pub settings: Arc<Settings>,
    pub registry: PolicyRegistry,
    pub signer: Arc<UrlSigner>,
    pub bus: Arc<BroadcastEventBus>,
    pub jobs: vaultfs_worker::Broker,
    pub vfs: VfsService,
    pub uploads: UploadSessionManager,
    pub thumbnails: ThumbnailService,
    pub links: DirectLinkService,
    pub owner: Uuid,
    pub dir: TempDir,
}

impl TestApp {
    pub async fn new() -> Self {
        Self::with_upload_config(UploadConfig::default()).await
    }

    pub async fn with_upload_config(upload: UploadConfig) -> Self {
        Self::build(upload, Store::memory(), Vec::new()).await
    }

    /// Wire the engine over `store`, with `extra` providers next to the local one.
    pub async fn build(
        upload: UploadConfig,
        store: Store,
        extra: Vec<Arc<dyn StorageProvider>>,
    ) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let settings = Arc::new(Settings::new(Default::default()));
        let signer = Arc::new(UrlSigner::new(SECRET, BASE_URL).unwrap());

        let mut storage = StorageConfig::default();
        storage.staging_root = dir.path().join("staging").display().to_string();
        storage.policies[0].base_path = dir.path().join("uploads").display().to_string();

        let mut providers: Vec<Arc<dyn StorageProvider>> =
            vec![Arc::new(LocalStorageProvider::new(signer.clone()))];
        providers.extend(extra);
        let registry = PolicyRegistry::new(store.policies.clone(), providers);
        registry.bootstrap(&storage).await.unwrap();
        let staging = ChunkStaging::new(&storage.staging_root).await.unwrap();

        let bus = Arc::new(BroadcastEventBus::new(256));
        let events: Arc<dyn EventPublisher> = bus.clone();
        let broker = vaultfs_worker::Broker::new(store.jobs.clone(), WorkerConfig::default());
        let jobs: Arc<dyn JobEnqueuer> = Arc::new(broker.clone());
        let signing = SigningConfig {
            secret: SECRET.to_string(),
            ..SigningConfig::default()
        };

        let vfs = VfsService::new(
            store.clone(),
            registry.clone(),
            PathLocker::new(),
            events.clone(),
            signer.clone(),
            signing.clone(),
        );
        let thumbnail_config = ThumbnailConfig {
            temp_dir: dir.path().join("thumbs").display().to_string(),
            ..ThumbnailConfig::default()
        };
        tokio::fs::create_dir_all(&thumbnail_config.temp_dir)
            .await
            .unwrap();
        let thumbnails = ThumbnailService::new(
            store.clone(),
            vfs.clone(),
            ThumbnailPipeline::new(settings.clone(), thumbnail_config),
            signer.clone(),
            jobs.clone(),
            signing,
        );
        let uploads = UploadSessionManager::new(
            store.clone(),
            vfs.clone(),
            staging,
            events,
            jobs,
            upload,
        );
        let links = DirectLinkService::new(store.clone(), vfs.clone(), signer.clone());

        Self {
            store,
            settings,
            registry,
            signer,
            bus,
            jobs: broker,
            vfs,
            uploads,
            thumbnails,
            links,
            owner: Uuid::new_v4(),
            dir,
        }
    }

    /// Context of the default test user.
    pub fn ctx(&self) -> RequestContext {
        RequestContext::user(self.owner)
    }

    /// The HTTP router over this engine.
    pub fn router(&self) -> Router {
        build_router(AppState {
            vfs: self.vfs.clone(),
            thumbnails: self.thumbnails.clone(),
            links: self.links.clone(),
            signer: self.signer.clone(),
        })
    }

    /// Upload `data` to `path` in one pass, chunk by chunk in order.
    pub async fn upload(&self, path: &str, data: &[u8]) -> UploadResult {
        let ctx = self.ctx();
        let ticket = self
            .uploads
            .open(
                &ctx,
                OpenUpload {
                    owner_id: self.owner,
                    path: VfsPath::parse(path).unwrap(),
                    size: data.len() as u64,
                    policy_id: None,
                },
            )
            .await
            .unwrap();

        let chunk_size = ticket.chunk_size as usize;
        for index in 0..ticket.chunk_count {
            let start = index as usize * chunk_size;
            let end = (start + chunk_size).min(data.len());
            let receipt = self
                .uploads
                .put_chunk(&ctx, ticket.session_id, index, body(&data[start..end]))
                .await
                .unwrap();
            if let Some(result) = receipt.completed {
                return result;
            }
        }
        self.uploads.complete(&ctx, ticket.session_id).await.unwrap()
    }
}

/// A one-chunk byte stream.
pub fn body(data: &[u8]) -> ByteStream {
    let data = Bytes::copy_from_slice(data);
    Box::pin(futures::stream::once(async move { Ok(data) }))
}

/// Drain a byte stream.
pub async fn read_all(mut stream: ByteStream) -> Vec<u8> {
    let mut out = Vec::new();
    while let Some(chunk) = stream.next().await {
        out.extend_from_slice(&chunk.unwrap());
    }
    out
}

/// Deterministic test content.
pub fn pattern(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

pub fn path(raw: &str) -> VfsPath {
    VfsPath::parse(raw).unwrap()
}
