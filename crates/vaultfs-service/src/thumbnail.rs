//! Thumbnail service: native backend thumbnails first, then the generator pipeline.

use std::sync::Arc;
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use futures::StreamExt;
use tracing::{debug, info, warn};
use uuid::Uuid;

use vaultfs_core::config::SigningConfig;
use vaultfs_core::error::{AppError, ErrorKind};
use vaultfs_core::result::AppResult;
use vaultfs_core::traits::JobEnqueuer;
use vaultfs_database::Store;
use vaultfs_entity::file::{CreateEntity, Entity, EntityKind, File};
use vaultfs_entity::job::JobPayload;
use vaultfs_storage::thumbnail::ThumbnailPipeline;
use vaultfs_storage::{ByteStream, UrlSigner};

use crate::context::RequestContext;
use crate::vfs::VfsService;

/// Largest native thumbnail accepted from a backend.
const MAX_NATIVE_THUMB_BYTES: usize = 16 * 1024 * 1024;

/// Generates, stores and serves thumbnails.
#[derive(Clone)]
pub struct ThumbnailService {
    store: Store,
    vfs: VfsService,
    pipeline: ThumbnailPipeline,
    signer: Arc<UrlSigner>,
    jobs: Arc<dyn JobEnqueuer>,
    signing: SigningConfig,
}

impl std::fmt::Debug for ThumbnailService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ThumbnailService").finish()
    }
}

async fn collect(mut body: ByteStream, limit: usize) -> AppResult<Bytes> {
    let mut buf = BytesMut::new();
    while let Some(chunk) = body.next().await {
        let chunk = chunk.map_err(|e| {
            AppError::with_source(ErrorKind::BackendUnavailable, "Thumbnail read error", e)
        })?;
        if buf.len() + chunk.len() > limit {
            return Err(AppError::validation("Native thumbnail is too large"));
        }
        buf.extend_from_slice(&chunk);
    }
    Ok(buf.freeze())
}

impl ThumbnailService {
    /// Creates a new thumbnail service.
    pub fn new(
        store: Store,
        vfs: VfsService,
        pipeline: ThumbnailPipeline,
        signer: Arc<UrlSigner>,
        jobs: Arc<dyn JobEnqueuer>,
        signing: SigningConfig,
    ) -> Self {
        Self {
            store,
            vfs,
            pipeline,
            signer,
            jobs,
            signing,
        }
    }

    async fn mark_unavailable(&self, file: &File) -> AppResult<()> {
        self.store.files.set_thumb_unavailable(file.id, true).await?;
        info!(file_id = %file.id, name = %file.name, "Thumbnail marked unavailable");
        Ok(())
    }

    /// Produce and store a thumbnail for the file's current version.
    ///
    /// `FeatureNotSupported` means no source could produce one; the file is
    /// then flagged so it is not retried.
    pub async fn generate(&self, file_id: Uuid) -> AppResult<Entity> {
        let ctx = RequestContext::system();
        let file = self.vfs.file(&ctx, file_id).await?;
        if file.is_dir() {
            return Err(AppError::invalid_operation("Directories have no thumbnails"));
        }
        let (_, entity) = self
            .store
            .files
            .current_version(file.id)
            .await?
            .ok_or_else(|| AppError::feature_not_supported("Empty files have no thumbnails"))?;
        let (policy, provider) = self.vfs.backend_of(&entity).await?;
        let config = self.pipeline.config();

        let data = match provider
            .thumbnail(&policy, &entity.source, config.max_width, config.max_height)
            .await
        {
            Ok(body) => collect(body, MAX_NATIVE_THUMB_BYTES).await?,
            Err(e) if e.is(ErrorKind::FeatureNotSupported) || e.is(ErrorKind::NotFound) => {
                debug!(file_id = %file.id, reason = %e, "No native thumbnail, using generators");
                if !self.pipeline.supports(&file.name, entity.size as u64) {
                    self.mark_unavailable(&file).await?;
                    return Err(AppError::feature_not_supported(format!(
                        "No thumbnail generator accepts '{}'",
                        file.name
                    )));
                }
                let body = provider.get(&policy, &entity.source).await?;
                match self
                    .pipeline
                    .generate(&file.name, entity.size as u64, body)
                    .await
                {
                    Ok(thumb) => thumb.data,
                    Err(e) if e.is(ErrorKind::FeatureNotSupported) => {
                        self.mark_unavailable(&file).await?;
                        return Err(e);
                    }
                    Err(e) => return Err(e),
                }
            }
            Err(e) => return Err(e),
        };

        // Copies share the version entity; the thumbnail object is per file.
        let key = format!("{}.{}{}", entity.source, file.id.simple(), config.suffix);
        let size = data.len() as u64;
        let body: ByteStream = Box::pin(futures::stream::once(async move { Ok(data) }));
        let written = provider.upload(&policy, &key, size, body).await?;

        let (thumb, replaced) = self
            .store
            .files
            .attach_thumbnail(
                file.id,
                CreateEntity {
                    kind: EntityKind::Thumbnail,
                    policy_id: policy.id,
                    source: written.source,
                    size: written.size as i64,
                    mime_type: Some("image/jpeg".to_string()),
                    checksum: written.checksum,
                    created_by: None,
                },
            )
            .await?;
        if let Some(old) = replaced.filter(|old| old.source != thumb.source) {
            self.vfs.delete_objects(&[old]).await;
        }

        info!(file_id = %file.id, entity_id = %thumb.id, bytes = thumb.size, "Thumbnail stored");
        Ok(thumb)
    }

    /// A signed, time-boxed URL for the file's thumbnail.
    ///
    /// Files without a stored thumbnail get a generation job queued; the URL
    /// answers 404 until it lands.
    pub async fn thumbnail_url(&self, ctx: &RequestContext, file_id: Uuid) -> AppResult<String> {
        let file = self.vfs.file(ctx, file_id).await?;
        if file.is_dir() {
            return Err(AppError::invalid_operation("Directories have no thumbnails"));
        }
        if file.thumb_unavailable {
            return Err(AppError::feature_not_supported(format!(
                "No thumbnail is available for '{}'",
                file.name
            )));
        }
        if self.store.files.thumbnail_of(file.id).await?.is_none() {
            let payload = JobPayload::ThumbnailGeneration { file_id: file.id };
            if let Err(e) = self.jobs.enqueue(payload.to_request()).await {
                warn!(file_id = %file.id, error = %e, "Failed to enqueue thumbnail job");
            }
        }
        Ok(self.signer.thumbnail_url(
            file.id,
            Duration::from_secs(self.signing.thumbnail_ttl_seconds),
        ))
    }

    /// Open the stored thumbnail of a file.
    pub async fn open(&self, file_id: Uuid) -> AppResult<(Entity, ByteStream)> {
        let file = self.vfs.file(&RequestContext::system(), file_id).await?;
        let entity = self
            .store
            .files
            .thumbnail_of(file.id)
            .await?
            .ok_or_else(|| AppError::not_found(format!("No thumbnail for file {file_id}")))?;
        let (policy, provider) = self.vfs.backend_of(&entity).await?;
        let body = provider.get(&policy, &entity.source).await?;
        Ok((entity, body))
    }
}
