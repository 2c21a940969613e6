//! Upload session manager.
//!
//! Sessions move `created → receiving → completed`, or end `aborted` /
//! `expired`. Chunks may arrive in any order and concurrently; completion
//! runs once every chunk is accounted for, either implicitly on the last
//! chunk or through an explicit call. Both paths are serialised per
//! session and return the stored result when repeated.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};
use uuid::Uuid;

use vaultfs_core::config::UploadConfig;
use vaultfs_core::error::{AppError, ErrorKind};
use vaultfs_core::events::{DomainEvent, FileEvent};
use vaultfs_core::result::AppResult;
use vaultfs_core::traits::{EventPublisher, JobEnqueuer};
use vaultfs_core::types::VfsPath;
use vaultfs_database::Store;
use vaultfs_database::repositories::CommitUpload;
use vaultfs_entity::file::{CreateEntity, EntityKind};
use vaultfs_entity::job::JobPayload;
use vaultfs_entity::storage::{StoragePolicy, UploadMode};
use vaultfs_entity::upload::{UploadSession, UploadState, chunk_count};
use vaultfs_storage::provider::guess_mime;
use vaultfs_storage::{ByteStream, ChunkStaging, StorageProvider, UploadedObject};

use super::types::{ChunkReceipt, OpenUpload, UploadResult, UploadTicket};
use crate::context::RequestContext;
use crate::vfs::VfsService;

/// Drives upload sessions from open to commit.
#[derive(Clone)]
pub struct UploadSessionManager {
    store: Store,
    vfs: VfsService,
    staging: ChunkStaging,
    events: Arc<dyn EventPublisher>,
    jobs: Arc<dyn JobEnqueuer>,
    config: UploadConfig,
}

impl std::fmt::Debug for UploadSessionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UploadSessionManager").finish()
    }
}

fn session_key(id: Uuid) -> String {
    format!("upload:{id}")
}

impl UploadSessionManager {
    /// Creates a new upload session manager.
    pub fn new(
        store: Store,
        vfs: VfsService,
        staging: ChunkStaging,
        events: Arc<dyn EventPublisher>,
        jobs: Arc<dyn JobEnqueuer>,
        config: UploadConfig,
    ) -> Self {
        Self {
            store,
            vfs,
            staging,
            events,
            jobs,
            config,
        }
    }

    /// Storage quota of the owner's group; 0 means unlimited.
    async fn quota_of(&self, owner_id: Uuid) -> AppResult<i64> {
        let Some(user) = self.store.users.find_user(owner_id).await? else {
            return Ok(0);
        };
        Ok(self
            .store
            .users
            .find_group(user.group_id)
            .await?
            .map(|g| g.max_storage)
            .unwrap_or(0))
    }

    /// Open a session for writing `request.size` bytes at `request.path`.
    pub async fn open(&self, ctx: &RequestContext, request: OpenUpload) -> AppResult<UploadTicket> {
        let owner_id = request.owner_id;
        ctx.require_access(owner_id)?;
        if request.size > self.config.max_declared_size_bytes {
            return Err(AppError::validation(format!(
                "Declared size {} exceeds the limit of {} bytes",
                request.size, self.config.max_declared_size_bytes
            )));
        }
        let (Some(parent_path), Some(name)) = (request.path.parent(), request.path.name()) else {
            return Err(AppError::invalid_operation("Cannot upload to the root directory"));
        };

        let parent = self.vfs.mkdir(ctx, owner_id, &parent_path).await?;
        let mut resolved = self.vfs.resolve(owner_id, &request.path).await?;
        let existing = match resolved.node() {
            Some(node) if node.is_dir() => {
                return Err(AppError::conflict(format!(
                    "'{}' is a directory",
                    request.path
                )));
            }
            Some(node) => Some(node.clone()),
            None => None,
        };
        if let Some(policy_id) = request.policy_id {
            resolved.policy = self.vfs.registry().policy(policy_id).await?;
        }
        let policy = resolved.policy.clone();
        let provider = self.vfs.registry().provider(&policy)?;

        if !policy.settings.allows_name(name) {
            return Err(AppError::validation(format!(
                "Storage policy '{}' does not accept files named '{name}'",
                policy.name
            )));
        }
        if !policy.settings.allows_size(request.size) {
            return Err(AppError::validation(format!(
                "Storage policy '{}' accepts files up to {} bytes",
                policy.name, policy.settings.max_size
            )));
        }

        let quota = self.quota_of(owner_id).await?;
        if quota > 0 {
            let used = self.store.files.used_storage(owner_id).await?;
            let previous = existing.as_ref().map(|f| f.size).unwrap_or(0);
            let needed = request.size as i64 - previous;
            if needed > 0 && used + needed > quota {
                return Err(AppError::quota_exceeded(format!(
                    "Storage quota exceeded: {used} of {quota} bytes used, upload needs {needed} more"
                )));
            }
        }

        let chunk_size = policy.settings.chunk_size_or(self.config.chunk_size_bytes).max(1);
        let count = chunk_count(request.size, chunk_size);
        let ttl = Duration::from_secs(self.config.session_ttl_seconds);
        let now = Utc::now();
        let expires_at = now + chrono::Duration::seconds(self.config.session_ttl_seconds as i64);
        let session = UploadSession {
            id: Uuid::new_v4(),
            owner_id,
            policy_id: policy.id,
            file_id: existing.as_ref().map(|f| f.id),
            parent_id: parent.id,
            name: name.to_string(),
            virtual_path: request.path.to_string(),
            physical_key: resolved.object_key(),
            total_size: request.size as i64,
            chunk_size: chunk_size as i64,
            chunk_count: count as i32,
            received: Vec::new(),
            chunk_tags: Vec::new(),
            upload_mode: policy.settings.upload_mode,
            backend_upload_id: None,
            state: UploadState::Created,
            result_file_id: None,
            result_entity_id: None,
            expires_at,
            created_at: now,
            updated_at: now,
        };
        let session = self.store.sessions.insert(session).await?;

        let client_upload = if session.upload_mode == UploadMode::Direct {
            match ctx
                .guard(provider.begin_client_upload(
                    &policy,
                    &session.physical_key,
                    request.size,
                    chunk_size,
                    ttl,
                ))
                .await
            {
                Ok(upload) => {
                    self.store
                        .sessions
                        .set_backend_upload_id(session.id, &upload.upload_id)
                        .await?;
                    Some(upload)
                }
                Err(e) => {
                    self.store
                        .sessions
                        .transition(session.id, &[UploadState::Created], UploadState::Aborted)
                        .await?;
                    return Err(e);
                }
            }
        } else {
            None
        };

        self.store
            .sessions
            .transition(session.id, &[UploadState::Created], UploadState::Receiving)
            .await?
            .ok_or_else(|| AppError::internal("Upload session changed state while opening"))?;

        info!(
            upload_id = %session.id,
            owner_id = %owner_id,
            policy_id = %policy.id,
            path = %request.path,
            size = request.size,
            chunks = count,
            mode = ?session.upload_mode,
            "Upload session opened"
        );
        Ok(UploadTicket {
            session_id: session.id,
            chunk_size,
            chunk_count: count,
            expires_at,
            client_upload,
        })
    }

    /// A session the actor may touch.
    pub async fn session(&self, ctx: &RequestContext, id: Uuid) -> AppResult<UploadSession> {
        let session = self
            .store
            .sessions
            .find(id)
            .await?
            .ok_or_else(|| AppError::not_found(format!("Upload session {id} not found")))?;
        ctx.require_access(session.owner_id)?;
        Ok(session)
    }

    fn check_chunk(session: &UploadSession, index: u32, now: DateTime<Utc>) -> AppResult<()> {
        if index as i64 >= session.chunk_count as i64 {
            return Err(AppError::validation(format!(
                "Chunk index {index} is out of range (0..{})",
                session.chunk_count
            )));
        }
        if session.state == UploadState::Receiving && session.is_expired_at(now) {
            return Err(AppError::invalid_operation("Upload session has expired"));
        }
        Ok(())
    }

    /// Receipt for a chunk that was already recorded.
    async fn repeat_receipt(&self, ctx: &RequestContext, session: &UploadSession) -> AppResult<ChunkReceipt> {
        let completed = match session.state {
            UploadState::Completed => Some(stored_result(session)?),
            // Retried chunk after a failed implicit completion.
            UploadState::Receiving if session.all_received() => Some(self.finish(ctx, session.id).await?),
            _ => None,
        };
        Ok(ChunkReceipt {
            accepted: true,
            duplicate: true,
            completed,
        })
    }

    /// Stage one chunk of a relay-mode session.
    pub async fn put_chunk(
        &self,
        ctx: &RequestContext,
        id: Uuid,
        index: u32,
        body: ByteStream,
    ) -> AppResult<ChunkReceipt> {
        let session = self.session(ctx, id).await?;
        if session.upload_mode == UploadMode::Direct {
            return Err(AppError::invalid_operation(
                "Chunks of this session are written to the backend directly",
            ));
        }
        Self::check_chunk(&session, index, Utc::now())?;
        if session.has_chunk(index)
            && matches!(session.state, UploadState::Receiving | UploadState::Completed)
        {
            return self.repeat_receipt(ctx, &session).await;
        }
        if session.state != UploadState::Receiving {
            return Err(AppError::invalid_operation(format!(
                "Upload session is {}",
                session.state
            )));
        }

        let expected = session.expected_chunk_len(index);
        let written = ctx
            .guard(self.staging.write_chunk(id, index, expected, body))
            .await?;
        let mark = match self.store.sessions.mark_chunk(id, index, None).await {
            Ok(mark) => mark,
            Err(e) => {
                self.release_if_ended(id).await;
                return Err(e);
            }
        };
        debug!(upload_id = %id, index, bytes = written, received = mark.session.received.len(), "Chunk staged");

        self.after_mark(ctx, mark.session, !mark.newly_received).await
    }

    /// Record a chunk the client wrote to the backend itself.
    pub async fn report_chunk(
        &self,
        ctx: &RequestContext,
        id: Uuid,
        index: u32,
        tag: Option<String>,
    ) -> AppResult<ChunkReceipt> {
        let session = self.session(ctx, id).await?;
        if session.upload_mode != UploadMode::Direct {
            return Err(AppError::invalid_operation(
                "Chunks of this session must be uploaded through the server",
            ));
        }
        Self::check_chunk(&session, index, Utc::now())?;
        if session.has_chunk(index)
            && matches!(session.state, UploadState::Receiving | UploadState::Completed)
        {
            return self.repeat_receipt(ctx, &session).await;
        }

        let mark = self.store.sessions.mark_chunk(id, index, tag).await?;
        debug!(upload_id = %id, index, "Client chunk reported");
        self.after_mark(ctx, mark.session, !mark.newly_received).await
    }

    /// Drop staging of a session that ended while a chunk was in flight;
    /// the chunk may have landed after the session's own release.
    async fn release_if_ended(&self, id: Uuid) {
        match self.store.sessions.find(id).await {
            Ok(Some(session)) if session.state.is_terminal() => {
                self.release_staging(&session).await;
            }
            Ok(_) => {}
            Err(e) => warn!(upload_id = %id, error = %e, "Cannot check upload session after a failed chunk"),
        }
    }

    async fn after_mark(
        &self,
        ctx: &RequestContext,
        session: UploadSession,
        duplicate: bool,
    ) -> AppResult<ChunkReceipt> {
        let completed = if session.all_received() {
            Some(self.finish(ctx, session.id).await?)
        } else {
            None
        };
        Ok(ChunkReceipt {
            accepted: true,
            duplicate,
            completed,
        })
    }

    /// Finalise a session whose chunks have all arrived.
    pub async fn complete(&self, ctx: &RequestContext, id: Uuid) -> AppResult<UploadResult> {
        self.session(ctx, id).await?;
        self.finish(ctx, id).await
    }

    async fn finish(&self, ctx: &RequestContext, id: Uuid) -> AppResult<UploadResult> {
        let _guard = self
            .vfs
            .locker()
            .acquire(ctx, [session_key(id)])
            .await?;
        let session = self
            .store
            .sessions
            .find(id)
            .await?
            .ok_or_else(|| AppError::not_found(format!("Upload session {id} not found")))?;
        match session.state {
            UploadState::Completed => return stored_result(&session),
            UploadState::Receiving => {}
            other => {
                return Err(AppError::invalid_operation(format!("Upload session is {other}")));
            }
        }
        let missing = session.missing_chunks();
        if !missing.is_empty() {
            return Err(AppError::invalid_operation(format!(
                "Upload is missing {} chunk(s), first missing index {}",
                missing.len(),
                missing[0]
            )));
        }

        let policy = match self.vfs.registry().policy(session.policy_id).await {
            Ok(policy) => policy,
            Err(e) if e.is(ErrorKind::NotFound) => {
                self.abandon(&session, UploadState::Aborted).await;
                return Err(e);
            }
            Err(e) => return Err(e),
        };
        let provider = self.vfs.registry().provider(&policy)?;
        let total = session.total_size as u64;

        let path = VfsPath::parse(&session.virtual_path)?;
        let written = self.write_object(ctx, &session, &policy, &provider).await?;
        if written.size != total {
            warn!(upload_id = %id, expected = total, actual = written.size, "Assembled size mismatch");
            self.discard_object(&policy, &provider, &written.source).await;
            self.abandon(&session, UploadState::Aborted).await;
            return Err(AppError::checksum_mismatch(format!(
                "Assembled object has {} bytes, expected {total}",
                written.size
            )));
        }

        // Hold the target and its directory so a concurrent trash of either
        // cannot strand the new file.
        let _path_guard = match self
            .vfs
            .locker()
            .lock_with_parents(ctx, session.owner_id, &[&path])
            .await
        {
            Ok(guard) => guard,
            Err(e) => {
                self.discard_object(&policy, &provider, &written.source).await;
                return Err(e);
            }
        };

        let commit = CommitUpload {
            session_id: id,
            owner_id: session.owner_id,
            quota: self.quota_of(session.owner_id).await?,
            file_id: session.file_id,
            parent_id: session.parent_id,
            name: session.name.clone(),
            entity: CreateEntity {
                kind: EntityKind::Version,
                policy_id: policy.id,
                source: written.source.clone(),
                size: session.total_size,
                mime_type: Some(written.mime_type.clone()),
                checksum: written.checksum.clone(),
                created_by: Some(session.owner_id),
            },
            uploaded_by: ctx.user_id(),
        };
        let outcome = match self.store.files.commit_upload(commit).await {
            Ok(outcome) => outcome,
            Err(e) => {
                self.discard_object(&policy, &provider, &written.source).await;
                if matches!(e.kind, ErrorKind::QuotaExceeded | ErrorKind::NotFound | ErrorKind::Conflict) {
                    self.abandon(&session, UploadState::Aborted).await;
                }
                return Err(e);
            }
        };

        if !outcome.created {
            // Lost a race with a commit that already landed.
            self.discard_object(&policy, &provider, &written.source).await;
        }
        self.release_staging(&session).await;

        info!(
            upload_id = %id,
            file_id = %outcome.file.id,
            entity_id = %outcome.entity.id,
            size = outcome.entity.size,
            "Upload completed"
        );
        self.events
            .publish(DomainEvent::new(
                ctx.user_id(),
                FileEvent::Written {
                    file_id: outcome.file.id,
                    entity_id: outcome.entity.id,
                    owner_id: session.owner_id,
                    size: outcome.entity.size,
                },
            ))
            .await;
        let payload = JobPayload::ThumbnailGeneration {
            file_id: outcome.file.id,
        };
        if let Err(e) = self.jobs.enqueue(payload.to_request()).await {
            warn!(file_id = %outcome.file.id, error = %e, "Failed to enqueue thumbnail job");
        }

        Ok(UploadResult {
            session_id: id,
            file_id: outcome.file.id,
            entity_id: outcome.entity.id,
            size: outcome.entity.size,
        })
    }

    async fn write_object(
        &self,
        ctx: &RequestContext,
        session: &UploadSession,
        policy: &StoragePolicy,
        provider: &Arc<dyn StorageProvider>,
    ) -> AppResult<UploadedObject> {
        let key = &session.physical_key;
        let total = session.total_size as u64;
        match session.upload_mode {
            UploadMode::Relay => {
                let count = session.chunk_count as u32;
                let staged = self.staging.staged_size(session.id, count).await?;
                if staged != total {
                    return Err(AppError::checksum_mismatch(format!(
                        "Staged chunks hold {staged} bytes, expected {total}"
                    )));
                }
                let body = self.staging.assembled(session.id, count);
                ctx.guard(provider.upload(policy, key, total, body)).await
            }
            UploadMode::Direct => {
                let upload_id = session.backend_upload_id.clone().unwrap_or_default();
                ctx.guard(provider.complete_client_upload(policy, key, &upload_id, &session.chunk_tags))
                    .await?;
                let info = ctx.guard(provider.stat(policy, key)).await?;
                Ok(UploadedObject {
                    source: key.clone(),
                    size: info.size,
                    mime_type: info.mime_type.unwrap_or_else(|| guess_mime(key)),
                    checksum: None,
                })
            }
        }
    }

    async fn discard_object(&self, policy: &StoragePolicy, provider: &Arc<dyn StorageProvider>, source: &str) {
        if let Err(e) = provider.delete(policy, &[source.to_string()]).await {
            warn!(policy = %policy.name, source, error = %e, "Failed to delete uncommitted object");
        }
    }

    async fn release_staging(&self, session: &UploadSession) {
        if session.upload_mode == UploadMode::Relay {
            if let Err(e) = self.staging.release(session.id).await {
                warn!(upload_id = %session.id, error = %e, "Failed to release staged chunks");
            }
        }
    }

    /// Move an open session to a terminal state and free what it holds.
    async fn abandon(&self, session: &UploadSession, to: UploadState) -> bool {
        let moved = match self
            .store
            .sessions
            .transition(session.id, &[UploadState::Created, UploadState::Receiving], to)
            .await
        {
            Ok(moved) => moved.is_some(),
            Err(e) => {
                warn!(upload_id = %session.id, error = %e, "Failed to end upload session");
                false
            }
        };
        if !moved {
            return false;
        }
        self.release_staging(session).await;
        if let (UploadMode::Direct, Some(upload_id)) = (session.upload_mode, &session.backend_upload_id) {
            match self.vfs.registry().resolve(session.policy_id).await {
                Ok((policy, provider)) => {
                    if let Err(e) = provider
                        .abort_client_upload(&policy, &session.physical_key, upload_id)
                        .await
                    {
                        warn!(upload_id = %session.id, error = %e, "Failed to abort backend upload");
                    }
                }
                Err(e) => warn!(upload_id = %session.id, error = %e, "Cannot abort backend upload"),
            }
        }
        info!(upload_id = %session.id, state = %to, "Upload session ended");
        true
    }

    /// Abort a session at the owner's request.
    pub async fn abort(&self, ctx: &RequestContext, id: Uuid) -> AppResult<()> {
        self.session(ctx, id).await?;
        let _guard = self
            .vfs
            .locker()
            .acquire(ctx, [session_key(id)])
            .await?;
        let session = self
            .store
            .sessions
            .find(id)
            .await?
            .ok_or_else(|| AppError::not_found(format!("Upload session {id} not found")))?;
        match session.state {
            UploadState::Aborted => Ok(()),
            UploadState::Completed | UploadState::Expired => Err(AppError::invalid_operation(
                format!("Upload session is {}", session.state),
            )),
            UploadState::Created | UploadState::Receiving => {
                self.abandon(&session, UploadState::Aborted).await;
                Ok(())
            }
        }
    }

    /// Expire every open session whose deadline has passed.
    pub async fn sweep_expired(&self, now: DateTime<Utc>) -> AppResult<usize> {
        let ctx = RequestContext::system();
        let mut expired = 0;
        for session in self.store.sessions.find_expired(now).await? {
            let _guard = self
                .vfs
                .locker()
                .acquire(&ctx, [session_key(session.id)])
                .await?;
            if self.abandon(&session, UploadState::Expired).await {
                expired += 1;
            }
        }
        if expired > 0 {
            info!(expired, "Expired upload sessions swept");
        }
        Ok(expired)
    }
}

fn stored_result(session: &UploadSession) -> AppResult<UploadResult> {
    match (session.result_file_id, session.result_entity_id) {
        (Some(file_id), Some(entity_id)) => Ok(UploadResult {
            session_id: session.id,
            file_id,
            entity_id,
            size: session.total_size,
        }),
        _ => Err(AppError::internal("Completed session has no recorded result")),
    }
}
