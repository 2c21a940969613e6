//! Upload sessions.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use vaultfs_core::result::AppResult;
use vaultfs_entity::upload::{UploadSession, UploadState};

/// Result of recording a chunk.
#[derive(Debug, Clone)]
pub struct ChunkMark {
    /// The session after the update.
    pub session: UploadSession,
    /// `false` when the index had already been recorded.
    pub newly_received: bool,
}

/// Repository for upload sessions.
#[async_trait]
pub trait SessionRepository: Send + Sync + std::fmt::Debug + 'static {
    /// Persist a new session.
    async fn insert(&self, session: UploadSession) -> AppResult<UploadSession>;

    /// Find a session.
    async fn find(&self, id: Uuid) -> AppResult<Option<UploadSession>>;

    /// Atomically record chunk `index` (with an optional backend tag) on a
    /// `receiving` session. Fails with `InvalidOperation` otherwise.
    async fn mark_chunk(&self, id: Uuid, index: u32, tag: Option<String>) -> AppResult<ChunkMark>;

    /// Move to `to` if the current state is one of `from`. Returns the
    /// updated session, or `None` when the state did not match.
    async fn transition(
        &self,
        id: Uuid,
        from: &[UploadState],
        to: UploadState,
    ) -> AppResult<Option<UploadSession>>;

    /// Record the backend multipart ID or upload URL.
    async fn set_backend_upload_id(&self, id: Uuid, upload_id: &str) -> AppResult<()>;

    /// Open sessions whose expiry is at or before `now`.
    async fn find_expired(&self, now: DateTime<Utc>) -> AppResult<Vec<UploadSession>>;
}
