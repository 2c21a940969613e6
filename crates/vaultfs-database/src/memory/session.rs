//! [`SessionRepository`] over the in-memory state.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use vaultfs_core::error::AppError;
use vaultfs_core::result::AppResult;
use vaultfs_entity::upload::{UploadSession, UploadState};

use super::MemoryStore;
use crate::repositories::{ChunkMark, SessionRepository};

#[async_trait]
impl SessionRepository for MemoryStore {
    async fn insert(&self, session: UploadSession) -> AppResult<UploadSession> {
        let mut state = self.state.write().await;
        state.sessions.insert(session.id, session.clone());
        Ok(session)
    }

    async fn find(&self, id: Uuid) -> AppResult<Option<UploadSession>> {
        Ok(self.state.read().await.sessions.get(&id).cloned())
    }

    async fn mark_chunk(&self, id: Uuid, index: u32, tag: Option<String>) -> AppResult<ChunkMark> {
        let mut state = self.state.write().await;
        let session = state
            .sessions
            .get_mut(&id)
            .ok_or_else(|| AppError::not_found(format!("Upload session {id} not found")))?;
        if session.state != UploadState::Receiving {
            return Err(AppError::invalid_operation(format!(
                "Upload session is {}",
                session.state
            )));
        }
        let newly_received = session.mark_chunk(index);
        if newly_received {
            if let Some(tag) = tag {
                session.set_tag(index, tag);
            }
            session.updated_at = Utc::now();
        }
        Ok(ChunkMark {
            session: session.clone(),
            newly_received,
        })
    }

    async fn transition(
        &self,
        id: Uuid,
        from: &[UploadState],
        to: UploadState,
    ) -> AppResult<Option<UploadSession>> {
        let mut state = self.state.write().await;
        let session = state
            .sessions
            .get_mut(&id)
            .ok_or_else(|| AppError::not_found(format!("Upload session {id} not found")))?;
        if !from.contains(&session.state) {
            return Ok(None);
        }
        session.state = to;
        session.updated_at = Utc::now();
        Ok(Some(session.clone()))
    }

    async fn set_backend_upload_id(&self, id: Uuid, upload_id: &str) -> AppResult<()> {
        let mut state = self.state.write().await;
        let session = state
            .sessions
            .get_mut(&id)
            .ok_or_else(|| AppError::not_found(format!("Upload session {id} not found")))?;
        session.backend_upload_id = Some(upload_id.to_string());
        Ok(())
    }

    async fn find_expired(&self, now: DateTime<Utc>) -> AppResult<Vec<UploadSession>> {
        let state = self.state.read().await;
        Ok(state
            .sessions
            .values()
            .filter(|s| !s.state.is_terminal() && s.is_expired_at(now))
            .cloned()
            .collect())
    }
}
