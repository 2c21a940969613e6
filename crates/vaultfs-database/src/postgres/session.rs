//! [`SessionRepository`] over PostgreSQL.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use vaultfs_core::error::AppError;
use vaultfs_core::result::AppResult;
use vaultfs_entity::upload::{UploadSession, UploadState};

use super::{PgStore, db_error};
use crate::repositories::{ChunkMark, SessionRepository};

#[async_trait]
impl SessionRepository for PgStore {
    async fn insert(&self, session: UploadSession) -> AppResult<UploadSession> {
        sqlx::query_as::<_, UploadSession>(
            "INSERT INTO upload_sessions (id, owner_id, policy_id, file_id, parent_id, name, virtual_path, \
             physical_key, total_size, chunk_size, chunk_count, received, chunk_tags, upload_mode, \
             backend_upload_id, state, result_file_id, result_entity_id, expires_at, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18, $19, $20, $21) \
             RETURNING *",
        )
        .bind(session.id)
        .bind(session.owner_id)
        .bind(session.policy_id)
        .bind(session.file_id)
        .bind(session.parent_id)
        .bind(&session.name)
        .bind(&session.virtual_path)
        .bind(&session.physical_key)
        .bind(session.total_size)
        .bind(session.chunk_size)
        .bind(session.chunk_count)
        .bind(&session.received)
        .bind(&session.chunk_tags)
        .bind(session.upload_mode)
        .bind(&session.backend_upload_id)
        .bind(session.state)
        .bind(session.result_file_id)
        .bind(session.result_entity_id)
        .bind(session.expires_at)
        .bind(session.created_at)
        .bind(session.updated_at)
        .fetch_one(&self.pool)
        .await
        .map_err(db_error("Failed to insert upload session"))
    }

    async fn find(&self, id: Uuid) -> AppResult<Option<UploadSession>> {
        sqlx::query_as::<_, UploadSession>("SELECT * FROM upload_sessions WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_error("Failed to find upload session"))
    }

    async fn mark_chunk(&self, id: Uuid, index: u32, tag: Option<String>) -> AppResult<ChunkMark> {
        let mut tx = self.pool.begin().await.map_err(db_error("Failed to begin transaction"))?;
        let mut session = sqlx::query_as::<_, UploadSession>(
            "SELECT * FROM upload_sessions WHERE id = $1 FOR UPDATE",
        )
        .bind(id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(db_error("Failed to lock upload session"))?
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
            session = sqlx::query_as::<_, UploadSession>(
                "UPDATE upload_sessions SET received = $2, chunk_tags = $3, updated_at = NOW() \
                 WHERE id = $1 RETURNING *",
            )
            .bind(id)
            .bind(&session.received)
            .bind(&session.chunk_tags)
            .fetch_one(&mut *tx)
            .await
            .map_err(db_error("Failed to record chunk"))?;
        }
        tx.commit().await.map_err(db_error("Failed to commit chunk"))?;
        Ok(ChunkMark {
            session,
            newly_received,
        })
    }

    async fn transition(
        &self,
        id: Uuid,
        from: &[UploadState],
        to: UploadState,
    ) -> AppResult<Option<UploadSession>> {
        let from: Vec<&str> = from.iter().map(|s| s.as_str()).collect();
        let updated = sqlx::query_as::<_, UploadSession>(
            "UPDATE upload_sessions SET state = $2, updated_at = NOW() \
             WHERE id = $1 AND state::text = ANY($3) RETURNING *",
        )
        .bind(id)
        .bind(to)
        .bind(&from)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error("Failed to transition upload session"))?;
        if updated.is_none() && SessionRepository::find(self, id).await?.is_none() {
            return Err(AppError::not_found(format!("Upload session {id} not found")));
        }
        Ok(updated)
    }

    async fn set_backend_upload_id(&self, id: Uuid, upload_id: &str) -> AppResult<()> {
        sqlx::query("UPDATE upload_sessions SET backend_upload_id = $2, updated_at = NOW() WHERE id = $1")
            .bind(id)
            .bind(upload_id)
            .execute(&self.pool)
            .await
            .map_err(db_error("Failed to store backend upload id"))?;
        Ok(())
    }

    async fn find_expired(&self, now: DateTime<Utc>) -> AppResult<Vec<UploadSession>> {
        sqlx::query_as::<_, UploadSession>(
            "SELECT * FROM upload_sessions WHERE state IN ('created', 'receiving') AND expires_at <= $1",
        )
        .bind(now)
        .fetch_all(&self.pool)
        .await
        .map_err(db_error("Failed to list expired sessions"))
    }
}
