//! [`FileRepository`] over PostgreSQL.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{Postgres, Transaction};
use uuid::Uuid;

use vaultfs_core::error::AppError;
use vaultfs_core::result::AppResult;
use vaultfs_entity::file::{CreateEntity, Entity, EntityKind, File, FileEntity, FileType};
use vaultfs_entity::upload::{UploadSession, UploadState};

use super::{PgStore, db_error};
use crate::repositories::{CommitOutcome, CommitUpload, FileRepository, OwnerUsage, PolicyUsage};

const SUBTREE_IDS: &str = "WITH RECURSIVE tree AS ( \
        SELECT id FROM files WHERE id = $1 \
        UNION ALL \
        SELECT f.id FROM files f JOIN tree t ON f.parent_id = t.id \
     ) SELECT id FROM tree";

async fn insert_entity(tx: &mut Transaction<'_, Postgres>, entity: &Entity) -> AppResult<()> {
    sqlx::query(
        "INSERT INTO entities (id, kind, policy_id, source, size, mime_type, checksum, created_by, created_at) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)",
    )
    .bind(entity.id)
    .bind(entity.kind)
    .bind(entity.policy_id)
    .bind(&entity.source)
    .bind(entity.size)
    .bind(&entity.mime_type)
    .bind(&entity.checksum)
    .bind(entity.created_by)
    .bind(entity.created_at)
    .execute(&mut **tx)
    .await
    .map_err(db_error("Failed to insert entity"))?;
    Ok(())
}

async fn insert_edge(tx: &mut Transaction<'_, Postgres>, edge: &FileEntity) -> AppResult<()> {
    sqlx::query(
        "INSERT INTO file_entities (id, file_id, entity_id, kind, is_current, version_label, uploaded_by, created_at) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
    )
    .bind(edge.id)
    .bind(edge.file_id)
    .bind(edge.entity_id)
    .bind(edge.kind)
    .bind(edge.is_current)
    .bind(&edge.version_label)
    .bind(edge.uploaded_by)
    .bind(edge.created_at)
    .execute(&mut **tx)
    .await
    .map_err(db_error("Failed to insert version edge"))?;
    Ok(())
}

/// Share-lock the parent row so a concurrent trash of it waits for us, and
/// fail when it is not a live directory.
async fn lock_live_dir(tx: &mut Transaction<'_, Postgres>, parent_id: Uuid) -> AppResult<()> {
    let live: Option<Uuid> = sqlx::query_scalar(
        "SELECT id FROM files WHERE id = $1 AND deleted_at IS NULL AND file_type = 'directory' FOR SHARE",
    )
    .bind(parent_id)
    .fetch_optional(&mut **tx)
    .await
    .map_err(db_error("Failed to lock parent directory"))?;
    live.map(|_| ())
        .ok_or_else(|| AppError::not_found(format!("Directory {parent_id} not found")))
}

async fn clear_current(
    tx: &mut Transaction<'_, Postgres>,
    file_id: Uuid,
    kind: EntityKind,
) -> AppResult<()> {
    sqlx::query(
        "UPDATE file_entities SET is_current = FALSE WHERE file_id = $1 AND kind = $2 AND is_current",
    )
    .bind(file_id)
    .bind(kind)
    .execute(&mut **tx)
    .await
    .map_err(db_error("Failed to clear current version"))?;
    Ok(())
}

#[async_trait]
impl FileRepository for PgStore {
    async fn ensure_root(&self, owner_id: Uuid) -> AppResult<File> {
        sqlx::query(
            "INSERT INTO files (id, owner_id, parent_id, name, file_type, size, thumb_unavailable, created_at, updated_at) \
             VALUES ($1, $2, NULL, '', 'directory', 0, FALSE, NOW(), NOW()) \
             ON CONFLICT (owner_id) WHERE parent_id IS NULL DO NOTHING",
        )
        .bind(Uuid::new_v4())
        .bind(owner_id)
        .execute(&self.pool)
        .await
        .map_err(db_error("Failed to create root"))?;

        sqlx::query_as::<_, File>("SELECT * FROM files WHERE owner_id = $1 AND parent_id IS NULL")
            .bind(owner_id)
            .fetch_one(&self.pool)
            .await
            .map_err(db_error("Failed to load root"))
    }

    async fn find_by_id(&self, id: Uuid) -> AppResult<Option<File>> {
        sqlx::query_as::<_, File>("SELECT * FROM files WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_error("Failed to find file"))
    }

    async fn find_child(&self, parent_id: Uuid, name: &str) -> AppResult<Option<File>> {
        sqlx::query_as::<_, File>(
            "SELECT * FROM files WHERE parent_id = $1 AND name = $2 AND deleted_at IS NULL",
        )
        .bind(parent_id)
        .bind(name)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error("Failed to find child"))
    }

    async fn list_children(&self, parent_id: Uuid) -> AppResult<Vec<File>> {
        sqlx::query_as::<_, File>(
            "SELECT * FROM files WHERE parent_id = $1 AND deleted_at IS NULL ORDER BY name ASC",
        )
        .bind(parent_id)
        .fetch_all(&self.pool)
        .await
        .map_err(db_error("Failed to list children"))
    }

    async fn insert(&self, file: File) -> AppResult<File> {
        let mut tx = self.pool.begin().await.map_err(db_error("Failed to begin transaction"))?;
        if let Some(parent_id) = file.parent_id {
            lock_live_dir(&mut tx, parent_id).await?;
        }
        let file = sqlx::query_as::<_, File>(
            "INSERT INTO files (id, owner_id, parent_id, name, file_type, size, primary_entity_id, \
             thumb_unavailable, created_at, updated_at, deleted_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11) RETURNING *",
        )
        .bind(file.id)
        .bind(file.owner_id)
        .bind(file.parent_id)
        .bind(&file.name)
        .bind(file.file_type)
        .bind(file.size)
        .bind(file.primary_entity_id)
        .bind(file.thumb_unavailable)
        .bind(file.created_at)
        .bind(file.updated_at)
        .bind(file.deleted_at)
        .fetch_one(&mut *tx)
        .await
        .map_err(db_error("Failed to insert file"))?;
        tx.commit().await.map_err(db_error("Failed to commit file"))?;
        Ok(file)
    }

    async fn relocate(&self, id: Uuid, parent_id: Uuid, name: &str) -> AppResult<File> {
        let mut tx = self.pool.begin().await.map_err(db_error("Failed to begin transaction"))?;
        lock_live_dir(&mut tx, parent_id).await?;
        let file = sqlx::query_as::<_, File>(
            "UPDATE files SET parent_id = $2, name = $3, updated_at = NOW() \
             WHERE id = $1 AND deleted_at IS NULL RETURNING *",
        )
        .bind(id)
        .bind(parent_id)
        .bind(name)
        .fetch_optional(&mut *tx)
        .await
        .map_err(db_error("Failed to relocate file"))?
        .ok_or_else(|| AppError::not_found(format!("File {id} not found")))?;
        tx.commit().await.map_err(db_error("Failed to commit relocation"))?;
        Ok(file)
    }

    async fn soft_delete_subtree(&self, id: Uuid) -> AppResult<Vec<File>> {
        let affected = sqlx::query_as::<_, File>(
            "WITH RECURSIVE tree AS ( \
                SELECT id FROM files WHERE id = $1 AND deleted_at IS NULL \
                UNION ALL \
                SELECT f.id FROM files f JOIN tree t ON f.parent_id = t.id WHERE f.deleted_at IS NULL \
             ) UPDATE files SET deleted_at = NOW() WHERE id IN (SELECT id FROM tree) RETURNING *",
        )
        .bind(id)
        .fetch_all(&self.pool)
        .await
        .map_err(db_error("Failed to delete subtree"))?;
        if affected.is_empty() {
            return Err(AppError::not_found(format!("File {id} not found")));
        }
        Ok(affected)
    }

    async fn copy_file(&self, source_id: Uuid, parent_id: Uuid, name: &str) -> AppResult<File> {
        let mut tx = self.pool.begin().await.map_err(db_error("Failed to begin transaction"))?;
        lock_live_dir(&mut tx, parent_id).await?;
        let copy_id = Uuid::new_v4();
        let copy = sqlx::query_as::<_, File>(
            "INSERT INTO files (id, owner_id, parent_id, name, file_type, size, primary_entity_id, \
             thumb_unavailable, created_at, updated_at) \
             SELECT $1, owner_id, $2, $3, file_type, size, primary_entity_id, FALSE, NOW(), NOW() \
             FROM files WHERE id = $4 AND deleted_at IS NULL RETURNING *",
        )
        .bind(copy_id)
        .bind(parent_id)
        .bind(name)
        .bind(source_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(db_error("Failed to copy file"))?
        .ok_or_else(|| AppError::not_found(format!("File {source_id} not found")))?;

        sqlx::query(
            "INSERT INTO file_entities (id, file_id, entity_id, kind, is_current, version_label, uploaded_by, created_at) \
             SELECT $1, $2, entity_id, kind, TRUE, version_label, uploaded_by, NOW() \
             FROM file_entities WHERE file_id = $3 AND kind = 'version' AND is_current",
        )
        .bind(Uuid::new_v4())
        .bind(copy_id)
        .bind(source_id)
        .execute(&mut *tx)
        .await
        .map_err(db_error("Failed to copy version edge"))?;

        tx.commit().await.map_err(db_error("Failed to commit copy"))?;
        Ok(copy)
    }

    async fn set_thumb_unavailable(&self, id: Uuid, unavailable: bool) -> AppResult<()> {
        sqlx::query("UPDATE files SET thumb_unavailable = $2 WHERE id = $1")
            .bind(id)
            .bind(unavailable)
            .execute(&self.pool)
            .await
            .map_err(db_error("Failed to flag thumbnail"))?;
        Ok(())
    }

    async fn find_entity(&self, id: Uuid) -> AppResult<Option<Entity>> {
        sqlx::query_as::<_, Entity>("SELECT * FROM entities WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_error("Failed to find entity"))
    }

    async fn current_version(&self, file_id: Uuid) -> AppResult<Option<(FileEntity, Entity)>> {
        let edge = sqlx::query_as::<_, FileEntity>(
            "SELECT * FROM file_entities WHERE file_id = $1 AND kind = 'version' AND is_current",
        )
        .bind(file_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error("Failed to load current version"))?;
        let Some(edge) = edge else {
            return Ok(None);
        };
        let entity = self.find_entity(edge.entity_id).await?;
        Ok(entity.map(|entity| (edge, entity)))
    }

    async fn list_versions(&self, file_id: Uuid) -> AppResult<Vec<FileEntity>> {
        sqlx::query_as::<_, FileEntity>(
            "SELECT * FROM file_entities WHERE file_id = $1 AND kind = 'version' ORDER BY created_at DESC",
        )
        .bind(file_id)
        .fetch_all(&self.pool)
        .await
        .map_err(db_error("Failed to list versions"))
    }

    async fn promote_version(&self, file_id: Uuid, file_entity_id: Uuid) -> AppResult<(File, Entity)> {
        let mut tx = self.pool.begin().await.map_err(db_error("Failed to begin transaction"))?;
        let entity = sqlx::query_as::<_, Entity>(
            "SELECT e.* FROM file_entities fe JOIN entities e ON e.id = fe.entity_id \
             WHERE fe.id = $1 AND fe.file_id = $2 AND fe.kind = 'version'",
        )
        .bind(file_entity_id)
        .bind(file_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(db_error("Failed to load version"))?
        .ok_or_else(|| AppError::not_found(format!("Version {file_entity_id} not found")))?;

        clear_current(&mut tx, file_id, EntityKind::Version).await?;
        sqlx::query("UPDATE file_entities SET is_current = TRUE WHERE id = $1")
            .bind(file_entity_id)
            .execute(&mut *tx)
            .await
            .map_err(db_error("Failed to promote version"))?;
        let file = sqlx::query_as::<_, File>(
            "UPDATE files SET size = $2, primary_entity_id = $3, thumb_unavailable = FALSE, updated_at = NOW() \
             WHERE id = $1 RETURNING *",
        )
        .bind(file_id)
        .bind(entity.size)
        .bind(entity.id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(db_error("Failed to update file"))?
        .ok_or_else(|| AppError::not_found(format!("File {file_id} not found")))?;

        tx.commit().await.map_err(db_error("Failed to commit promotion"))?;
        Ok((file, entity))
    }

    async fn commit_upload(&self, commit: CommitUpload) -> AppResult<CommitOutcome> {
        let mut tx = self.pool.begin().await.map_err(db_error("Failed to begin transaction"))?;

        let session = sqlx::query_as::<_, UploadSession>(
            "SELECT * FROM upload_sessions WHERE id = $1 FOR UPDATE",
        )
        .bind(commit.session_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(db_error("Failed to lock upload session"))?
        .ok_or_else(|| {
            AppError::not_found(format!("Upload session {} not found", commit.session_id))
        })?;

        match session.state {
            UploadState::Completed => {
                let (Some(file_id), Some(entity_id)) =
                    (session.result_file_id, session.result_entity_id)
                else {
                    return Err(AppError::internal("Completed session lost its result"));
                };
                tx.rollback().await.map_err(db_error("Failed to release session"))?;
                let file = FileRepository::find_by_id(self, file_id).await?;
                let entity = self.find_entity(entity_id).await?;
                return match (file, entity) {
                    (Some(file), Some(entity)) => Ok(CommitOutcome {
                        file,
                        entity,
                        created: false,
                    }),
                    _ => Err(AppError::internal("Completed session lost its result")),
                };
            }
            UploadState::Receiving => {}
            other => {
                return Err(AppError::invalid_operation(format!("Upload session is {other}")));
            }
        }

        // Serialize quota checks per owner for the rest of the transaction.
        sqlx::query("SELECT pg_advisory_xact_lock(hashtextextended($1::text, 0))")
            .bind(commit.owner_id)
            .execute(&mut *tx)
            .await
            .map_err(db_error("Failed to lock owner quota"))?;

        let existing = match commit.file_id {
            Some(id) => Some(
                sqlx::query_as::<_, File>(
                    "SELECT * FROM files WHERE id = $1 AND deleted_at IS NULL FOR UPDATE",
                )
                .bind(id)
                .fetch_optional(&mut *tx)
                .await
                .map_err(db_error("Failed to load target file"))?
                .ok_or_else(|| AppError::not_found(format!("File {id} not found")))?,
            ),
            None => {
                lock_live_dir(&mut tx, commit.parent_id).await?;
                sqlx::query_as::<_, File>(
                    "SELECT * FROM files WHERE parent_id = $1 AND name = $2 AND deleted_at IS NULL FOR UPDATE",
                )
                .bind(commit.parent_id)
                .bind(&commit.name)
                .fetch_optional(&mut *tx)
                .await
                .map_err(db_error("Failed to load target file"))?
            }
        };
        if let Some(file) = &existing {
            if file.is_dir() {
                return Err(AppError::conflict(format!("'{}' is a directory", file.name)));
            }
        }

        let used: i64 =
            sqlx::query_scalar("SELECT COALESCE(SUM(size), 0)::BIGINT FROM files WHERE owner_id = $1")
                .bind(commit.owner_id)
                .fetch_one(&mut *tx)
                .await
                .map_err(db_error("Failed to compute usage"))?;
        let previous = existing.as_ref().map(|f| f.size).unwrap_or(0);
        let delta = commit.entity.size - previous;
        if commit.quota > 0 && delta > 0 && used + delta > commit.quota {
            return Err(AppError::quota_exceeded(format!(
                "Storage quota exceeded: {used} of {} bytes used, upload needs {delta} more",
                commit.quota
            )));
        }

        let entity = commit.entity.into_entity();
        insert_entity(&mut tx, &entity).await?;

        let file = match existing {
            Some(file) => sqlx::query_as::<_, File>(
                "UPDATE files SET size = $2, primary_entity_id = $3, thumb_unavailable = FALSE, \
                 updated_at = NOW() WHERE id = $1 RETURNING *",
            )
            .bind(file.id)
            .bind(entity.size)
            .bind(entity.id)
            .fetch_one(&mut *tx)
            .await
            .map_err(db_error("Failed to update file"))?,
            None => sqlx::query_as::<_, File>(
                "INSERT INTO files (id, owner_id, parent_id, name, file_type, size, primary_entity_id, \
                 thumb_unavailable, created_at, updated_at) \
                 VALUES ($1, $2, $3, $4, $5, $6, $7, FALSE, NOW(), NOW()) RETURNING *",
            )
            .bind(Uuid::new_v4())
            .bind(commit.owner_id)
            .bind(commit.parent_id)
            .bind(&commit.name)
            .bind(FileType::File)
            .bind(entity.size)
            .bind(entity.id)
            .fetch_one(&mut *tx)
            .await
            .map_err(db_error("Failed to create file"))?,
        };

        clear_current(&mut tx, file.id, EntityKind::Version).await?;
        let edge = FileEntity::new(file.id, entity.id, EntityKind::Version, commit.uploaded_by);
        insert_edge(&mut tx, &edge).await?;

        sqlx::query(
            "UPDATE upload_sessions SET state = 'completed', result_file_id = $2, result_entity_id = $3, \
             updated_at = NOW() WHERE id = $1",
        )
        .bind(commit.session_id)
        .bind(file.id)
        .bind(entity.id)
        .execute(&mut *tx)
        .await
        .map_err(db_error("Failed to complete upload session"))?;

        tx.commit().await.map_err(db_error("Failed to commit upload"))?;
        Ok(CommitOutcome {
            file,
            entity,
            created: true,
        })
    }

    async fn thumbnail_of(&self, file_id: Uuid) -> AppResult<Option<Entity>> {
        sqlx::query_as::<_, Entity>(
            "SELECT e.* FROM entities e JOIN file_entities fe ON fe.entity_id = e.id \
             WHERE fe.file_id = $1 AND fe.kind = 'thumbnail' AND fe.is_current",
        )
        .bind(file_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error("Failed to load thumbnail"))
    }

    async fn attach_thumbnail(
        &self,
        file_id: Uuid,
        entity: CreateEntity,
    ) -> AppResult<(Entity, Option<Entity>)> {
        let mut tx = self.pool.begin().await.map_err(db_error("Failed to begin transaction"))?;
        let old_ids: Vec<Uuid> = sqlx::query_scalar(
            "DELETE FROM file_entities WHERE file_id = $1 AND kind = 'thumbnail' RETURNING entity_id",
        )
        .bind(file_id)
        .fetch_all(&mut *tx)
        .await
        .map_err(db_error("Failed to detach thumbnail"))?;

        let entity = entity.into_entity();
        insert_entity(&mut tx, &entity).await?;
        insert_edge(
            &mut tx,
            &FileEntity::new(file_id, entity.id, EntityKind::Thumbnail, None),
        )
        .await?;

        let replaced = sqlx::query_as::<_, Entity>(
            "DELETE FROM entities e WHERE e.id = ANY($1) \
             AND NOT EXISTS (SELECT 1 FROM file_entities fe WHERE fe.entity_id = e.id) RETURNING *",
        )
        .bind(&old_ids)
        .fetch_all(&mut *tx)
        .await
        .map_err(db_error("Failed to drop replaced thumbnail"))?;

        sqlx::query("UPDATE files SET thumb_unavailable = FALSE WHERE id = $1")
            .bind(file_id)
            .execute(&mut *tx)
            .await
            .map_err(db_error("Failed to clear thumbnail flag"))?;

        tx.commit().await.map_err(db_error("Failed to commit thumbnail"))?;
        Ok((entity, replaced.into_iter().next()))
    }

    async fn used_storage(&self, owner_id: Uuid) -> AppResult<i64> {
        sqlx::query_scalar("SELECT COALESCE(SUM(size), 0)::BIGINT FROM files WHERE owner_id = $1")
            .bind(owner_id)
            .fetch_one(&self.pool)
            .await
            .map_err(db_error("Failed to compute usage"))
    }

    async fn list_trashed_before(&self, cutoff: DateTime<Utc>) -> AppResult<Vec<File>> {
        sqlx::query_as::<_, File>(
            "SELECT f.* FROM files f LEFT JOIN files p ON p.id = f.parent_id \
             WHERE f.deleted_at IS NOT NULL AND f.deleted_at <= $1 \
             AND (p.id IS NULL OR p.deleted_at IS NULL)",
        )
        .bind(cutoff)
        .fetch_all(&self.pool)
        .await
        .map_err(db_error("Failed to list trash"))
    }

    async fn purge(&self, id: Uuid) -> AppResult<Vec<Entity>> {
        let mut tx = self.pool.begin().await.map_err(db_error("Failed to begin transaction"))?;
        let root = sqlx::query_as::<_, File>("SELECT * FROM files WHERE id = $1 FOR UPDATE")
            .bind(id)
            .fetch_optional(&mut *tx)
            .await
            .map_err(db_error("Failed to load trashed file"))?;
        match root {
            None => return Ok(Vec::new()),
            Some(f) if f.deleted_at.is_none() => {
                return Err(AppError::invalid_operation(format!(
                    "File {id} is not in the trash"
                )));
            }
            Some(_) => {}
        }

        let nodes: Vec<Uuid> = sqlx::query_scalar(SUBTREE_IDS)
            .bind(id)
            .fetch_all(&mut *tx)
            .await
            .map_err(db_error("Failed to collect subtree"))?;
        let candidates: Vec<Uuid> = sqlx::query_scalar(
            "DELETE FROM file_entities WHERE file_id = ANY($1) RETURNING entity_id",
        )
        .bind(&nodes)
        .fetch_all(&mut *tx)
        .await
        .map_err(db_error("Failed to delete version edges"))?;
        sqlx::query("DELETE FROM files WHERE id = ANY($1)")
            .bind(&nodes)
            .execute(&mut *tx)
            .await
            .map_err(db_error("Failed to delete files"))?;
        let orphaned = sqlx::query_as::<_, Entity>(
            "DELETE FROM entities e WHERE e.id = ANY($1) \
             AND NOT EXISTS (SELECT 1 FROM file_entities fe WHERE fe.entity_id = e.id) RETURNING *",
        )
        .bind(&candidates)
        .fetch_all(&mut *tx)
        .await
        .map_err(db_error("Failed to delete orphaned entities"))?;

        tx.commit().await.map_err(db_error("Failed to commit purge"))?;
        Ok(orphaned)
    }

    async fn usage_by_owner(&self) -> AppResult<Vec<OwnerUsage>> {
        let rows: Vec<(Uuid, i64, i64)> = sqlx::query_as(
            "SELECT owner_id, COALESCE(SUM(size), 0)::BIGINT, COUNT(*) FROM files \
             WHERE file_type = 'file' GROUP BY owner_id",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(db_error("Failed to aggregate owner usage"))?;
        Ok(rows
            .into_iter()
            .map(|(owner_id, used_bytes, file_count)| OwnerUsage {
                owner_id,
                used_bytes,
                file_count,
            })
            .collect())
    }

    async fn usage_by_policy(&self) -> AppResult<Vec<PolicyUsage>> {
        let rows: Vec<(Uuid, i64, i64)> = sqlx::query_as(
            "SELECT policy_id, COUNT(*), COALESCE(SUM(size), 0)::BIGINT FROM entities GROUP BY policy_id",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(db_error("Failed to aggregate policy usage"))?;
        Ok(rows
            .into_iter()
            .map(|(policy_id, entity_count, total_bytes)| PolicyUsage {
                policy_id,
                entity_count,
                total_bytes,
            })
            .collect())
    }
}
