//! Policy, link, job and user repositories over PostgreSQL.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use vaultfs_core::error::AppError;
use vaultfs_core::result::AppResult;
use vaultfs_entity::job::{CreateJob, Job, JobState};
use vaultfs_entity::link::DirectLink;
use vaultfs_entity::storage::StoragePolicy;
use vaultfs_entity::user::{Group, User};

use super::{PgStore, db_error};
use crate::repositories::{JobRepository, LinkRepository, PolicyRepository, UserRepository};

#[async_trait]
impl PolicyRepository for PgStore {
    async fn list(&self) -> AppResult<Vec<StoragePolicy>> {
        sqlx::query_as::<_, StoragePolicy>("SELECT * FROM storage_policies ORDER BY name ASC")
            .fetch_all(&self.pool)
            .await
            .map_err(db_error("Failed to list policies"))
    }

    async fn find_by_id(&self, id: Uuid) -> AppResult<Option<StoragePolicy>> {
        sqlx::query_as::<_, StoragePolicy>("SELECT * FROM storage_policies WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_error("Failed to find policy"))
    }

    async fn find_by_name(&self, name: &str) -> AppResult<Option<StoragePolicy>> {
        sqlx::query_as::<_, StoragePolicy>("SELECT * FROM storage_policies WHERE name = $1")
            .bind(name)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_error("Failed to find policy"))
    }

    async fn upsert(&self, policy: StoragePolicy) -> AppResult<StoragePolicy> {
        sqlx::query_as::<_, StoragePolicy>(
            "INSERT INTO storage_policies (id, name, policy_type, server, bucket, region, base_path, \
             access_key, secret_key, refresh_token, is_private, source_auth, mount_node_id, settings, \
             created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, NOW()) \
             ON CONFLICT (id) DO UPDATE SET name = EXCLUDED.name, policy_type = EXCLUDED.policy_type, \
             server = EXCLUDED.server, bucket = EXCLUDED.bucket, region = EXCLUDED.region, \
             base_path = EXCLUDED.base_path, access_key = EXCLUDED.access_key, \
             secret_key = EXCLUDED.secret_key, refresh_token = EXCLUDED.refresh_token, \
             is_private = EXCLUDED.is_private, source_auth = EXCLUDED.source_auth, \
             mount_node_id = EXCLUDED.mount_node_id, settings = EXCLUDED.settings, updated_at = NOW() \
             RETURNING *",
        )
        .bind(policy.id)
        .bind(&policy.name)
        .bind(policy.policy_type)
        .bind(&policy.server)
        .bind(&policy.bucket)
        .bind(&policy.region)
        .bind(&policy.base_path)
        .bind(&policy.access_key)
        .bind(&policy.secret_key)
        .bind(&policy.refresh_token)
        .bind(policy.is_private)
        .bind(policy.source_auth)
        .bind(policy.mount_node_id)
        .bind(&policy.settings)
        .bind(policy.created_at)
        .fetch_one(&self.pool)
        .await
        .map_err(db_error("Failed to save policy"))
    }

    async fn delete(&self, id: Uuid) -> AppResult<()> {
        let result = sqlx::query("DELETE FROM storage_policies WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(db_error("Failed to delete policy"))?;
        if result.rows_affected() == 0 {
            return Err(AppError::not_found(format!("Policy {id} not found")));
        }
        Ok(())
    }
}

#[async_trait]
impl LinkRepository for PgStore {
    async fn find_by_file(&self, file_id: Uuid) -> AppResult<Option<DirectLink>> {
        sqlx::query_as::<_, DirectLink>("SELECT * FROM direct_links WHERE file_id = $1")
            .bind(file_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_error("Failed to find direct link"))
    }

    async fn find_by_public_id(&self, public_id: &str) -> AppResult<Option<DirectLink>> {
        sqlx::query_as::<_, DirectLink>("SELECT * FROM direct_links WHERE public_id = $1")
            .bind(public_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_error("Failed to resolve direct link"))
    }

    async fn insert_or_get(&self, link: DirectLink) -> AppResult<DirectLink> {
        let inserted = sqlx::query_as::<_, DirectLink>(
            "INSERT INTO direct_links (id, public_id, file_id, file_name, speed_limit, downloads, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7) ON CONFLICT (file_id) DO NOTHING RETURNING *",
        )
        .bind(link.id)
        .bind(&link.public_id)
        .bind(link.file_id)
        .bind(&link.file_name)
        .bind(link.speed_limit)
        .bind(link.downloads)
        .bind(link.created_at)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error("Failed to create direct link"))?;
        match inserted {
            Some(link) => Ok(link),
            None => self
                .find_by_file(link.file_id)
                .await?
                .ok_or_else(|| AppError::internal("Direct link vanished after conflict")),
        }
    }

    async fn increment_downloads(&self, id: Uuid) -> AppResult<()> {
        sqlx::query("UPDATE direct_links SET downloads = downloads + 1 WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(db_error("Failed to count download"))?;
        Ok(())
    }
}

#[async_trait]
impl JobRepository for PgStore {
    async fn insert(&self, job: CreateJob) -> AppResult<Job> {
        let job = job.into_job();
        sqlx::query_as::<_, Job>(
            "INSERT INTO jobs (id, job_type, queue, payload, state, attempts, max_attempts, backoff_factor, \
             next_run_at, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11) RETURNING *",
        )
        .bind(job.id)
        .bind(&job.job_type)
        .bind(&job.queue)
        .bind(&job.payload)
        .bind(job.state)
        .bind(job.attempts)
        .bind(job.max_attempts)
        .bind(job.backoff_factor)
        .bind(job.next_run_at)
        .bind(job.created_at)
        .bind(job.updated_at)
        .fetch_one(&self.pool)
        .await
        .map_err(db_error("Failed to create job"))
    }

    async fn find(&self, id: Uuid) -> AppResult<Option<Job>> {
        sqlx::query_as::<_, Job>("SELECT * FROM jobs WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_error("Failed to find job"))
    }

    async fn claim_next(&self, queue: &str, now: DateTime<Utc>) -> AppResult<Option<Job>> {
        sqlx::query_as::<_, Job>(
            "UPDATE jobs SET state = 'running', attempts = attempts + 1, started_at = $2, updated_at = $2 \
             WHERE id = ( \
                SELECT id FROM jobs \
                WHERE queue = $1 AND state IN ('pending', 'failed_retryable') AND next_run_at <= $2 \
                ORDER BY next_run_at ASC, created_at ASC \
                FOR UPDATE SKIP LOCKED \
                LIMIT 1 \
             ) RETURNING *",
        )
        .bind(queue)
        .bind(now)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error("Failed to claim job"))
    }

    async fn next_due(&self, queue: &str) -> AppResult<Option<DateTime<Utc>>> {
        sqlx::query_scalar(
            "SELECT MIN(next_run_at) FROM jobs WHERE queue = $1 AND state IN ('pending', 'failed_retryable')",
        )
        .bind(queue)
        .fetch_one(&self.pool)
        .await
        .map_err(db_error("Failed to query next due job"))
    }

    async fn mark_succeeded(&self, id: Uuid) -> AppResult<()> {
        sqlx::query(
            "UPDATE jobs SET state = 'succeeded', last_error = NULL, finished_at = NOW(), updated_at = NOW() \
             WHERE id = $1",
        )
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(db_error("Failed to complete job"))?;
        Ok(())
    }

    async fn mark_retryable(
        &self,
        id: Uuid,
        error: &str,
        next_run_at: DateTime<Utc>,
    ) -> AppResult<()> {
        sqlx::query(
            "UPDATE jobs SET state = 'failed_retryable', last_error = $2, next_run_at = $3, updated_at = NOW() \
             WHERE id = $1",
        )
        .bind(id)
        .bind(error)
        .bind(next_run_at)
        .execute(&self.pool)
        .await
        .map_err(db_error("Failed to schedule job retry"))?;
        Ok(())
    }

    async fn mark_terminal(&self, id: Uuid, error: &str) -> AppResult<()> {
        sqlx::query(
            "UPDATE jobs SET state = 'failed_terminal', last_error = $2, finished_at = NOW(), updated_at = NOW() \
             WHERE id = $1",
        )
        .bind(id)
        .bind(error)
        .execute(&self.pool)
        .await
        .map_err(db_error("Failed to mark job as failed"))?;
        Ok(())
    }

    async fn list_by_state(&self, state: JobState) -> AppResult<Vec<Job>> {
        sqlx::query_as::<_, Job>("SELECT * FROM jobs WHERE state = $1 ORDER BY updated_at DESC")
            .bind(state)
            .fetch_all(&self.pool)
            .await
            .map_err(db_error("Failed to list jobs"))
    }

    async fn recover_running(&self) -> AppResult<u64> {
        let result = sqlx::query(
            "UPDATE jobs SET state = 'failed_retryable', last_error = 'interrupted by shutdown', \
             next_run_at = NOW(), updated_at = NOW() WHERE state = 'running'",
        )
        .execute(&self.pool)
        .await
        .map_err(db_error("Failed to recover running jobs"))?;
        Ok(result.rows_affected())
    }

    async fn delete_succeeded_before(&self, cutoff: DateTime<Utc>) -> AppResult<u64> {
        let result =
            sqlx::query("DELETE FROM jobs WHERE state = 'succeeded' AND finished_at < $1")
                .bind(cutoff)
                .execute(&self.pool)
                .await
                .map_err(db_error("Failed to clean up jobs"))?;
        Ok(result.rows_affected())
    }
}

#[async_trait]
impl UserRepository for PgStore {
    async fn find_user(&self, id: Uuid) -> AppResult<Option<User>> {
        sqlx::query_as::<_, User>("SELECT * FROM users WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_error("Failed to find user"))
    }

    async fn find_group(&self, id: Uuid) -> AppResult<Option<Group>> {
        sqlx::query_as::<_, Group>("SELECT * FROM groups WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_error("Failed to find group"))
    }

    async fn upsert_user(&self, user: User) -> AppResult<()> {
        sqlx::query(
            "INSERT INTO users (id, group_id) VALUES ($1, $2) \
             ON CONFLICT (id) DO UPDATE SET group_id = EXCLUDED.group_id",
        )
        .bind(user.id)
        .bind(user.group_id)
        .execute(&self.pool)
        .await
        .map_err(db_error("Failed to save user"))?;
        Ok(())
    }

    async fn upsert_group(&self, group: Group) -> AppResult<()> {
        sqlx::query(
            "INSERT INTO groups (id, name, max_storage, speed_limit) VALUES ($1, $2, $3, $4) \
             ON CONFLICT (id) DO UPDATE SET name = EXCLUDED.name, max_storage = EXCLUDED.max_storage, \
             speed_limit = EXCLUDED.speed_limit",
        )
        .bind(group.id)
        .bind(&group.name)
        .bind(group.max_storage)
        .bind(group.speed_limit)
        .execute(&self.pool)
        .await
        .map_err(db_error("Failed to save group"))?;
        Ok(())
    }
}
