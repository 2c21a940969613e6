//! Upload sweep, trash purge and job table cleanup.

use async_trait::async_trait;
use chrono::{Duration, Utc};
use serde_json::Value;
use tracing::{info, warn};

use vaultfs_core::config::WorkerConfig;
use vaultfs_database::Store;
use vaultfs_entity::job::{Job, JobPayload};
use vaultfs_service::{UploadSessionManager, VfsService};

use crate::executor::{JobExecutionError, JobHandler, decode_payload};

/// Handles the periodic cleanup jobs.
#[derive(Debug)]
pub struct CleanupJobHandler {
    store: Store,
    vfs: VfsService,
    uploads: UploadSessionManager,
    trash_retention: Duration,
    job_retention: Duration,
}

impl CleanupJobHandler {
    /// Create a new cleanup job handler.
    pub fn new(
        store: Store,
        vfs: VfsService,
        uploads: UploadSessionManager,
        config: &WorkerConfig,
    ) -> Self {
        Self {
            store,
            vfs,
            uploads,
            trash_retention: Duration::hours(config.trash_retention_hours.max(0)),
            job_retention: Duration::hours(config.job_retention_hours.max(0)),
        }
    }

    async fn sweep_uploads(&self) -> Result<Value, JobExecutionError> {
        let expired = self.uploads.sweep_expired(Utc::now()).await?;
        info!(expired, "Upload sweep finished");
        Ok(serde_json::json!({ "expired_sessions": expired }))
    }

    /// Purge every trashed tree past retention. Failures are retried as a
    /// whole on the next attempt; trees already purged are gone by then.
    async fn purge_trash(&self) -> Result<Value, JobExecutionError> {
        let cutoff = Utc::now() - self.trash_retention;
        let trashed = self.store.files.list_trashed_before(cutoff).await?;

        let mut purged = 0;
        let mut objects = 0;
        let mut failed = 0;
        for file in &trashed {
            match self.vfs.purge(file).await {
                Ok(released) => {
                    purged += 1;
                    objects += released;
                }
                Err(e) => {
                    failed += 1;
                    warn!(file_id = %file.id, error = %e, "Failed to purge trashed file");
                }
            }
        }

        info!(purged, objects, failed, "Trash purge finished");
        if failed > 0 {
            return Err(JobExecutionError::Transient(format!(
                "{failed} of {} trashed files could not be purged",
                trashed.len()
            )));
        }
        Ok(serde_json::json!({ "purged": purged, "objects_released": objects }))
    }

    async fn cleanup_jobs(&self) -> Result<Value, JobExecutionError> {
        let cutoff = Utc::now() - self.job_retention;
        let removed = self.store.jobs.delete_succeeded_before(cutoff).await?;
        info!(removed, "Job cleanup finished");
        Ok(serde_json::json!({ "removed": removed }))
    }
}

#[async_trait]
impl JobHandler for CleanupJobHandler {
    fn job_types(&self) -> &'static [&'static str] {
        &["upload_sweep", "trash_purge", "job_cleanup"]
    }

    async fn execute(&self, job: &Job) -> Result<Option<Value>, JobExecutionError> {
        let result = match decode_payload(job)? {
            JobPayload::UploadSweep => self.sweep_uploads().await?,
            JobPayload::TrashPurge => self.purge_trash().await?,
            JobPayload::JobCleanup => self.cleanup_jobs().await?,
            other => {
                return Err(JobExecutionError::Permanent(format!(
                    "Unknown cleanup task: '{}'",
                    other.job_type()
                )));
            }
        };
        Ok(Some(result))
    }
}
