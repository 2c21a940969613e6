//! Cron registrations for recurring maintenance jobs.

use std::sync::Arc;

use tokio_cron_scheduler::{Job as CronJob, JobScheduler};
use tracing::{debug, error, info};

use vaultfs_core::config::CronConfig;
use vaultfs_core::error::{AppError, ErrorKind};
use vaultfs_core::result::AppResult;
use vaultfs_core::traits::JobEnqueuer;
use vaultfs_entity::job::JobPayload;

/// Enqueues recurring jobs on their cron schedules.
pub struct CronScheduler {
    scheduler: JobScheduler,
    jobs: Arc<dyn JobEnqueuer>,
}

impl std::fmt::Debug for CronScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CronScheduler").finish()
    }
}

impl CronScheduler {
    /// Create a scheduler that enqueues through `jobs`.
    pub async fn new(jobs: Arc<dyn JobEnqueuer>) -> AppResult<Self> {
        let scheduler = JobScheduler::new().await.map_err(|e| {
            AppError::with_source(ErrorKind::Internal, "Failed to create scheduler", e)
        })?;
        Ok(Self { scheduler, jobs })
    }

    /// Register the built-in maintenance jobs. Empty expressions disable a job.
    pub async fn register_default_tasks(&self, cron: &CronConfig) -> AppResult<usize> {
        let tasks = [
            (&cron.upload_sweep, JobPayload::UploadSweep),
            (&cron.trash_purge, JobPayload::TrashPurge),
            (&cron.storage_stats, JobPayload::StorageStats),
            (&cron.policy_health, JobPayload::PolicyHealth),
            (&cron.job_cleanup, JobPayload::JobCleanup),
        ];

        let mut registered = 0;
        for (expression, payload) in tasks {
            if expression.trim().is_empty() {
                info!(job_type = payload.job_type(), "Schedule disabled");
                continue;
            }
            self.register(expression, payload).await?;
            registered += 1;
        }
        info!(count = registered, "Scheduled tasks registered");
        Ok(registered)
    }

    /// Enqueue `payload` on every tick of a six-field cron expression.
    pub async fn register(&self, expression: &str, payload: JobPayload) -> AppResult<()> {
        let jobs = Arc::clone(&self.jobs);
        let job_type = payload.job_type();
        let tick = payload.clone();
        let job = CronJob::new_async(expression, move |_uuid, _lock| {
            let jobs = Arc::clone(&jobs);
            let payload = tick.clone();
            Box::pin(async move {
                debug!(job_type = payload.job_type(), "Scheduling recurring job");
                if let Err(e) = jobs.enqueue(payload.to_request()).await {
                    error!(job_type = payload.job_type(), error = %e, "Failed to enqueue recurring job");
                }
            })
        })
        .map_err(|e| {
            AppError::with_source(
                ErrorKind::Configuration,
                format!("Invalid cron expression '{expression}' for {job_type}"),
                e,
            )
        })?;

        self.scheduler.add(job).await.map_err(|e| {
            AppError::with_source(
                ErrorKind::Internal,
                format!("Failed to add {job_type} schedule"),
                e,
            )
        })?;

        info!(job_type, schedule = expression, "Registered recurring job");
        Ok(())
    }

    /// Start ticking.
    pub async fn start(&self) -> AppResult<()> {
        self.scheduler.start().await.map_err(|e| {
            AppError::with_source(ErrorKind::Internal, "Failed to start scheduler", e)
        })?;
        info!("Cron scheduler started");
        Ok(())
    }

    /// Stop ticking.
    pub async fn shutdown(&self) -> AppResult<()> {
        let mut scheduler = self.scheduler.clone();
        scheduler.shutdown().await.map_err(|e| {
            AppError::with_source(ErrorKind::Internal, "Failed to shut down scheduler", e)
        })?;
        info!("Cron scheduler shut down");
        Ok(())
    }
}
