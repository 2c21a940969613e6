//! Durable job enqueue and operator queries.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use tokio::sync::Notify;
use tracing::debug;
use uuid::Uuid;

use vaultfs_core::config::WorkerConfig;
use vaultfs_core::result::AppResult;
use vaultfs_core::traits::{JobEnqueuer, JobRequest};
use vaultfs_database::repositories::JobRepository;
use vaultfs_entity::job::{CreateJob, Job, JobPayload, JobState};

/// Records jobs and wakes the worker pool of their queue.
#[derive(Clone)]
pub struct Broker {
    jobs: Arc<dyn JobRepository>,
    config: WorkerConfig,
    wakeups: Arc<DashMap<String, Arc<Notify>>>,
}

impl std::fmt::Debug for Broker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Broker").finish()
    }
}

impl Broker {
    /// Create a broker over the job table.
    pub fn new(jobs: Arc<dyn JobRepository>, config: WorkerConfig) -> Self {
        Self {
            jobs,
            config,
            wakeups: Arc::new(DashMap::new()),
        }
    }

    /// Broker configuration.
    pub fn config(&self) -> &WorkerConfig {
        &self.config
    }

    /// The job table.
    pub fn repository(&self) -> &Arc<dyn JobRepository> {
        &self.jobs
    }

    /// Wakeup handle of a queue's workers.
    pub fn wakeup(&self, queue: &str) -> Arc<Notify> {
        self.wakeups
            .entry(queue.to_string())
            .or_insert_with(|| Arc::new(Notify::new()))
            .clone()
    }

    /// Enqueue a typed job with the default attempt budget.
    pub async fn submit(&self, payload: &JobPayload) -> AppResult<Uuid> {
        self.enqueue(payload.to_request()).await
    }

    /// Look up one job.
    pub async fn job(&self, id: Uuid) -> AppResult<Option<Job>> {
        self.jobs.find(id).await
    }

    /// Jobs that ran out of attempts or failed permanently, newest first.
    pub async fn failed_jobs(&self) -> AppResult<Vec<Job>> {
        self.jobs.list_by_state(JobState::FailedTerminal).await
    }
}

#[async_trait]
impl JobEnqueuer for Broker {
    async fn enqueue(&self, request: JobRequest) -> AppResult<Uuid> {
        let job = self
            .jobs
            .insert(CreateJob {
                job_type: request.job_type,
                queue: request.queue,
                payload: request.payload,
                max_attempts: request
                    .max_attempts
                    .unwrap_or(self.config.default_max_attempts),
                backoff_factor: self.config.backoff_factor,
                run_at: request.run_at.unwrap_or_else(Utc::now),
            })
            .await?;

        debug!(
            job_id = %job.id,
            job_type = %job.job_type,
            queue = %job.queue,
            "Enqueued job"
        );
        self.wakeup(&job.queue).notify_one();
        Ok(job.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vaultfs_database::Store;

    #[tokio::test]
    async fn test_enqueue_applies_defaults() {
        let store = Store::memory();
        let config = WorkerConfig {
            default_max_attempts: 7,
            ..WorkerConfig::default()
        };
        let broker = Broker::new(store.jobs.clone(), config);

        let id = broker.submit(&JobPayload::TrashPurge).await.unwrap();
        let job = broker.job(id).await.unwrap().unwrap();
        assert_eq!(job.max_attempts, 7);
        assert_eq!(job.job_type, "trash_purge");
        assert_eq!(job.queue, "maintenance");
        assert_eq!(job.state, JobState::Pending);
        assert!(broker.failed_jobs().await.unwrap().is_empty());
    }
}
