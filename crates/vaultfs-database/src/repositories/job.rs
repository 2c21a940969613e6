//! Background jobs.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use vaultfs_core::result::AppResult;
use vaultfs_entity::job::{CreateJob, Job, JobState};

/// Repository for broker jobs.
#[async_trait]
pub trait JobRepository: Send + Sync + std::fmt::Debug + 'static {
    /// Create a job.
    async fn insert(&self, job: CreateJob) -> AppResult<Job>;

    /// Find a job.
    async fn find(&self, id: Uuid) -> AppResult<Option<Job>>;

    /// Claim the oldest runnable job on `queue` whose `next_run_at` has
    /// passed: state becomes `running` and `attempts` is incremented.
    async fn claim_next(&self, queue: &str, now: DateTime<Utc>) -> AppResult<Option<Job>>;

    /// Earliest `next_run_at` among runnable jobs on `queue`.
    async fn next_due(&self, queue: &str) -> AppResult<Option<DateTime<Utc>>>;

    /// Mark a running job as succeeded.
    async fn mark_succeeded(&self, id: Uuid) -> AppResult<()>;

    /// Mark a running job retryable at `next_run_at`.
    async fn mark_retryable(&self, id: Uuid, error: &str, next_run_at: DateTime<Utc>)
    -> AppResult<()>;

    /// Mark a running job as terminally failed.
    async fn mark_terminal(&self, id: Uuid, error: &str) -> AppResult<()>;

    /// Jobs in a given state, newest first.
    async fn list_by_state(&self, state: JobState) -> AppResult<Vec<Job>>;

    /// Return jobs left `running` by a crashed process to `failed_retryable`.
    async fn recover_running(&self) -> AppResult<u64>;

    /// Delete succeeded jobs finished before `cutoff`.
    async fn delete_succeeded_before(&self, cutoff: DateTime<Utc>) -> AppResult<u64>;
}
