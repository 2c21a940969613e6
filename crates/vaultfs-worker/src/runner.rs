//! Worker pools: one polling loop per queue, each bounded by its own semaphore.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{Semaphore, watch};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use vaultfs_core::result::AppResult;
use vaultfs_entity::job::payload::{QUEUE_MAINTENANCE, QUEUE_THUMBNAIL};
use vaultfs_entity::job::{Job, JobState};

use crate::backoff::BackoffPolicy;
use crate::broker::Broker;
use crate::executor::{JobExecutionError, JobExecutor};

/// How long shutdown waits for running jobs.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(30);

/// Claims jobs and drives them to a terminal state.
#[derive(Clone)]
pub struct WorkerRunner {
    broker: Broker,
    executor: Arc<JobExecutor>,
    backoff: BackoffPolicy,
}

impl std::fmt::Debug for WorkerRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerRunner").finish()
    }
}

impl WorkerRunner {
    /// Create a runner for the broker's queues.
    pub fn new(broker: Broker, executor: Arc<JobExecutor>) -> Self {
        let backoff = BackoffPolicy::from_config(broker.config());
        Self {
            broker,
            executor,
            backoff,
        }
    }

    /// Queues served: the configured ones plus the built-in ones.
    pub fn queues(&self) -> Vec<String> {
        let mut queues: BTreeSet<String> = self.broker.config().queues.keys().cloned().collect();
        queues.insert(QUEUE_THUMBNAIL.to_string());
        queues.insert(QUEUE_MAINTENANCE.to_string());
        queues.into_iter().collect()
    }

    /// Run every queue until `shutdown` flips to `true`, then drain.
    pub async fn run(&self, shutdown: watch::Receiver<bool>) -> AppResult<()> {
        let recovered = self.broker.repository().recover_running().await?;
        if recovered > 0 {
            warn!(count = recovered, "Recovered jobs left running by a previous process");
        }

        let mut pools = JoinSet::new();
        for queue in self.queues() {
            let runner = self.clone();
            let shutdown = shutdown.clone();
            pools.spawn(async move { runner.run_queue(queue, shutdown).await });
        }
        while let Some(joined) = pools.join_next().await {
            if let Err(e) = joined {
                error!(error = %e, "Queue worker crashed");
            }
        }
        info!("Task broker stopped");
        Ok(())
    }

    async fn run_queue(&self, queue: String, mut shutdown: watch::Receiver<bool>) {
        let concurrency = self.broker.config().concurrency_for(&queue);
        let semaphore = Arc::new(Semaphore::new(concurrency));
        let wakeup = self.broker.wakeup(&queue);
        let poll = Duration::from_millis(self.broker.config().poll_interval_ms.max(10));

        info!(queue = %queue, concurrency, "Queue worker started");

        loop {
            if *shutdown.borrow() {
                break;
            }

            let permit = tokio::select! {
                permit = Arc::clone(&semaphore).acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                    continue;
                }
            };

            match self.broker.repository().claim_next(&queue, Utc::now()).await {
                Ok(Some(job)) => {
                    let runner = self.clone();
                    tokio::spawn(async move {
                        let _permit = permit;
                        let job_id = job.id;
                        if let Err(e) = runner.process(job, Utc::now()).await {
                            error!(job_id = %job_id, error = %e, "Failed to record job outcome");
                        }
                    });
                    continue;
                }
                Ok(None) => drop(permit),
                Err(e) => {
                    drop(permit);
                    warn!(queue = %queue, error = %e, "Failed to claim job");
                }
            }

            let wait = self.idle_wait(&queue, poll).await;
            tokio::select! {
                _ = wakeup.notified() => {}
                _ = tokio::time::sleep(wait) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        info!(queue = %queue, "Queue worker draining");
        match tokio::time::timeout(DRAIN_TIMEOUT, semaphore.acquire_many(concurrency as u32)).await
        {
            Ok(_) => debug!(queue = %queue, "Queue drained"),
            Err(_) => warn!(queue = %queue, "Timed out waiting for running jobs"),
        }
    }

    /// Sleep until the next due job, at most one poll interval.
    async fn idle_wait(&self, queue: &str, poll: Duration) -> Duration {
        match self.broker.repository().next_due(queue).await {
            Ok(Some(at)) => (at - Utc::now()).to_std().unwrap_or_default().min(poll),
            _ => poll,
        }
    }

    /// Claim and process, one at a time, every job on `queue` due at `now`.
    pub async fn run_due(&self, queue: &str, now: DateTime<Utc>) -> AppResult<usize> {
        let mut processed = 0;
        while let Some(job) = self.broker.repository().claim_next(queue, now).await? {
            self.process(job, now).await?;
            processed += 1;
        }
        Ok(processed)
    }

    /// Execute a claimed job and record the outcome.
    ///
    /// Retryable failures with attempts left are rescheduled after the
    /// backoff delay; everything else lands in a terminal state.
    pub async fn process(&self, job: Job, now: DateTime<Utc>) -> AppResult<JobState> {
        let executor = Arc::clone(&self.executor);
        let claimed = job.clone();
        let outcome = match tokio::spawn(async move { executor.execute(&claimed).await }).await {
            Ok(outcome) => outcome,
            Err(e) => Err(JobExecutionError::Permanent(format!("Job handler panicked: {e}"))),
        };

        let repo = self.broker.repository();
        match outcome {
            Ok(result) => {
                repo.mark_succeeded(job.id).await?;
                info!(
                    job_id = %job.id,
                    job_type = %job.job_type,
                    result = ?result,
                    "Job succeeded"
                );
                Ok(JobState::Succeeded)
            }
            Err(e) if e.is_retryable() && job.has_attempts_left() => {
                let delay = self.backoff.delay(job.attempts, job.backoff_factor);
                let next_run_at = now + chrono::Duration::milliseconds(delay.as_millis() as i64);
                warn!(
                    job_id = %job.id,
                    job_type = %job.job_type,
                    attempt = job.attempts,
                    max_attempts = job.max_attempts,
                    retry_in_ms = delay.as_millis() as u64,
                    error = %e,
                    "Job failed, will retry"
                );
                repo.mark_retryable(job.id, &e.to_string(), next_run_at)
                    .await?;
                Ok(JobState::FailedRetryable)
            }
            Err(e) => {
                error!(
                    job_id = %job.id,
                    job_type = %job.job_type,
                    attempts = job.attempts,
                    retryable = e.is_retryable(),
                    error = %e,
                    "Job failed terminally"
                );
                repo.mark_terminal(job.id, &e.to_string()).await?;
                Ok(JobState::FailedTerminal)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use serde_json::Value;

    use vaultfs_core::config::WorkerConfig;
    use vaultfs_core::traits::{JobEnqueuer, JobRequest};
    use vaultfs_database::Store;

    use super::*;
    use crate::executor::JobHandler;

    #[derive(Debug, Default)]
    struct Counting {
        runs: AtomicUsize,
    }

    #[async_trait]
    impl JobHandler for Counting {
        fn job_types(&self) -> &'static [&'static str] {
            &["count", "reject"]
        }

        async fn execute(&self, job: &Job) -> Result<Option<Value>, JobExecutionError> {
            self.runs.fetch_add(1, Ordering::SeqCst);
            match job.job_type.as_str() {
                "reject" => Err(JobExecutionError::Permanent("unsupported input".into())),
                _ => Ok(None),
            }
        }
    }

    fn runner(handler: Arc<Counting>) -> WorkerRunner {
        let store = Store::memory();
        let config = WorkerConfig {
            poll_interval_ms: 20,
            ..WorkerConfig::default()
        };
        let mut executor = JobExecutor::new();
        executor.register(handler);
        WorkerRunner::new(Broker::new(store.jobs, config), Arc::new(executor))
    }

    fn request(job_type: &str) -> JobRequest {
        JobRequest {
            job_type: job_type.to_string(),
            queue: "default".to_string(),
            payload: Value::Null,
            max_attempts: Some(5),
            run_at: None,
        }
    }

    #[tokio::test]
    async fn test_permanent_failure_skips_retries() {
        let handler = Arc::new(Counting::default());
        let runner = runner(Arc::clone(&handler));
        let id = runner.broker.enqueue(request("reject")).await.unwrap();

        assert_eq!(runner.run_due("default", Utc::now()).await.unwrap(), 1);
        let job = runner.broker.job(id).await.unwrap().unwrap();
        assert_eq!(job.state, JobState::FailedTerminal);
        assert_eq!(job.attempts, 1);
        assert_eq!(handler.runs.load(Ordering::SeqCst), 1);
        assert_eq!(runner.broker.failed_jobs().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_unknown_job_type_is_terminal() {
        let runner = runner(Arc::new(Counting::default()));
        let id = runner.broker.enqueue(request("mystery")).await.unwrap();

        runner.run_due("default", Utc::now()).await.unwrap();
        let job = runner.broker.job(id).await.unwrap().unwrap();
        assert_eq!(job.state, JobState::FailedTerminal);
        assert!(job.last_error.unwrap().contains("mystery"));
    }

    #[tokio::test]
    async fn test_pool_runs_enqueued_jobs_and_stops() {
        let handler = Arc::new(Counting::default());
        let runner = runner(Arc::clone(&handler));
        let (tx, rx) = watch::channel(false);
        let pool = {
            let runner = runner.clone();
            tokio::spawn(async move { runner.run(rx).await })
        };

        let id = runner.broker.enqueue(request("count")).await.unwrap();
        let done = tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                let job = runner.broker.job(id).await.unwrap().unwrap();
                if job.state == JobState::Succeeded {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await;
        assert!(done.is_ok(), "job never succeeded");
        assert_eq!(handler.runs.load(Ordering::SeqCst), 1);

        tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(5), pool)
            .await
            .expect("pool did not stop")
            .unwrap()
            .unwrap();
    }
}
