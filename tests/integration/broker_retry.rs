//! Retry scheduling of the task broker.

use std::sync::Arc;
use std::sync::atomic::{AtomicI32, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde_json::{Value, json};
use uuid::Uuid;

use vaultfs_core::config::WorkerConfig;
use vaultfs_core::traits::{JobEnqueuer, JobRequest};
use vaultfs_database::Store;
use vaultfs_entity::job::{Job, JobState};
use vaultfs_worker::{Broker, JobExecutionError, JobExecutor, JobHandler, WorkerRunner};

const QUEUE: &str = "flaky";

/// Fails transiently until `succeed_on` attempts have been made.
#[derive(Debug)]
struct Flaky {
    succeed_on: i32,
    calls: AtomicI32,
}

#[async_trait]
impl JobHandler for Flaky {
    fn job_types(&self) -> &'static [&'static str] {
        &["flaky"]
    }

    async fn execute(&self, _job: &Job) -> Result<Option<Value>, JobExecutionError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if call >= self.succeed_on {
            Ok(Some(json!({ "call": call })))
        } else {
            Err(JobExecutionError::Transient(format!("backend busy on call {call}")))
        }
    }
}

fn setup(succeed_on: i32) -> (Broker, WorkerRunner, Arc<Flaky>) {
    let config = WorkerConfig {
        initial_delay_ms: 1_000,
        backoff_factor: 2.0,
        max_backoff_ms: 3_000,
        ..WorkerConfig::default()
    };
    let broker = Broker::new(Store::memory().jobs, config);
    let handler = Arc::new(Flaky {
        succeed_on,
        calls: AtomicI32::new(0),
    });
    let mut executor = JobExecutor::new();
    executor.register(handler.clone());
    let runner = WorkerRunner::new(broker.clone(), Arc::new(executor));
    (broker, runner, handler)
}

async fn enqueue(broker: &Broker, max_attempts: i32) -> Uuid {
    broker
        .enqueue(JobRequest {
            job_type: "flaky".to_string(),
            queue: QUEUE.to_string(),
            payload: json!({}),
            max_attempts: Some(max_attempts),
            run_at: None,
        })
        .await
        .unwrap()
}

/// Run the job until it stops being runnable, returning the gap between
/// each attempt and the retry it scheduled.
async fn drive(broker: &Broker, runner: &WorkerRunner, id: Uuid) -> Vec<Duration> {
    let mut now: DateTime<Utc> = Utc::now() + Duration::seconds(1);
    let mut delays = Vec::new();
    for _ in 0..20 {
        assert_eq!(runner.run_due(QUEUE, now).await.unwrap(), 1);
        let job = broker.job(id).await.unwrap().unwrap();
        if job.state != JobState::FailedRetryable {
            break;
        }
        // Nothing runs before the retry is due.
        assert_eq!(runner.run_due(QUEUE, job.next_run_at - Duration::milliseconds(1)).await.unwrap(), 0);
        delays.push(job.next_run_at - now);
        now = job.next_run_at;
    }
    delays
}

#[tokio::test]
async fn test_always_failing_job_becomes_terminal_after_max_attempts() {
    let (broker, runner, handler) = setup(i32::MAX);
    let id = enqueue(&broker, 4).await;

    let delays = drive(&broker, &runner, id).await;

    let job = broker.job(id).await.unwrap().unwrap();
    assert_eq!(job.state, JobState::FailedTerminal);
    assert_eq!(job.attempts, 4);
    assert_eq!(handler.calls.load(Ordering::SeqCst), 4);
    assert!(job.last_error.unwrap().contains("call 4"));

    assert_eq!(
        delays,
        vec![
            Duration::seconds(1),
            Duration::seconds(2),
            Duration::seconds(3)
        ]
    );
    assert!(delays.windows(2).all(|w| w[0] <= w[1]));

    let failed = broker.failed_jobs().await.unwrap();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].id, id);
}

#[tokio::test]
async fn test_transient_failures_then_success() {
    let (broker, runner, handler) = setup(3);
    let id = enqueue(&broker, 5).await;

    let delays = drive(&broker, &runner, id).await;

    let job = broker.job(id).await.unwrap().unwrap();
    assert_eq!(job.state, JobState::Succeeded);
    assert_eq!(job.attempts, 3);
    assert_eq!(handler.calls.load(Ordering::SeqCst), 3);
    assert_eq!(delays.len(), 2);
    assert!(broker.failed_jobs().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_single_attempt_job_is_not_retried() {
    let (broker, runner, handler) = setup(i32::MAX);
    let id = enqueue(&broker, 1).await;

    assert!(drive(&broker, &runner, id).await.is_empty());
    let job = broker.job(id).await.unwrap().unwrap();
    assert_eq!(job.state, JobState::FailedTerminal);
    assert_eq!(handler.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_default_attempt_budget_comes_from_config() {
    let (broker, _, _) = setup(1);
    let id = broker
        .enqueue(JobRequest {
            job_type: "flaky".to_string(),
            queue: QUEUE.to_string(),
            payload: json!({}),
            max_attempts: None,
            run_at: None,
        })
        .await
        .unwrap();
    let job = broker.job(id).await.unwrap().unwrap();
    assert_eq!(job.max_attempts, WorkerConfig::default().default_max_attempts);
    assert_eq!(job.backoff_factor, 2.0);
}
