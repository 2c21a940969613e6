//! Job enqueue boundary between request-path services and the task broker.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::result::AppResult;

/// A unit of background work to enqueue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRequest {
    /// Job type identifier (e.g. `"thumbnail_generation"`).
    pub job_type: String,
    /// Queue the job runs on; each queue has its own worker slots.
    pub queue: String,
    /// Job payload as JSON.
    pub payload: serde_json::Value,
    /// Maximum attempts; `None` uses the broker default.
    pub max_attempts: Option<i32>,
    /// Earliest run time; `None` means immediately.
    pub run_at: Option<DateTime<Utc>>,
}

/// Anything that accepts jobs for asynchronous execution.
///
/// Enqueue returns as soon as the job is durably recorded; execution
/// happens later on the broker's worker pool.
#[async_trait]
pub trait JobEnqueuer: Send + Sync + std::fmt::Debug + 'static {
    /// Record a job and wake a worker. Returns the job ID.
    async fn enqueue(&self, request: JobRequest) -> AppResult<Uuid>;
}
