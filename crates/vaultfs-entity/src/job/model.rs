//! Job entity model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use super::status::JobState;

/// A background job.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Job {
    /// Unique job identifier.
    pub id: Uuid,
    /// Job type identifier (e.g., `"thumbnail_generation"`).
    pub job_type: String,
    /// Queue name.
    pub queue: String,
    /// Job-specific payload (JSON).
    pub payload: serde_json::Value,
    /// Current state.
    pub state: JobState,
    /// Number of execution attempts so far.
    pub attempts: i32,
    /// Attempts allowed before the job becomes terminal.
    pub max_attempts: i32,
    /// Multiplier applied to the retry delay per attempt.
    pub backoff_factor: f64,
    /// Earliest time the job may run.
    pub next_run_at: DateTime<Utc>,
    /// Error from the most recent failed attempt.
    pub last_error: Option<String>,
    /// When the current or last attempt started.
    pub started_at: Option<DateTime<Utc>>,
    /// When the job reached a terminal state.
    pub finished_at: Option<DateTime<Utc>>,
    /// When the job was created.
    pub created_at: DateTime<Utc>,
    /// When the job was last updated.
    pub updated_at: DateTime<Utc>,
}

impl Job {
    /// Whether another attempt is allowed after the current one fails.
    pub fn has_attempts_left(&self) -> bool {
        self.attempts < self.max_attempts
    }
}

/// Data required to create a new job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateJob {
    /// Job type identifier.
    pub job_type: String,
    /// Queue name.
    pub queue: String,
    /// Job-specific payload.
    pub payload: serde_json::Value,
    /// Maximum attempts.
    pub max_attempts: i32,
    /// Backoff multiplier.
    pub backoff_factor: f64,
    /// Earliest run time.
    pub run_at: DateTime<Utc>,
}

impl CreateJob {
    /// Build the row this request creates.
    pub fn into_job(self) -> Job {
        let now = Utc::now();
        Job {
            id: Uuid::new_v4(),
            job_type: self.job_type,
            queue: self.queue,
            payload: self.payload,
            state: JobState::Pending,
            attempts: 0,
            max_attempts: self.max_attempts.max(1),
            backoff_factor: self.backoff_factor,
            next_run_at: self.run_at,
            last_error: None,
            started_at: None,
            finished_at: None,
            created_at: now,
            updated_at: now,
        }
    }
}
