//! Job state enumeration.

use serde::{Deserialize, Serialize};
use std::fmt;

/// State of a background job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "job_state", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    /// Waiting for its first run.
    Pending,
    /// Claimed by a worker.
    Running,
    /// Finished successfully.
    Succeeded,
    /// Failed transiently, eligible again at `next_run_at`.
    FailedRetryable,
    /// Failed permanently or ran out of attempts.
    FailedTerminal,
}

impl JobState {
    /// Check if the job is in a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::FailedTerminal)
    }

    /// Whether a worker may claim a job in this state.
    pub fn is_runnable(&self) -> bool {
        matches!(self, Self::Pending | Self::FailedRetryable)
    }

    /// Return the state as a snake_case string.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Succeeded => "succeeded",
            Self::FailedRetryable => "failed_retryable",
            Self::FailedTerminal => "failed_terminal",
        }
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
