//! Job executor: dispatches claimed jobs to registered handlers.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tracing::info;

use vaultfs_core::error::{AppError, ErrorKind};
use vaultfs_entity::job::{Job, JobPayload};

/// A handler for one or more job types.
#[async_trait]
pub trait JobHandler: Send + Sync + std::fmt::Debug {
    /// Job types this handler processes.
    fn job_types(&self) -> &'static [&'static str];

    /// Execute the job. The returned value is logged as the job's outcome.
    async fn execute(&self, job: &Job) -> Result<Option<Value>, JobExecutionError>;
}

/// Error from job execution.
#[derive(Debug, thiserror::Error)]
pub enum JobExecutionError {
    /// Permanent failure; the job goes terminal without retry.
    #[error("Permanent job failure: {0}")]
    Permanent(String),

    /// Transient failure; retried with backoff while attempts remain.
    #[error("Transient job failure: {0}")]
    Transient(String),

    /// Error raised by a service, classified by its kind.
    #[error("{0}")]
    Internal(#[from] AppError),
}

impl JobExecutionError {
    /// Whether the broker should try again.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Permanent(_) => false,
            Self::Transient(_) => true,
            Self::Internal(e) => e.is_transient(),
        }
    }

    /// Treat missing inputs and unsupported formats as permanent, keep the
    /// rest classified by kind.
    pub fn from_service(e: AppError) -> Self {
        match e.kind {
            ErrorKind::NotFound
            | ErrorKind::FeatureNotSupported
            | ErrorKind::InvalidOperation
            | ErrorKind::Validation => Self::Permanent(e.to_string()),
            _ => Self::Internal(e),
        }
    }
}

/// Decode a typed payload, failing permanently on garbage.
pub fn decode_payload(job: &Job) -> Result<JobPayload, JobExecutionError> {
    serde_json::from_value(job.payload.clone()).map_err(|e| {
        JobExecutionError::Permanent(format!("Malformed payload for job {}: {e}", job.id))
    })
}

/// Dispatches jobs to the appropriate handler based on `job_type`.
#[derive(Debug, Default)]
pub struct JobExecutor {
    handlers: HashMap<String, Arc<dyn JobHandler>>,
}

impl JobExecutor {
    /// Create an executor with no handlers.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler for every job type it declares.
    pub fn register(&mut self, handler: Arc<dyn JobHandler>) {
        for job_type in handler.job_types() {
            info!(job_type, "Registered job handler");
            self.handlers
                .insert((*job_type).to_string(), Arc::clone(&handler));
        }
    }

    /// Execute a job by dispatching to its handler.
    pub async fn execute(&self, job: &Job) -> Result<Option<Value>, JobExecutionError> {
        let handler = self.handlers.get(&job.job_type).ok_or_else(|| {
            JobExecutionError::Permanent(format!(
                "No handler registered for job type '{}'",
                job.job_type
            ))
        })?;

        info!(
            job_id = %job.id,
            job_type = %job.job_type,
            attempt = job.attempts,
            max_attempts = job.max_attempts,
            "Executing job"
        );

        handler.execute(job).await
    }

    /// Whether a handler is registered for a job type.
    pub fn has_handler(&self, job_type: &str) -> bool {
        self.handlers.contains_key(job_type)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classification() {
        assert!(JobExecutionError::Transient("x".into()).is_retryable());
        assert!(!JobExecutionError::Permanent("x".into()).is_retryable());
        assert!(JobExecutionError::from(AppError::backend_unavailable("down")).is_retryable());
        assert!(!JobExecutionError::from(AppError::internal("bug")).is_retryable());
        assert!(
            !JobExecutionError::from_service(AppError::feature_not_supported("psd"))
                .is_retryable()
        );
        assert!(JobExecutionError::from_service(AppError::database("gone")).is_retryable());
    }
}
