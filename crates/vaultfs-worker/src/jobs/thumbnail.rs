//! Thumbnail generation jobs.

use async_trait::async_trait;
use serde_json::Value;

use vaultfs_entity::job::{Job, JobPayload};
use vaultfs_service::ThumbnailService;

use crate::executor::{JobExecutionError, JobHandler, decode_payload};

/// Derives thumbnails for freshly written files.
#[derive(Debug)]
pub struct ThumbnailJobHandler {
    thumbnails: ThumbnailService,
}

impl ThumbnailJobHandler {
    /// Create a new thumbnail job handler.
    pub fn new(thumbnails: ThumbnailService) -> Self {
        Self { thumbnails }
    }
}

#[async_trait]
impl JobHandler for ThumbnailJobHandler {
    fn job_types(&self) -> &'static [&'static str] {
        &["thumbnail_generation"]
    }

    async fn execute(&self, job: &Job) -> Result<Option<Value>, JobExecutionError> {
        let JobPayload::ThumbnailGeneration { file_id } = decode_payload(job)? else {
            return Err(JobExecutionError::Permanent(format!(
                "Unexpected payload for '{}'",
                job.job_type
            )));
        };

        // Unsupported formats were flagged on the file; no point retrying.
        let thumb = self
            .thumbnails
            .generate(file_id)
            .await
            .map_err(JobExecutionError::from_service)?;

        Ok(Some(serde_json::json!({
            "file_id": file_id,
            "entity_id": thumb.id,
            "bytes": thumb.size,
        })))
    }
}
