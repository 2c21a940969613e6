//! Typed job payload definitions.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use vaultfs_core::traits::JobRequest;

/// Queue for thumbnail work.
pub const QUEUE_THUMBNAIL: &str = "thumbnail";
/// Queue for sweeps, purges and aggregation.
pub const QUEUE_MAINTENANCE: &str = "maintenance";

/// Typed payloads for known job types.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "job_type")]
pub enum JobPayload {
    /// Derive a thumbnail for a file.
    #[serde(rename = "thumbnail_generation")]
    ThumbnailGeneration {
        /// File ID.
        file_id: Uuid,
    },
    /// Expire stale upload sessions and release their staging.
    #[serde(rename = "upload_sweep")]
    UploadSweep,
    /// Hard-purge files that sat in the trash past retention.
    #[serde(rename = "trash_purge")]
    TrashPurge,
    /// Aggregate per-owner and per-policy usage.
    #[serde(rename = "storage_stats")]
    StorageStats,
    /// Probe every policy backend.
    #[serde(rename = "policy_health")]
    PolicyHealth,
    /// Delete succeeded jobs past retention.
    #[serde(rename = "job_cleanup")]
    JobCleanup,
}

impl JobPayload {
    /// The job type identifier.
    pub fn job_type(&self) -> &'static str {
        match self {
            Self::ThumbnailGeneration { .. } => "thumbnail_generation",
            Self::UploadSweep => "upload_sweep",
            Self::TrashPurge => "trash_purge",
            Self::StorageStats => "storage_stats",
            Self::PolicyHealth => "policy_health",
            Self::JobCleanup => "job_cleanup",
        }
    }

    /// The queue this job type runs on.
    pub fn queue(&self) -> &'static str {
        match self {
            Self::ThumbnailGeneration { .. } => QUEUE_THUMBNAIL,
            _ => QUEUE_MAINTENANCE,
        }
    }

    /// Payload as stored on the job row.
    pub fn to_value(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }

    /// Build an enqueue request with the broker's default attempts.
    pub fn to_request(&self) -> JobRequest {
        JobRequest {
            job_type: self.job_type().to_string(),
            queue: self.queue().to_string(),
            payload: self.to_value(),
            max_attempts: None,
            run_at: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_payload_tagging() {
        let id = Uuid::new_v4();
        let payload = JobPayload::ThumbnailGeneration { file_id: id };
        let value = payload.to_value();
        assert_eq!(value["job_type"], "thumbnail_generation");
        assert_eq!(value["file_id"], id.to_string());

        let back: JobPayload = serde_json::from_value(value).unwrap();
        assert_eq!(back, payload);
        assert_eq!(JobPayload::TrashPurge.queue(), QUEUE_MAINTENANCE);
        assert_eq!(payload.to_request().queue, QUEUE_THUMBNAIL);
    }
}
