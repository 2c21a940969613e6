//! Upload session state.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use crate::storage::UploadMode;

/// Lifecycle of an upload session.
///
/// `created → receiving → completed`, with `aborted` and `expired`
/// reachable from `created` and `receiving`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "upload_state", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum UploadState {
    /// Persisted, not yet accepting chunks.
    Created,
    /// Accepting chunks.
    Receiving,
    /// Assembled and bound to a file.
    Completed,
    /// Cancelled by the owner or by a permanent failure.
    Aborted,
    /// Swept after its expiry.
    Expired,
}

impl UploadState {
    /// Whether no further transition is possible.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Aborted | Self::Expired)
    }

    /// Return the state as a lowercase string.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Receiving => "receiving",
            Self::Completed => "completed",
            Self::Aborted => "aborted",
            Self::Expired => "expired",
        }
    }
}

impl std::fmt::Display for UploadState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Number of chunks for `total` bytes in pieces of `chunk` bytes.
pub fn chunk_count(total: u64, chunk: u64) -> u32 {
    if chunk == 0 {
        return 0;
    }
    total.div_ceil(chunk) as u32
}

/// One resumable upload.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct UploadSession {
    /// Session identifier handed to the client.
    pub id: Uuid,
    /// The uploading user.
    pub owner_id: Uuid,
    /// Policy the object is written to.
    pub policy_id: Uuid,
    /// Existing file being overwritten, if any.
    pub file_id: Option<Uuid>,
    /// Directory receiving the file.
    pub parent_id: Uuid,
    /// Target name inside `parent_id`.
    pub name: String,
    /// Target virtual path, kept for locking and logs.
    pub virtual_path: String,
    /// Backend key the assembled object is written to.
    pub physical_key: String,
    /// Declared total size in bytes.
    pub total_size: i64,
    /// Chunk size in bytes.
    pub chunk_size: i64,
    /// Number of chunks.
    pub chunk_count: i32,
    /// Sorted indices already received.
    pub received: Vec<i32>,
    /// Backend part tags (ETags) by index, empty where unknown.
    pub chunk_tags: Vec<String>,
    /// Relay or client-direct.
    pub upload_mode: UploadMode,
    /// Backend multipart upload ID or upload session URL.
    pub backend_upload_id: Option<String>,
    /// Current state.
    pub state: UploadState,
    /// File produced by completion.
    pub result_file_id: Option<Uuid>,
    /// Entity produced by completion.
    pub result_entity_id: Option<Uuid>,
    /// When the session stops accepting chunks.
    pub expires_at: DateTime<Utc>,
    /// When the session was opened.
    pub created_at: DateTime<Utc>,
    /// When the session last changed.
    pub updated_at: DateTime<Utc>,
}

impl UploadSession {
    /// Whether `index` was already accepted.
    pub fn has_chunk(&self, index: u32) -> bool {
        self.received.binary_search(&(index as i32)).is_ok()
    }

    /// Record `index` as received. Returns `false` when it already was.
    pub fn mark_chunk(&mut self, index: u32) -> bool {
        match self.received.binary_search(&(index as i32)) {
            Ok(_) => false,
            Err(pos) => {
                self.received.insert(pos, index as i32);
                true
            }
        }
    }

    /// Whether every chunk index has been received.
    pub fn all_received(&self) -> bool {
        self.received.len() as i32 >= self.chunk_count
    }

    /// Indices not received yet.
    pub fn missing_chunks(&self) -> Vec<u32> {
        (0..self.chunk_count.max(0) as u32)
            .filter(|i| !self.has_chunk(*i))
            .collect()
    }

    /// Exact byte length chunk `index` must have.
    pub fn expected_chunk_len(&self, index: u32) -> u64 {
        let start = index as u64 * self.chunk_size as u64;
        let end = (start + self.chunk_size as u64).min(self.total_size as u64);
        end.saturating_sub(start)
    }

    /// Whether the session is past its expiry at `now`.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }

    /// Store a part tag for `index`.
    pub fn set_tag(&mut self, index: u32, tag: String) {
        let idx = index as usize;
        if self.chunk_tags.len() <= idx {
            self.chunk_tags.resize(idx + 1, String::new());
        }
        self.chunk_tags[idx] = tag;
    }
}
