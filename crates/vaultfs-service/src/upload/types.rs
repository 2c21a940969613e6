//! Request and response shapes of the upload flow.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use vaultfs_core::types::VfsPath;
use vaultfs_storage::ClientUpload;

/// Request to open an upload session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenUpload {
    /// Owner of the target tree.
    pub owner_id: Uuid,
    /// Where the file will appear. An existing file gets a new version.
    pub path: VfsPath,
    /// Declared total size in bytes.
    pub size: u64,
    /// Force a policy instead of the one mounted at `path`.
    pub policy_id: Option<Uuid>,
}

/// Returned by a successful open.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadTicket {
    /// Session to send chunks to.
    pub session_id: Uuid,
    /// Bytes per chunk; the last chunk may be shorter.
    pub chunk_size: u64,
    /// Number of chunks expected.
    pub chunk_count: u32,
    /// When the session expires.
    pub expires_at: DateTime<Utc>,
    /// Backend upload target for client-direct policies.
    pub client_upload: Option<ClientUpload>,
}

/// Outcome of one chunk submission.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkReceipt {
    /// The chunk is recorded.
    pub accepted: bool,
    /// It had been recorded before; nothing changed.
    pub duplicate: bool,
    /// Set when this submission completed the upload.
    pub completed: Option<UploadResult>,
}

/// A committed upload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadResult {
    /// The session.
    pub session_id: Uuid,
    /// File written.
    pub file_id: Uuid,
    /// New current physical object.
    pub entity_id: Uuid,
    /// Bytes written.
    pub size: i64,
}
