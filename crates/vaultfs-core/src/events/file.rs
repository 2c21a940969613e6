//! File-related domain events.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Events related to VFS mutations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum FileEvent {
    /// New content was committed to a file (upload, overwrite, version restore).
    Written {
        /// The logical file.
        file_id: Uuid,
        /// The entity now current.
        entity_id: Uuid,
        /// The file owner.
        owner_id: Uuid,
        /// Committed size in bytes.
        size: i64,
    },
    /// A file or directory node was created.
    Created {
        /// The new node.
        file_id: Uuid,
        /// The owner.
        owner_id: Uuid,
        /// Logical path of the node.
        path: String,
    },
    /// A node was renamed in place.
    Renamed {
        /// The node.
        file_id: Uuid,
        /// Previous path.
        from: String,
        /// New path.
        to: String,
    },
    /// A node was moved to another directory.
    Moved {
        /// The node.
        file_id: Uuid,
        /// Previous path.
        from: String,
        /// New path.
        to: String,
    },
    /// A node was copied.
    Copied {
        /// The source node.
        source_id: Uuid,
        /// The new node.
        file_id: Uuid,
        /// Path of the new node.
        to: String,
    },
    /// A node (and its subtree) was moved to the trash.
    Deleted {
        /// The node.
        file_id: Uuid,
        /// Path it had before deletion.
        path: String,
    },
}
