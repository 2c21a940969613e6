//! Logical VFS node.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Whether a node is a file or a directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "file_type", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum FileType {
    /// A regular file with content.
    File,
    /// A directory.
    Directory,
}

/// A node in an owner's virtual tree.
///
/// Every owner has exactly one root: a directory with no parent and an
/// empty name. `(parent_id, name)` is unique among non-deleted siblings.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct File {
    /// Unique node identifier.
    pub id: Uuid,
    /// The owning user.
    pub owner_id: Uuid,
    /// Parent directory, `None` for the owner's root.
    pub parent_id: Option<Uuid>,
    /// Node name; empty for the root.
    pub name: String,
    /// File or directory.
    pub file_type: FileType,
    /// Size of the current version in bytes (0 for directories).
    pub size: i64,
    /// Entity backing the current version.
    pub primary_entity_id: Option<Uuid>,
    /// Set once every thumbnail generator has given up on this file.
    pub thumb_unavailable: bool,
    /// When the node was created.
    pub created_at: DateTime<Utc>,
    /// When the node was last changed.
    pub updated_at: DateTime<Utc>,
    /// Soft-delete marker.
    pub deleted_at: Option<DateTime<Utc>>,
}

impl File {
    /// Whether this node is a directory.
    pub fn is_dir(&self) -> bool {
        self.file_type == FileType::Directory
    }

    /// Whether this node is the owner's root.
    pub fn is_root(&self) -> bool {
        self.parent_id.is_none()
    }

    /// Whether this node has been moved to the trash.
    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }

    /// Lower-case extension of the name, if any.
    pub fn extension(&self) -> Option<String> {
        extension_of(&self.name)
    }
}

/// Lower-case extension of a file name, if any.
pub fn extension_of(name: &str) -> Option<String> {
    name.rsplit_once('.')
        .map(|(_, ext)| ext)
        .filter(|ext| !ext.is_empty())
        .map(|ext| ext.to_ascii_lowercase())
}

/// Data required to create a node.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateFile {
    /// The owning user.
    pub owner_id: Uuid,
    /// Parent directory.
    pub parent_id: Uuid,
    /// Node name.
    pub name: String,
    /// File or directory.
    pub file_type: FileType,
}

impl CreateFile {
    /// Build the row this request creates.
    pub fn into_file(self) -> File {
        let now = Utc::now();
        File {
            id: Uuid::new_v4(),
            owner_id: self.owner_id,
            parent_id: Some(self.parent_id),
            name: self.name,
            file_type: self.file_type,
            size: 0,
            primary_entity_id: None,
            thumb_unavailable: false,
            created_at: now,
            updated_at: now,
            deleted_at: None,
        }
    }
}
