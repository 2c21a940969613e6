//! Version edge between a file and an entity.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use super::entity::EntityKind;

/// Links a [`File`](super::File) to an [`Entity`](super::Entity).
///
/// Among the `Version` edges of one file at most one is current at any
/// time. A `Thumbnail` edge ties a derived image to its source file.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct FileEntity {
    /// Unique edge identifier.
    pub id: Uuid,
    /// The logical file.
    pub file_id: Uuid,
    /// The physical object.
    pub entity_id: Uuid,
    /// Edge kind, mirrors the entity's kind.
    pub kind: EntityKind,
    /// Whether this edge is the file's current version.
    pub is_current: bool,
    /// Optional user-facing label.
    pub version_label: Option<String>,
    /// Who uploaded this version.
    pub uploaded_by: Option<Uuid>,
    /// When the edge was created.
    pub created_at: DateTime<Utc>,
}

impl FileEntity {
    /// A new edge, current on creation.
    pub fn new(file_id: Uuid, entity_id: Uuid, kind: EntityKind, uploaded_by: Option<Uuid>) -> Self {
        Self {
            id: Uuid::new_v4(),
            file_id,
            entity_id,
            kind,
            is_current: true,
            version_label: None,
            uploaded_by,
            created_at: Utc::now(),
        }
    }
}
