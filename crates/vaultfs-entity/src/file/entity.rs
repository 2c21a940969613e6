//! Physical object record.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// What a physical object holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "entity_kind", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    /// File content.
    Version,
    /// A derived thumbnail image.
    Thumbnail,
}

/// One object in one storage backend. Never mutated after insert.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Entity {
    /// Unique entity identifier.
    pub id: Uuid,
    /// Content or thumbnail.
    pub kind: EntityKind,
    /// Policy whose backend holds the object.
    pub policy_id: Uuid,
    /// Backend-specific key (path or object key).
    pub source: String,
    /// Size in bytes.
    pub size: i64,
    /// Detected MIME type.
    pub mime_type: Option<String>,
    /// Content hash, when computed.
    pub checksum: Option<String>,
    /// User whose upload created the object.
    pub created_by: Option<Uuid>,
    /// When the object was recorded.
    pub created_at: DateTime<Utc>,
}

/// Data required to record a physical object.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateEntity {
    /// Content or thumbnail.
    pub kind: EntityKind,
    /// Policy whose backend holds the object.
    pub policy_id: Uuid,
    /// Backend key.
    pub source: String,
    /// Size in bytes.
    pub size: i64,
    /// MIME type.
    pub mime_type: Option<String>,
    /// Content hash.
    pub checksum: Option<String>,
    /// Uploader.
    pub created_by: Option<Uuid>,
}

impl CreateEntity {
    /// Build the row this request creates.
    pub fn into_entity(self) -> Entity {
        Entity {
            id: Uuid::new_v4(),
            kind: self.kind,
            policy_id: self.policy_id,
            source: self.source,
            size: self.size,
            mime_type: self.mime_type,
            checksum: self.checksum,
            created_by: self.created_by,
            created_at: Utc::now(),
        }
    }
}
