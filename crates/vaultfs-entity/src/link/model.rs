//! Durable public download link.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// A public download reference to a file.
///
/// `file_name` and `speed_limit` are copied at creation so later renames
/// or group changes leave issued links untouched.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct DirectLink {
    /// Unique link identifier.
    pub id: Uuid,
    /// Public identifier used in the URL.
    pub public_id: String,
    /// The linked file.
    pub file_id: Uuid,
    /// File name at creation time.
    pub file_name: String,
    /// Transfer limit in bytes per second at creation time; 0 = unlimited.
    pub speed_limit: i64,
    /// Number of resolutions.
    pub downloads: i64,
    /// When the link was created.
    pub created_at: DateTime<Utc>,
}
