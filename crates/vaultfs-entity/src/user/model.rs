//! User and group rows consumed for quota and speed limits.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// A user as seen by the storage engine.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct User {
    /// Unique user identifier.
    pub id: Uuid,
    /// The user's group.
    pub group_id: Uuid,
}

/// A user group carrying storage limits.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Group {
    /// Unique group identifier.
    pub id: Uuid,
    /// Display name.
    pub name: String,
    /// Storage quota in bytes; 0 = unlimited.
    pub max_storage: i64,
    /// Download speed limit in bytes per second; 0 = unlimited.
    pub speed_limit: i64,
}

impl Group {
    /// Whether `used + additional` stays within quota.
    pub fn has_room(&self, used: i64, additional: i64) -> bool {
        self.max_storage == 0 || used.saturating_add(additional) <= self.max_storage
    }
}
