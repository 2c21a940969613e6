//! Who is performing an operation.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The principal behind a call.
///
/// System callers (background jobs, admin tooling) skip ownership checks;
/// that bypass is always requested explicitly by passing [`Actor::System`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "lowercase")]
pub enum Actor {
    /// Internal work with no ownership restrictions.
    System,
    /// An authenticated user.
    User(Uuid),
}

impl Actor {
    /// Whether this actor may touch data owned by `owner_id`.
    pub fn can_access(&self, owner_id: Uuid) -> bool {
        match self {
            Self::System => true,
            Self::User(id) => *id == owner_id,
        }
    }

    /// The user ID, if any.
    pub fn user_id(&self) -> Option<Uuid> {
        match self {
            Self::System => None,
            Self::User(id) => Some(*id),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ownership() {
        let owner = Uuid::new_v4();
        assert!(Actor::System.can_access(owner));
        assert!(Actor::User(owner).can_access(owner));
        assert!(!Actor::User(Uuid::new_v4()).can_access(owner));
    }
}
