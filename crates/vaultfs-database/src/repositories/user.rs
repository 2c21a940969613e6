//! Users and groups.

use async_trait::async_trait;
use uuid::Uuid;

use vaultfs_core::result::AppResult;
use vaultfs_entity::user::{Group, User};

/// Repository for the quota-bearing principals.
#[async_trait]
pub trait UserRepository: Send + Sync + std::fmt::Debug + 'static {
    /// Find a user.
    async fn find_user(&self, id: Uuid) -> AppResult<Option<User>>;

    /// Find a group.
    async fn find_group(&self, id: Uuid) -> AppResult<Option<Group>>;

    /// Insert or replace a user.
    async fn upsert_user(&self, user: User) -> AppResult<()>;

    /// Insert or replace a group.
    async fn upsert_group(&self, group: Group) -> AppResult<()>;
}
