//! Storage policies.

use async_trait::async_trait;
use uuid::Uuid;

use vaultfs_core::result::AppResult;
use vaultfs_entity::storage::StoragePolicy;

/// Repository for storage policies.
#[async_trait]
pub trait PolicyRepository: Send + Sync + std::fmt::Debug + 'static {
    /// All policies.
    async fn list(&self) -> AppResult<Vec<StoragePolicy>>;

    /// Find a policy by ID.
    async fn find_by_id(&self, id: Uuid) -> AppResult<Option<StoragePolicy>>;

    /// Find a policy by name.
    async fn find_by_name(&self, name: &str) -> AppResult<Option<StoragePolicy>>;

    /// Insert or replace a policy by ID.
    async fn upsert(&self, policy: StoragePolicy) -> AppResult<StoragePolicy>;

    /// Delete a policy.
    async fn delete(&self, id: Uuid) -> AppResult<()>;
}
