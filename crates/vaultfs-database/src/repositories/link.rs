//! Direct links.

use async_trait::async_trait;
use uuid::Uuid;

use vaultfs_core::result::AppResult;
use vaultfs_entity::link::DirectLink;

/// Repository for direct links.
#[async_trait]
pub trait LinkRepository: Send + Sync + std::fmt::Debug + 'static {
    /// The link for a file, if one exists.
    async fn find_by_file(&self, file_id: Uuid) -> AppResult<Option<DirectLink>>;

    /// Resolve a public ID.
    async fn find_by_public_id(&self, public_id: &str) -> AppResult<Option<DirectLink>>;

    /// Insert `link` unless the file already has one; returns the stored link.
    async fn insert_or_get(&self, link: DirectLink) -> AppResult<DirectLink>;

    /// Add one to the download counter.
    async fn increment_downloads(&self, id: Uuid) -> AppResult<()>;
}
