//! Files, entities and version edges.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use vaultfs_core::result::AppResult;
use vaultfs_entity::file::{CreateEntity, Entity, File, FileEntity};

/// Everything written when an upload session completes.
#[derive(Debug, Clone)]
pub struct CommitUpload {
    /// The session being completed.
    pub session_id: Uuid,
    /// Owner charged for the bytes.
    pub owner_id: Uuid,
    /// Quota of the owner's group; 0 = unlimited.
    pub quota: i64,
    /// File to add a version to; `None` creates or reuses `parent_id/name`.
    pub file_id: Option<Uuid>,
    /// Directory receiving a new file.
    pub parent_id: Uuid,
    /// Name of a new file.
    pub name: String,
    /// The physical object already written to the backend.
    pub entity: CreateEntity,
    /// Uploader recorded on the version edge.
    pub uploaded_by: Option<Uuid>,
}

/// Result of a commit.
#[derive(Debug, Clone)]
pub struct CommitOutcome {
    /// The file, with its new size and primary entity.
    pub file: File,
    /// The entity now current.
    pub entity: Entity,
    /// `false` when the session had already been committed and the
    /// stored result was returned instead.
    pub created: bool,
}

/// Bytes used by one owner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OwnerUsage {
    /// The owner.
    pub owner_id: Uuid,
    /// Sum of file sizes, trash included.
    pub used_bytes: i64,
    /// Number of file nodes.
    pub file_count: i64,
}

/// Objects held by one policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyUsage {
    /// The policy.
    pub policy_id: Uuid,
    /// Number of entities.
    pub entity_count: i64,
    /// Sum of entity sizes.
    pub total_bytes: i64,
}

/// Repository for the logical tree and its physical backing.
#[async_trait]
pub trait FileRepository: Send + Sync + std::fmt::Debug + 'static {
    /// Return the owner's root directory, creating it on first use.
    async fn ensure_root(&self, owner_id: Uuid) -> AppResult<File>;

    /// Find a node by ID, deleted or not.
    async fn find_by_id(&self, id: Uuid) -> AppResult<Option<File>>;

    /// Find a live child by name.
    async fn find_child(&self, parent_id: Uuid, name: &str) -> AppResult<Option<File>>;

    /// List live children of a directory.
    async fn list_children(&self, parent_id: Uuid) -> AppResult<Vec<File>>;

    /// Insert a node. Fails with `Conflict` when a live sibling has the same
    /// name and `NotFound` when the parent is not a live directory.
    async fn insert(&self, file: File) -> AppResult<File>;

    /// Rename and/or reparent a node. Fails with `Conflict` on a name
    /// collision and `NotFound` when the new parent is trashed.
    async fn relocate(&self, id: Uuid, parent_id: Uuid, name: &str) -> AppResult<File>;

    /// Soft-delete a node and all live descendants. Returns the affected rows.
    async fn soft_delete_subtree(&self, id: Uuid) -> AppResult<Vec<File>>;

    /// Create `name` under `parent_id` sharing the current entity of `source_id`.
    async fn copy_file(&self, source_id: Uuid, parent_id: Uuid, name: &str) -> AppResult<File>;

    /// Flag or clear "thumbnail unavailable".
    async fn set_thumb_unavailable(&self, id: Uuid, unavailable: bool) -> AppResult<()>;

    /// Find an entity.
    async fn find_entity(&self, id: Uuid) -> AppResult<Option<Entity>>;

    /// The current version edge and its entity.
    async fn current_version(&self, file_id: Uuid) -> AppResult<Option<(FileEntity, Entity)>>;

    /// All version edges of a file, newest first.
    async fn list_versions(&self, file_id: Uuid) -> AppResult<Vec<FileEntity>>;

    /// Make an existing version edge current. Atomic with respect to readers.
    /// Returns the updated file and the entity now current.
    async fn promote_version(&self, file_id: Uuid, file_entity_id: Uuid) -> AppResult<(File, Entity)>;

    /// Write the entity, flip versions, update the file and complete the
    /// session, all in one transaction; re-checks quota inside it.
    async fn commit_upload(&self, commit: CommitUpload) -> AppResult<CommitOutcome>;

    /// The thumbnail entity of a file.
    async fn thumbnail_of(&self, file_id: Uuid) -> AppResult<Option<Entity>>;

    /// Attach a thumbnail, replacing any previous one. Returns the new
    /// entity and the replaced one, which the caller should delete.
    async fn attach_thumbnail(
        &self,
        file_id: Uuid,
        entity: CreateEntity,
    ) -> AppResult<(Entity, Option<Entity>)>;

    /// Bytes used by an owner, trash included.
    async fn used_storage(&self, owner_id: Uuid) -> AppResult<i64>;

    /// Nodes soft-deleted before `cutoff` whose parent is live, i.e. the
    /// top of each trashed subtree.
    async fn list_trashed_before(&self, cutoff: DateTime<Utc>) -> AppResult<Vec<File>>;

    /// Hard-delete a trashed node with its descendants and edges. Returns
    /// entities no longer referenced by any edge; their rows are removed too.
    async fn purge(&self, id: Uuid) -> AppResult<Vec<Entity>>;

    /// Usage per owner.
    async fn usage_by_owner(&self) -> AppResult<Vec<OwnerUsage>>;

    /// Object counts per policy.
    async fn usage_by_policy(&self) -> AppResult<Vec<PolicyUsage>>;
}
