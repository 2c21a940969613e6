//! In-process store.
//!
//! All tables live in one [`MemoryState`] behind a single async `RwLock`.
//! Every trait method takes the write lock for its whole duration, which
//! makes each multi-row mutation atomic with respect to every reader.

mod file;
mod records;
mod session;

use std::collections::HashMap;

use tokio::sync::RwLock;
use uuid::Uuid;

use vaultfs_entity::file::{Entity, EntityKind, File, FileEntity};
use vaultfs_entity::job::Job;
use vaultfs_entity::link::DirectLink;
use vaultfs_entity::storage::StoragePolicy;
use vaultfs_entity::upload::UploadSession;
use vaultfs_entity::user::{Group, User};

/// Every table of the metadata store.
#[derive(Debug, Default)]
pub(crate) struct MemoryState {
    files: HashMap<Uuid, File>,
    roots: HashMap<Uuid, Uuid>,
    entities: HashMap<Uuid, Entity>,
    edges: HashMap<Uuid, FileEntity>,
    sessions: HashMap<Uuid, UploadSession>,
    policies: HashMap<Uuid, StoragePolicy>,
    links: HashMap<Uuid, DirectLink>,
    jobs: HashMap<Uuid, Job>,
    users: HashMap<Uuid, User>,
    groups: HashMap<Uuid, Group>,
}

impl MemoryState {
    fn live_child(&self, parent_id: Uuid, name: &str) -> Option<&File> {
        self.files
            .values()
            .find(|f| f.parent_id == Some(parent_id) && f.name == name && f.deleted_at.is_none())
    }

    /// `id` and every descendant, regardless of deletion state.
    fn subtree(&self, id: Uuid) -> Vec<Uuid> {
        let mut out = vec![id];
        let mut cursor = 0;
        while cursor < out.len() {
            let current = out[cursor];
            out.extend(
                self.files
                    .values()
                    .filter(|f| f.parent_id == Some(current))
                    .map(|f| f.id),
            );
            cursor += 1;
        }
        out
    }

    fn current_edge(&self, file_id: Uuid, kind: EntityKind) -> Option<&FileEntity> {
        self.edges
            .values()
            .find(|e| e.file_id == file_id && e.kind == kind && e.is_current)
    }

    fn entity_referenced(&self, entity_id: Uuid) -> bool {
        self.edges.values().any(|e| e.entity_id == entity_id)
    }

    fn used_by(&self, owner_id: Uuid) -> i64 {
        self.files
            .values()
            .filter(|f| f.owner_id == owner_id)
            .map(|f| f.size)
            .sum()
    }
}

/// Metadata store kept entirely in memory.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: RwLock<MemoryState>,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of version edges of `file_id` marked current.
    ///
    /// Reads under the same lock writers hold, so the answer is what any
    /// reader could observe.
    pub async fn current_version_count(&self, file_id: Uuid) -> usize {
        self.state
            .read()
            .await
            .edges
            .values()
            .filter(|e| e.file_id == file_id && e.kind == EntityKind::Version && e.is_current)
            .count()
    }
}
