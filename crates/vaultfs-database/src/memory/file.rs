//! [`FileRepository`] over the in-memory state.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use vaultfs_core::error::AppError;
use vaultfs_core::result::AppResult;
use vaultfs_entity::file::{CreateEntity, Entity, EntityKind, File, FileEntity, FileType};
use vaultfs_entity::upload::UploadState;

use super::{MemoryState, MemoryStore};
use crate::repositories::{CommitOutcome, CommitUpload, FileRepository, OwnerUsage, PolicyUsage};

fn name_conflict(name: &str) -> AppError {
    AppError::conflict(format!("An item named '{name}' already exists"))
}

/// A node may only be placed under a live directory.
fn require_live_dir(state: &MemoryState, parent_id: Uuid) -> AppResult<()> {
    match state.files.get(&parent_id) {
        Some(dir) if dir.deleted_at.is_none() && dir.is_dir() => Ok(()),
        _ => Err(AppError::not_found(format!("Directory {parent_id} not found"))),
    }
}

fn flip_current(state: &mut MemoryState, file_id: Uuid, new_edge: Uuid, kind: EntityKind) {
    for edge in state.edges.values_mut() {
        if edge.file_id == file_id && edge.kind == kind {
            edge.is_current = edge.id == new_edge;
        }
    }
}

#[async_trait]
impl FileRepository for MemoryStore {
    async fn ensure_root(&self, owner_id: Uuid) -> AppResult<File> {
        let mut state = self.state.write().await;
        if let Some(root) = state.roots.get(&owner_id).and_then(|id| state.files.get(id)) {
            return Ok(root.clone());
        }
        let now = Utc::now();
        let root = File {
            id: Uuid::new_v4(),
            owner_id,
            parent_id: None,
            name: String::new(),
            file_type: FileType::Directory,
            size: 0,
            primary_entity_id: None,
            thumb_unavailable: false,
            created_at: now,
            updated_at: now,
            deleted_at: None,
        };
        state.roots.insert(owner_id, root.id);
        state.files.insert(root.id, root.clone());
        Ok(root)
    }

    async fn find_by_id(&self, id: Uuid) -> AppResult<Option<File>> {
        Ok(self.state.read().await.files.get(&id).cloned())
    }

    async fn find_child(&self, parent_id: Uuid, name: &str) -> AppResult<Option<File>> {
        Ok(self.state.read().await.live_child(parent_id, name).cloned())
    }

    async fn list_children(&self, parent_id: Uuid) -> AppResult<Vec<File>> {
        let state = self.state.read().await;
        let mut children: Vec<File> = state
            .files
            .values()
            .filter(|f| f.parent_id == Some(parent_id) && f.deleted_at.is_none())
            .cloned()
            .collect();
        children.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(children)
    }

    async fn insert(&self, file: File) -> AppResult<File> {
        let mut state = self.state.write().await;
        if let Some(parent_id) = file.parent_id {
            require_live_dir(&state, parent_id)?;
            if state.live_child(parent_id, &file.name).is_some() {
                return Err(name_conflict(&file.name));
            }
        }
        state.files.insert(file.id, file.clone());
        Ok(file)
    }

    async fn relocate(&self, id: Uuid, parent_id: Uuid, name: &str) -> AppResult<File> {
        let mut state = self.state.write().await;
        require_live_dir(&state, parent_id)?;
        if let Some(existing) = state.live_child(parent_id, name) {
            if existing.id != id {
                return Err(name_conflict(name));
            }
        }
        let file = state
            .files
            .get_mut(&id)
            .filter(|f| f.deleted_at.is_none())
            .ok_or_else(|| AppError::not_found(format!("File {id} not found")))?;
        file.parent_id = Some(parent_id);
        file.name = name.to_string();
        file.updated_at = Utc::now();
        Ok(file.clone())
    }

    async fn soft_delete_subtree(&self, id: Uuid) -> AppResult<Vec<File>> {
        let mut state = self.state.write().await;
        match state.files.get(&id) {
            Some(f) if f.deleted_at.is_none() => {}
            _ => return Err(AppError::not_found(format!("File {id} not found"))),
        }
        let now = Utc::now();
        let mut affected = Vec::new();
        for node in state.subtree(id) {
            if let Some(file) = state.files.get_mut(&node) {
                if file.deleted_at.is_none() {
                    file.deleted_at = Some(now);
                    affected.push(file.clone());
                }
            }
        }
        Ok(affected)
    }

    async fn copy_file(&self, source_id: Uuid, parent_id: Uuid, name: &str) -> AppResult<File> {
        let mut state = self.state.write().await;
        require_live_dir(&state, parent_id)?;
        if state.live_child(parent_id, name).is_some() {
            return Err(name_conflict(name));
        }
        let source = state
            .files
            .get(&source_id)
            .filter(|f| f.deleted_at.is_none())
            .cloned()
            .ok_or_else(|| AppError::not_found(format!("File {source_id} not found")))?;
        let current = state.current_edge(source_id, EntityKind::Version).cloned();

        let now = Utc::now();
        let copy = File {
            id: Uuid::new_v4(),
            parent_id: Some(parent_id),
            name: name.to_string(),
            thumb_unavailable: false,
            created_at: now,
            updated_at: now,
            deleted_at: None,
            ..source
        };
        if let Some(edge) = current {
            let new_edge = FileEntity {
                version_label: edge.version_label.clone(),
                ..FileEntity::new(copy.id, edge.entity_id, EntityKind::Version, edge.uploaded_by)
            };
            state.edges.insert(new_edge.id, new_edge);
        }
        state.files.insert(copy.id, copy.clone());
        Ok(copy)
    }

    async fn set_thumb_unavailable(&self, id: Uuid, unavailable: bool) -> AppResult<()> {
        let mut state = self.state.write().await;
        let file = state
            .files
            .get_mut(&id)
            .ok_or_else(|| AppError::not_found(format!("File {id} not found")))?;
        file.thumb_unavailable = unavailable;
        Ok(())
    }

    async fn find_entity(&self, id: Uuid) -> AppResult<Option<Entity>> {
        Ok(self.state.read().await.entities.get(&id).cloned())
    }

    async fn current_version(&self, file_id: Uuid) -> AppResult<Option<(FileEntity, Entity)>> {
        let state = self.state.read().await;
        Ok(state
            .current_edge(file_id, EntityKind::Version)
            .and_then(|edge| {
                state
                    .entities
                    .get(&edge.entity_id)
                    .map(|entity| (edge.clone(), entity.clone()))
            }))
    }

    async fn list_versions(&self, file_id: Uuid) -> AppResult<Vec<FileEntity>> {
        let state = self.state.read().await;
        let mut versions: Vec<FileEntity> = state
            .edges
            .values()
            .filter(|e| e.file_id == file_id && e.kind == EntityKind::Version)
            .cloned()
            .collect();
        versions.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(versions)
    }

    async fn promote_version(&self, file_id: Uuid, file_entity_id: Uuid) -> AppResult<(File, Entity)> {
        let mut state = self.state.write().await;
        let edge = state
            .edges
            .get(&file_entity_id)
            .filter(|e| e.file_id == file_id && e.kind == EntityKind::Version)
            .cloned()
            .ok_or_else(|| AppError::not_found(format!("Version {file_entity_id} not found")))?;
        let entity = state
            .entities
            .get(&edge.entity_id)
            .cloned()
            .ok_or_else(|| AppError::not_found(format!("Entity {} not found", edge.entity_id)))?;
        if !state.files.contains_key(&file_id) {
            return Err(AppError::not_found(format!("File {file_id} not found")));
        }

        flip_current(&mut state, file_id, edge.id, EntityKind::Version);
        let file = state
            .files
            .get_mut(&file_id)
            .ok_or_else(|| AppError::not_found(format!("File {file_id} not found")))?;
        file.size = entity.size;
        file.primary_entity_id = Some(entity.id);
        file.thumb_unavailable = false;
        file.updated_at = Utc::now();
        Ok((file.clone(), entity))
    }

    async fn commit_upload(&self, commit: CommitUpload) -> AppResult<CommitOutcome> {
        let mut state = self.state.write().await;

        let session = state
            .sessions
            .get(&commit.session_id)
            .cloned()
            .ok_or_else(|| AppError::not_found(format!("Upload session {} not found", commit.session_id)))?;
        match session.state {
            UploadState::Completed => {
                let file = session.result_file_id.and_then(|id| state.files.get(&id).cloned());
                let entity = session
                    .result_entity_id
                    .and_then(|id| state.entities.get(&id).cloned());
                return match (file, entity) {
                    (Some(file), Some(entity)) => Ok(CommitOutcome {
                        file,
                        entity,
                        created: false,
                    }),
                    _ => Err(AppError::internal("Completed session lost its result")),
                };
            }
            UploadState::Receiving => {}
            other => {
                return Err(AppError::invalid_operation(format!(
                    "Upload session is {other}"
                )));
            }
        }

        // Resolve the target file: explicit overwrite, existing name, or new.
        let existing = match commit.file_id {
            Some(id) => Some(
                state
                    .files
                    .get(&id)
                    .filter(|f| f.deleted_at.is_none())
                    .cloned()
                    .ok_or_else(|| AppError::not_found(format!("File {id} not found")))?,
            ),
            None => {
                require_live_dir(&state, commit.parent_id)?;
                state.live_child(commit.parent_id, &commit.name).cloned()
            }
        };
        if let Some(file) = &existing {
            if file.is_dir() {
                return Err(AppError::conflict(format!(
                    "'{}' is a directory",
                    file.name
                )));
            }
        }

        let previous = existing.as_ref().map(|f| f.size).unwrap_or(0);
        let delta = commit.entity.size - previous;
        let used = state.used_by(commit.owner_id);
        if commit.quota > 0 && delta > 0 && used + delta > commit.quota {
            return Err(AppError::quota_exceeded(format!(
                "Storage quota exceeded: {} of {} bytes used, upload needs {delta} more",
                used, commit.quota
            )));
        }

        let entity = commit.entity.into_entity();
        let now = Utc::now();
        let mut file = match existing {
            Some(file) => file,
            None => File {
                id: Uuid::new_v4(),
                owner_id: commit.owner_id,
                parent_id: Some(commit.parent_id),
                name: commit.name.clone(),
                file_type: FileType::File,
                size: 0,
                primary_entity_id: None,
                thumb_unavailable: false,
                created_at: now,
                updated_at: now,
                deleted_at: None,
            },
        };
        file.size = entity.size;
        file.primary_entity_id = Some(entity.id);
        file.thumb_unavailable = false;
        file.updated_at = now;

        let edge = FileEntity::new(file.id, entity.id, EntityKind::Version, commit.uploaded_by);
        state.entities.insert(entity.id, entity.clone());
        state.edges.insert(edge.id, edge.clone());
        flip_current(&mut state, file.id, edge.id, EntityKind::Version);
        state.files.insert(file.id, file.clone());

        if let Some(session) = state.sessions.get_mut(&commit.session_id) {
            session.state = UploadState::Completed;
            session.result_file_id = Some(file.id);
            session.result_entity_id = Some(entity.id);
            session.updated_at = now;
        }

        Ok(CommitOutcome {
            file,
            entity,
            created: true,
        })
    }

    async fn thumbnail_of(&self, file_id: Uuid) -> AppResult<Option<Entity>> {
        let state = self.state.read().await;
        Ok(state
            .current_edge(file_id, EntityKind::Thumbnail)
            .and_then(|edge| state.entities.get(&edge.entity_id).cloned()))
    }

    async fn attach_thumbnail(
        &self,
        file_id: Uuid,
        entity: CreateEntity,
    ) -> AppResult<(Entity, Option<Entity>)> {
        let mut state = self.state.write().await;
        if !state.files.contains_key(&file_id) {
            return Err(AppError::not_found(format!("File {file_id} not found")));
        }
        let previous: Vec<FileEntity> = state
            .edges
            .values()
            .filter(|e| e.file_id == file_id && e.kind == EntityKind::Thumbnail)
            .cloned()
            .collect();
        for edge in &previous {
            state.edges.remove(&edge.id);
        }
        let replaced = previous
            .iter()
            .find(|e| !state.entity_referenced(e.entity_id))
            .and_then(|e| state.entities.remove(&e.entity_id));

        let entity = entity.into_entity();
        let edge = FileEntity::new(file_id, entity.id, EntityKind::Thumbnail, None);
        state.entities.insert(entity.id, entity.clone());
        state.edges.insert(edge.id, edge);
        if let Some(file) = state.files.get_mut(&file_id) {
            file.thumb_unavailable = false;
        }
        Ok((entity, replaced))
    }

    async fn used_storage(&self, owner_id: Uuid) -> AppResult<i64> {
        Ok(self.state.read().await.used_by(owner_id))
    }

    async fn list_trashed_before(&self, cutoff: DateTime<Utc>) -> AppResult<Vec<File>> {
        let state = self.state.read().await;
        Ok(state
            .files
            .values()
            .filter(|f| f.deleted_at.is_some_and(|at| at <= cutoff))
            .filter(|f| {
                f.parent_id
                    .and_then(|p| state.files.get(&p))
                    .is_none_or(|parent| parent.deleted_at.is_none())
            })
            .cloned()
            .collect())
    }

    async fn purge(&self, id: Uuid) -> AppResult<Vec<Entity>> {
        let mut state = self.state.write().await;
        match state.files.get(&id) {
            Some(f) if f.deleted_at.is_some() => {}
            Some(_) => {
                return Err(AppError::invalid_operation(format!(
                    "File {id} is not in the trash"
                )));
            }
            None => return Ok(Vec::new()),
        }

        let nodes: HashSet<Uuid> = state.subtree(id).into_iter().collect();
        let mut candidates = HashSet::new();
        state.edges.retain(|_, edge| {
            if nodes.contains(&edge.file_id) {
                candidates.insert(edge.entity_id);
                false
            } else {
                true
            }
        });
        state.files.retain(|file_id, _| !nodes.contains(file_id));
        state.links.retain(|_, link| !nodes.contains(&link.file_id));

        let mut orphaned = Vec::new();
        for entity_id in candidates {
            if !state.entity_referenced(entity_id) {
                if let Some(entity) = state.entities.remove(&entity_id) {
                    orphaned.push(entity);
                }
            }
        }
        Ok(orphaned)
    }

    async fn usage_by_owner(&self) -> AppResult<Vec<OwnerUsage>> {
        let state = self.state.read().await;
        let mut usage: HashMap<Uuid, OwnerUsage> = HashMap::new();
        for file in state.files.values().filter(|f| f.file_type == FileType::File) {
            let entry = usage.entry(file.owner_id).or_insert(OwnerUsage {
                owner_id: file.owner_id,
                used_bytes: 0,
                file_count: 0,
            });
            entry.used_bytes += file.size;
            entry.file_count += 1;
        }
        Ok(usage.into_values().collect())
    }

    async fn usage_by_policy(&self) -> AppResult<Vec<PolicyUsage>> {
        let state = self.state.read().await;
        let mut usage: HashMap<Uuid, PolicyUsage> = HashMap::new();
        for entity in state.entities.values() {
            let entry = usage.entry(entity.policy_id).or_insert(PolicyUsage {
                policy_id: entity.policy_id,
                entity_count: 0,
                total_bytes: 0,
            });
            entry.entity_count += 1;
            entry.total_bytes += entity.size;
        }
        Ok(usage.into_values().collect())
    }
}
