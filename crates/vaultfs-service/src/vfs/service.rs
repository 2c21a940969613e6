//! Virtual filesystem service: resolution, listing and structural mutations.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use vaultfs_core::config::SigningConfig;
use vaultfs_core::error::{AppError, ErrorKind};
use vaultfs_core::events::{DomainEvent, FileEvent};
use vaultfs_core::result::AppResult;
use vaultfs_core::traits::EventPublisher;
use vaultfs_core::types::VfsPath;
use vaultfs_core::types::path::validate_name;
use vaultfs_database::Store;
use vaultfs_entity::file::{CreateFile, Entity, File, FileEntity, FileType};
use vaultfs_entity::storage::StoragePolicy;
use vaultfs_storage::{ByteStream, DownloadUrlOptions, PolicyRegistry, StorageProvider, UrlSigner};

use super::resolve::{ResolvedPath, relative_path};
use crate::context::RequestContext;
use crate::lock::PathLocker;

/// One row of a directory listing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DirEntry {
    /// Node ID.
    pub id: Uuid,
    /// Name within the directory.
    pub name: String,
    /// Whether the node is a directory.
    pub is_dir: bool,
    /// Size in bytes.
    pub size: i64,
    /// Policy new content below this entry is written to.
    pub policy_id: Uuid,
    /// Whether thumbnail generation gave up on this file.
    pub thumb_unavailable: bool,
    /// Last modification.
    pub updated_at: DateTime<Utc>,
}

/// A file opened for reading.
pub struct OpenedFile {
    /// The logical file.
    pub file: File,
    /// Its current physical object; `None` for an empty file.
    pub entity: Option<Entity>,
    /// Content stream.
    pub body: ByteStream,
}

impl std::fmt::Debug for OpenedFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenedFile")
            .field("file", &self.file.id)
            .field("entity", &self.entity.as_ref().map(|e| e.id))
            .finish()
    }
}

/// The owner-scoped logical tree over pluggable storage policies.
#[derive(Clone)]
pub struct VfsService {
    store: Store,
    registry: PolicyRegistry,
    locker: Arc<PathLocker>,
    events: Arc<dyn EventPublisher>,
    signer: Arc<UrlSigner>,
    signing: SigningConfig,
}

impl std::fmt::Debug for VfsService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VfsService").finish()
    }
}

impl VfsService {
    /// Creates a new VFS service.
    pub fn new(
        store: Store,
        registry: PolicyRegistry,
        locker: Arc<PathLocker>,
        events: Arc<dyn EventPublisher>,
        signer: Arc<UrlSigner>,
        signing: SigningConfig,
    ) -> Self {
        Self {
            store,
            registry,
            locker,
            events,
            signer,
            signing,
        }
    }

    /// The shared path locker.
    pub fn locker(&self) -> &Arc<PathLocker> {
        &self.locker
    }

    /// The policy registry.
    pub fn registry(&self) -> &PolicyRegistry {
        &self.registry
    }

    /// Walk `path` in `owner_id`'s tree.
    ///
    /// The deepest mounted ancestor decides the policy; without one the
    /// default policy applies.
    pub async fn resolve(&self, owner_id: Uuid, path: &VfsPath) -> AppResult<ResolvedPath> {
        let root = self.store.files.ensure_root(owner_id).await?;
        let mounts = self.registry.mounts().await;
        let segments: Vec<&str> = path.segments().collect();

        let mut mount = mounts.get(&root.id).map(|p| (0usize, p.clone()));
        let mut nodes = vec![root];
        let mut missing = Vec::new();
        for (i, segment) in segments.iter().enumerate() {
            if missing.is_empty() {
                let parent = &nodes[nodes.len() - 1];
                if !parent.is_dir() {
                    return Err(AppError::invalid_operation(format!(
                        "'{}' is not a directory",
                        parent.name
                    )));
                }
                if let Some(child) = self.store.files.find_child(parent.id, segment).await? {
                    if let Some(policy) = mounts.get(&child.id) {
                        mount = Some((i + 1, policy.clone()));
                    }
                    nodes.push(child);
                    continue;
                }
            }
            missing.push(segment.to_string());
        }

        let (policy, relative) = match mount {
            Some((depth, policy)) => (policy, relative_path(owner_id, true, &segments[depth..])),
            None => (
                self.registry.default_policy().await?,
                relative_path(owner_id, false, &segments),
            ),
        };
        Ok(ResolvedPath {
            path: path.clone(),
            owner_id,
            nodes,
            missing,
            policy,
            relative,
        })
    }

    async fn publish(&self, ctx: &RequestContext, event: FileEvent) {
        self.events
            .publish(DomainEvent::new(ctx.user_id(), event))
            .await;
    }

    /// The node at `path`.
    pub async fn stat(&self, ctx: &RequestContext, owner_id: Uuid, path: &VfsPath) -> AppResult<File> {
        ctx.require_access(owner_id)?;
        let resolved = self.resolve(owner_id, path).await?;
        resolved
            .node()
            .cloned()
            .ok_or_else(|| AppError::not_found(format!("'{path}' does not exist")))
    }

    /// Immediate children of a directory, directories first.
    pub async fn list(
        &self,
        ctx: &RequestContext,
        owner_id: Uuid,
        path: &VfsPath,
    ) -> AppResult<Vec<DirEntry>> {
        ctx.require_access(owner_id)?;
        let resolved = self.resolve(owner_id, path).await?;
        let dir = resolved
            .node()
            .ok_or_else(|| AppError::not_found(format!("'{path}' does not exist")))?;
        if !dir.is_dir() {
            return Err(AppError::invalid_operation(format!("'{path}' is not a directory")));
        }

        let mounts = self.registry.mounts().await;
        let mut entries = Vec::new();
        for child in self.store.files.list_children(dir.id).await? {
            let policy_id = match mounts.get(&child.id) {
                Some(policy) => {
                    if self.registry.provider(policy).is_err() {
                        warn!(policy = %policy.name, node_id = %child.id, "Mounted policy has no provider, hiding entry");
                        continue;
                    }
                    policy.id
                }
                None => resolved.policy.id,
            };
            entries.push(DirEntry {
                id: child.id,
                name: child.name.clone(),
                is_dir: child.is_dir(),
                size: child.size,
                policy_id,
                thumb_unavailable: child.thumb_unavailable,
                updated_at: child.updated_at,
            });
        }
        entries.sort_by(|a, b| b.is_dir.cmp(&a.is_dir).then_with(|| a.name.cmp(&b.name)));
        Ok(entries)
    }

    async fn insert_dir(&self, owner_id: Uuid, parent_id: Uuid, name: &str) -> AppResult<File> {
        let row = CreateFile {
            owner_id,
            parent_id,
            name: name.to_string(),
            file_type: FileType::Directory,
        }
        .into_file();
        match self.store.files.insert(row).await {
            Ok(dir) => Ok(dir),
            // Another writer materialised the same ancestor first.
            Err(e) if e.is(ErrorKind::Conflict) => match self.store.files.find_child(parent_id, name).await? {
                Some(existing) if existing.is_dir() => Ok(existing),
                _ => Err(e),
            },
            Err(e) => Err(e),
        }
    }

    /// Create a directory and any missing ancestors. Existing directories
    /// are returned as-is.
    pub async fn mkdir(&self, ctx: &RequestContext, owner_id: Uuid, path: &VfsPath) -> AppResult<File> {
        ctx.require_access(owner_id)?;
        let _guard = self.locker.lock_with_parents(ctx, owner_id, &[path]).await?;
        self.materialize(ctx, owner_id, path).await
    }

    /// Body of [`mkdir`](Self::mkdir); the caller holds the path lock.
    async fn materialize(&self, ctx: &RequestContext, owner_id: Uuid, path: &VfsPath) -> AppResult<File> {
        let resolved = self.resolve(owner_id, path).await?;
        if let Some(node) = resolved.node() {
            return if node.is_dir() {
                Ok(node.clone())
            } else {
                Err(AppError::conflict(format!("'{path}' exists and is a file")))
            };
        }

        let provider = self.registry.provider(&resolved.policy)?;
        let mut parent = resolved.deepest().clone();
        let total = resolved.missing.len();
        for (k, name) in resolved.missing.iter().enumerate() {
            let key = resolved.ancestor_key(total - 1 - k);
            ctx.guard(provider.create_directory(&resolved.policy, &key))
                .await?;
            parent = self.insert_dir(owner_id, parent.id, name).await?;
        }

        info!(owner_id = %owner_id, path = %path, created = total, "Directory created");
        self.publish(
            ctx,
            FileEvent::Created {
                file_id: parent.id,
                owner_id,
                path: path.to_string(),
            },
        )
        .await;
        Ok(parent)
    }

    /// Create an empty file, creating missing parent directories.
    pub async fn create_file(
        &self,
        ctx: &RequestContext,
        owner_id: Uuid,
        path: &VfsPath,
    ) -> AppResult<File> {
        ctx.require_access(owner_id)?;
        let (parent_path, name) = split(path)?;
        let _guard = self.locker.lock_with_parents(ctx, owner_id, &[path]).await?;
        let parent = self.materialize(ctx, owner_id, &parent_path).await?;
        let file = self
            .store
            .files
            .insert(
                CreateFile {
                    owner_id,
                    parent_id: parent.id,
                    name: name.to_string(),
                    file_type: FileType::File,
                }
                .into_file(),
            )
            .await?;

        info!(file_id = %file.id, path = %path, "Empty file created");
        self.publish(
            ctx,
            FileEvent::Created {
                file_id: file.id,
                owner_id,
                path: path.to_string(),
            },
        )
        .await;
        Ok(file)
    }

    /// Rename the node at `path` within its directory.
    pub async fn rename(
        &self,
        ctx: &RequestContext,
        owner_id: Uuid,
        path: &VfsPath,
        new_name: &str,
    ) -> AppResult<File> {
        ctx.require_access(owner_id)?;
        validate_name(new_name)?;
        let (parent_path, _) = split(path)?;
        let target = parent_path.join(new_name)?;

        let _guard = self
            .locker
            .lock_with_parents(ctx, owner_id, &[path, &target])
            .await?;
        let node = self.existing(owner_id, path).await?;
        let parent_id = node
            .parent_id
            .ok_or_else(|| AppError::invalid_operation("The root directory cannot be renamed"))?;
        let renamed = self.store.files.relocate(node.id, parent_id, new_name).await?;

        info!(file_id = %node.id, from = %path, to = %target, "Renamed");
        self.publish(
            ctx,
            FileEvent::Renamed {
                file_id: node.id,
                from: path.to_string(),
                to: target.to_string(),
            },
        )
        .await;
        Ok(renamed)
    }

    /// Move the node at `path` into the directory `dest_dir`.
    pub async fn move_to(
        &self,
        ctx: &RequestContext,
        owner_id: Uuid,
        path: &VfsPath,
        dest_dir: &VfsPath,
    ) -> AppResult<File> {
        ctx.require_access(owner_id)?;
        let (_, name) = split(path)?;
        if path.is_ancestor_of(dest_dir) {
            return Err(AppError::invalid_operation(format!(
                "Cannot move '{path}' into itself"
            )));
        }
        let target = dest_dir.join(name)?;

        // The target's parent is `dest_dir`, so a trash of it waits for us.
        let _guard = self
            .locker
            .lock_with_parents(ctx, owner_id, &[path, &target])
            .await?;
        let node = self.existing(owner_id, path).await?;
        let dest = self.existing_dir(owner_id, dest_dir).await?;
        let moved = self.store.files.relocate(node.id, dest.id, name).await?;

        info!(file_id = %node.id, from = %path, to = %target, "Moved");
        self.publish(
            ctx,
            FileEvent::Moved {
                file_id: node.id,
                from: path.to_string(),
                to: target.to_string(),
            },
        )
        .await;
        Ok(moved)
    }

    /// Copy the node at `path` into `dest_dir`. File copies share the
    /// immutable physical objects of their source.
    pub async fn copy(
        &self,
        ctx: &RequestContext,
        owner_id: Uuid,
        path: &VfsPath,
        dest_dir: &VfsPath,
    ) -> AppResult<File> {
        ctx.require_access(owner_id)?;
        let (_, name) = split(path)?;
        if path.is_ancestor_of(dest_dir) {
            return Err(AppError::invalid_operation(format!(
                "Cannot copy '{path}' into itself"
            )));
        }
        let target = dest_dir.join(name)?;

        // The target's parent is `dest_dir`, so a trash of it waits for us.
        let _guard = self
            .locker
            .lock_with_parents(ctx, owner_id, &[path, &target])
            .await?;
        let node = self.existing(owner_id, path).await?;
        let dest = self.existing_dir(owner_id, dest_dir).await?;

        let copy = if node.is_dir() {
            let top = self.insert_new_dir(owner_id, dest.id, name).await?;
            let mut pending = vec![(node.id, top.id)];
            while let Some((from, to)) = pending.pop() {
                for child in self.store.files.list_children(from).await? {
                    if child.is_dir() {
                        let dir = self.insert_new_dir(owner_id, to, &child.name).await?;
                        pending.push((child.id, dir.id));
                    } else {
                        self.store.files.copy_file(child.id, to, &child.name).await?;
                    }
                }
            }
            top
        } else {
            self.store.files.copy_file(node.id, dest.id, name).await?
        };

        info!(source_id = %node.id, file_id = %copy.id, to = %target, "Copied");
        self.publish(
            ctx,
            FileEvent::Copied {
                source_id: node.id,
                file_id: copy.id,
                to: target.to_string(),
            },
        )
        .await;
        Ok(copy)
    }

    async fn insert_new_dir(&self, owner_id: Uuid, parent_id: Uuid, name: &str) -> AppResult<File> {
        self.store
            .files
            .insert(
                CreateFile {
                    owner_id,
                    parent_id,
                    name: name.to_string(),
                    file_type: FileType::Directory,
                }
                .into_file(),
            )
            .await
    }

    /// Move the node at `path` and its subtree to the trash.
    pub async fn delete(&self, ctx: &RequestContext, owner_id: Uuid, path: &VfsPath) -> AppResult<usize> {
        ctx.require_access(owner_id)?;
        if path.is_root() {
            return Err(AppError::invalid_operation("The root directory cannot be deleted"));
        }
        let _guard = self.locker.lock_with_parents(ctx, owner_id, &[path]).await?;
        let node = self.existing(owner_id, path).await?;
        let affected = self.store.files.soft_delete_subtree(node.id).await?;

        info!(file_id = %node.id, path = %path, nodes = affected.len(), "Moved to trash");
        self.publish(
            ctx,
            FileEvent::Deleted {
                file_id: node.id,
                path: path.to_string(),
            },
        )
        .await;
        Ok(affected.len())
    }

    async fn existing(&self, owner_id: Uuid, path: &VfsPath) -> AppResult<File> {
        self.resolve(owner_id, path)
            .await?
            .node()
            .cloned()
            .ok_or_else(|| AppError::not_found(format!("'{path}' does not exist")))
    }

    async fn existing_dir(&self, owner_id: Uuid, path: &VfsPath) -> AppResult<File> {
        let dir = self.existing(owner_id, path).await?;
        if dir.is_dir() {
            Ok(dir)
        } else {
            Err(AppError::invalid_operation(format!("'{path}' is not a directory")))
        }
    }

    /// A live file by ID, checked against the actor.
    pub async fn file(&self, ctx: &RequestContext, file_id: Uuid) -> AppResult<File> {
        let file = self
            .store
            .files
            .find_by_id(file_id)
            .await?
            .filter(|f| !f.is_deleted())
            .ok_or_else(|| AppError::not_found(format!("File {file_id} not found")))?;
        ctx.require_access(file.owner_id)?;
        Ok(file)
    }

    /// Policy and provider holding `entity`.
    pub async fn backend_of(
        &self,
        entity: &Entity,
    ) -> AppResult<(Arc<StoragePolicy>, Arc<dyn StorageProvider>)> {
        self.registry.resolve(entity.policy_id).await
    }

    /// A URL the caller can fetch the file's current content from.
    pub async fn download_url(
        &self,
        ctx: &RequestContext,
        file_id: Uuid,
        expires_in: Option<Duration>,
    ) -> AppResult<String> {
        let file = self.file(ctx, file_id).await?;
        if file.is_dir() {
            return Err(AppError::invalid_operation(format!(
                "'{}' is a directory",
                file.name
            )));
        }
        let ttl = expires_in.unwrap_or(Duration::from_secs(self.signing.download_ttl_seconds));
        let Some((_, entity)) = self.store.files.current_version(file.id).await? else {
            return Ok(self.signer.content_url(file.id, ttl));
        };
        let (policy, provider) = self.backend_of(&entity).await?;
        let options = DownloadUrlOptions {
            file_id: file.id,
            file_name: file.name.clone(),
            expires_in: ttl,
        };
        ctx.guard(provider.download_url(&policy, &entity.source, &options))
            .await
    }

    /// Open the file's current content.
    pub async fn open(&self, ctx: &RequestContext, file_id: Uuid) -> AppResult<OpenedFile> {
        let file = self.file(ctx, file_id).await?;
        if file.is_dir() {
            return Err(AppError::invalid_operation(format!(
                "'{}' is a directory",
                file.name
            )));
        }
        match self.store.files.current_version(file.id).await? {
            None => Ok(OpenedFile {
                file,
                entity: None,
                body: Box::pin(futures::stream::empty()),
            }),
            Some((_, entity)) => {
                let (policy, provider) = self.backend_of(&entity).await?;
                let body = ctx.guard(provider.get(&policy, &entity.source)).await?;
                Ok(OpenedFile {
                    file,
                    entity: Some(entity),
                    body,
                })
            }
        }
    }

    /// Version history of a file, newest first.
    pub async fn versions(&self, ctx: &RequestContext, file_id: Uuid) -> AppResult<Vec<FileEntity>> {
        let file = self.file(ctx, file_id).await?;
        self.store.files.list_versions(file.id).await
    }

    /// Make an older version current again.
    pub async fn restore_version(
        &self,
        ctx: &RequestContext,
        file_id: Uuid,
        version_id: Uuid,
    ) -> AppResult<File> {
        let file = self.file(ctx, file_id).await?;
        let (restored, entity) = self.store.files.promote_version(file.id, version_id).await?;

        info!(file_id = %file.id, version_id = %version_id, "Version restored");
        self.publish(
            ctx,
            FileEvent::Written {
                file_id: file.id,
                entity_id: entity.id,
                owner_id: file.owner_id,
                size: restored.size,
            },
        )
        .await;
        Ok(restored)
    }

    /// Delete physical objects, grouped by policy. Failures are logged.
    pub async fn delete_objects(&self, entities: &[Entity]) -> usize {
        let mut by_policy: HashMap<Uuid, Vec<String>> = HashMap::new();
        for entity in entities {
            by_policy
                .entry(entity.policy_id)
                .or_default()
                .push(entity.source.clone());
        }

        let mut deleted = 0;
        for (policy_id, sources) in by_policy {
            let (policy, provider) = match self.registry.resolve(policy_id).await {
                Ok(backend) => backend,
                Err(e) => {
                    warn!(policy_id = %policy_id, error = %e, objects = sources.len(), "Cannot release objects of unknown policy");
                    continue;
                }
            };
            match provider.delete(&policy, &sources).await {
                Ok(failed) => {
                    for source in &failed {
                        warn!(policy = %policy.name, source = %source, "Failed to delete object");
                    }
                    deleted += sources.len() - failed.len();
                }
                Err(e) => warn!(policy = %policy.name, error = %e, "Failed to delete objects"),
            }
        }
        deleted
    }

    /// Hard-delete a trashed subtree and release objects nothing references.
    pub async fn purge(&self, file: &File) -> AppResult<usize> {
        let orphaned = self.store.files.purge(file.id).await?;
        let released = self.delete_objects(&orphaned).await;
        info!(file_id = %file.id, objects = released, "Purged from trash");
        Ok(released)
    }
}

/// Split a non-root path into its parent and last segment.
fn split(path: &VfsPath) -> AppResult<(VfsPath, &str)> {
    match (path.parent(), path.name()) {
        (Some(parent), Some(name)) => Ok((parent, name)),
        _ => Err(AppError::invalid_operation(
            "This operation is not allowed on the root directory",
        )),
    }
}
