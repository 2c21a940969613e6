//! Direct links: durable public download references to files.

use std::sync::Arc;

use chrono::Utc;
use rand::distr::{Alphanumeric, SampleString};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use vaultfs_core::error::AppError;
use vaultfs_core::result::AppResult;
use vaultfs_database::Store;
use vaultfs_entity::file::{Entity, File};
use vaultfs_entity::link::DirectLink;
use vaultfs_entity::storage::StoragePolicy;
use vaultfs_storage::{ByteStream, StorageProvider, UrlSigner};

use crate::context::RequestContext;
use crate::vfs::VfsService;

/// Length of a public link ID.
const PUBLIC_ID_LEN: usize = 12;

/// A direct link as handed to clients.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DirectLinkView {
    /// Linked file.
    pub file_id: Uuid,
    /// Public identifier.
    pub public_id: String,
    /// Absolute download URL.
    pub url: String,
}

/// Everything needed to stream a direct-link download.
pub struct PreparedDownload {
    /// The link, with its snapshotted name and speed limit.
    pub link: DirectLink,
    /// The linked file.
    pub file: File,
    /// Current physical object; `None` for an empty file.
    pub entity: Option<Entity>,
    /// Policy holding `entity`.
    pub policy: Option<Arc<StoragePolicy>>,
    provider: Option<Arc<dyn StorageProvider>>,
}

impl std::fmt::Debug for PreparedDownload {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PreparedDownload")
            .field("public_id", &self.link.public_id)
            .field("file_id", &self.file.id)
            .finish()
    }
}

impl PreparedDownload {
    /// Bytes per second to throttle to; 0 means unlimited.
    pub fn speed_limit(&self) -> u64 {
        self.link.speed_limit.max(0) as u64
    }

    /// Open the content stream.
    pub async fn open(&self, ctx: &RequestContext) -> AppResult<ByteStream> {
        match (&self.entity, &self.policy, &self.provider) {
            (Some(entity), Some(policy), Some(provider)) => {
                ctx.guard(provider.get(policy, &entity.source)).await
            }
            _ => Ok(Box::pin(futures::stream::empty())),
        }
    }
}

/// Issues and resolves direct links.
#[derive(Clone)]
pub struct DirectLinkService {
    store: Store,
    vfs: VfsService,
    signer: Arc<UrlSigner>,
}

impl std::fmt::Debug for DirectLinkService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DirectLinkService").finish()
    }
}

impl DirectLinkService {
    /// Creates a new direct link service.
    pub fn new(store: Store, vfs: VfsService, signer: Arc<UrlSigner>) -> Self {
        Self { store, vfs, signer }
    }

    fn view(&self, link: &DirectLink) -> DirectLinkView {
        DirectLinkView {
            file_id: link.file_id,
            public_id: link.public_id.clone(),
            url: self.signer.direct_link_url(&link.public_id, &link.file_name),
        }
    }

    /// Return the link of each file, creating missing ones. A new link
    /// snapshots the file's name and the group's speed limit.
    pub async fn get_or_create_direct_links(
        &self,
        ctx: &RequestContext,
        group_id: Uuid,
        file_ids: &[Uuid],
    ) -> AppResult<Vec<DirectLinkView>> {
        let group = self
            .store
            .users
            .find_group(group_id)
            .await?
            .ok_or_else(|| AppError::not_found(format!("Group {group_id} not found")))?;

        let mut views = Vec::with_capacity(file_ids.len());
        for &file_id in file_ids {
            let file = self.vfs.file(ctx, file_id).await?;
            if file.is_dir() {
                return Err(AppError::invalid_operation(format!(
                    "'{}' is a directory",
                    file.name
                )));
            }
            if let Some(link) = self.store.links.find_by_file(file.id).await? {
                views.push(self.view(&link));
                continue;
            }
            let candidate = DirectLink {
                id: Uuid::new_v4(),
                public_id: Alphanumeric.sample_string(&mut rand::rng(), PUBLIC_ID_LEN),
                file_id: file.id,
                file_name: file.name.clone(),
                speed_limit: group.speed_limit,
                downloads: 0,
                created_at: Utc::now(),
            };
            let link = self.store.links.insert_or_get(candidate).await?;
            info!(file_id = %file.id, public_id = %link.public_id, "Direct link created");
            views.push(self.view(&link));
        }
        Ok(views)
    }

    /// Resolve a public ID for download and count the download in the
    /// background.
    pub async fn prepare_download(&self, public_id: &str) -> AppResult<PreparedDownload> {
        let link = self
            .store
            .links
            .find_by_public_id(public_id)
            .await?
            .ok_or_else(|| AppError::not_found("Link not found"))?;
        let file = self
            .vfs
            .file(&RequestContext::system(), link.file_id)
            .await
            .map_err(|_| AppError::not_found("Link not found"))?;

        let (entity, policy, provider) = match self.store.files.current_version(file.id).await? {
            Some((_, entity)) => {
                let (policy, provider) = self.vfs.backend_of(&entity).await?;
                (Some(entity), Some(policy), Some(provider))
            }
            None => (None, None, None),
        };

        let links = self.store.links.clone();
        let link_id = link.id;
        tokio::spawn(async move {
            if let Err(e) = links.increment_downloads(link_id).await {
                warn!(link_id = %link_id, error = %e, "Failed to count download");
            }
        });

        Ok(PreparedDownload {
            link,
            file,
            entity,
            policy,
            provider,
        })
    }
}
