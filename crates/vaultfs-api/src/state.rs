//! Shared handler state.

use std::sync::Arc;

use vaultfs_service::{DirectLinkService, ThumbnailService, VfsService};
use vaultfs_storage::UrlSigner;

/// Services reachable from every handler.
#[derive(Debug, Clone)]
pub struct AppState {
    /// Logical tree and content access.
    pub vfs: VfsService,
    /// Stored thumbnails.
    pub thumbnails: ThumbnailService,
    /// Direct link resolution.
    pub links: DirectLinkService,
    /// Verifies signed URLs.
    pub signer: Arc<UrlSigner>,
}
