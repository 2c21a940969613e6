//! # vaultfs-service
//!
//! File lifecycle services. Each service orchestrates the repository
//! store, the policy registry and the storage providers to implement one
//! use case: the virtual filesystem, resumable uploads, thumbnails and
//! direct links. The [`PathLocker`] serialises structural mutations.
//!
//! Services follow constructor injection: all dependencies are provided
//! at construction time as `Arc` handles or cheap clones.

pub mod context;
pub mod link;
pub mod lock;
pub mod thumbnail;
pub mod upload;
pub mod vfs;

pub use context::RequestContext;
pub use link::{DirectLinkService, DirectLinkView, PreparedDownload};
pub use lock::{PathGuard, PathLocker};
pub use thumbnail::ThumbnailService;
pub use upload::{ChunkReceipt, OpenUpload, UploadResult, UploadSessionManager, UploadTicket};
pub use vfs::{DirEntry, OpenedFile, ResolvedPath, VfsService};
