//! Virtual filesystem: owner-scoped tree, mount points and structural operations.

pub mod resolve;
pub mod service;

pub use resolve::ResolvedPath;
pub use service::{DirEntry, OpenedFile, VfsService};
