//! Shared value types.

pub mod actor;
pub mod path;

pub use actor::Actor;
pub use path::VfsPath;
