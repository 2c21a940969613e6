//! Built-in job handler implementations.

pub mod cleanup;
pub mod maintenance;
pub mod thumbnail;

pub use cleanup::CleanupJobHandler;
pub use maintenance::MaintenanceJobHandler;
pub use thumbnail::ThumbnailJobHandler;
