//! # vaultfs-core
//!
//! Core crate for vaultfs. Contains the job queue and event publisher
//! traits, configuration schemas, the settings service, domain events,
//! the actor and virtual path types, and the unified error system.
//!
//! This crate has **no** internal dependencies on other vaultfs crates.

pub mod config;
pub mod error;
pub mod events;
pub mod result;
pub mod settings;
pub mod traits;
pub mod types;

pub use error::{AppError, ErrorKind};
pub use result::AppResult;
pub use settings::Settings;
pub use types::{Actor, VfsPath};
