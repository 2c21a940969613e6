//! Logical files, physical entities and the version edges between them.

pub mod entity;
pub mod model;
pub mod version;

pub use entity::{CreateEntity, Entity, EntityKind};
pub use model::{CreateFile, File, FileType};
pub use version::FileEntity;
