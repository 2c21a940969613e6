//! Storage policy entities.

pub mod model;
pub mod policy_type;
pub mod settings;

pub use model::StoragePolicy;
pub use policy_type::PolicyType;
pub use settings::{PolicySettings, UploadMode};
