//! # vaultfs-entity
//!
//! Data model for the vaultfs engine. Every struct in this crate is either
//! a metadata-store row or a value object attached to one. Rows derive
//! `Debug`, `Clone`, `Serialize`, `Deserialize` and `sqlx::FromRow`.

pub mod file;
pub mod job;
pub mod link;
pub mod storage;
pub mod upload;
pub mod user;
