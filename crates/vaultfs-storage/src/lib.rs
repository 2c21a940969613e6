//! # vaultfs-storage
//!
//! Physical storage for vaultfs. The [`StorageProvider`] trait is the
//! uniform contract every backend implements; providers receive the
//! [`StoragePolicy`](vaultfs_entity::storage::StoragePolicy) on each call
//! and never see virtual paths. The [`PolicyRegistry`] maps policy IDs to
//! provider instances, [`ChunkStaging`] holds relay-mode chunks until
//! assembly, [`UrlSigner`] issues and verifies time-boxed URLs, and the
//! [`thumbnail`] module hosts the generator pipeline.

pub mod provider;
pub mod providers;
pub mod registry;
pub mod signer;
pub mod staging;
pub mod thumbnail;

pub use provider::{
    ByteStream, ClientUpload, DownloadUrlOptions, ObjectInfo, StorageProvider, UploadedObject,
};
pub use registry::PolicyRegistry;
pub use signer::UrlSigner;
pub use staging::ChunkStaging;
