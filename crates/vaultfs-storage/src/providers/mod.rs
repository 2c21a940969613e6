//! Storage provider implementations.

use std::sync::Arc;

#[cfg(feature = "s3")]
use vaultfs_entity::storage::PolicyType;

use crate::provider::StorageProvider;
use crate::signer::UrlSigner;

pub mod local;
#[cfg(feature = "onedrive")]
pub mod onedrive;
#[cfg(feature = "s3")]
pub mod s3;

pub use local::LocalStorageProvider;
#[cfg(feature = "onedrive")]
pub use onedrive::OneDriveStorageProvider;
#[cfg(feature = "s3")]
pub use s3::S3StorageProvider;

/// One provider per backend type compiled into this build.
pub fn default_providers(signer: Arc<UrlSigner>) -> Vec<Arc<dyn StorageProvider>> {
    #[allow(unused_mut)]
    let mut providers: Vec<Arc<dyn StorageProvider>> =
        vec![Arc::new(LocalStorageProvider::new(signer))];
    #[cfg(feature = "s3")]
    {
        providers.push(Arc::new(S3StorageProvider::new(PolicyType::S3)));
        providers.push(Arc::new(S3StorageProvider::new(PolicyType::Oss)));
    }
    #[cfg(feature = "onedrive")]
    providers.push(Arc::new(OneDriveStorageProvider::new(reqwest::Client::new())));
    providers
}
