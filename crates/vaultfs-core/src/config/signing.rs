//! Signed URL configuration.

use serde::{Deserialize, Serialize};

/// HMAC signing settings for download and thumbnail URLs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SigningConfig {
    /// Shared HMAC secret. Must be overridden in production.
    #[serde(default = "default_secret")]
    pub secret: String,
    /// Default lifetime of a signed download URL in seconds.
    #[serde(default = "default_download_ttl")]
    pub download_ttl_seconds: u64,
    /// Lifetime of a signed thumbnail URL in seconds.
    #[serde(default = "default_thumbnail_ttl")]
    pub thumbnail_ttl_seconds: u64,
}

impl Default for SigningConfig {
    fn default() -> Self {
        Self {
            secret: default_secret(),
            download_ttl_seconds: default_download_ttl(),
            thumbnail_ttl_seconds: default_thumbnail_ttl(),
        }
    }
}

fn default_secret() -> String {
    "change-me".to_string()
}

fn default_download_ttl() -> u64 {
    3600
}

fn default_thumbnail_ttl() -> u64 {
    600
}
