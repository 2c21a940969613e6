//! Application configuration schemas.
//!
//! All configuration structs are deserialized from TOML files via the
//! `config` crate. Each sub-module represents a logical configuration
//! section.

pub mod database;
pub mod logging;
pub mod server;
pub mod signing;
pub mod storage;
pub mod thumbnail;
pub mod upload;
pub mod worker;

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

pub use self::database::{DatabaseBackend, DatabaseConfig};
pub use self::logging::LoggingConfig;
pub use self::server::ServerConfig;
pub use self::signing::SigningConfig;
pub use self::storage::{PolicyConfig, StorageConfig};
pub use self::thumbnail::ThumbnailConfig;
pub use self::upload::UploadConfig;
pub use self::worker::{CronConfig, WorkerConfig};

use crate::error::AppError;

/// Root application configuration.
///
/// This struct is the top-level deserialization target for the merged
/// TOML configuration files (default.toml + environment overlay).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// HTTP server settings.
    #[serde(default)]
    pub server: ServerConfig,
    /// Metadata store settings.
    #[serde(default)]
    pub database: DatabaseConfig,
    /// Storage policies and staging.
    #[serde(default)]
    pub storage: StorageConfig,
    /// Upload session settings.
    #[serde(default)]
    pub upload: UploadConfig,
    /// URL signing settings.
    #[serde(default)]
    pub signing: SigningConfig,
    /// Task broker settings.
    #[serde(default)]
    pub worker: WorkerConfig,
    /// Thumbnail pipeline settings.
    #[serde(default)]
    pub thumbnail: ThumbnailConfig,
    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,
    /// Seed values for the runtime settings service.
    #[serde(default)]
    pub settings: HashMap<String, String>,
}

impl AppConfig {
    /// Load configuration from TOML files.
    ///
    /// Merges `{dir}/default.toml` with an environment-specific overlay
    /// `{dir}/{env}.toml` and environment variables prefixed with `VAULTFS__`.
    pub fn load(dir: &str, env: &str) -> Result<Self, AppError> {
        let config = config::Config::builder()
            .add_source(config::File::with_name(&format!("{dir}/default")).required(false))
            .add_source(config::File::with_name(&format!("{dir}/{env}")).required(false))
            .add_source(
                config::Environment::with_prefix("VAULTFS")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .map_err(|e| AppError::configuration(format!("Failed to build config: {e}")))?;

        config
            .try_deserialize()
            .map_err(|e| AppError::configuration(format!("Failed to deserialize config: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_missing_files_uses_defaults() {
        let dir = std::env::temp_dir().join("vaultfs-config-missing");
        let config = AppConfig::load(dir.to_str().unwrap(), "test").unwrap();
        assert_eq!(config.upload.chunk_size_bytes, 4 * 1024 * 1024);
        assert_eq!(config.worker.concurrency_for("thumbnail"), 2);
        assert_eq!(config.database.backend, DatabaseBackend::Memory);
    }
}
