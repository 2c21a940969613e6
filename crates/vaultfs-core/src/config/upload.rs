//! Upload session configuration.

use serde::{Deserialize, Serialize};

/// Resumable upload settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadConfig {
    /// Chunk size used when a policy does not set its own (default 4 MiB).
    #[serde(default = "default_chunk_size")]
    pub chunk_size_bytes: u64,
    /// How long a session stays open before the sweep expires it.
    #[serde(default = "default_session_ttl")]
    pub session_ttl_seconds: u64,
    /// Hard upper bound on any declared size (default 100 GiB).
    #[serde(default = "default_max_size")]
    pub max_declared_size_bytes: u64,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            chunk_size_bytes: default_chunk_size(),
            session_ttl_seconds: default_session_ttl(),
            max_declared_size_bytes: default_max_size(),
        }
    }
}

fn default_chunk_size() -> u64 {
    4 * 1024 * 1024
}

fn default_session_ttl() -> u64 {
    86_400
}

fn default_max_size() -> u64 {
    100 * 1024 * 1024 * 1024
}
