//! Free-form per-policy settings.

use serde::{Deserialize, Serialize};

use crate::file::model::extension_of;

/// How upload bytes reach the backend.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "upload_mode", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum UploadMode {
    /// Chunks pass through the server and are assembled there.
    #[default]
    Relay,
    /// The client writes straight to the backend and reports each chunk.
    Direct,
}

/// Settings stored as JSON beside the typed policy columns.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PolicySettings {
    /// Chunk size in bytes; 0 uses the global default.
    pub chunk_size: u64,
    /// Reserve the full size on the backend when a session opens.
    pub pre_allocate: bool,
    /// Relay or client-direct uploads.
    pub upload_mode: UploadMode,
    /// Largest single file accepted; 0 = unlimited.
    pub max_size: u64,
    /// Lower-case extensions accepted; empty = all.
    pub allowed_extensions: Vec<String>,
    /// Host substituted into public download URLs.
    pub cdn_domain: Option<String>,
}

impl PolicySettings {
    /// Effective chunk size given the global default.
    pub fn chunk_size_or(&self, default: u64) -> u64 {
        if self.chunk_size == 0 { default } else { self.chunk_size }
    }

    /// Whether a file with this name may be stored.
    pub fn allows_name(&self, name: &str) -> bool {
        if self.allowed_extensions.is_empty() {
            return true;
        }
        match extension_of(name) {
            Some(ext) => self
                .allowed_extensions
                .iter()
                .any(|allowed| allowed.eq_ignore_ascii_case(&ext)),
            None => false,
        }
    }

    /// Whether `size` fits under the per-file limit.
    pub fn allows_size(&self, size: u64) -> bool {
        self.max_size == 0 || size <= self.max_size
    }
}
