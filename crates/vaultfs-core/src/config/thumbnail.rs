//! Thumbnail pipeline configuration.
//!
//! Per-generator switches (enabled flag, extensions, size limit, binary
//! path) live in the runtime settings service so they can change without
//! a restart; this section only holds the output shape.

use serde::{Deserialize, Serialize};

/// Thumbnail output settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThumbnailConfig {
    /// Maximum thumbnail width in pixels.
    #[serde(default = "default_width")]
    pub max_width: u32,
    /// Maximum thumbnail height in pixels.
    #[serde(default = "default_height")]
    pub max_height: u32,
    /// JPEG quality (1-100).
    #[serde(default = "default_quality")]
    pub quality: u8,
    /// Suffix appended to the source key for the derived thumbnail object.
    #[serde(default = "default_suffix")]
    pub suffix: String,
    /// Directory for generator scratch files; empty means the OS temp dir.
    #[serde(default)]
    pub temp_dir: String,
}

impl Default for ThumbnailConfig {
    fn default() -> Self {
        Self {
            max_width: default_width(),
            max_height: default_height(),
            quality: default_quality(),
            suffix: default_suffix(),
            temp_dir: String::new(),
        }
    }
}

fn default_width() -> u32 {
    400
}

fn default_height() -> u32 {
    300
}

fn default_quality() -> u8 {
    85
}

fn default_suffix() -> String {
    "._thumb".to_string()
}
