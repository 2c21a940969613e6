//! HTTP server configuration.

use serde::{Deserialize, Serialize};

/// Settings for the content-serving HTTP endpoints.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Socket address to bind.
    #[serde(default = "default_bind")]
    pub bind_address: String,
    /// Externally reachable base URL used when building signed links.
    #[serde(default = "default_public_url")]
    pub public_base_url: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind(),
            public_base_url: default_public_url(),
        }
    }
}

fn default_bind() -> String {
    "0.0.0.0:5212".to_string()
}

fn default_public_url() -> String {
    "http://localhost:5212".to_string()
}
