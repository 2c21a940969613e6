//! Storage policy bootstrap configuration.

use serde::{Deserialize, Serialize};

/// Top-level storage configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Local directory where server-relay chunks are staged.
    #[serde(default = "default_staging_root")]
    pub staging_root: String,
    /// Name of the policy used when no mount point covers a path.
    #[serde(default = "default_policy")]
    pub default_policy: String,
    /// Policies created at startup when no policy of the same name exists.
    #[serde(default = "default_policies")]
    pub policies: Vec<PolicyConfig>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            staging_root: default_staging_root(),
            default_policy: default_policy(),
            policies: default_policies(),
        }
    }
}

/// A storage policy declared in configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyConfig {
    /// Unique policy name.
    pub name: String,
    /// Backend type: `local`, `onedrive`, `s3`, or `oss`.
    #[serde(rename = "type")]
    pub policy_type: String,
    /// Endpoint / Graph base URL (remote backends).
    #[serde(default)]
    pub server: String,
    /// Bucket name or OneDrive drive ID.
    #[serde(default)]
    pub bucket: String,
    /// Region for S3-compatible backends.
    #[serde(default)]
    pub region: String,
    /// Root path or key prefix inside the backend.
    #[serde(default)]
    pub base_path: String,
    /// Access key / OAuth client ID.
    #[serde(default)]
    pub access_key: String,
    /// Secret key / OAuth client secret.
    #[serde(default)]
    pub secret_key: String,
    /// OneDrive refresh token.
    #[serde(default)]
    pub refresh_token: String,
    /// Whether objects are private (no open read access).
    #[serde(default = "default_true")]
    pub is_private: bool,
    /// Force signed URLs even for public buckets.
    #[serde(default)]
    pub source_auth: bool,
    /// Chunk size override in bytes.
    #[serde(default)]
    pub chunk_size: Option<u64>,
    /// `relay` or `direct`.
    #[serde(default)]
    pub upload_mode: Option<String>,
    /// CDN domain rewriting public download URLs.
    #[serde(default)]
    pub cdn_domain: Option<String>,
    /// Largest single file accepted, 0 = unlimited.
    #[serde(default)]
    pub max_size: u64,
    /// Allowed file extensions, empty = all.
    #[serde(default)]
    pub allowed_extensions: Vec<String>,
}

fn default_staging_root() -> String {
    "./data/staging".to_string()
}

fn default_policy() -> String {
    "default".to_string()
}

fn default_policies() -> Vec<PolicyConfig> {
    vec![PolicyConfig {
        name: default_policy(),
        policy_type: "local".to_string(),
        server: String::new(),
        bucket: String::new(),
        region: String::new(),
        base_path: "./data/uploads".to_string(),
        access_key: String::new(),
        secret_key: String::new(),
        refresh_token: String::new(),
        is_private: true,
        source_auth: false,
        chunk_size: None,
        upload_mode: None,
        cdn_domain: None,
        max_size: 0,
        allowed_extensions: Vec::new(),
    }]
}

fn default_true() -> bool {
    true
}
