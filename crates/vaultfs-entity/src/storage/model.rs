//! Storage policy entity model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use sqlx::types::Json;
use uuid::Uuid;

use vaultfs_core::AppResult;
use vaultfs_core::config::PolicyConfig;

use super::policy_type::PolicyType;
use super::settings::{PolicySettings, UploadMode};

/// A named binding of a backend (type, credentials, base path) to the tree.
///
/// Providers receive this row on every call; they keep no credentials of
/// their own.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct StoragePolicy {
    /// Unique policy identifier.
    pub id: Uuid,
    /// Unique human-readable name.
    pub name: String,
    /// Backend type.
    pub policy_type: PolicyType,
    /// Endpoint, or Graph base URL for OneDrive.
    pub server: String,
    /// Bucket, or drive ID for OneDrive.
    pub bucket: String,
    /// Region for S3-compatible backends.
    pub region: String,
    /// Root directory or key prefix inside the backend.
    pub base_path: String,
    /// Access key or OAuth client ID.
    pub access_key: String,
    /// Secret key or OAuth client secret.
    #[serde(skip_serializing, default)]
    pub secret_key: String,
    /// OneDrive refresh token.
    #[serde(skip_serializing, default)]
    pub refresh_token: String,
    /// Objects have no open read access.
    pub is_private: bool,
    /// Force signed URLs even when objects are public.
    pub source_auth: bool,
    /// Directory node this policy is mounted on.
    pub mount_node_id: Option<Uuid>,
    /// Free-form settings.
    pub settings: Json<PolicySettings>,
    /// When the policy was created.
    pub created_at: DateTime<Utc>,
    /// When the policy was last updated.
    pub updated_at: DateTime<Utc>,
}

impl StoragePolicy {
    /// Build a policy row from a bootstrap configuration entry.
    pub fn from_config(config: &PolicyConfig) -> AppResult<Self> {
        let policy_type = config.policy_type.parse::<PolicyType>()?;
        let upload_mode = match config.upload_mode.as_deref() {
            Some("direct") => UploadMode::Direct,
            _ => UploadMode::Relay,
        };
        let now = Utc::now();
        Ok(Self {
            id: Uuid::new_v4(),
            name: config.name.clone(),
            policy_type,
            server: config.server.clone(),
            bucket: config.bucket.clone(),
            region: config.region.clone(),
            base_path: config.base_path.clone(),
            access_key: config.access_key.clone(),
            secret_key: config.secret_key.clone(),
            refresh_token: config.refresh_token.clone(),
            is_private: config.is_private,
            source_auth: config.source_auth,
            mount_node_id: None,
            settings: Json(PolicySettings {
                chunk_size: config.chunk_size.unwrap_or(0),
                pre_allocate: false,
                upload_mode,
                max_size: config.max_size,
                allowed_extensions: config
                    .allowed_extensions
                    .iter()
                    .map(|e| e.trim_start_matches('.').to_ascii_lowercase())
                    .collect(),
                cdn_domain: config.cdn_domain.clone(),
            }),
            created_at: now,
            updated_at: now,
        })
    }

    /// Whether download URLs must be signed.
    pub fn requires_signed_urls(&self) -> bool {
        self.is_private || self.source_auth
    }

    /// Whether clients upload straight to the backend.
    pub fn is_client_direct(&self) -> bool {
        self.settings.upload_mode == UploadMode::Direct
    }

    /// Join a relative key onto the base path with `/` separators.
    pub fn physical_key(&self, relative: &str) -> String {
        let base = self.base_path.trim_end_matches('/');
        let relative = relative.trim_start_matches('/');
        match (base.is_empty(), relative.is_empty()) {
            (true, _) => relative.to_string(),
            (false, true) => base.to_string(),
            (false, false) => format!("{base}/{relative}"),
        }
    }
}
