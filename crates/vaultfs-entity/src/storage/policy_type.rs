//! Storage backend type enumeration.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// The type of storage backend behind a policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "policy_type", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum PolicyType {
    /// Local filesystem.
    Local,
    /// Microsoft OneDrive through the Graph API.
    OneDrive,
    /// S3-compatible object storage.
    S3,
    /// Proprietary object storage speaking the S3 API (Aliyun OSS, Tencent COS).
    Oss,
}

impl PolicyType {
    /// Return the type as a lowercase string.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Local => "local",
            Self::OneDrive => "onedrive",
            Self::S3 => "s3",
            Self::Oss => "oss",
        }
    }
}

impl fmt::Display for PolicyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for PolicyType {
    type Err = vaultfs_core::AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "local" => Ok(Self::Local),
            "onedrive" => Ok(Self::OneDrive),
            "s3" => Ok(Self::S3),
            "oss" | "cos" => Ok(Self::Oss),
            _ => Err(vaultfs_core::AppError::validation(format!(
                "Invalid policy type: '{s}'. Expected one of: local, onedrive, s3, oss"
            ))),
        }
    }
}
