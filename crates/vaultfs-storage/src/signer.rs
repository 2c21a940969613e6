//! HMAC-signed, time-boxed URLs.
//!
//! A token has the form `{expires}:{signature}` where `expires` is a unix
//! timestamp and `signature` is the URL-safe base64 HMAC-SHA256 of
//! `{resource}\n{expires}`. Verification recomputes the MAC in constant
//! time before looking at the expiry, so a tampered expiry reports
//! `SignatureInvalid` rather than `LinkExpired`.

use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use uuid::Uuid;

use vaultfs_core::error::AppError;
use vaultfs_core::result::AppResult;

type HmacSha256 = Hmac<Sha256>;

/// Query parameter carrying the token.
pub const SIGN_PARAM: &str = "sign";

/// Signs and verifies resource tokens with a shared secret.
#[derive(Clone)]
pub struct UrlSigner {
    key: HmacSha256,
    base_url: String,
}

impl std::fmt::Debug for UrlSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UrlSigner")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

impl UrlSigner {
    /// Create a signer. `base_url` is the externally reachable API origin.
    pub fn new(secret: &str, base_url: &str) -> AppResult<Self> {
        if secret.is_empty() {
            return Err(AppError::configuration("Signing secret must not be empty"));
        }
        let key = HmacSha256::new_from_slice(secret.as_bytes())
            .map_err(|_| AppError::configuration("Invalid signing secret"))?;
        Ok(Self {
            key,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    /// Resource string for a file's content.
    pub fn content_resource(file_id: Uuid) -> String {
        format!("file/{file_id}")
    }

    /// Resource string for a file's thumbnail.
    pub fn thumbnail_resource(file_id: Uuid) -> String {
        format!("thumb/{file_id}")
    }

    fn mac(&self, resource: &str, expires: i64) -> HmacSha256 {
        let mut mac = self.key.clone();
        mac.update(resource.as_bytes());
        mac.update(b"\n");
        mac.update(expires.to_string().as_bytes());
        mac
    }

    /// Sign `resource` until `expires_at`.
    pub fn sign(&self, resource: &str, expires_at: DateTime<Utc>) -> String {
        let expires = expires_at.timestamp();
        let signature = self.mac(resource, expires).finalize().into_bytes();
        format!("{expires}:{}", URL_SAFE_NO_PAD.encode(signature))
    }

    /// Verify a token for `resource` at `now`.
    pub fn verify(&self, resource: &str, token: &str, now: DateTime<Utc>) -> AppResult<()> {
        let (expires, signature) = token
            .split_once(':')
            .ok_or_else(|| AppError::signature_invalid("Malformed signature"))?;
        let expires: i64 = expires
            .parse()
            .map_err(|_| AppError::signature_invalid("Malformed signature expiry"))?;
        let signature = URL_SAFE_NO_PAD
            .decode(signature)
            .map_err(|_| AppError::signature_invalid("Malformed signature encoding"))?;

        self.mac(resource, expires)
            .verify_slice(&signature)
            .map_err(|_| AppError::signature_invalid("Signature mismatch"))?;

        if now.timestamp() >= expires {
            return Err(AppError::link_expired("Signed URL has expired"));
        }
        Ok(())
    }

    /// Full signed URL for a file's content, valid for `ttl`.
    pub fn content_url(&self, file_id: Uuid, ttl: Duration) -> String {
        let token = self.sign(&Self::content_resource(file_id), expiry(ttl));
        format!(
            "{}/api/v1/files/{file_id}/content?{SIGN_PARAM}={token}",
            self.base_url
        )
    }

    /// Full signed URL for a file's thumbnail, valid for `ttl`.
    pub fn thumbnail_url(&self, file_id: Uuid, ttl: Duration) -> String {
        let token = self.sign(&Self::thumbnail_resource(file_id), expiry(ttl));
        format!(
            "{}/api/v1/files/{file_id}/thumbnail?{SIGN_PARAM}={token}",
            self.base_url
        )
    }

    /// Public URL of a direct link.
    pub fn direct_link_url(&self, public_id: &str, file_name: &str) -> String {
        let name = percent_encoding::utf8_percent_encode(
            file_name,
            percent_encoding::NON_ALPHANUMERIC,
        );
        format!("{}/f/{public_id}/{name}", self.base_url)
    }
}

fn expiry(ttl: Duration) -> DateTime<Utc> {
    Utc::now() + chrono::Duration::seconds(ttl.as_secs().min(i64::MAX as u64) as i64)
}
