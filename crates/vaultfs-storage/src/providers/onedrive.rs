//! OneDrive storage provider over the Microsoft Graph API.
//!
//! The policy's `access_key`/`secret_key` are the OAuth client credentials
//! and `refresh_token` the long-lived grant. Access tokens are refreshed on
//! demand and cached per policy. `bucket` selects a drive by ID; empty
//! means the signed-in user's drive. `server` overrides the Graph base URL.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use chrono::{DateTime, Utc};
use futures::StreamExt;
use moka::future::Cache;
use percent_encoding::{NON_ALPHANUMERIC, utf8_percent_encode};
use reqwest::{Method, RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, info, warn};
use uuid::Uuid;

use vaultfs_core::error::{AppError, ErrorKind};
use vaultfs_core::result::AppResult;
use vaultfs_entity::storage::{PolicyType, StoragePolicy};

use crate::provider::{
    ByteStream, ClientUpload, DownloadUrlOptions, ObjectInfo, StorageProvider, UploadedObject,
    guess_mime, key_name,
};

const GRAPH_BASE: &str = "https://graph.microsoft.com/v1.0";
const TOKEN_URL: &str = "https://login.microsoftonline.com/common/oauth2/v2.0/token";
/// Bodies up to this size use a single PUT.
const SIMPLE_UPLOAD_LIMIT: u64 = 4 * 1024 * 1024;
/// Upload-session fragments must be multiples of 320 KiB.
const FRAGMENT_SIZE: usize = 32 * 320 * 1024;
/// Tokens live an hour; refresh a little early.
const TOKEN_TTL: Duration = Duration::from_secs(50 * 60);

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
}

#[derive(Debug, Deserialize)]
struct DriveItem {
    name: String,
    #[serde(default)]
    size: u64,
    folder: Option<serde_json::Value>,
    file: Option<FileFacet>,
    #[serde(rename = "lastModifiedDateTime")]
    last_modified: Option<DateTime<Utc>>,
    #[serde(rename = "@microsoft.graph.downloadUrl")]
    download_url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FileFacet {
    #[serde(rename = "mimeType")]
    mime_type: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChildrenPage {
    value: Vec<DriveItem>,
    #[serde(rename = "@odata.nextLink")]
    next_link: Option<String>,
}

#[derive(Debug, Deserialize)]
struct UploadSessionResponse {
    #[serde(rename = "uploadUrl")]
    upload_url: String,
}

/// OneDrive storage provider.
#[derive(Debug, Clone)]
pub struct OneDriveStorageProvider {
    http: reqwest::Client,
    /// Access tokens by policy ID.
    tokens: Cache<Uuid, String>,
    token_url: String,
}

impl OneDriveStorageProvider {
    /// Create a provider with a shared HTTP client.
    pub fn new(http: reqwest::Client) -> Self {
        Self {
            http,
            tokens: Cache::builder()
                .max_capacity(1024)
                .time_to_live(TOKEN_TTL)
                .build(),
            token_url: TOKEN_URL.to_string(),
        }
    }

    fn graph_base(policy: &StoragePolicy) -> &str {
        if policy.server.is_empty() {
            GRAPH_BASE
        } else {
            policy.server.trim_end_matches('/')
        }
    }

    fn drive_url(policy: &StoragePolicy) -> String {
        if policy.bucket.is_empty() {
            format!("{}/me/drive", Self::graph_base(policy))
        } else {
            format!("{}/drives/{}", Self::graph_base(policy), policy.bucket)
        }
    }

    /// URL of the item at `source`, optionally followed by a path action.
    fn item_url(policy: &StoragePolicy, source: &str, action: Option<&str>) -> String {
        let path = source.trim_matches('/');
        let drive = Self::drive_url(policy);
        match (path.is_empty(), action) {
            (true, None) => format!("{drive}/root"),
            (true, Some(action)) => format!("{drive}/root/{action}"),
            (false, None) => format!("{drive}/root:/{}", encode_path(path)),
            (false, Some(action)) => format!("{drive}/root:/{}:/{action}", encode_path(path)),
        }
    }

    /// Path form used in `parentReference`.
    fn parent_reference(policy: &StoragePolicy, parent: &str) -> String {
        let drive = if policy.bucket.is_empty() {
            "/drive".to_string()
        } else {
            format!("/drives/{}", policy.bucket)
        };
        let parent = parent.trim_matches('/');
        if parent.is_empty() {
            format!("{drive}/root:")
        } else {
            format!("{drive}/root:/{parent}")
        }
    }

    async fn access_token(&self, policy: &StoragePolicy) -> AppResult<String> {
        self.tokens
            .try_get_with(policy.id, self.refresh_token(policy))
            .await
            .map_err(|e: Arc<AppError>| (*e).clone())
    }

    async fn refresh_token(&self, policy: &StoragePolicy) -> AppResult<String> {
        if policy.refresh_token.is_empty() {
            return Err(AppError::configuration(format!(
                "OneDrive policy '{}' has no refresh token",
                policy.name
            )));
        }
        let body = [
            ("client_id", policy.access_key.as_str()),
            ("client_secret", policy.secret_key.as_str()),
            ("refresh_token", policy.refresh_token.as_str()),
            ("grant_type", "refresh_token"),
        ]
        .iter()
        .map(|(k, v)| format!("{k}={}", utf8_percent_encode(v, NON_ALPHANUMERIC)))
        .collect::<Vec<_>>()
        .join("&");

        let response = self
            .http
            .post(&self.token_url)
            .header(reqwest::header::CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(body)
            .send()
            .await
            .map_err(|e| map_http_error("refresh token", e))?;
        let response = check_status("refresh token", &policy.name, response).await?;
        let token: TokenResponse = response
            .json()
            .await
            .map_err(|e| map_http_error("decode token", e))?;
        info!(policy_id = %policy.id, "Refreshed OneDrive access token");
        Ok(token.access_token)
    }

    async fn request(
        &self,
        policy: &StoragePolicy,
        method: Method,
        url: &str,
    ) -> AppResult<RequestBuilder> {
        let token = self.access_token(policy).await?;
        Ok(self.http.request(method, url).bearer_auth(token))
    }

    async fn send(&self, operation: &str, source: &str, request: RequestBuilder) -> AppResult<Response> {
        let response = request
            .send()
            .await
            .map_err(|e| map_http_error(operation, e))?;
        check_status(operation, source, response).await
    }

    async fn item(&self, policy: &StoragePolicy, source: &str) -> AppResult<DriveItem> {
        let request = self
            .request(policy, Method::GET, &Self::item_url(policy, source, None))
            .await?;
        self.send("get item", source, request)
            .await?
            .json()
            .await
            .map_err(|e| map_http_error("decode item", e))
    }

    async fn create_upload_session(&self, policy: &StoragePolicy, source: &str) -> AppResult<String> {
        let request = self
            .request(
                policy,
                Method::POST,
                &Self::item_url(policy, source, Some("createUploadSession")),
            )
            .await?
            .json(&json!({ "item": { "@microsoft.graph.conflictBehavior": "replace" } }));
        let session: UploadSessionResponse = self
            .send("create upload session", source, request)
            .await?
            .json()
            .await
            .map_err(|e| map_http_error("decode upload session", e))?;
        Ok(session.upload_url)
    }

    /// PUT `data` at `offset` of an upload session of `total` bytes.
    async fn put_fragment(
        &self,
        upload_url: &str,
        source: &str,
        offset: u64,
        total: u64,
        data: Bytes,
    ) -> AppResult<()> {
        let end = offset + data.len() as u64 - 1;
        // Upload URLs are pre-authenticated; no bearer token.
        let request = self
            .http
            .put(upload_url)
            .header(reqwest::header::CONTENT_RANGE, format!("bytes {offset}-{end}/{total}"))
            .body(data);
        self.send("upload fragment", source, request).await?;
        debug!(source, offset, end, "Uploaded fragment");
        Ok(())
    }

    fn to_info(source: String, item: DriveItem) -> ObjectInfo {
        let is_dir = item.folder.is_some();
        ObjectInfo {
            name: item.name,
            size: if is_dir { 0 } else { item.size },
            is_dir,
            mime_type: item
                .file
                .and_then(|f| f.mime_type)
                .or_else(|| (!is_dir).then(|| guess_mime(&source))),
            modified: item.last_modified,
            source,
        }
    }
}

#[async_trait]
impl StorageProvider for OneDriveStorageProvider {
    fn provider_type(&self) -> PolicyType {
        PolicyType::OneDrive
    }

    async fn health_check(&self, policy: &StoragePolicy) -> AppResult<()> {
        let request = self
            .request(policy, Method::GET, &Self::drive_url(policy))
            .await?;
        self.send("get drive", &policy.name, request).await?;
        Ok(())
    }

    async fn upload(
        &self,
        policy: &StoragePolicy,
        source: &str,
        size: u64,
        mut body: ByteStream,
    ) -> AppResult<UploadedObject> {
        let mut written = 0u64;

        if size <= SIMPLE_UPLOAD_LIMIT {
            let mut buffer = BytesMut::with_capacity(size as usize);
            while let Some(chunk) = body.next().await {
                let chunk = chunk.map_err(|e| {
                    AppError::with_source(ErrorKind::BackendUnavailable, "Stream read error", e)
                })?;
                buffer.extend_from_slice(&chunk);
            }
            written = buffer.len() as u64;
            let request = self
                .request(policy, Method::PUT, &Self::item_url(policy, source, Some("content")))
                .await?
                .body(buffer.freeze());
            self.send("upload content", source, request).await?;
        } else {
            let upload_url = self.create_upload_session(policy, source).await?;
            let mut buffer = BytesMut::new();
            let mut exhausted = false;
            while !exhausted || !buffer.is_empty() {
                while !exhausted && buffer.len() < FRAGMENT_SIZE {
                    match body.next().await {
                        Some(chunk) => buffer.extend_from_slice(&chunk.map_err(|e| {
                            AppError::with_source(
                                ErrorKind::BackendUnavailable,
                                "Stream read error",
                                e,
                            )
                        })?),
                        None => exhausted = true,
                    }
                }
                if buffer.is_empty() {
                    break;
                }
                let take = buffer.len().min(FRAGMENT_SIZE);
                let fragment = buffer.split_to(take).freeze();
                if written + fragment.len() as u64 > size {
                    let _ = self.http.delete(&upload_url).send().await;
                    return Err(AppError::checksum_mismatch(format!(
                        "Body of {source} is longer than the declared {size} bytes"
                    )));
                }
                let len = fragment.len() as u64;
                self.put_fragment(&upload_url, source, written, size, fragment)
                    .await?;
                written += len;
            }
        }

        debug!(source, bytes = written, "Uploaded object");
        Ok(UploadedObject {
            source: source.to_string(),
            size: written,
            mime_type: guess_mime(source),
            checksum: None,
        })
    }

    async fn get(&self, policy: &StoragePolicy, source: &str) -> AppResult<ByteStream> {
        let request = self
            .request(policy, Method::GET, &Self::item_url(policy, source, Some("content")))
            .await?;
        let response = self.send("download content", source, request).await?;
        Ok(Box::pin(
            response
                .bytes_stream()
                .map(|chunk| chunk.map_err(std::io::Error::other)),
        ))
    }

    async fn list(&self, policy: &StoragePolicy, source: &str) -> AppResult<Vec<ObjectInfo>> {
        let parent = source.trim_end_matches('/');
        let mut url = Self::item_url(policy, source, Some("children"));
        let mut entries = Vec::new();

        loop {
            let request = self.request(policy, Method::GET, &url).await?;
            let page: ChildrenPage = match self.send("list children", source, request).await {
                Ok(response) => response
                    .json()
                    .await
                    .map_err(|e| map_http_error("decode children", e))?,
                Err(e) if e.is(ErrorKind::NotFound) => return Ok(Vec::new()),
                Err(e) => return Err(e),
            };
            for item in page.value {
                let child = if parent.is_empty() {
                    item.name.clone()
                } else {
                    format!("{parent}/{}", item.name)
                };
                entries.push(Self::to_info(child, item));
            }
            match page.next_link {
                Some(next) => url = next,
                None => break,
            }
        }

        entries.sort_by(|a, b| b.is_dir.cmp(&a.is_dir).then(a.name.cmp(&b.name)));
        Ok(entries)
    }

    async fn delete(&self, policy: &StoragePolicy, sources: &[String]) -> AppResult<Vec<String>> {
        let mut failed = Vec::new();
        for source in sources {
            let request = self
                .request(policy, Method::DELETE, &Self::item_url(policy, source, None))
                .await?;
            match self.send("delete item", source, request).await {
                Ok(_) => {}
                Err(e) if e.is(ErrorKind::NotFound) => {}
                Err(e) => {
                    warn!(source = %source, error = %e, "Failed to delete item");
                    failed.push(source.clone());
                }
            }
        }
        Ok(failed)
    }

    async fn create_directory(&self, policy: &StoragePolicy, source: &str) -> AppResult<()> {
        let mut parent = String::new();
        for segment in source.split('/').filter(|s| !s.is_empty()) {
            let request = self
                .request(policy, Method::POST, &Self::item_url(policy, &parent, Some("children")))
                .await?
                .json(&json!({
                    "name": segment,
                    "folder": {},
                    "@microsoft.graph.conflictBehavior": "fail",
                }));
            match self.send("create folder", source, request).await {
                Ok(_) => {}
                Err(e) if e.is(ErrorKind::Conflict) => {}
                Err(e) => return Err(e),
            }
            parent = if parent.is_empty() {
                segment.to_string()
            } else {
                format!("{parent}/{segment}")
            };
        }
        Ok(())
    }

    async fn delete_directory(&self, policy: &StoragePolicy, source: &str) -> AppResult<()> {
        if source.trim_matches('/').is_empty() {
            return Err(AppError::invalid_operation("Refusing to delete the drive root"));
        }
        let failed = self.delete(policy, &[source.to_string()]).await?;
        if failed.is_empty() {
            Ok(())
        } else {
            Err(AppError::backend_unavailable(format!("Failed to delete folder {source}")))
        }
    }

    async fn rename(&self, policy: &StoragePolicy, from: &str, to: &str) -> AppResult<()> {
        let to = to.trim_matches('/');
        let (parent, name) = match to.rsplit_once('/') {
            Some((parent, name)) => (parent, name),
            None => ("", to),
        };
        self.create_directory(policy, parent).await?;
        let request = self
            .request(policy, Method::PATCH, &Self::item_url(policy, from, None))
            .await?
            .json(&json!({
                "name": name,
                "parentReference": { "path": Self::parent_reference(policy, parent) },
            }));
        self.send("move item", from, request).await?;
        Ok(())
    }

    async fn exists(&self, policy: &StoragePolicy, source: &str) -> AppResult<bool> {
        match self.item(policy, source).await {
            Ok(_) => Ok(true),
            Err(e) if e.is(ErrorKind::NotFound) => Ok(false),
            Err(e) => Err(e),
        }
    }

    async fn stat(&self, policy: &StoragePolicy, source: &str) -> AppResult<ObjectInfo> {
        let item = self.item(policy, source).await?;
        Ok(Self::to_info(source.trim_matches('/').to_string(), item))
    }

    async fn download_url(
        &self,
        policy: &StoragePolicy,
        source: &str,
        _options: &DownloadUrlOptions,
    ) -> AppResult<String> {
        // Graph download URLs are pre-authenticated and short-lived.
        self.item(policy, source)
            .await?
            .download_url
            .ok_or_else(|| AppError::invalid_operation(format!("{} has no download URL", key_name(source))))
    }

    async fn thumbnail(
        &self,
        policy: &StoragePolicy,
        source: &str,
        width: u32,
        height: u32,
    ) -> AppResult<ByteStream> {
        let action = format!("thumbnails/0/{width}x{height}/content");
        let request = self
            .request(policy, Method::GET, &Self::item_url(policy, source, Some(&action)))
            .await?;
        let response = self.send("get thumbnail", source, request).await?;
        Ok(Box::pin(
            response
                .bytes_stream()
                .map(|chunk| chunk.map_err(std::io::Error::other)),
        ))
    }

    async fn begin_client_upload(
        &self,
        policy: &StoragePolicy,
        source: &str,
        _size: u64,
        _chunk_size: u64,
        _expires_in: Duration,
    ) -> AppResult<ClientUpload> {
        let upload_url = self.create_upload_session(policy, source).await?;
        info!(source, "Started client-direct upload session");
        Ok(ClientUpload {
            upload_id: upload_url.clone(),
            urls: vec![upload_url],
        })
    }

    async fn complete_client_upload(
        &self,
        _policy: &StoragePolicy,
        _source: &str,
        _upload_id: &str,
        _tags: &[String],
    ) -> AppResult<()> {
        // Graph commits the item when the last range arrives.
        Ok(())
    }

    async fn abort_client_upload(
        &self,
        _policy: &StoragePolicy,
        source: &str,
        upload_id: &str,
    ) -> AppResult<()> {
        match self.send("cancel upload session", source, self.http.delete(upload_id)).await {
            Ok(_) => Ok(()),
            Err(e) if e.is(ErrorKind::NotFound) => Ok(()),
            Err(e) => Err(e),
        }
    }
}

fn encode_path(path: &str) -> String {
    path.split('/')
        .map(|segment| utf8_percent_encode(segment, NON_ALPHANUMERIC).to_string())
        .collect::<Vec<_>>()
        .join("/")
}

fn map_http_error(operation: &str, err: reqwest::Error) -> AppError {
    AppError::with_source(
        ErrorKind::BackendUnavailable,
        format!("OneDrive {operation} failed"),
        err,
    )
}

/// Map a non-success Graph response onto the error taxonomy.
async fn check_status(operation: &str, source: &str, response: Response) -> AppResult<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    let kind = status_kind(status);
    debug!(operation, source, status = status.as_u16(), body = %body, "Graph request failed");
    Err(AppError::new(
        kind,
        format!("OneDrive {operation} failed for {source}: HTTP {}", status.as_u16()),
    ))
}

fn status_kind(status: StatusCode) -> ErrorKind {
    match status.as_u16() {
        404 => ErrorKind::NotFound,
        409 => ErrorKind::Conflict,
        401 | 403 | 429 => ErrorKind::BackendUnavailable,
        s if s >= 500 => ErrorKind::BackendUnavailable,
        _ => ErrorKind::Validation,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vaultfs_core::config::PolicyConfig;

    fn policy(bucket: &str) -> StoragePolicy {
        StoragePolicy::from_config(&PolicyConfig {
            name: "od".into(),
            policy_type: "onedrive".into(),
            server: String::new(),
            bucket: bucket.into(),
            region: String::new(),
            base_path: "vault".into(),
            access_key: "client".into(),
            secret_key: "secret".into(),
            refresh_token: String::new(),
            is_private: true,
            source_auth: false,
            chunk_size: None,
            upload_mode: None,
            cdn_domain: None,
            max_size: 0,
            allowed_extensions: Vec::new(),
        })
        .unwrap()
    }

    #[test]
    fn test_item_urls() {
        let me = policy("");
        assert_eq!(
            OneDriveStorageProvider::item_url(&me, "vault/a b.txt", Some("content")),
            "https://graph.microsoft.com/v1.0/me/drive/root:/vault/a%20b%2Etxt:/content"
        );
        assert_eq!(
            OneDriveStorageProvider::item_url(&me, "", Some("children")),
            "https://graph.microsoft.com/v1.0/me/drive/root/children"
        );
        let drive = policy("b!xyz");
        assert_eq!(
            OneDriveStorageProvider::item_url(&drive, "/vault/", None),
            "https://graph.microsoft.com/v1.0/drives/b!xyz/root:/vault"
        );
        assert_eq!(
            OneDriveStorageProvider::parent_reference(&drive, "vault/sub"),
            "/drives/b!xyz/root:/vault/sub"
        );
    }

    #[test]
    fn test_status_classification() {
        assert_eq!(status_kind(StatusCode::NOT_FOUND), ErrorKind::NotFound);
        assert_eq!(status_kind(StatusCode::TOO_MANY_REQUESTS), ErrorKind::BackendUnavailable);
        assert_eq!(status_kind(StatusCode::BAD_GATEWAY), ErrorKind::BackendUnavailable);
        assert_eq!(status_kind(StatusCode::BAD_REQUEST), ErrorKind::Validation);
    }

    #[tokio::test]
    async fn test_missing_refresh_token_is_configuration_error() {
        let provider = OneDriveStorageProvider::new(reqwest::Client::new());
        let err = provider.access_token(&policy("")).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::Configuration);
    }
}
