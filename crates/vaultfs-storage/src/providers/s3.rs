//! S3-compatible object storage provider.
//!
//! Serves both `s3` policies (AWS or any S3-compatible endpoint, path
//! style when a custom endpoint is set) and `oss` policies (Aliyun OSS,
//! Tencent COS) which speak the S3 API in virtual-host style. One SDK
//! client is built per policy and cached until the policy row changes.

use std::time::Duration;

use async_trait::async_trait;
use aws_sdk_s3::Client;
use aws_sdk_s3::config::http::HttpResponse;
use aws_sdk_s3::config::{BehaviorVersion, Builder, Credentials, Region};
use aws_sdk_s3::error::SdkError;
use aws_sdk_s3::presigning::PresigningConfig;
use aws_sdk_s3::primitives::ByteStream as S3Body;
use aws_sdk_s3::types::{CompletedMultipartUpload, CompletedPart, Delete, ObjectIdentifier};
use bytes::{Bytes, BytesMut};
use chrono::{DateTime, TimeZone, Utc};
use dashmap::DashMap;
use futures::StreamExt;
use tokio_util::io::ReaderStream;
use tracing::{debug, info, warn};
use uuid::Uuid;

use vaultfs_core::error::{AppError, ErrorKind};
use vaultfs_core::result::AppResult;
use vaultfs_entity::storage::{PolicyType, StoragePolicy};

use crate::provider::{
    ByteStream, ClientUpload, DownloadUrlOptions, ObjectInfo, StorageProvider, UploadedObject,
    guess_mime, key_name,
};

/// Smallest part S3 accepts for every part but the last.
const MIN_PART_SIZE: usize = 5 * 1024 * 1024;
/// Objects removed per `DeleteObjects` call.
const DELETE_BATCH: usize = 1000;

/// S3-compatible storage provider.
#[derive(Debug)]
pub struct S3StorageProvider {
    /// Which policy type this instance serves (`s3` or `oss`).
    policy_type: PolicyType,
    /// Cached clients keyed by policy, tagged with the row's `updated_at`.
    clients: DashMap<Uuid, (DateTime<Utc>, Client)>,
}

impl S3StorageProvider {
    /// Create a provider serving policies of `policy_type`.
    pub fn new(policy_type: PolicyType) -> Self {
        Self {
            policy_type,
            clients: DashMap::new(),
        }
    }

    fn client(&self, policy: &StoragePolicy) -> Client {
        if let Some(entry) = self.clients.get(&policy.id) {
            if entry.0 == policy.updated_at {
                return entry.1.clone();
            }
        }

        info!(
            policy_id = %policy.id,
            endpoint = %policy.server,
            bucket = %policy.bucket,
            "Initializing S3 client"
        );
        let credentials = Credentials::new(
            policy.access_key.clone(),
            policy.secret_key.clone(),
            None,
            None,
            "vaultfs-policy",
        );
        let region = if policy.region.is_empty() {
            "us-east-1".to_string()
        } else {
            policy.region.clone()
        };
        let mut builder = Builder::new()
            .behavior_version(BehaviorVersion::latest())
            .region(Region::new(region))
            .credentials_provider(credentials)
            .force_path_style(self.policy_type == PolicyType::S3 && !policy.server.is_empty());
        if !policy.server.is_empty() {
            builder = builder.endpoint_url(policy.server.clone());
        }
        let client = Client::from_conf(builder.build());
        self.clients
            .insert(policy.id, (policy.updated_at, client.clone()));
        client
    }

    /// Prefix form of a directory key: no leading slash, one trailing slash.
    fn dir_prefix(source: &str) -> String {
        let trimmed = source.trim_matches('/');
        if trimmed.is_empty() {
            String::new()
        } else {
            format!("{trimmed}/")
        }
    }

    fn object_key(source: &str) -> &str {
        source.trim_start_matches('/')
    }

    /// Unauthenticated URL of an object in a public bucket.
    fn public_url(&self, policy: &StoragePolicy, key: &str) -> String {
        let encoded = encode_key(key);
        if let Some(cdn) = policy.settings.cdn_domain.as_deref().filter(|d| !d.is_empty()) {
            return format!("{}/{encoded}", cdn.trim_end_matches('/'));
        }
        if policy.server.is_empty() {
            let region = if policy.region.is_empty() { "us-east-1" } else { &policy.region };
            return format!("https://{}.s3.{region}.amazonaws.com/{encoded}", policy.bucket);
        }
        let server = policy.server.trim_end_matches('/');
        match self.policy_type {
            PolicyType::Oss => {
                let (scheme, host) = server.split_once("://").unwrap_or(("https", server));
                format!("{scheme}://{}.{host}/{encoded}", policy.bucket)
            }
            _ => format!("{server}/{}/{encoded}", policy.bucket),
        }
    }

    async fn put_single(
        &self,
        client: &Client,
        policy: &StoragePolicy,
        key: &str,
        data: Bytes,
    ) -> AppResult<()> {
        client
            .put_object()
            .bucket(&policy.bucket)
            .key(key)
            .content_type(guess_mime(key))
            .body(S3Body::from(data))
            .send()
            .await
            .map_err(|e| map_sdk_error("put object", key, e))?;
        Ok(())
    }

    async fn upload_multipart(
        &self,
        client: &Client,
        policy: &StoragePolicy,
        key: &str,
        first: Bytes,
        body: &mut ByteStream,
    ) -> AppResult<u64> {
        let created = client
            .create_multipart_upload()
            .bucket(&policy.bucket)
            .key(key)
            .content_type(guess_mime(key))
            .send()
            .await
            .map_err(|e| map_sdk_error("create multipart upload", key, e))?;
        let upload_id = created
            .upload_id()
            .ok_or_else(|| AppError::backend_unavailable("Backend returned no upload id"))?
            .to_string();

        let result = self
            .upload_parts(client, policy, key, &upload_id, first, body)
            .await;
        match result {
            Ok(size) => Ok(size),
            Err(e) => {
                if let Err(abort_err) = self
                    .abort_client_upload(policy, key, &upload_id)
                    .await
                {
                    warn!(key, error = %abort_err, "Failed to abort multipart upload");
                }
                Err(e)
            }
        }
    }

    async fn upload_parts(
        &self,
        client: &Client,
        policy: &StoragePolicy,
        key: &str,
        upload_id: &str,
        first: Bytes,
        body: &mut ByteStream,
    ) -> AppResult<u64> {
        let mut parts = Vec::new();
        let mut buffer = BytesMut::from(&first[..]);
        let mut total = 0u64;
        let mut finished = false;

        while !finished {
            while buffer.len() < MIN_PART_SIZE {
                match body.next().await {
                    Some(chunk) => buffer.extend_from_slice(&chunk.map_err(|e| {
                        AppError::with_source(ErrorKind::BackendUnavailable, "Stream read error", e)
                    })?),
                    None => {
                        finished = true;
                        break;
                    }
                }
            }
            if buffer.is_empty() {
                break;
            }

            let part = buffer.split().freeze();
            let part_number = parts.len() as i32 + 1;
            total += part.len() as u64;
            let uploaded = client
                .upload_part()
                .bucket(&policy.bucket)
                .key(key)
                .upload_id(upload_id)
                .part_number(part_number)
                .body(S3Body::from(part))
                .send()
                .await
                .map_err(|e| map_sdk_error("upload part", key, e))?;
            debug!(key, part_number, "Uploaded part");
            parts.push(
                CompletedPart::builder()
                    .set_e_tag(uploaded.e_tag().map(str::to_string))
                    .part_number(part_number)
                    .build(),
            );
        }

        client
            .complete_multipart_upload()
            .bucket(&policy.bucket)
            .key(key)
            .upload_id(upload_id)
            .multipart_upload(
                CompletedMultipartUpload::builder()
                    .set_parts(Some(parts))
                    .build(),
            )
            .send()
            .await
            .map_err(|e| map_sdk_error("complete multipart upload", key, e))?;
        Ok(total)
    }

    async fn delete_keys(
        &self,
        client: &Client,
        policy: &StoragePolicy,
        keys: Vec<String>,
    ) -> AppResult<Vec<String>> {
        let mut failed = Vec::new();
        for batch in keys.chunks(DELETE_BATCH) {
            let objects = batch
                .iter()
                .map(|key| ObjectIdentifier::builder().key(key).build())
                .collect::<Result<Vec<_>, _>>()
                .map_err(|e| AppError::with_source(ErrorKind::Internal, "Invalid object key", e))?;
            let delete = Delete::builder()
                .set_objects(Some(objects))
                .quiet(true)
                .build()
                .map_err(|e| AppError::with_source(ErrorKind::Internal, "Invalid delete request", e))?;
            let response = client
                .delete_objects()
                .bucket(&policy.bucket)
                .delete(delete)
                .send()
                .await
                .map_err(|e| map_sdk_error("delete objects", &policy.bucket, e))?;
            for error in response.errors() {
                if let Some(key) = error.key() {
                    warn!(key, code = ?error.code(), "Failed to delete object");
                    failed.push(key.to_string());
                }
            }
        }
        Ok(failed)
    }

    async fn list_all_keys(
        &self,
        client: &Client,
        policy: &StoragePolicy,
        prefix: &str,
    ) -> AppResult<Vec<String>> {
        let mut keys = Vec::new();
        let mut token: Option<String> = None;
        loop {
            let page = client
                .list_objects_v2()
                .bucket(&policy.bucket)
                .prefix(prefix)
                .set_continuation_token(token.take())
                .send()
                .await
                .map_err(|e| map_sdk_error("list objects", prefix, e))?;
            keys.extend(page.contents().iter().filter_map(|o| o.key().map(str::to_string)));
            match page.next_continuation_token() {
                Some(next) if page.is_truncated().unwrap_or(false) => token = Some(next.to_string()),
                _ => break,
            }
        }
        Ok(keys)
    }

    fn presigning(expires_in: Duration) -> AppResult<PresigningConfig> {
        PresigningConfig::expires_in(expires_in)
            .map_err(|e| AppError::with_source(ErrorKind::Validation, "Invalid URL lifetime", e))
    }
}

#[async_trait]
impl StorageProvider for S3StorageProvider {
    fn provider_type(&self) -> PolicyType {
        self.policy_type
    }

    async fn health_check(&self, policy: &StoragePolicy) -> AppResult<()> {
        self.client(policy)
            .head_bucket()
            .bucket(&policy.bucket)
            .send()
            .await
            .map_err(|e| map_sdk_error("head bucket", &policy.bucket, e))?;
        Ok(())
    }

    async fn upload(
        &self,
        policy: &StoragePolicy,
        source: &str,
        _size: u64,
        mut body: ByteStream,
    ) -> AppResult<UploadedObject> {
        let client = self.client(policy);
        let key = Self::object_key(source);

        // Buffer up to one part; small objects go in a single PUT.
        let mut head = BytesMut::new();
        let mut exhausted = false;
        while head.len() < MIN_PART_SIZE {
            match body.next().await {
                Some(chunk) => head.extend_from_slice(&chunk.map_err(|e| {
                    AppError::with_source(ErrorKind::BackendUnavailable, "Stream read error", e)
                })?),
                None => {
                    exhausted = true;
                    break;
                }
            }
        }

        let size = if exhausted {
            let size = head.len() as u64;
            self.put_single(&client, policy, key, head.freeze()).await?;
            size
        } else {
            self.upload_multipart(&client, policy, key, head.freeze(), &mut body)
                .await?
        };

        debug!(key, bytes = size, "Uploaded object");
        Ok(UploadedObject {
            source: key.to_string(),
            size,
            mime_type: guess_mime(key),
            checksum: None,
        })
    }

    async fn get(&self, policy: &StoragePolicy, source: &str) -> AppResult<ByteStream> {
        let key = Self::object_key(source);
        let object = self
            .client(policy)
            .get_object()
            .bucket(&policy.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| map_sdk_error("get object", key, e))?;
        Ok(Box::pin(ReaderStream::new(object.body.into_async_read())))
    }

    async fn list(&self, policy: &StoragePolicy, source: &str) -> AppResult<Vec<ObjectInfo>> {
        let client = self.client(policy);
        let prefix = Self::dir_prefix(source);
        let mut entries = Vec::new();
        let mut token: Option<String> = None;

        loop {
            let page = client
                .list_objects_v2()
                .bucket(&policy.bucket)
                .prefix(&prefix)
                .delimiter("/")
                .set_continuation_token(token.take())
                .send()
                .await
                .map_err(|e| map_sdk_error("list objects", &prefix, e))?;

            for common in page.common_prefixes() {
                if let Some(p) = common.prefix() {
                    entries.push(ObjectInfo {
                        source: p.trim_end_matches('/').to_string(),
                        name: key_name(p).to_string(),
                        size: 0,
                        is_dir: true,
                        mime_type: None,
                        modified: None,
                    });
                }
            }
            for object in page.contents() {
                let Some(key) = object.key() else { continue };
                // Directory placeholder objects.
                if key == prefix || key.ends_with('/') {
                    continue;
                }
                entries.push(ObjectInfo {
                    source: key.to_string(),
                    name: key_name(key).to_string(),
                    size: object.size().unwrap_or(0).max(0) as u64,
                    is_dir: false,
                    mime_type: Some(guess_mime(key)),
                    modified: object.last_modified().and_then(|t| to_chrono(t.secs())),
                });
            }

            match page.next_continuation_token() {
                Some(next) if page.is_truncated().unwrap_or(false) => token = Some(next.to_string()),
                _ => break,
            }
        }

        entries.sort_by(|a, b| b.is_dir.cmp(&a.is_dir).then(a.name.cmp(&b.name)));
        Ok(entries)
    }

    async fn delete(&self, policy: &StoragePolicy, sources: &[String]) -> AppResult<Vec<String>> {
        if sources.is_empty() {
            return Ok(Vec::new());
        }
        let client = self.client(policy);
        let keys = sources
            .iter()
            .map(|s| Self::object_key(s).to_string())
            .collect();
        self.delete_keys(&client, policy, keys).await
    }

    async fn create_directory(&self, policy: &StoragePolicy, source: &str) -> AppResult<()> {
        let prefix = Self::dir_prefix(source);
        if prefix.is_empty() {
            return Ok(());
        }
        self.put_single(&self.client(policy), policy, &prefix, Bytes::new())
            .await
    }

    async fn delete_directory(&self, policy: &StoragePolicy, source: &str) -> AppResult<()> {
        let client = self.client(policy);
        let prefix = Self::dir_prefix(source);
        if prefix.is_empty() {
            return Err(AppError::invalid_operation("Refusing to delete the bucket root"));
        }
        let keys = self.list_all_keys(&client, policy, &prefix).await?;
        let failed = self.delete_keys(&client, policy, keys).await?;
        if !failed.is_empty() {
            return Err(AppError::backend_unavailable(format!(
                "{} objects under {prefix} could not be deleted",
                failed.len()
            )));
        }
        Ok(())
    }

    async fn rename(&self, policy: &StoragePolicy, from: &str, to: &str) -> AppResult<()> {
        let client = self.client(policy);
        let from_key = Self::object_key(from);
        let to_key = Self::object_key(to);

        // A key with children is a directory: move every object under it.
        let from_prefix = Self::dir_prefix(from_key);
        let children = self.list_all_keys(&client, policy, &from_prefix).await?;
        let moves: Vec<(String, String)> = if children.is_empty() {
            vec![(from_key.to_string(), to_key.to_string())]
        } else {
            let to_prefix = Self::dir_prefix(to_key);
            children
                .into_iter()
                .map(|k| {
                    let target = format!("{to_prefix}{}", &k[from_prefix.len()..]);
                    (k, target)
                })
                .collect()
        };

        for (src, dst) in &moves {
            client
                .copy_object()
                .bucket(&policy.bucket)
                .copy_source(format!("{}/{}", policy.bucket, encode_key(src)))
                .key(dst)
                .send()
                .await
                .map_err(|e| map_sdk_error("copy object", src, e))?;
        }
        let sources = moves.into_iter().map(|(src, _)| src).collect();
        let failed = self.delete_keys(&client, policy, sources).await?;
        if !failed.is_empty() {
            warn!(from = from_key, leftover = failed.len(), "Rename left source objects behind");
        }
        Ok(())
    }

    async fn exists(&self, policy: &StoragePolicy, source: &str) -> AppResult<bool> {
        match self.stat(policy, source).await {
            Ok(_) => Ok(true),
            Err(e) if e.is(ErrorKind::NotFound) => Ok(false),
            Err(e) => Err(e),
        }
    }

    async fn stat(&self, policy: &StoragePolicy, source: &str) -> AppResult<ObjectInfo> {
        let key = Self::object_key(source);
        let head = self
            .client(policy)
            .head_object()
            .bucket(&policy.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| map_sdk_error("head object", key, e))?;
        Ok(ObjectInfo {
            source: key.to_string(),
            name: key_name(key).to_string(),
            size: head.content_length().unwrap_or(0).max(0) as u64,
            is_dir: key.ends_with('/'),
            mime_type: head.content_type().map(str::to_string),
            modified: head.last_modified().and_then(|t| to_chrono(t.secs())),
        })
    }

    async fn download_url(
        &self,
        policy: &StoragePolicy,
        source: &str,
        options: &DownloadUrlOptions,
    ) -> AppResult<String> {
        let key = Self::object_key(source);
        if !policy.requires_signed_urls() {
            return Ok(self.public_url(policy, key));
        }

        let disposition = format!(
            "attachment; filename*=UTF-8''{}",
            percent_encoding::utf8_percent_encode(
                &options.file_name,
                percent_encoding::NON_ALPHANUMERIC
            )
        );
        let presigned = self
            .client(policy)
            .get_object()
            .bucket(&policy.bucket)
            .key(key)
            .response_content_disposition(disposition)
            .presigned(Self::presigning(options.expires_in)?)
            .await
            .map_err(|e| map_sdk_error("presign get", key, e))?;
        Ok(presigned.uri().to_string())
    }

    async fn begin_client_upload(
        &self,
        policy: &StoragePolicy,
        source: &str,
        size: u64,
        chunk_size: u64,
        expires_in: Duration,
    ) -> AppResult<ClientUpload> {
        let client = self.client(policy);
        let key = Self::object_key(source);
        let created = client
            .create_multipart_upload()
            .bucket(&policy.bucket)
            .key(key)
            .content_type(guess_mime(key))
            .send()
            .await
            .map_err(|e| map_sdk_error("create multipart upload", key, e))?;
        let upload_id = created
            .upload_id()
            .ok_or_else(|| AppError::backend_unavailable("Backend returned no upload id"))?
            .to_string();

        let parts = vaultfs_entity::upload::chunk_count(size, chunk_size).max(1);
        let mut urls = Vec::with_capacity(parts as usize);
        for part_number in 1..=parts as i32 {
            let presigned = client
                .upload_part()
                .bucket(&policy.bucket)
                .key(key)
                .upload_id(&upload_id)
                .part_number(part_number)
                .presigned(Self::presigning(expires_in)?)
                .await
                .map_err(|e| map_sdk_error("presign upload part", key, e))?;
            urls.push(presigned.uri().to_string());
        }

        info!(key, parts, "Started client-direct multipart upload");
        Ok(ClientUpload { upload_id, urls })
    }

    async fn complete_client_upload(
        &self,
        policy: &StoragePolicy,
        source: &str,
        upload_id: &str,
        tags: &[String],
    ) -> AppResult<()> {
        let key = Self::object_key(source);
        let mut parts = Vec::with_capacity(tags.len());
        for (index, tag) in tags.iter().enumerate() {
            if tag.is_empty() {
                return Err(AppError::validation(format!("Part {index} has no ETag")));
            }
            parts.push(
                CompletedPart::builder()
                    .e_tag(tag)
                    .part_number(index as i32 + 1)
                    .build(),
            );
        }

        self.client(policy)
            .complete_multipart_upload()
            .bucket(&policy.bucket)
            .key(key)
            .upload_id(upload_id)
            .multipart_upload(
                CompletedMultipartUpload::builder()
                    .set_parts(Some(parts))
                    .build(),
            )
            .send()
            .await
            .map_err(|e| map_sdk_error("complete multipart upload", key, e))?;
        Ok(())
    }

    async fn abort_client_upload(
        &self,
        policy: &StoragePolicy,
        source: &str,
        upload_id: &str,
    ) -> AppResult<()> {
        let key = Self::object_key(source);
        match self
            .client(policy)
            .abort_multipart_upload()
            .bucket(&policy.bucket)
            .key(key)
            .upload_id(upload_id)
            .send()
            .await
        {
            Ok(_) => Ok(()),
            Err(e) => {
                let err = map_sdk_error("abort multipart upload", key, e);
                if err.is(ErrorKind::NotFound) { Ok(()) } else { Err(err) }
            }
        }
    }
}

/// Map an SDK failure onto the error taxonomy.
///
/// Timeouts, dispatch failures, throttling and 5xx are transient; 404 is
/// `NotFound`; other 4xx are request errors.
fn map_sdk_error<E>(operation: &str, key: &str, err: SdkError<E, HttpResponse>) -> AppError
where
    E: std::error::Error + Send + Sync + 'static,
{
    let status = err.raw_response().map(|r| r.status().as_u16());
    let kind = match (&err, status) {
        (SdkError::TimeoutError(_) | SdkError::DispatchFailure(_), _) => {
            ErrorKind::BackendUnavailable
        }
        (_, Some(404)) => ErrorKind::NotFound,
        (_, Some(429)) => ErrorKind::BackendUnavailable,
        (_, Some(s)) if s >= 500 => ErrorKind::BackendUnavailable,
        (_, Some(401 | 403)) => ErrorKind::BackendUnavailable,
        (_, Some(_)) => ErrorKind::Validation,
        (_, None) => ErrorKind::BackendUnavailable,
    };
    AppError::with_source(kind, format!("S3 {operation} failed for {key}"), err)
}

fn encode_key(key: &str) -> String {
    key.split('/')
        .map(|segment| {
            percent_encoding::utf8_percent_encode(segment, percent_encoding::NON_ALPHANUMERIC)
                .to_string()
        })
        .collect::<Vec<_>>()
        .join("/")
}

fn to_chrono(secs: i64) -> Option<DateTime<Utc>> {
    Utc.timestamp_opt(secs, 0).single()
}
