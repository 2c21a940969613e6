//! Thumbnail generation, storage and the signed thumbnail endpoint.

mod helpers;

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, StatusCode, header};
use helpers::{BASE_URL, TestApp, path};
use tower::ServiceExt;

use vaultfs_core::Settings;
use vaultfs_core::config::{SigningConfig, ThumbnailConfig};
use vaultfs_core::error::ErrorKind;
use vaultfs_core::result::AppResult;
use vaultfs_core::traits::JobEnqueuer;
use vaultfs_entity::file::EntityKind;
use vaultfs_entity::job::JobState;
use vaultfs_service::ThumbnailService;
use vaultfs_storage::thumbnail::{GenerateRequest, Generator, GeneratorDefaults, ThumbnailPipeline};

fn png(width: u32, height: u32) -> Vec<u8> {
    let mut out = Vec::new();
    image::RgbImage::from_pixel(width, height, image::Rgb([200, 40, 90]))
        .write_to(&mut std::io::Cursor::new(&mut out), image::ImageFormat::Png)
        .unwrap();
    out
}

/// Keep generation in-process.
fn builtin_only(app: &TestApp) {
    for name in ["vips", "ffmpeg", "libraw", "music_cover"] {
        app.settings.set(format!("thumb_{name}_enabled"), "false");
    }
}

async fn fetch(app: &TestApp, url: &str) -> (StatusCode, axum::http::HeaderMap, Vec<u8>) {
    let uri = url.strip_prefix(BASE_URL).unwrap();
    let response = app
        .router()
        .oneshot(Request::get(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let headers = response.headers().clone();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, headers, body.to_vec())
}

#[tokio::test]
async fn test_png_thumbnail_is_stored_and_served() {
    let app = TestApp::new().await;
    builtin_only(&app);
    let uploaded = app.upload("/pics/banner.png", &png(800, 600)).await;

    let url = app
        .thumbnails
        .thumbnail_url(&app.ctx(), uploaded.file_id)
        .await
        .unwrap();
    let (status, _, _) = fetch(&app, &url).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let thumb = app.thumbnails.generate(uploaded.file_id).await.unwrap();
    assert_eq!(thumb.kind, EntityKind::Thumbnail);
    assert_eq!(
        app.store
            .files
            .thumbnail_of(uploaded.file_id)
            .await
            .unwrap()
            .map(|e| e.id),
        Some(thumb.id)
    );

    let (status, headers, body) = fetch(&app, &url).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(headers[header::CONTENT_TYPE], "image/jpeg");
    let decoded = image::load_from_memory(&body).unwrap();
    assert_eq!((decoded.width(), decoded.height()), (400, 300));

    // The thumbnail is not a version.
    let versions = app.vfs.versions(&app.ctx(), uploaded.file_id).await.unwrap();
    assert_eq!(versions.len(), 1);
    assert_eq!(versions[0].entity_id, uploaded.entity_id);
}

#[tokio::test]
async fn test_missing_thumbnail_queues_generation() {
    let app = TestApp::new().await;
    builtin_only(&app);
    let uploaded = app.upload("/pics/later.png", &png(64, 64)).await;

    app.thumbnails
        .thumbnail_url(&app.ctx(), uploaded.file_id)
        .await
        .unwrap();

    // One from the upload, one from the URL request.
    let pending = app
        .jobs
        .repository()
        .list_by_state(JobState::Pending)
        .await
        .unwrap();
    let queued = pending
        .iter()
        .filter(|j| j.job_type == "thumbnail_generation")
        .count();
    assert_eq!(queued, 2);
}

#[tokio::test]
async fn test_unsupported_file_is_flagged_unavailable() {
    let app = TestApp::new().await;
    builtin_only(&app);
    let uploaded = app.upload("/docs/data.xyz", b"not an image").await;

    let err = app.thumbnails.generate(uploaded.file_id).await.unwrap_err();
    assert_eq!(err.kind, ErrorKind::FeatureNotSupported);

    let file = app.vfs.file(&app.ctx(), uploaded.file_id).await.unwrap();
    assert!(file.thumb_unavailable);
    let err = app
        .thumbnails
        .thumbnail_url(&app.ctx(), uploaded.file_id)
        .await
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::FeatureNotSupported);

    // A new version clears the flag.
    app.upload("/docs/data.xyz", b"still not an image").await;
    let file = app.vfs.file(&app.ctx(), uploaded.file_id).await.unwrap();
    assert!(!file.thumb_unavailable);
}

#[tokio::test]
async fn test_new_version_replaces_thumbnail_object() {
    let app = TestApp::new().await;
    builtin_only(&app);
    let first = app.upload("/pics/cycle.png", &png(100, 100)).await;
    let old = app.thumbnails.generate(first.file_id).await.unwrap();
    assert!(std::path::Path::new(&old.source).exists());

    app.upload("/pics/cycle.png", &png(120, 90)).await;
    let new = app.thumbnails.generate(first.file_id).await.unwrap();

    assert_ne!(old.id, new.id);
    assert!(!std::path::Path::new(&old.source).exists());
    assert!(std::path::Path::new(&new.source).exists());
}

#[tokio::test]
async fn test_copy_keeps_its_thumbnail_after_source_purge() {
    let app = TestApp::new().await;
    builtin_only(&app);
    let ctx = app.ctx();
    let original = app.upload("/a/pic.png", &png(200, 150)).await;
    app.vfs.mkdir(&ctx, app.owner, &path("/b")).await.unwrap();
    let copy = app
        .vfs
        .copy(&ctx, app.owner, &path("/a/pic.png"), &path("/b"))
        .await
        .unwrap();

    let original_thumb = app.thumbnails.generate(original.file_id).await.unwrap();
    let copy_thumb = app.thumbnails.generate(copy.id).await.unwrap();
    assert_ne!(original_thumb.source, copy_thumb.source);

    app.vfs
        .delete(&ctx, app.owner, &path("/a/pic.png"))
        .await
        .unwrap();
    let trashed = app
        .store
        .files
        .find_by_id(original.file_id)
        .await
        .unwrap()
        .unwrap();
    app.vfs.purge(&trashed).await.unwrap();

    assert!(!std::path::Path::new(&original_thumb.source).exists());
    let (entity, body) = app.thumbnails.open(copy.id).await.unwrap();
    assert_eq!(entity.id, copy_thumb.id);
    let decoded = image::load_from_memory(&helpers::read_all(body).await).unwrap();
    assert!(decoded.width() <= 400 && decoded.height() <= 300);

    let opened = app.vfs.open(&ctx, copy.id).await.unwrap();
    assert_eq!(helpers::read_all(opened.body).await, png(200, 150));
}

#[derive(Debug)]
struct Stub {
    name: &'static str,
    extensions: &'static str,
    max_size: u64,
    calls: AtomicUsize,
}

#[async_trait]
impl Generator for Stub {
    fn name(&self) -> &'static str {
        self.name
    }

    fn defaults(&self) -> GeneratorDefaults {
        GeneratorDefaults {
            enabled: true,
            extensions: self.extensions,
            max_size: self.max_size,
            tool_path: "",
        }
    }

    async fn generate(&self, request: &GenerateRequest) -> AppResult<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::fs::write(&request.output, format!("rendered by {}", self.name)).await?;
        Ok(())
    }
}

#[tokio::test]
async fn test_oversized_raw_falls_back_to_raw_extractor() {
    let app = TestApp::new().await;
    let vips = Arc::new(Stub {
        name: "vips",
        extensions: "jpg,png,dng",
        max_size: 8,
        calls: AtomicUsize::new(0),
    });
    let libraw = Arc::new(Stub {
        name: "libraw",
        extensions: "dng,nef,cr2",
        max_size: 0,
        calls: AtomicUsize::new(0),
    });
    let pipeline = ThumbnailPipeline::with_generators(
        vec![vips.clone(), libraw.clone()],
        Arc::new(Settings::default()),
        ThumbnailConfig::default(),
    );
    let jobs: Arc<dyn JobEnqueuer> = Arc::new(app.jobs.clone());
    let thumbnails = ThumbnailService::new(
        app.store.clone(),
        app.vfs.clone(),
        pipeline,
        app.signer.clone(),
        jobs,
        SigningConfig::default(),
    );

    let uploaded = app.upload("/raw/IMG_0001.DNG", &[0u8; 64]).await;
    let thumb = thumbnails.generate(uploaded.file_id).await.unwrap();

    assert_eq!(vips.calls.load(Ordering::SeqCst), 0);
    assert_eq!(libraw.calls.load(Ordering::SeqCst), 1);
    let (_, body) = thumbnails.open(uploaded.file_id).await.unwrap();
    assert_eq!(helpers::read_all(body).await, b"rendered by libraw");
    assert_eq!(thumb.size, "rendered by libraw".len() as i64);

    let url = thumbnails
        .thumbnail_url(&app.ctx(), uploaded.file_id)
        .await
        .unwrap();
    assert!(url.contains(&format!("/api/v1/files/{}/thumbnail?sign=", uploaded.file_id)));
}
