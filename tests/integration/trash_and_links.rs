//! Trash retention, purge through the broker, and direct links.

mod helpers;

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode, header};
use chrono::Utc;
use helpers::{BASE_URL, TestApp, path, read_all};
use tower::ServiceExt;
use uuid::Uuid;

use vaultfs_core::config::WorkerConfig;
use vaultfs_core::error::ErrorKind;
use vaultfs_entity::job::JobPayload;
use vaultfs_entity::job::payload::QUEUE_MAINTENANCE;
use vaultfs_entity::user::{Group, User};
use vaultfs_worker::jobs::CleanupJobHandler;
use vaultfs_worker::{JobExecutor, WorkerRunner};

async fn current_source(app: &TestApp, file_id: Uuid) -> String {
    app.store
        .files
        .current_version(file_id)
        .await
        .unwrap()
        .unwrap()
        .1
        .source
}

fn purge_runner(app: &TestApp) -> WorkerRunner {
    let config = WorkerConfig {
        trash_retention_hours: 0,
        ..WorkerConfig::default()
    };
    let mut executor = JobExecutor::new();
    executor.register(Arc::new(CleanupJobHandler::new(
        app.store.clone(),
        app.vfs.clone(),
        app.uploads.clone(),
        &config,
    )));
    WorkerRunner::new(app.jobs.clone(), Arc::new(executor))
}

async fn group(app: &TestApp, speed_limit: i64) -> Uuid {
    let id = Uuid::new_v4();
    app.store
        .users
        .upsert_group(Group {
            id,
            name: "members".to_string(),
            max_storage: 0,
            speed_limit,
        })
        .await
        .unwrap();
    app.store
        .users
        .upsert_user(User {
            id: app.owner,
            group_id: id,
        })
        .await
        .unwrap();
    id
}

#[tokio::test]
async fn test_trash_purge_releases_only_unreferenced_objects() {
    let app = TestApp::new().await;
    let shared = app.upload("/keep/shared.txt", b"referenced twice").await;
    let junk = app.upload("/junk/old.log", b"nobody needs this").await;
    let shared_source = current_source(&app, shared.file_id).await;
    let junk_source = current_source(&app, junk.file_id).await;

    app.vfs
        .mkdir(&app.ctx(), app.owner, &path("/archive"))
        .await
        .unwrap();
    let copy = app
        .vfs
        .copy(&app.ctx(), app.owner, &path("/keep/shared.txt"), &path("/archive"))
        .await
        .unwrap();

    app.vfs
        .delete(&app.ctx(), app.owner, &path("/keep/shared.txt"))
        .await
        .unwrap();
    assert_eq!(
        app.vfs
            .delete(&app.ctx(), app.owner, &path("/junk"))
            .await
            .unwrap(),
        2
    );

    // Trashed files are invisible but still on disk.
    assert!(
        app.vfs
            .file(&app.ctx(), junk.file_id)
            .await
            .unwrap_err()
            .is(ErrorKind::NotFound)
    );
    assert!(Path::new(&junk_source).exists());

    let runner = purge_runner(&app);
    let job_id = app.jobs.submit(&JobPayload::TrashPurge).await.unwrap();
    let now = Utc::now() + chrono::Duration::seconds(1);
    assert!(runner.run_due(QUEUE_MAINTENANCE, now).await.unwrap() >= 1);
    let job = app.jobs.job(job_id).await.unwrap().unwrap();
    assert_eq!(job.state, vaultfs_entity::job::JobState::Succeeded);

    assert!(!Path::new(&junk_source).exists());
    assert!(Path::new(&shared_source).exists());
    assert!(
        app.store
            .files
            .find_by_id(junk.file_id)
            .await
            .unwrap()
            .is_none()
    );

    let opened = app.vfs.open(&app.ctx(), copy.id).await.unwrap();
    assert_eq!(read_all(opened.body).await, b"referenced twice");
}

#[tokio::test]
async fn test_purge_requires_trashed_file() {
    let app = TestApp::new().await;
    let live = app.upload("/live.txt", b"here").await;
    let file = app.vfs.file(&app.ctx(), live.file_id).await.unwrap();

    let err = app.vfs.purge(&file).await.unwrap_err();
    assert_eq!(err.kind, ErrorKind::InvalidOperation);
}

#[tokio::test]
async fn test_direct_links_are_stable_and_snapshot_settings() {
    let app = TestApp::new().await;
    let group_id = group(&app, 2048).await;
    let uploaded = app.upload("/share/song.mp3", b"not really audio").await;

    let first = app
        .links
        .get_or_create_direct_links(&app.ctx(), group_id, &[uploaded.file_id])
        .await
        .unwrap();
    let second = app
        .links
        .get_or_create_direct_links(&app.ctx(), group_id, &[uploaded.file_id])
        .await
        .unwrap();
    assert_eq!(first.len(), 1);
    assert_eq!(first[0].public_id, second[0].public_id);
    assert_eq!(
        first[0].url,
        format!("{BASE_URL}/f/{}/song%2Emp3", first[0].public_id)
    );

    // Later changes leave the snapshot alone.
    app.store
        .users
        .upsert_group(Group {
            id: group_id,
            name: "members".to_string(),
            max_storage: 0,
            speed_limit: 0,
        })
        .await
        .unwrap();
    app.vfs
        .rename(&app.ctx(), app.owner, &path("/share/song.mp3"), "renamed.mp3")
        .await
        .unwrap();

    let prepared = app.links.prepare_download(&first[0].public_id).await.unwrap();
    assert_eq!(prepared.speed_limit(), 2048);
    assert_eq!(prepared.link.file_name, "song.mp3");
    assert_eq!(prepared.file.name, "renamed.mp3");
}

#[tokio::test]
async fn test_direct_link_download_over_http() {
    let app = TestApp::new().await;
    let group_id = group(&app, 4096).await;
    let uploaded = app.upload("/share/readme.txt", b"hello over a direct link").await;
    let link = app
        .links
        .get_or_create_direct_links(&app.ctx(), group_id, &[uploaded.file_id])
        .await
        .unwrap()
        .remove(0);

    let uri = link.url.strip_prefix(BASE_URL).unwrap().to_string();
    let response = app
        .router()
        .oneshot(Request::get(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let disposition = response.headers()[header::CONTENT_DISPOSITION]
        .to_str()
        .unwrap()
        .to_string();
    assert!(disposition.starts_with("attachment"));
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    assert_eq!(&body[..], b"hello over a direct link");

    let mut downloads = 0;
    for _ in 0..50 {
        downloads = app
            .store
            .links
            .find_by_public_id(&link.public_id)
            .await
            .unwrap()
            .unwrap()
            .downloads;
        if downloads == 1 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(downloads, 1);
}

#[tokio::test]
async fn test_links_to_directories_and_unknown_ids_are_rejected() {
    let app = TestApp::new().await;
    let group_id = group(&app, 0).await;
    let dir = app
        .vfs
        .mkdir(&app.ctx(), app.owner, &path("/folder"))
        .await
        .unwrap();

    let err = app
        .links
        .get_or_create_direct_links(&app.ctx(), group_id, &[dir.id])
        .await
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::InvalidOperation);

    let response = app
        .router()
        .oneshot(
            Request::get("/f/doesnotexist/file.txt")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_link_to_trashed_file_stops_resolving() {
    let app = TestApp::new().await;
    let group_id = group(&app, 0).await;
    let uploaded = app.upload("/tmp/draft.txt", b"draft").await;
    let link = app
        .links
        .get_or_create_direct_links(&app.ctx(), group_id, &[uploaded.file_id])
        .await
        .unwrap()
        .remove(0);

    app.vfs
        .delete(&app.ctx(), app.owner, &path("/tmp/draft.txt"))
        .await
        .unwrap();
    let err = app
        .links
        .prepare_download(&link.public_id)
        .await
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::NotFound);
}
