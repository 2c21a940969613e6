//! Version history: exactly one current version per file.

mod helpers;

use helpers::{TestApp, path, read_all};
use vaultfs_core::error::ErrorKind;
use vaultfs_entity::file::EntityKind;

#[tokio::test]
async fn test_overwrite_keeps_exactly_one_current_version() {
    let app = TestApp::new().await;
    let first = app.upload("/docs/report.txt", b"first draft").await;
    let second = app.upload("/docs/report.txt", b"second draft, longer").await;

    assert_eq!(first.file_id, second.file_id);
    assert_ne!(first.entity_id, second.entity_id);

    let versions = app.vfs.versions(&app.ctx(), first.file_id).await.unwrap();
    assert_eq!(versions.len(), 2);
    assert!(versions.iter().all(|v| v.kind == EntityKind::Version));
    let current: Vec<_> = versions.iter().filter(|v| v.is_current).collect();
    assert_eq!(current.len(), 1);
    assert_eq!(current[0].entity_id, second.entity_id);

    let file = app.vfs.file(&app.ctx(), first.file_id).await.unwrap();
    assert_eq!(file.primary_entity_id, Some(second.entity_id));
    assert_eq!(file.size, 20);

    let opened = app.vfs.open(&app.ctx(), first.file_id).await.unwrap();
    assert_eq!(read_all(opened.body).await, b"second draft, longer");
}

#[tokio::test]
async fn test_restore_version_swaps_current() {
    let app = TestApp::new().await;
    let first = app.upload("/notes.md", b"v1").await;
    app.upload("/notes.md", b"version two").await;

    let versions = app.vfs.versions(&app.ctx(), first.file_id).await.unwrap();
    let old = versions
        .iter()
        .find(|v| v.entity_id == first.entity_id)
        .unwrap();

    let restored = app
        .vfs
        .restore_version(&app.ctx(), first.file_id, old.id)
        .await
        .unwrap();
    assert_eq!(restored.primary_entity_id, Some(first.entity_id));
    assert_eq!(restored.size, 2);

    let versions = app.vfs.versions(&app.ctx(), first.file_id).await.unwrap();
    assert_eq!(versions.iter().filter(|v| v.is_current).count(), 1);
    let opened = app.vfs.open(&app.ctx(), first.file_id).await.unwrap();
    assert_eq!(read_all(opened.body).await, b"v1");
}

#[tokio::test]
async fn test_copy_shares_current_object() {
    let app = TestApp::new().await;
    let original = app.upload("/a/photo.bin", b"shared bytes").await;
    app.vfs
        .mkdir(&app.ctx(), app.owner, &path("/b"))
        .await
        .unwrap();

    let copy = app
        .vfs
        .copy(&app.ctx(), app.owner, &path("/a/photo.bin"), &path("/b"))
        .await
        .unwrap();
    assert_ne!(copy.id, original.file_id);

    let versions = app.vfs.versions(&app.ctx(), copy.id).await.unwrap();
    assert_eq!(versions.len(), 1);
    assert!(versions[0].is_current);
    assert_eq!(versions[0].entity_id, original.entity_id);
}

#[tokio::test]
async fn test_upload_over_directory_conflicts() {
    let app = TestApp::new().await;
    app.vfs
        .mkdir(&app.ctx(), app.owner, &path("/photos"))
        .await
        .unwrap();

    let err = app
        .uploads
        .open(
            &app.ctx(),
            vaultfs_service::OpenUpload {
                owner_id: app.owner,
                path: path("/photos"),
                size: 4,
                policy_id: None,
            },
        )
        .await
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::Conflict);
}
