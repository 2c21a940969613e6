//! Concurrent structural mutations on the same path.

mod helpers;

use std::time::Duration;

use helpers::{TestApp, path};
use vaultfs_core::error::ErrorKind;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_rename_and_delete_race_has_one_winner() {
    let app = TestApp::new().await;

    for round in 0..20 {
        let name = format!("/race-{round}.txt");
        app.upload(&name, b"contended").await;

        let renamer = {
            let vfs = app.vfs.clone();
            let ctx = app.ctx();
            let owner = app.owner;
            let from = path(&name);
            let to = format!("renamed-{round}.txt");
            tokio::spawn(async move { vfs.rename(&ctx, owner, &from, &to).await })
        };
        let deleter = {
            let vfs = app.vfs.clone();
            let ctx = app.ctx();
            let owner = app.owner;
            let target = path(&name);
            tokio::spawn(async move { vfs.delete(&ctx, owner, &target).await })
        };

        let renamed = renamer.await.unwrap();
        let deleted = deleter.await.unwrap();
        match (&renamed, &deleted) {
            (Ok(_), Err(e)) | (Err(e), Ok(_)) => assert_eq!(e.kind, ErrorKind::NotFound),
            _ => panic!("round {round}: rename={renamed:?} delete={deleted:?}"),
        }

        let survivor = app
            .vfs
            .stat(&app.ctx(), app.owner, &path(&format!("/renamed-{round}.txt")))
            .await;
        assert_eq!(survivor.is_ok(), renamed.is_ok());
    }

    assert!(app.vfs.locker().is_empty());
}

#[tokio::test]
async fn test_delete_waits_for_held_path_lock() {
    let app = TestApp::new().await;
    app.upload("/held.txt", b"x").await;
    let target = path("/held.txt");

    let guard = app
        .vfs
        .locker()
        .lock_paths(&app.ctx(), app.owner, &[&target])
        .await
        .unwrap();

    let delete = {
        let vfs = app.vfs.clone();
        let ctx = app.ctx();
        let owner = app.owner;
        let target = target.clone();
        tokio::spawn(async move { vfs.delete(&ctx, owner, &target).await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!delete.is_finished());

    drop(guard);
    assert_eq!(delete.await.unwrap().unwrap(), 1);
}

#[tokio::test]
async fn test_concurrent_mkdir_materialises_one_directory() {
    let app = TestApp::new().await;
    let mut tasks = Vec::new();
    for _ in 0..8 {
        let vfs = app.vfs.clone();
        let ctx = app.ctx();
        let owner = app.owner;
        tasks.push(tokio::spawn(async move {
            vfs.mkdir(&ctx, owner, &path("/shared/inner")).await
        }));
    }

    let mut ids = Vec::new();
    for task in tasks {
        ids.push(task.await.unwrap().unwrap().id);
    }
    ids.dedup();
    assert_eq!(ids.len(), 1);

    let listing = app
        .vfs
        .list(&app.ctx(), app.owner, &path("/shared"))
        .await
        .unwrap();
    assert_eq!(listing.len(), 1);
    assert!(listing[0].is_dir);
}

#[tokio::test]
async fn test_mutations_into_a_held_directory_wait() {
    let app = TestApp::new().await;
    let ctx = app.ctx();
    app.upload("/a.txt", b"moved").await;
    app.upload("/c.txt", b"copied").await;
    app.vfs.mkdir(&ctx, app.owner, &path("/b")).await.unwrap();

    let guard = app
        .vfs
        .locker()
        .lock_paths(&ctx, app.owner, &[&path("/b")])
        .await
        .unwrap();

    let mover = {
        let vfs = app.vfs.clone();
        let ctx = app.ctx();
        let owner = app.owner;
        tokio::spawn(async move { vfs.move_to(&ctx, owner, &path("/a.txt"), &path("/b")).await })
    };
    let copier = {
        let vfs = app.vfs.clone();
        let ctx = app.ctx();
        let owner = app.owner;
        tokio::spawn(async move { vfs.copy(&ctx, owner, &path("/c.txt"), &path("/b")).await })
    };
    let creator = {
        let vfs = app.vfs.clone();
        let ctx = app.ctx();
        let owner = app.owner;
        tokio::spawn(async move { vfs.create_file(&ctx, owner, &path("/b/new.txt")).await })
    };
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(!mover.is_finished());
    assert!(!copier.is_finished());
    assert!(!creator.is_finished());

    drop(guard);
    mover.await.unwrap().unwrap();
    copier.await.unwrap().unwrap();
    creator.await.unwrap().unwrap();

    let mut names: Vec<_> = app
        .vfs
        .list(&ctx, app.owner, &path("/b"))
        .await
        .unwrap()
        .into_iter()
        .map(|f| f.name)
        .collect();
    names.sort();
    assert_eq!(names, ["a.txt", "c.txt", "new.txt"]);
    assert!(app.vfs.locker().is_empty());
}

#[tokio::test]
async fn test_upload_into_trashed_directory_is_aborted() {
    let app = TestApp::new().await;
    let ctx = app.ctx();
    let ticket = app
        .uploads
        .open(
            &ctx,
            vaultfs_service::OpenUpload {
                owner_id: app.owner,
                path: path("/docs/r.bin"),
                size: 6,
                policy_id: None,
            },
        )
        .await
        .unwrap();
    app.vfs.delete(&ctx, app.owner, &path("/docs")).await.unwrap();

    let err = app
        .uploads
        .put_chunk(&ctx, ticket.session_id, 0, helpers::body(b"report"))
        .await
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::NotFound);

    let session = app.uploads.session(&ctx, ticket.session_id).await.unwrap();
    assert_eq!(session.state, vaultfs_entity::upload::UploadState::Aborted);
    assert_eq!(app.store.files.used_storage(app.owner).await.unwrap(), 0);
    assert!(
        !app.dir
            .path()
            .join("staging")
            .join(ticket.session_id.to_string())
            .exists()
    );
    assert!(app.vfs.locker().is_empty());
}
