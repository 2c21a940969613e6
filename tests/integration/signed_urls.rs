//! HMAC-signed content URLs, end to end through the HTTP router.

mod helpers;

use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode, header};
use chrono::Utc;
use helpers::{BASE_URL, TestApp};
use tower::ServiceExt;
use uuid::Uuid;
use vaultfs_core::error::ErrorKind;
use vaultfs_storage::UrlSigner;

async fn get(app: &TestApp, uri: &str) -> (StatusCode, axum::http::HeaderMap, Vec<u8>) {
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

fn relative(url: &str) -> &str {
    url.strip_prefix(BASE_URL).unwrap()
}

#[tokio::test]
async fn test_signature_lifecycle() {
    let signer = UrlSigner::new("secret", BASE_URL).unwrap();
    let resource = UrlSigner::content_resource(Uuid::new_v4());
    let now = Utc::now();
    let token = signer.sign(&resource, now + chrono::Duration::seconds(60));

    signer.verify(&resource, &token, now).unwrap();

    let err = signer
        .verify(&resource, &token, now + chrono::Duration::seconds(61))
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::LinkExpired);

    let other = UrlSigner::content_resource(Uuid::new_v4());
    let err = signer.verify(&other, &token, now).unwrap_err();
    assert_eq!(err.kind, ErrorKind::SignatureInvalid);

    let (expires, _) = token.split_once(':').unwrap();
    let stretched = token.replacen(expires, &(expires.parse::<i64>().unwrap() + 3600).to_string(), 1);
    let err = signer.verify(&resource, &stretched, now).unwrap_err();
    assert_eq!(err.kind, ErrorKind::SignatureInvalid);

    let foreign = UrlSigner::new("another-secret", BASE_URL).unwrap();
    let err = foreign.verify(&resource, &token, now).unwrap_err();
    assert_eq!(err.kind, ErrorKind::SignatureInvalid);

    assert!(UrlSigner::new("", BASE_URL).is_err());
}

#[tokio::test]
async fn test_download_through_signed_url() {
    let app = TestApp::new().await;
    let uploaded = app.upload("/reports/q3 summary.txt", b"quarterly numbers").await;

    let url = app
        .vfs
        .download_url(&app.ctx(), uploaded.file_id, Some(Duration::from_secs(60)))
        .await
        .unwrap();
    assert!(url.starts_with(&format!(
        "{BASE_URL}/api/v1/files/{}/content?sign=",
        uploaded.file_id
    )));

    let (status, headers, body) = get(&app, relative(&url)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, b"quarterly numbers");
    assert_eq!(headers[header::CONTENT_LENGTH], "17");
    let disposition = headers[header::CONTENT_DISPOSITION].to_str().unwrap();
    assert!(disposition.starts_with("inline"));
    assert!(disposition.contains("q3%20summary"));
}

#[tokio::test]
async fn test_bad_or_missing_signature_is_forbidden() {
    let app = TestApp::new().await;
    let uploaded = app.upload("/secret.txt", b"classified").await;
    let base = format!("/api/v1/files/{}/content", uploaded.file_id);

    let (status, _, _) = get(&app, &base).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _, body) = get(&app, &format!("{base}?sign=9999999999:AAAA")).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    let error: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(error["error"], "SIGNATURE_INVALID");

    // A valid token for another file does not transfer.
    let other = app.signer.content_url(Uuid::new_v4(), Duration::from_secs(60));
    let token = other.split_once("?sign=").unwrap().1;
    let (status, _, _) = get(&app, &format!("{base}?sign={token}")).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_expired_signature_is_gone() {
    let app = TestApp::new().await;
    let uploaded = app.upload("/old.txt", b"stale").await;
    let resource = UrlSigner::content_resource(uploaded.file_id);
    let token = app
        .signer
        .sign(&resource, Utc::now() - chrono::Duration::seconds(1));

    let (status, _, _) = get(
        &app,
        &format!("/api/v1/files/{}/content?sign={token}", uploaded.file_id),
    )
    .await;
    assert_eq!(status, StatusCode::GONE);
}

#[tokio::test]
async fn test_signed_url_for_trashed_file_is_not_found() {
    let app = TestApp::new().await;
    let uploaded = app.upload("/bin/trash.txt", b"soon gone").await;
    let url = app
        .vfs
        .download_url(&app.ctx(), uploaded.file_id, None)
        .await
        .unwrap();
    app.vfs
        .delete(&app.ctx(), app.owner, &helpers::path("/bin/trash.txt"))
        .await
        .unwrap();

    let (status, _, _) = get(&app, relative(&url)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_health() {
    let app = TestApp::new().await;
    let (status, _, _) = get(&app, "/api/v1/health").await;
    assert_eq!(status, StatusCode::OK);
}
