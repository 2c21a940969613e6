//! Signed content downloads.

use axum::body::Body;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Response};
use chrono::Utc;
use uuid::Uuid;

use vaultfs_core::error::AppError;
use vaultfs_service::RequestContext;
use vaultfs_storage::UrlSigner;

use super::{SignQuery, content_disposition, content_type};
use crate::error::ApiError;
use crate::state::AppState;

/// GET /api/v1/files/{id}/content?sign=
pub async fn download(
    State(state): State<AppState>,
    Path(file_id): Path<Uuid>,
    Query(query): Query<SignQuery>,
) -> Result<Response, ApiError> {
    let token = query
        .sign
        .ok_or_else(|| AppError::signature_invalid("Missing signature"))?;
    state
        .signer
        .verify(&UrlSigner::content_resource(file_id), &token, Utc::now())?;

    let opened = state.vfs.open(&RequestContext::system(), file_id).await?;

    let mut headers = HeaderMap::new();
    let recorded = opened.entity.as_ref().and_then(|e| e.mime_type.as_deref());
    headers.insert(header::CONTENT_TYPE, content_type(recorded, &opened.file.name));
    headers.insert(
        header::CONTENT_DISPOSITION,
        content_disposition("inline", &opened.file.name),
    );
    let size = opened.entity.as_ref().map(|e| e.size).unwrap_or(0).max(0);
    headers.insert(header::CONTENT_LENGTH, size.into());

    Ok((StatusCode::OK, headers, Body::from_stream(opened.body)).into_response())
}
