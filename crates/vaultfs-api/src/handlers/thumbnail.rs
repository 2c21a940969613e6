//! Signed thumbnail fetches.

use axum::body::Body;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use chrono::Utc;
use uuid::Uuid;

use vaultfs_core::error::{AppError, ErrorKind};
use vaultfs_storage::UrlSigner;

use super::SignQuery;
use crate::error::ApiError;
use crate::state::AppState;

/// GET /api/v1/files/{id}/thumbnail?sign=
///
/// Anything short of a stored thumbnail answers 404 so clients fall back
/// to a placeholder.
pub async fn thumbnail(
    State(state): State<AppState>,
    Path(file_id): Path<Uuid>,
    Query(query): Query<SignQuery>,
) -> Result<Response, ApiError> {
    let token = query
        .sign
        .ok_or_else(|| AppError::signature_invalid("Missing signature"))?;
    state
        .signer
        .verify(&UrlSigner::thumbnail_resource(file_id), &token, Utc::now())?;

    let (entity, body) = match state.thumbnails.open(file_id).await {
        Ok(opened) => opened,
        Err(e) if e.is(ErrorKind::BackendUnavailable) => return Err(e.into()),
        Err(e) => {
            tracing::debug!(file_id = %file_id, error = %e, "Thumbnail not available");
            return Err(AppError::not_found("Thumbnail not available").into());
        }
    };

    let mut headers = HeaderMap::new();
    let mime = entity.mime_type.as_deref().unwrap_or("image/jpeg");
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_str(mime).unwrap_or_else(|_| HeaderValue::from_static("image/jpeg")),
    );
    headers.insert(header::CONTENT_LENGTH, entity.size.max(0).into());
    headers.insert(
        header::CACHE_CONTROL,
        HeaderValue::from_static("private, max-age=3600"),
    );

    Ok((StatusCode::OK, headers, Body::from_stream(body)).into_response())
}
