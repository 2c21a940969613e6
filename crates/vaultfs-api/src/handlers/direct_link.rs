//! Direct link resolution with per-link throttling.

use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Response};

use vaultfs_service::RequestContext;

use super::{content_disposition, content_type};
use crate::error::ApiError;
use crate::state::AppState;
use crate::throttle::Throttled;

/// GET /f/{public_id}/{name}
///
/// The trailing name is cosmetic; the download is named after the link's
/// snapshot.
pub async fn download(
    State(state): State<AppState>,
    Path((public_id, _name)): Path<(String, String)>,
) -> Result<Response, ApiError> {
    let prepared = state.links.prepare_download(&public_id).await?;
    let body = prepared.open(&RequestContext::system()).await?;

    let mut headers = HeaderMap::new();
    let recorded = prepared.entity.as_ref().and_then(|e| e.mime_type.as_deref());
    headers.insert(
        header::CONTENT_TYPE,
        content_type(recorded, &prepared.link.file_name),
    );
    headers.insert(
        header::CONTENT_DISPOSITION,
        content_disposition("attachment", &prepared.link.file_name),
    );
    let size = prepared.entity.as_ref().map(|e| e.size).unwrap_or(0).max(0);
    headers.insert(header::CONTENT_LENGTH, size.into());

    let limit = prepared.speed_limit();
    let body = if limit > 0 {
        Body::from_stream(Throttled::new(body, limit))
    } else {
        Body::from_stream(body)
    };
    Ok((StatusCode::OK, headers, body).into_response())
}
