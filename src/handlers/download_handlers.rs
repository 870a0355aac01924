//! Retrieval endpoints.
//!
//! - GET /latest             -> most recent archive (redirect or proxied stream)
//! - GET /latest/partial     -> leading window of the most recent archive
//! - GET /download?filename= -> most recent revision of one logical file
//! - GET /blobs/{*pathname}  -> raw object, serves the local backend's URLs

use crate::{
    errors::AppError,
    models::object::StoredObject,
    services::{object_store::ByteRange, retrieval::Delivery},
    state::AppState,
};
use axum::{
    body::Body,
    extract::{Path, Query, State},
    http::{HeaderMap, HeaderValue, StatusCode, header},
    response::{IntoResponse, Redirect, Response},
};
use serde::Deserialize;
use tracing::debug;

#[derive(Debug, Deserialize)]
pub struct DownloadQuery {
    pub filename: Option<String>,
}

/// `GET /latest`
pub async fn latest(State(state): State<AppState>) -> Result<Response, AppError> {
    let object = state.retrieval.latest().await?;
    deliver(&state, object).await
}

/// `GET /latest/partial`
///
/// Always a proxied response of at most `partial_window` bytes.
pub async fn latest_partial(State(state): State<AppState>) -> Result<Response, AppError> {
    let object = state.retrieval.latest().await?;
    let window = state.retrieval.partial_window();
    let bytes = state.retrieval.fetch_prefix(&object, window).await?;

    let mut response = Response::new(Body::from(bytes.clone()));
    *response.status_mut() = StatusCode::OK;
    set_attachment_headers(
        response.headers_mut(),
        &format!("partial_{}", object.pathname),
        Some(bytes.len() as u64),
    )?;
    Ok(response)
}

/// `GET /download?filename=<name>`
pub async fn download(
    State(state): State<AppState>,
    Query(query): Query<DownloadQuery>,
) -> Result<Response, AppError> {
    let file_name = query
        .filename
        .filter(|name| !name.trim().is_empty())
        .ok_or_else(|| AppError::bad_request("filename query parameter is required"))?;
    let object = state.retrieval.named(&file_name).await?;
    deliver(&state, object).await
}

/// `GET /blobs/{*pathname}`
///
/// Honors a single `Range: bytes=a-b` header; anything else gets the whole
/// object.
pub async fn get_blob(
    State(state): State<AppState>,
    Path(pathname): Path<String>,
    headers: HeaderMap,
) -> Result<Response, AppError> {
    let object = state.retrieval.exact(&pathname).await?;
    let size = object.size.max(0) as u64;
    let range = headers
        .get(header::RANGE)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| parse_range(v, size));

    let body = state.store.get(&object.url, range).await?;
    let mut response = Response::new(Body::from_stream(body.stream));
    *response.status_mut() = body.status;

    let headers = response.headers_mut();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("application/octet-stream"),
    );
    headers.insert(header::ACCEPT_RANGES, HeaderValue::from_static("bytes"));
    if let Some(length) = body.content_length {
        headers.insert(header::CONTENT_LENGTH, HeaderValue::from(length));
    }
    if body.status == StatusCode::PARTIAL_CONTENT {
        if let Some(range) = range {
            let end = range.end.min(size);
            let value = format!("bytes {}-{}/{}", range.start, end.saturating_sub(1), size);
            if let Ok(value) = HeaderValue::from_str(&value) {
                headers.insert(header::CONTENT_RANGE, value);
            }
        }
    }
    Ok(response)
}

/// Redirect to the object or relay it, depending on the configured delivery.
async fn deliver(state: &AppState, object: StoredObject) -> Result<Response, AppError> {
    match state.retrieval.delivery() {
        Delivery::Redirect => {
            debug!(pathname = %object.pathname, "redirecting to object url");
            Ok(Redirect::temporary(&object.url).into_response())
        }
        Delivery::Proxy => {
            let body = state.retrieval.fetch_full(&object).await?;
            let mut response = Response::new(Body::from_stream(body.stream));
            *response.status_mut() = StatusCode::OK;
            set_attachment_headers(
                response.headers_mut(),
                &object.pathname,
                body.content_length,
            )?;
            Ok(response)
        }
    }
}

fn set_attachment_headers(
    headers: &mut HeaderMap,
    filename: &str,
    length: Option<u64>,
) -> Result<(), AppError> {
    let disposition = HeaderValue::from_str(&format!("attachment; filename={}", filename))
        .map_err(|err| AppError::internal(format!("invalid Content-Disposition: {}", err)))?;
    headers.insert(header::CONTENT_DISPOSITION, disposition);
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("application/octet-stream"),
    );
    if let Some(length) = length {
        headers.insert(header::CONTENT_LENGTH, HeaderValue::from(length));
    }
    Ok(())
}

/// Parse `bytes=a-b` or `bytes=a-` into a half-open range within `size`.
fn parse_range(value: &str, size: u64) -> Option<ByteRange> {
    let spec = value.trim().strip_prefix("bytes=")?;
    if spec.contains(',') {
        return None;
    }
    let (start, end) = spec.split_once('-')?;
    let start: u64 = start.trim().parse().ok()?;
    let end = match end.trim() {
        "" => size,
        end => end.parse::<u64>().ok()?.saturating_add(1),
    };
    if start >= end || start >= size {
        return None;
    }
    Some(ByteRange { start, end })
}
