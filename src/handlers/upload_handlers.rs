//! Upload endpoints: the chunked protocol plus the two whole-file variants.
//!
//! - POST   /chunks         -> one chunk of a chunked upload (JSON)
//! - DELETE /chunks/{name}  -> abandon an in-progress chunked upload
//! - PUT    /upload         -> multipart form upload (field `file`)
//! - POST   /upload/binary  -> raw body, filename in `X-Filename`

use crate::{
    errors::AppError,
    models::chunk::{ChunkRequest, ChunkResponse},
    services::upload_service::Chunk,
    state::AppState,
};
use axum::{
    Json,
    body::Bytes,
    extract::{Multipart, Path, State, rejection::JsonRejection},
    http::{HeaderMap, StatusCode},
};
use serde::Serialize;
use tracing::debug;

/// Header carrying the filename for `POST /upload/binary`.
pub const FILENAME_HEADER: &str = "x-filename";

#[derive(Serialize, Debug)]
pub struct UploadResponse {
    pub filename: String,
    pub url: String,
    pub status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub method: Option<&'static str>,
}

/// `POST /chunks`
pub async fn submit_chunk(
    State(state): State<AppState>,
    payload: Result<Json<ChunkRequest>, JsonRejection>,
) -> Result<Json<ChunkResponse>, AppError> {
    let Json(request) = payload.map_err(|err| AppError::bad_request(err.body_text()))?;
    debug!(
        file = %request.file_name,
        chunk = request.chunk_number,
        total = request.total_chunks,
        started = request.is_started,
        completed = request.is_completed,
        "received chunk"
    );

    let chunk = Chunk::decode(request)?;
    let outcome = state.uploads.handle_chunk(chunk).await?;
    Ok(Json(outcome.into()))
}

/// `DELETE /chunks/{name}`
pub async fn abandon_chunks(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<StatusCode, AppError> {
    state.uploads.abandon(&name).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// `PUT /upload`
///
/// Reads the multipart field named `file` and commits it whole.
pub async fn upload_file(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<UploadResponse>, AppError> {
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|err| AppError::bad_request(err.body_text()))?
    {
        if field.name() != Some("file") {
            continue;
        }
        let file_name = field
            .file_name()
            .map(str::to_string)
            .filter(|name| !name.is_empty())
            .ok_or_else(|| AppError::bad_request("Filename is required"))?;
        let data = field
            .bytes()
            .await
            .map_err(|err| AppError::bad_request(err.body_text()))?;

        let object = state.uploads.upload_file(&file_name, data).await?;
        return Ok(Json(UploadResponse {
            filename: object.pathname,
            url: object.url,
            status: "uploaded",
            size: None,
            method: None,
        }));
    }

    Err(AppError::bad_request("No file provided"))
}

/// `POST /upload/binary`
pub async fn upload_binary(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<UploadResponse>, AppError> {
    let file_name = headers
        .get(FILENAME_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .ok_or_else(|| AppError::bad_request("Missing X-Filename header"))?
        .to_string();

    if body.is_empty() {
        return Err(AppError::bad_request("Empty request body"));
    }

    let object = state.uploads.upload_file(&file_name, body).await?;
    Ok(Json(UploadResponse {
        filename: object.pathname,
        url: object.url,
        status: "uploaded",
        size: Some(object.size),
        method: Some("binary"),
    }))
}
