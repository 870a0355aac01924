//! Defines routes for the upload relay.
//!
//! ## Structure
//! - **Upload endpoints**
//!   - `POST   /chunks`        — submit one chunk of a chunked upload
//!   - `DELETE /chunks/{name}` — abandon an in-progress chunked upload
//!   - `PUT    /upload`        — whole-file multipart upload
//!   - `POST   /upload/binary` — whole-file raw upload (`X-Filename`)
//!
//! - **Retrieval endpoints**
//!   - `GET /latest`            — most recent archive
//!   - `GET /latest/partial`    — leading window of the most recent archive
//!   - `GET /download`          — most recent revision of `?filename=`
//!   - `GET /blobs/{*pathname}` — raw objects of the local backend
//!
//! The wildcard `*pathname` keeps the whole remainder of the path.

use crate::{
    handlers::{
        download_handlers::{download, get_blob, latest, latest_partial},
        health_handlers::{healthz, readyz, root},
        upload_handlers::{abandon_chunks, submit_chunk, upload_binary, upload_file},
    },
    state::AppState,
};
use axum::{
    Router,
    extract::DefaultBodyLimit,
    routing::{delete, get, post, put},
};
use tower_http::trace::TraceLayer;

/// Build the router for every endpoint, still waiting for its state.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/", get(root))
        // health endpoints (mounted at root)
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        // Upload routes
        .route("/chunks", post(submit_chunk))
        .route("/chunks/{name}", delete(abandon_chunks))
        .route("/upload", put(upload_file))
        .route("/upload/binary", post(upload_binary))
        // Retrieval routes
        .route("/latest", get(latest))
        .route("/latest/partial", get(latest_partial))
        .route("/download", get(download))
        .route("/blobs/{*pathname}", get(get_blob))
}

/// The complete application: routes, state, body limit and request tracing.
pub fn router(state: AppState) -> Router {
    let limit = state.max_body_bytes;
    routes()
        .layer(DefaultBodyLimit::max(limit))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
