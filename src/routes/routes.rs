//! Defines routes for the chunked upload protocol and analysis cache.
//!
//! ## Structure
//! - **Upload protocol**
//!   - `POST   /upload/initiate` — open an upload session
//!   - `POST   /upload/chunk` — submit one verified chunk (multipart)
//!   - `POST   /upload/complete` — reassemble, analyze, and cache
//!   - `GET    /upload/{session_id}` — session status incl. missing chunks
//!   - `DELETE /upload/{session_id}` — abandon a session
//!
//! - **Cache surface**
//!   - `GET    /files/{hash}` — analysis verdict lookup (any hash encoding)
//!   - `POST   /reanalyze` — re-run analysis on already-stored bytes

use crate::{
    handlers::{
        file_handlers::{get_result, reanalyze},
        health_handlers::{healthz, readyz},
        upload_handlers::{
            cancel_upload, complete_upload, initiate_upload, session_status, upload_chunk,
        },
    },
    models::session::DEFAULT_CHUNK_SIZE,
    state::AppState,
};
use axum::{
    Router,
    extract::DefaultBodyLimit,
    routing::{get, post},
};

/// Headroom over the chunk payload for multipart framing and text fields.
const CHUNK_BODY_LIMIT: usize = DEFAULT_CHUNK_SIZE + 1024 * 1024;

/// Build and return the router for all upload and cache routes.
///
/// The router carries shared state (`AppState`) to all handlers.
pub fn routes() -> Router<AppState> {
    Router::new()
        // health endpoints (mounted at root)
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        // upload protocol
        .route("/upload/initiate", post(initiate_upload))
        .route(
            "/upload/chunk",
            post(upload_chunk).layer(DefaultBodyLimit::max(CHUNK_BODY_LIMIT)),
        )
        .route("/upload/complete", post(complete_upload))
        .route(
            "/upload/{session_id}",
            get(session_status).delete(cancel_upload),
        )
        // cache surface
        .route("/files/{hash}", get(get_result))
        .route("/reanalyze", post(reanalyze))
}
