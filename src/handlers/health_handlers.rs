//! Health & readiness handlers.
//!
//! - GET /healthz  -> simple liveness ("ok")
//! - GET /readyz   -> readiness with cache occupancy and sweeper state

use crate::state::AppState;
use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};
use serde::Serialize;

/// `GET /healthz`
///
/// Very small liveness probe — always returns 200 OK with a plain JSON body.
/// This endpoint should be cheap and never perform I/O.
pub async fn healthz() -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(HealthResponse {
            status: "ok".into(),
        }),
    )
}

/// `GET /readyz`
///
/// Everything this service owns is in-memory, so readiness is mostly a
/// snapshot: cache occupancy, in-flight session count, and whether the
/// background sweeper is running.
pub async fn readyz(State(state): State<AppState>) -> impl IntoResponse {
    let body = ReadyResponse {
        status: "ok".into(),
        cached_files: state.cache.file_count().await,
        cached_results: state.cache.result_count().await,
        cached_bytes: state.cache.total_file_bytes().await,
        active_sessions: state.sessions.session_count().await,
        sweeper_running: state.cache.sweeper_running(),
    };

    (StatusCode::OK, Json(body))
}

#[derive(Serialize)]
struct HealthResponse {
    status: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ReadyResponse {
    status: String,
    cached_files: usize,
    cached_results: usize,
    cached_bytes: u64,
    active_sessions: usize,
    sweeper_running: bool,
}
