//! Handlers for analysis result lookup and reanalysis.

use crate::{
    errors::AppError,
    models::{session::ReanalyzeRequest, stored_file::AnalysisResult},
    state::AppState,
};
use axum::{
    Json,
    extract::{Path, State},
};

/// `GET /files/{hash}`
///
/// Lookup an analysis verdict by content hash. Any of the three equivalent
/// hash encodings resolves; URL callers typically use the URL-safe form.
pub async fn get_result(
    State(state): State<AppState>,
    Path(hash): Path<String>,
) -> Result<Json<AnalysisResult>, AppError> {
    let result = state.cache.get_result(&hash).await?;
    Ok(Json(result))
}

/// `POST /reanalyze`
///
/// Re-run analysis against the already-stored raw bytes for a hash, without
/// re-uploading. The fresh verdict overwrites the previous one under the
/// same canonical id.
pub async fn reanalyze(
    State(state): State<AppState>,
    Json(request): Json<ReanalyzeRequest>,
) -> Result<Json<AnalysisResult>, AppError> {
    let stored = state.cache.get_file(&request.file_hash).await?;

    let verdict = state
        .analyzer
        .analyze(&stored.file_name, stored.bytes.clone(), true)
        .await?;

    let result = state.cache.put_result(&request.file_hash, verdict).await;

    tracing::info!(
        hash = %result.id,
        file_name = %stored.file_name,
        "file reanalyzed"
    );

    Ok(Json(result))
}
