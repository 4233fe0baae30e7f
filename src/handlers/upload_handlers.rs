//! HTTP handlers for the chunked upload protocol.
//!
//! Chunk bodies arrive as multipart form data; everything else is JSON.
//! Handlers stay thin and delegate session bookkeeping to `SessionService`
//! and storage concerns to `AnalysisCache`.

use crate::{
    errors::AppError,
    models::{
        session::{
            ChunkReceipt, CompleteUploadRequest, InitiateUploadRequest, InitiateUploadResponse,
            SessionStatusResponse,
        },
        stored_file::AnalysisResult,
    },
    state::AppState,
};
use axum::{
    Json,
    extract::{Multipart, Path, State},
    http::StatusCode,
};
use bytes::Bytes;
use uuid::Uuid;

/// `POST /upload/initiate`
///
/// Open a session for a chunked transfer. The declared whole-file hash
/// becomes the cache key once the upload completes.
pub async fn initiate_upload(
    State(state): State<AppState>,
    Json(request): Json<InitiateUploadRequest>,
) -> Result<Json<InitiateUploadResponse>, AppError> {
    let session = state.sessions.create_session(&request).await?;

    Ok(Json(InitiateUploadResponse {
        session_id: session.id.to_string(),
        expires_at: session.expires_at,
    }))
}

/// `POST /upload/chunk`
///
/// Multipart fields: `sessionId`, `chunkIndex`, `chunkHash`, `chunk`.
/// The chunk is verified against its declared hash before acceptance.
pub async fn upload_chunk(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<ChunkReceipt>, AppError> {
    let mut session_id: Option<String> = None;
    let mut chunk_index: Option<u32> = None;
    let mut chunk_hash: Option<String> = None;
    let mut chunk: Option<Bytes> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|err| AppError::bad_request(format!("malformed multipart body: {}", err)))?
    {
        match field.name() {
            Some("sessionId") => session_id = Some(read_text(field).await?),
            Some("chunkIndex") => {
                let raw = read_text(field).await?;
                let parsed = raw.parse::<u32>().map_err(|_| {
                    AppError::bad_request(format!("chunkIndex `{}` is not a valid index", raw))
                })?;
                chunk_index = Some(parsed);
            }
            Some("chunkHash") => chunk_hash = Some(read_text(field).await?),
            Some("chunk") => {
                let bytes = field.bytes().await.map_err(|err| {
                    AppError::bad_request(format!("failed to read chunk body: {}", err))
                })?;
                chunk = Some(bytes);
            }
            _ => {}
        }
    }

    let session_id = parse_session_id(
        &session_id.ok_or_else(|| AppError::bad_request("missing field `sessionId`"))?,
    )?;
    let chunk_index =
        chunk_index.ok_or_else(|| AppError::bad_request("missing field `chunkIndex`"))?;
    let chunk_hash =
        chunk_hash.ok_or_else(|| AppError::bad_request("missing field `chunkHash`"))?;
    let chunk = chunk.ok_or_else(|| AppError::bad_request("missing field `chunk`"))?;

    let session = state
        .sessions
        .store_chunk(session_id, chunk_index, &chunk_hash, chunk)
        .await?;

    Ok(Json(ChunkReceipt {
        chunk_index,
        received: session.received_count(),
        total_chunks: session.total_chunks,
        complete: session.is_complete(),
    }))
}

/// `POST /upload/complete`
///
/// Verify all chunks are present and hash-consistent, reassemble the file,
/// hand it to the analysis collaborator, and cache both the raw bytes and
/// the verdict under the normalized content hash.
pub async fn complete_upload(
    State(state): State<AppState>,
    Json(request): Json<CompleteUploadRequest>,
) -> Result<Json<AnalysisResult>, AppError> {
    let session_id = parse_session_id(&request.session_id)?;
    let finished = state.sessions.finish_session(session_id).await?;

    // Cache the payload first so the file survives an analyzer outage and
    // stays available for reanalysis.
    state
        .cache
        .put_file(
            &finished.file_hash,
            finished.bytes.clone(),
            &finished.file_name,
            &finished.mime_type,
        )
        .await;

    let verdict = state
        .analyzer
        .analyze(&finished.file_name, finished.bytes.clone(), false)
        .await?;

    let result = state.cache.put_result(&finished.file_hash, verdict).await;

    tracing::info!(
        session_id = %session_id,
        file_name = %finished.file_name,
        hash = %result.id,
        "upload completed and analyzed"
    );

    Ok(Json(result))
}

/// `GET /upload/{sessionId}` — progress snapshot including which chunk
/// indices are still missing.
pub async fn session_status(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Result<Json<SessionStatusResponse>, AppError> {
    let session = state
        .sessions
        .get_session(parse_session_id(&session_id)?)
        .await?;

    Ok(Json(SessionStatusResponse {
        session_id: session.id.to_string(),
        file_name: session.file_name.clone(),
        file_size_bytes: session.file_size_bytes,
        total_chunks: session.total_chunks,
        received_chunks: session.received_chunks(),
        missing_chunks: session.missing_chunks(),
        progress: session.progress(),
        created_at: session.created_at,
        expires_at: session.expires_at,
    }))
}

/// `DELETE /upload/{sessionId}` — abandon a session and discard its chunks.
pub async fn cancel_upload(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Result<StatusCode, AppError> {
    state
        .sessions
        .cancel_session(parse_session_id(&session_id)?)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

fn parse_session_id(raw: &str) -> Result<Uuid, AppError> {
    Uuid::parse_str(raw)
        .map_err(|_| AppError::not_found(format!("upload session `{}` not found", raw)))
}

async fn read_text(field: axum::extract::multipart::Field<'_>) -> Result<String, AppError> {
    field
        .text()
        .await
        .map_err(|err| AppError::bad_request(format!("unreadable multipart field: {}", err)))
}
