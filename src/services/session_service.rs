//! SessionService — registry of in-flight chunked upload sessions.
//!
//! Sessions live purely in memory. A session transitions monotonically from
//! open to complete exactly once: completion requires every chunk index to
//! have been received and hash-verified, and consuming a session removes it
//! from the registry. Abandoned sessions are reaped by a periodic cleanup
//! task.

use crate::models::session::{
    InitiateUploadRequest, MAX_FILE_SIZE_BYTES, MAX_TOTAL_CHUNKS, SESSION_EXPIRY_HOURS,
    UploadSession,
};
use crate::services::hashing::{canonical_key, looks_like_sha256_base64, sha256_base64};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use std::{
    collections::HashMap,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{debug, info};
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("upload session `{0}` not found")]
    NotFound(String),

    #[error("upload session `{0}` has expired")]
    Expired(Uuid),

    #[error("chunk {index} hash mismatch: expected `{expected}`, got `{actual}`")]
    ChunkHashMismatch {
        index: u32,
        expected: String,
        actual: String,
    },

    #[error("assembled file hash mismatch: expected `{expected}`, got `{actual}`")]
    FileHashMismatch { expected: String, actual: String },

    #[error("chunk index {index} out of bounds (total chunks: {total})")]
    ChunkIndexOutOfBounds { index: u32, total: u32 },

    #[error("chunk {0} already received")]
    ChunkAlreadyReceived(u32),

    #[error("missing chunks: {0:?}")]
    MissingChunks(Vec<u32>),

    #[error("{0}")]
    Validation(String),
}

/// A finalized upload, ready to hand to the analysis collaborator.
#[derive(Debug)]
pub struct FinishedUpload {
    pub file_name: String,
    pub mime_type: String,
    pub file_hash: String,
    pub bytes: Bytes,
}

/// Shared session registry. Cloning shares the same map.
#[derive(Clone)]
pub struct SessionService {
    inner: Arc<SessionInner>,
}

struct SessionInner {
    sessions: RwLock<HashMap<Uuid, UploadSession>>,
    expiry: chrono::Duration,
    cleanup_started: AtomicBool,
}

impl SessionInner {
    async fn reap_expired(&self, now: DateTime<Utc>) -> usize {
        let mut sessions = self.sessions.write().await;
        let before = sessions.len();
        sessions.retain(|_, s| s.expires_at >= now);
        let removed = before - sessions.len();
        if removed > 0 {
            info!(removed, "reaped expired upload sessions");
        }
        removed
    }
}

impl SessionService {
    pub fn new() -> Self {
        Self::with_expiry(chrono::Duration::hours(SESSION_EXPIRY_HOURS))
    }

    pub fn with_expiry(expiry: chrono::Duration) -> Self {
        Self {
            inner: Arc::new(SessionInner {
                sessions: RwLock::new(HashMap::new()),
                expiry,
                cleanup_started: AtomicBool::new(false),
            }),
        }
    }

    /// Open a new session after validating the declared file metadata.
    pub async fn create_session(
        &self,
        request: &InitiateUploadRequest,
    ) -> Result<UploadSession, SessionError> {
        validate_initiate(request)?;

        let mut session = UploadSession::new(request, self.inner.expiry);
        // Accept either base64 alphabet on the wire, but hold one form so
        // the finalize comparison and the cache key always line up.
        session.file_hash = canonical_key(&session.file_hash);
        let id = session.id;
        {
            let mut sessions = self.inner.sessions.write().await;
            sessions.insert(id, session.clone());
        }

        info!(
            session_id = %id,
            file_name = %request.file_name,
            file_size = request.file_size_bytes,
            total_chunks = request.total_chunks,
            "created upload session"
        );

        Ok(session)
    }

    /// Verify and store one chunk. The chunk is hashed before acceptance;
    /// a mismatch rejects the chunk without mutating the session.
    pub async fn store_chunk(
        &self,
        session_id: Uuid,
        index: u32,
        expected_hash: &str,
        bytes: Bytes,
    ) -> Result<UploadSession, SessionError> {
        let actual = sha256_base64(&bytes);
        if actual != expected_hash {
            return Err(SessionError::ChunkHashMismatch {
                index,
                expected: expected_hash.to_string(),
                actual,
            });
        }

        let mut sessions = self.inner.sessions.write().await;
        let session = sessions
            .get_mut(&session_id)
            .ok_or_else(|| SessionError::NotFound(session_id.to_string()))?;

        if session.is_expired() {
            return Err(SessionError::Expired(session_id));
        }
        if index >= session.total_chunks {
            return Err(SessionError::ChunkIndexOutOfBounds {
                index,
                total: session.total_chunks,
            });
        }
        if session.chunks[index as usize].is_some() {
            return Err(SessionError::ChunkAlreadyReceived(index));
        }

        session.chunks[index as usize] = Some(bytes);

        debug!(
            session_id = %session_id,
            chunk_index = index,
            received = session.received_count(),
            total = session.total_chunks,
            "chunk accepted"
        );

        Ok(session.clone())
    }

    /// Consume a session: verify all chunks are present, reassemble the
    /// file, and check the whole-file hash. Once every chunk is present the
    /// session is removed from the registry even if assembly fails; a
    /// corrupted upload must be restarted from initiation. With chunks
    /// still missing the session stays open so they can be resent.
    pub async fn finish_session(&self, session_id: Uuid) -> Result<FinishedUpload, SessionError> {
        let session = {
            let mut sessions = self.inner.sessions.write().await;
            let session = sessions
                .get(&session_id)
                .ok_or_else(|| SessionError::NotFound(session_id.to_string()))?;

            if session.is_expired() {
                return Err(SessionError::Expired(session_id));
            }
            if !session.is_complete() {
                return Err(SessionError::MissingChunks(session.missing_chunks()));
            }

            sessions
                .remove(&session_id)
                .ok_or_else(|| SessionError::NotFound(session_id.to_string()))?
        };

        let mut assembled = Vec::with_capacity(session.file_size_bytes as usize);
        for chunk in session.chunks.iter().flatten() {
            assembled.extend_from_slice(chunk);
        }

        if assembled.len() as u64 != session.file_size_bytes {
            return Err(SessionError::Validation(format!(
                "assembled size {} does not match declared size {}",
                assembled.len(),
                session.file_size_bytes
            )));
        }

        let actual_hash = sha256_base64(&assembled);
        if actual_hash != session.file_hash {
            return Err(SessionError::FileHashMismatch {
                expected: session.file_hash.clone(),
                actual: actual_hash,
            });
        }

        info!(
            session_id = %session_id,
            file_name = %session.file_name,
            size = assembled.len(),
            "upload session finalized"
        );

        Ok(FinishedUpload {
            file_name: session.file_name,
            mime_type: session.mime_type,
            file_hash: session.file_hash,
            bytes: Bytes::from(assembled),
        })
    }

    pub async fn get_session(&self, session_id: Uuid) -> Result<UploadSession, SessionError> {
        let sessions = self.inner.sessions.read().await;
        sessions
            .get(&session_id)
            .cloned()
            .ok_or_else(|| SessionError::NotFound(session_id.to_string()))
    }

    /// Abandon a session, discarding any received chunks.
    pub async fn cancel_session(&self, session_id: Uuid) -> Result<(), SessionError> {
        let mut sessions = self.inner.sessions.write().await;
        sessions
            .remove(&session_id)
            .map(|session| {
                info!(
                    session_id = %session_id,
                    file_name = %session.file_name,
                    "upload session cancelled"
                );
            })
            .ok_or_else(|| SessionError::NotFound(session_id.to_string()))
    }

    pub async fn session_count(&self) -> usize {
        self.inner.sessions.read().await.len()
    }

    /// Remove sessions whose expiry has passed. Returns how many.
    pub async fn cleanup_expired(&self, now: DateTime<Utc>) -> usize {
        self.inner.reap_expired(now).await
    }

    /// Spawn the periodic cleanup task. Guarded so repeated calls never
    /// spawn duplicate timers; the task exits when the service is dropped.
    pub fn start_cleanup_task(&self, period: Duration) {
        if self
            .inner
            .cleanup_started
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return;
        }

        let weak = Arc::downgrade(&self.inner);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.tick().await;
            loop {
                interval.tick().await;
                match weak.upgrade() {
                    Some(inner) => {
                        inner.reap_expired(Utc::now()).await;
                    }
                    None => break,
                }
            }
        });
    }
}

impl Default for SessionService {
    fn default() -> Self {
        Self::new()
    }
}

fn validate_initiate(request: &InitiateUploadRequest) -> Result<(), SessionError> {
    if request.file_name.trim().is_empty() {
        return Err(SessionError::Validation("file name must not be empty".into()));
    }
    if request.file_size_bytes == 0 {
        return Err(SessionError::Validation("file size must be greater than zero".into()));
    }
    if request.file_size_bytes > MAX_FILE_SIZE_BYTES {
        return Err(SessionError::Validation(format!(
            "file size {} exceeds maximum of {} bytes",
            request.file_size_bytes, MAX_FILE_SIZE_BYTES
        )));
    }
    if request.total_chunks == 0 {
        return Err(SessionError::Validation("total chunks must be at least 1".into()));
    }
    if request.total_chunks > MAX_TOTAL_CHUNKS {
        return Err(SessionError::Validation(format!(
            "total chunks {} exceeds maximum of {}",
            request.total_chunks, MAX_TOTAL_CHUNKS
        )));
    }
    if !looks_like_sha256_base64(&request.file_hash) {
        return Err(SessionError::Validation("file hash is not a valid SHA-256 digest".into()));
    }
    Ok(())
}
