//! Upload sessions and the wire types of the chunked upload protocol.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Default chunk size used by the client coordinator: 50 MiB.
pub const DEFAULT_CHUNK_SIZE: usize = 50 * 1024 * 1024;

/// Largest file accepted for upload: 4 GiB.
pub const MAX_FILE_SIZE_BYTES: u64 = 4 * 1024 * 1024 * 1024;

/// Upper bound on declared chunk count for a single session.
pub const MAX_TOTAL_CHUNKS: u32 = 65_536;

/// Sessions not completed within this window are swept away.
pub const SESSION_EXPIRY_HOURS: i64 = 24;

/// Body of `POST /upload/initiate`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitiateUploadRequest {
    /// Original file name.
    pub file_name: String,

    /// Total file size in bytes.
    pub file_size_bytes: u64,

    /// SHA-256 (base64) of the complete file; becomes the cache key.
    pub file_hash: String,

    /// Number of chunks the client will send.
    pub total_chunks: u32,

    /// Declared MIME type; defaults to octet-stream when absent.
    #[serde(default)]
    pub mime_type: Option<String>,
}

/// Response to `POST /upload/initiate`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitiateUploadResponse {
    /// Opaque session token to present with every chunk.
    pub session_id: String,

    /// When the session will be swept if left incomplete.
    pub expires_at: DateTime<Utc>,
}

/// Acknowledgement returned for each accepted chunk.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkReceipt {
    pub chunk_index: u32,

    /// Chunks received so far.
    pub received: u32,

    pub total_chunks: u32,

    /// True once every chunk index has been received.
    pub complete: bool,
}

/// Body of `POST /upload/complete`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompleteUploadRequest {
    pub session_id: String,
}

/// Body of `POST /reanalyze`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReanalyzeRequest {
    pub file_hash: String,
}

/// Response to `GET /upload/{sessionId}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionStatusResponse {
    pub session_id: String,
    pub file_name: String,
    pub file_size_bytes: u64,
    pub total_chunks: u32,
    pub received_chunks: Vec<u32>,
    pub missing_chunks: Vec<u32>,
    pub progress: f64,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

/// Server-held state for one in-flight chunked upload.
///
/// Created on initiate, mutated as verified chunks arrive, and consumed
/// exactly once on completion. Chunk payloads are retained in memory until
/// assembly; the session never touches disk.
#[derive(Clone, Debug)]
pub struct UploadSession {
    pub id: Uuid,
    pub file_name: String,
    pub file_size_bytes: u64,
    pub file_hash: String,
    pub mime_type: String,
    pub total_chunks: u32,

    /// Verified chunk payloads, one slot per index.
    pub chunks: Vec<Option<Bytes>>,

    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl UploadSession {
    pub fn new(request: &InitiateUploadRequest, expiry: chrono::Duration) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            file_name: request.file_name.clone(),
            file_size_bytes: request.file_size_bytes,
            file_hash: request.file_hash.clone(),
            mime_type: request
                .mime_type
                .clone()
                .unwrap_or_else(|| "application/octet-stream".into()),
            total_chunks: request.total_chunks,
            chunks: vec![None; request.total_chunks as usize],
            created_at: now,
            expires_at: now + expiry,
        }
    }

    pub fn is_expired(&self) -> bool {
        Utc::now() > self.expires_at
    }

    pub fn received_count(&self) -> u32 {
        self.chunks.iter().filter(|c| c.is_some()).count() as u32
    }

    /// True once every chunk index `0..total_chunks` has been received.
    pub fn is_complete(&self) -> bool {
        self.chunks.iter().all(|c| c.is_some())
    }

    pub fn received_chunks(&self) -> Vec<u32> {
        self.chunks
            .iter()
            .enumerate()
            .filter(|(_, c)| c.is_some())
            .map(|(i, _)| i as u32)
            .collect()
    }

    pub fn missing_chunks(&self) -> Vec<u32> {
        self.chunks
            .iter()
            .enumerate()
            .filter(|(_, c)| c.is_none())
            .map(|(i, _)| i as u32)
            .collect()
    }

    pub fn progress(&self) -> f64 {
        if self.total_chunks == 0 {
            return 100.0;
        }
        f64::from(self.received_count()) / f64::from(self.total_chunks) * 100.0
    }
}
