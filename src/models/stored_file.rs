//! Cache entries: raw file payloads and their analysis verdicts.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A complete uploaded file held in memory by the ephemeral cache.
///
/// Keyed externally by the canonical content hash. The payload is kept as
/// `Bytes` so clones are cheap reference bumps, not copies.
#[derive(Clone, Debug)]
pub struct StoredFile {
    /// Raw file content.
    pub bytes: Bytes,

    /// Original filename as supplied by the uploader.
    pub file_name: String,

    /// Declared MIME type.
    pub mime_type: String,

    /// Payload size in bytes.
    pub size_bytes: u64,

    /// When the file landed in the cache. Drives TTL and size-cap eviction.
    pub stored_at: DateTime<Utc>,
}

/// Verdict returned by the external analysis collaborator.
///
/// The `verdict` payload is opaque to this service: it is stored and served
/// back verbatim, never interpreted.
#[derive(Serialize, Deserialize, Clone, Debug)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisResult {
    /// Canonical content hash of the analyzed file.
    pub id: String,

    /// When this verdict was produced.
    pub created_at: DateTime<Utc>,

    /// Opaque analysis payload.
    pub verdict: serde_json::Value,
}
