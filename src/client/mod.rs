//! ChunkedUploader — the client-side upload session coordinator.
//!
//! Drives one file through the protocol: hash the whole file, initiate a
//! session, transfer chunks strictly in order, then finalize and collect
//! the analysis verdict. Each network step is wrapped in the bounded
//! backoff policy; a single cancellation token covers the whole operation
//! and is honored before every chunk and inside every in-flight call.
//!
//! Sequential chunk dispatch is deliberate: the server never has to handle
//! out-of-order or concurrent chunk writes for one session, at the cost of
//! not saturating high-latency links.

pub mod progress;
pub mod retry;
pub mod transport;

use crate::models::session::{DEFAULT_CHUNK_SIZE, InitiateUploadRequest};
use crate::models::stored_file::AnalysisResult;
use crate::services::hashing::sha256_base64;
use bytes::Bytes;
use progress::{UploadPhase, UploadProgress, transfer_rates};
use retry::{DEFAULT_MAX_ATTEMPTS, with_backoff};
use std::{
    path::Path,
    sync::atomic::{AtomicBool, Ordering},
    time::Instant,
};
use thiserror::Error;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use transport::{HttpTransport, UploadTransport};

/// Client-side failure, tagged at the origin so callers never have to
/// infer the kind from message text.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("{0}")]
    Validation(String),

    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("server responded {status}: {message}")]
    Server { status: u16, message: String },

    #[error("upload cancelled")]
    Cancelled,

    #[error("an upload is already in progress")]
    AlreadyInProgress,

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

impl ClientError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, ClientError::Cancelled)
    }
}

/// Tuning knobs for the coordinator.
#[derive(Debug, Clone)]
pub struct UploaderConfig {
    /// Bytes per chunk; the last chunk may be shorter.
    pub chunk_size: usize,

    /// Maximum attempts per network operation.
    pub max_attempts: u32,
}

impl Default for UploaderConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }
}

/// Coordinates one upload at a time; a second call while one is in flight
/// fails fast with [`ClientError::AlreadyInProgress`].
pub struct ChunkedUploader<T: UploadTransport> {
    transport: T,
    config: UploaderConfig,
    active: AtomicBool,
    progress_tx: watch::Sender<UploadProgress>,
}

impl ChunkedUploader<HttpTransport> {
    /// Coordinator against a scan-store server with default tuning.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_transport(HttpTransport::new(base_url), UploaderConfig::default())
    }
}

impl<T: UploadTransport> ChunkedUploader<T> {
    pub fn with_transport(transport: T, config: UploaderConfig) -> Self {
        let (progress_tx, _) = watch::channel(UploadProgress::default());
        Self {
            transport,
            config,
            active: AtomicBool::new(false),
            progress_tx,
        }
    }

    /// Subscribe to progress snapshots. Observers always see the latest
    /// state; intermediate snapshots may coalesce under load.
    pub fn progress(&self) -> watch::Receiver<UploadProgress> {
        self.progress_tx.subscribe()
    }

    /// Upload one file end to end and return its analysis verdict.
    ///
    /// Cancelling the token aborts the in-flight call and short-circuits
    /// the chunk loop before the next chunk begins. Already-uploaded
    /// chunks are not retracted; the session is simply abandoned.
    pub async fn upload_file(
        &self,
        path: impl AsRef<Path>,
        cancel: &CancellationToken,
    ) -> Result<AnalysisResult, ClientError> {
        if self
            .active
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(ClientError::AlreadyInProgress);
        }

        let result = self.run(path.as_ref(), cancel).await;

        match &result {
            Ok(_) => {}
            Err(err) if err.is_cancelled() => {
                self.publish_terminal(UploadPhase::Cancelled, None);
            }
            Err(err) => {
                self.publish_terminal(UploadPhase::Error, Some(err.to_string()));
            }
        }

        self.active.store(false, Ordering::SeqCst);
        result
    }

    async fn run(
        &self,
        path: &Path,
        cancel: &CancellationToken,
    ) -> Result<AnalysisResult, ClientError> {
        self.progress_tx.send_replace(UploadProgress {
            phase: UploadPhase::Preparing,
            ..UploadProgress::default()
        });

        let data = Bytes::from(tokio::fs::read(path).await?);
        if data.is_empty() {
            return Err(ClientError::Validation("cannot upload an empty file".into()));
        }

        let file_name = path
            .file_name()
            .and_then(|name| name.to_str())
            .unwrap_or("upload.bin")
            .to_string();
        let file_hash = sha256_base64(&data);
        let chunk_size = self.config.chunk_size;
        let total_bytes = data.len() as u64;
        let total_chunks = data.len().div_ceil(chunk_size) as u32;

        let request = InitiateUploadRequest {
            file_name: file_name.clone(),
            file_size_bytes: total_bytes,
            file_hash: file_hash.clone(),
            total_chunks,
            mime_type: Some("application/octet-stream".into()),
        };

        let transport = &self.transport;
        let max_attempts = self.config.max_attempts;

        let initiated = with_backoff("initiate upload", max_attempts, cancel, || {
            let request = request.clone();
            async move {
                tokio::select! {
                    _ = cancel.cancelled() => Err(ClientError::Cancelled),
                    res = transport.initiate(&request) => res,
                }
            }
        })
        .await?;

        let session_id = initiated.session_id;
        tracing::info!(
            session_id = %session_id,
            file_name = %file_name,
            total_chunks,
            "upload session initiated"
        );

        self.progress_tx.send_replace(UploadProgress {
            phase: UploadPhase::Uploading,
            total_chunks,
            session_id: Some(session_id.clone()),
            ..UploadProgress::default()
        });

        let started = Instant::now();
        let mut uploaded: u64 = 0;

        for index in 0..total_chunks {
            if cancel.is_cancelled() {
                return Err(ClientError::Cancelled);
            }

            let start = index as usize * chunk_size;
            let end = usize::min(start + chunk_size, data.len());
            let chunk = data.slice(start..end);
            let chunk_hash = sha256_base64(&chunk);

            with_backoff("upload chunk", max_attempts, cancel, || {
                let chunk = chunk.clone();
                let session_id = &session_id;
                let chunk_hash = &chunk_hash;
                async move {
                    tokio::select! {
                        _ = cancel.cancelled() => Err(ClientError::Cancelled),
                        res = transport.send_chunk(session_id, index, chunk_hash, chunk) => res,
                    }
                }
            })
            .await?;

            uploaded += (end - start) as u64;
            let (percent, speed, eta) = transfer_rates(uploaded, total_bytes, started.elapsed());
            self.progress_tx.send_replace(UploadProgress {
                phase: UploadPhase::Uploading,
                percent,
                current_chunk: index + 1,
                total_chunks,
                session_id: Some(session_id.clone()),
                speed_bytes_per_sec: speed,
                eta_secs: eta,
                error: None,
            });
        }

        self.progress_tx.send_replace(UploadProgress {
            phase: UploadPhase::Processing,
            percent: 100.0,
            current_chunk: total_chunks,
            total_chunks,
            session_id: Some(session_id.clone()),
            ..UploadProgress::default()
        });

        let result = with_backoff("complete upload", max_attempts, cancel, || {
            let session_id = &session_id;
            async move {
                tokio::select! {
                    _ = cancel.cancelled() => Err(ClientError::Cancelled),
                    res = transport.complete(session_id) => res,
                }
            }
        })
        .await?;

        self.progress_tx.send_replace(UploadProgress {
            phase: UploadPhase::Completed,
            percent: 100.0,
            current_chunk: total_chunks,
            total_chunks,
            session_id: Some(session_id),
            ..UploadProgress::default()
        });

        Ok(result)
    }

    fn publish_terminal(&self, phase: UploadPhase, error: Option<String>) {
        self.progress_tx.send_modify(|progress| {
            progress.phase = phase;
            progress.error = error;
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::session::{ChunkReceipt, InitiateUploadResponse};
    use async_trait::async_trait;
    use chrono::Utc;
    use std::{
        collections::HashMap,
        io::Write,
        sync::{
            Arc, Mutex,
            atomic::{AtomicU32, Ordering},
        },
    };

    /// Scripted transport: records calls, injects failures, and can fire
    /// a cancellation token when a given chunk arrives.
    #[derive(Default)]
    struct ScriptedTransport {
        initiate_failures: AtomicU32,
        chunk_failures: Mutex<HashMap<u32, u32>>,
        cancel_on_chunk: Mutex<Option<(u32, CancellationToken)>>,
        gate: Mutex<Option<Arc<tokio::sync::Notify>>>,
        entered_chunk: Mutex<Option<Arc<tokio::sync::Notify>>>,

        initiate_calls: AtomicU32,
        chunks: Mutex<Vec<(u32, usize, String)>>,
        complete_calls: AtomicU32,
    }

    fn transient() -> ClientError {
        ClientError::Server {
            status: 503,
            message: "try again".into(),
        }
    }

    #[async_trait]
    impl UploadTransport for ScriptedTransport {
        async fn initiate(
            &self,
            _request: &InitiateUploadRequest,
        ) -> Result<InitiateUploadResponse, ClientError> {
            self.initiate_calls.fetch_add(1, Ordering::SeqCst);
            if self.initiate_failures.load(Ordering::SeqCst) > 0 {
                self.initiate_failures.fetch_sub(1, Ordering::SeqCst);
                return Err(transient());
            }
            Ok(InitiateUploadResponse {
                session_id: "scripted-session".into(),
                expires_at: Utc::now() + chrono::Duration::hours(1),
            })
        }

        async fn send_chunk(
            &self,
            _session_id: &str,
            chunk_index: u32,
            chunk_hash: &str,
            chunk: Bytes,
        ) -> Result<ChunkReceipt, ClientError> {
            if let Some(entered) = self.entered_chunk.lock().unwrap().as_ref() {
                entered.notify_one();
            }
            let gate = self.gate.lock().unwrap().clone();
            if let Some(gate) = gate {
                gate.notified().await;
            }

            {
                let mut failures = self.chunk_failures.lock().unwrap();
                if let Some(remaining) = failures.get_mut(&chunk_index) {
                    if *remaining > 0 {
                        *remaining -= 1;
                        return Err(transient());
                    }
                }
            }

            if let Some((index, token)) = self.cancel_on_chunk.lock().unwrap().as_ref() {
                if *index == chunk_index {
                    token.cancel();
                }
            }

            let received = {
                let mut chunks = self.chunks.lock().unwrap();
                chunks.push((chunk_index, chunk.len(), chunk_hash.to_string()));
                chunks.len() as u32
            };
            tokio::task::yield_now().await;
            Ok(ChunkReceipt {
                chunk_index,
                received,
                total_chunks: 0,
                complete: false,
            })
        }

        async fn complete(&self, _session_id: &str) -> Result<AnalysisResult, ClientError> {
            self.complete_calls.fetch_add(1, Ordering::SeqCst);
            Ok(AnalysisResult {
                id: "scripted".into(),
                created_at: Utc::now(),
                verdict: serde_json::json!({ "clean": true }),
            })
        }
    }

    fn write_temp_file(bytes: &[u8]) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(bytes).unwrap();
        file.flush().unwrap();
        file
    }

    fn uploader(
        transport: ScriptedTransport,
        chunk_size: usize,
    ) -> ChunkedUploader<ScriptedTransport> {
        ChunkedUploader::with_transport(
            transport,
            UploaderConfig {
                chunk_size,
                max_attempts: 3,
            },
        )
    }

    #[tokio::test]
    async fn splits_file_into_sequential_chunks() {
        // 120 bytes at 50-byte chunks mirrors the 120 MiB / 50 MiB case:
        // three chunks, the last one short.
        let file = write_temp_file(&[7u8; 120]);
        let uploader = uploader(ScriptedTransport::default(), 50);
        let cancel = CancellationToken::new();

        let result = uploader.upload_file(file.path(), &cancel).await.unwrap();
        assert_eq!(result.verdict["clean"], true);

        let chunks = uploader.transport.chunks.lock().unwrap().clone();
        let sizes: Vec<usize> = chunks.iter().map(|(_, len, _)| *len).collect();
        let indices: Vec<u32> = chunks.iter().map(|(index, _, _)| *index).collect();
        assert_eq!(sizes, vec![50, 50, 20]);
        assert_eq!(indices, vec![0, 1, 2]);
        assert_eq!(uploader.transport.complete_calls.load(Ordering::SeqCst), 1);

        let progress = uploader.progress().borrow().clone();
        assert_eq!(progress.phase, UploadPhase::Completed);
        assert_eq!(progress.percent, 100.0);
        assert_eq!(progress.current_chunk, 3);
    }

    #[tokio::test]
    async fn chunk_hashes_match_chunk_content() {
        let payload: Vec<u8> = (0u8..=99).collect();
        let file = write_temp_file(&payload);
        let uploader = uploader(ScriptedTransport::default(), 64);
        let cancel = CancellationToken::new();

        uploader.upload_file(file.path(), &cancel).await.unwrap();

        let chunks = uploader.transport.chunks.lock().unwrap().clone();
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].2, sha256_base64(&payload[..64]));
        assert_eq!(chunks[1].2, sha256_base64(&payload[64..]));
    }

    #[tokio::test(start_paused = true)]
    async fn retries_transient_initiate_failures() {
        let transport = ScriptedTransport {
            initiate_failures: AtomicU32::new(2),
            ..ScriptedTransport::default()
        };
        let file = write_temp_file(b"some payload");
        let uploader = uploader(transport, 50);
        let cancel = CancellationToken::new();

        // Two failures then success on attempt 3: the caller sees no error.
        uploader.upload_file(file.path(), &cancel).await.unwrap();
        assert_eq!(uploader.transport.initiate_calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_retries_surface_the_last_error() {
        let transport = ScriptedTransport {
            initiate_failures: AtomicU32::new(5),
            ..ScriptedTransport::default()
        };
        let file = write_temp_file(b"some payload");
        let uploader = uploader(transport, 50);
        let cancel = CancellationToken::new();

        let err = uploader.upload_file(file.path(), &cancel).await.unwrap_err();
        assert!(matches!(err, ClientError::Server { status: 503, .. }));
        assert_eq!(uploader.transport.initiate_calls.load(Ordering::SeqCst), 3);

        let progress = uploader.progress().borrow().clone();
        assert_eq!(progress.phase, UploadPhase::Error);
        assert!(progress.error.is_some());
    }

    #[tokio::test]
    async fn cancellation_stops_further_chunk_dispatch() {
        let cancel = CancellationToken::new();
        let transport = ScriptedTransport {
            cancel_on_chunk: Mutex::new(Some((1, cancel.clone()))),
            ..ScriptedTransport::default()
        };
        let file = write_temp_file(&[1u8; 150]);
        let uploader = uploader(transport, 50);

        let err = uploader.upload_file(file.path(), &cancel).await.unwrap_err();
        assert!(err.is_cancelled());

        // Chunks 0 and 1 went out; chunk 2 never dispatched, no finalize.
        assert_eq!(uploader.transport.chunks.lock().unwrap().len(), 2);
        assert_eq!(uploader.transport.complete_calls.load(Ordering::SeqCst), 0);

        let progress = uploader.progress().borrow().clone();
        assert_eq!(progress.phase, UploadPhase::Cancelled);
        assert!(progress.error.is_none());
    }

    #[tokio::test]
    async fn second_upload_while_active_fails_fast() {
        let gate = Arc::new(tokio::sync::Notify::new());
        let entered = Arc::new(tokio::sync::Notify::new());
        let transport = ScriptedTransport {
            gate: Mutex::new(Some(gate.clone())),
            entered_chunk: Mutex::new(Some(entered.clone())),
            ..ScriptedTransport::default()
        };
        let file = write_temp_file(b"blocked payload");
        let uploader = Arc::new(uploader(transport, 50));

        let background = {
            let uploader = uploader.clone();
            let path = file.path().to_path_buf();
            tokio::spawn(async move {
                let cancel = CancellationToken::new();
                uploader.upload_file(path, &cancel).await
            })
        };

        // Wait until the first upload is parked inside the gated chunk call.
        entered.notified().await;

        let cancel = CancellationToken::new();
        let err = uploader.upload_file(file.path(), &cancel).await.unwrap_err();
        assert!(matches!(err, ClientError::AlreadyInProgress));

        gate.notify_one();
        background.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn empty_file_is_rejected_before_any_network_call() {
        let file = write_temp_file(b"");
        let uploader = uploader(ScriptedTransport::default(), 50);
        let cancel = CancellationToken::new();

        let err = uploader.upload_file(file.path(), &cancel).await.unwrap_err();
        assert!(matches!(err, ClientError::Validation(_)));
        assert_eq!(uploader.transport.initiate_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn transient_chunk_failure_is_retried_in_place() {
        let transport = ScriptedTransport {
            chunk_failures: Mutex::new(HashMap::from([(1, 1)])),
            ..ScriptedTransport::default()
        };
        let file = write_temp_file(&[9u8; 120]);
        let uploader = uploader(transport, 50);
        let cancel = CancellationToken::new();

        uploader.upload_file(file.path(), &cancel).await.unwrap();

        // All three chunks landed despite the mid-stream failure.
        let chunks = uploader.transport.chunks.lock().unwrap().clone();
        let indices: Vec<u32> = chunks.iter().map(|(index, _, _)| *index).collect();
        assert_eq!(indices, vec![0, 1, 2]);
    }
}
