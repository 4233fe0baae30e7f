//! End-to-end exercise of the upload protocol against a real server: the
//! client coordinator chunks a temp file, streams it over HTTP, and the
//! cached verdict is then retrievable and refreshable by hash.

use async_trait::async_trait;
use bytes::Bytes;
use scan_store::{
    client::{ChunkedUploader, UploaderConfig, transport::HttpTransport},
    routes,
    services::{
        analyzer::{Analyzer, AnalyzerError},
        cache_service::{AnalysisCache, CacheConfig},
        hashing::sha256_base64,
        session_service::SessionService,
    },
    state::AppState,
};
use std::{
    io::Write,
    sync::{
        Arc,
        atomic::{AtomicU32, Ordering},
    },
};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

/// Stands in for the upstream analysis service; records how it was called.
#[derive(Default)]
struct RecordingAnalyzer {
    calls: AtomicU32,
    forced_calls: AtomicU32,
}

#[async_trait]
impl Analyzer for RecordingAnalyzer {
    async fn analyze(
        &self,
        file_name: &str,
        bytes: Bytes,
        force: bool,
    ) -> Result<serde_json::Value, AnalyzerError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if force {
            self.forced_calls.fetch_add(1, Ordering::SeqCst);
        }
        Ok(serde_json::json!({
            "fileName": file_name,
            "sizeBytes": bytes.len(),
            "verdict": "clean",
        }))
    }
}

async fn spawn_server(analyzer: Arc<RecordingAnalyzer>) -> String {
    let state = AppState::new(
        SessionService::new(),
        AnalysisCache::new(CacheConfig::default()),
        analyzer,
    );
    let app = routes::routes::routes().with_state(state);

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{}", addr)
}

fn url_safe(hash: &str) -> String {
    hash.replace('+', "-").replace('/', "_").replace('=', "")
}

#[tokio::test]
async fn chunked_upload_analyze_and_reanalyze_round_trip() {
    let analyzer = Arc::new(RecordingAnalyzer::default());
    let base_url = spawn_server(analyzer.clone()).await;

    // 150 bytes at 64-byte chunks: three chunks, the last one short.
    let payload: Vec<u8> = (0..150u32).map(|n| (n % 251) as u8).collect();
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(&payload).unwrap();
    file.flush().unwrap();

    let uploader = ChunkedUploader::with_transport(
        HttpTransport::new(&base_url),
        UploaderConfig {
            chunk_size: 64,
            max_attempts: 3,
        },
    );

    let cancel = CancellationToken::new();
    let result = uploader.upload_file(file.path(), &cancel).await.unwrap();
    assert_eq!(result.verdict["verdict"], "clean");
    assert_eq!(result.verdict["sizeBytes"], 150);
    assert_eq!(analyzer.calls.load(Ordering::SeqCst), 1);

    // The verdict is addressable by hash, in url-safe encoding too.
    let file_hash = sha256_base64(&payload);
    let http = reqwest::Client::new();
    let fetched: serde_json::Value = http
        .get(format!("{}/files/{}", base_url, url_safe(&file_hash)))
        .send()
        .await
        .unwrap()
        .error_for_status()
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(fetched["verdict"]["verdict"], "clean");
    assert_eq!(fetched["id"], result.id);

    // Reanalysis reuses the cached bytes and forces a fresh verdict.
    let refreshed: serde_json::Value = http
        .post(format!("{}/reanalyze", base_url))
        .json(&serde_json::json!({ "fileHash": url_safe(&file_hash) }))
        .send()
        .await
        .unwrap()
        .error_for_status()
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(refreshed["verdict"]["verdict"], "clean");
    assert_eq!(analyzer.calls.load(Ordering::SeqCst), 2);
    assert_eq!(analyzer.forced_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn unknown_hash_returns_not_found() {
    let base_url = spawn_server(Arc::new(RecordingAnalyzer::default())).await;

    let missing = url_safe(&sha256_base64(b"never uploaded"));
    let response = reqwest::Client::new()
        .get(format!("{}/files/{}", base_url, missing))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::NOT_FOUND);

    let body: serde_json::Value = response.json().await.unwrap();
    assert!(body["error"].as_str().unwrap().contains("no analysis result"));
}

#[tokio::test]
async fn corrupted_chunk_is_rejected_with_conflict() {
    let base_url = spawn_server(Arc::new(RecordingAnalyzer::default())).await;
    let http = reqwest::Client::new();

    let payload = vec![5u8; 32];
    let initiate: serde_json::Value = http
        .post(format!("{}/upload/initiate", base_url))
        .json(&serde_json::json!({
            "fileName": "corrupt.bin",
            "fileSizeBytes": payload.len(),
            "fileHash": sha256_base64(&payload),
            "totalChunks": 1,
        }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let session_id = initiate["sessionId"].as_str().unwrap().to_string();

    // Declare the right hash but send different bytes.
    let form = reqwest::multipart::Form::new()
        .text("sessionId", session_id.clone())
        .text("chunkIndex", "0")
        .text("chunkHash", sha256_base64(&payload))
        .part(
            "chunk",
            reqwest::multipart::Part::bytes(vec![6u8; 32]).file_name("chunk-0"),
        );
    let response = http
        .post(format!("{}/upload/chunk", base_url))
        .multipart(form)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::CONFLICT);

    // The session is intact; the chunk can be resent correctly.
    let status: serde_json::Value = http
        .get(format!("{}/upload/{}", base_url, session_id))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(status["missingChunks"], serde_json::json!([0]));

    let form = reqwest::multipart::Form::new()
        .text("sessionId", session_id)
        .text("chunkIndex", "0")
        .text("chunkHash", sha256_base64(&payload))
        .part(
            "chunk",
            reqwest::multipart::Part::bytes(payload).file_name("chunk-0"),
        );
    let receipt: serde_json::Value = http
        .post(format!("{}/upload/chunk", base_url))
        .multipart(form)
        .send()
        .await
        .unwrap()
        .error_for_status()
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(receipt["complete"], true);
}

#[tokio::test]
async fn cancelled_session_is_gone() {
    let base_url = spawn_server(Arc::new(RecordingAnalyzer::default())).await;
    let http = reqwest::Client::new();

    let initiate: serde_json::Value = http
        .post(format!("{}/upload/initiate", base_url))
        .json(&serde_json::json!({
            "fileName": "abandoned.bin",
            "fileSizeBytes": 10,
            "fileHash": sha256_base64(b"abandoned!"),
            "totalChunks": 1,
        }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let session_id = initiate["sessionId"].as_str().unwrap();

    let response = http
        .delete(format!("{}/upload/{}", base_url, session_id))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::NO_CONTENT);

    let response = http
        .get(format!("{}/upload/{}", base_url, session_id))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::NOT_FOUND);
}
