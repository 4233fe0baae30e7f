//! Wire transport for the upload coordinator.
//!
//! The coordinator talks to the server through the `UploadTransport` trait
//! so tests can substitute a scripted in-memory implementation; the
//! production implementation speaks HTTP via `reqwest`.

use super::ClientError;
use crate::models::{
    session::{ChunkReceipt, CompleteUploadRequest, InitiateUploadRequest, InitiateUploadResponse},
    stored_file::AnalysisResult,
};
use async_trait::async_trait;
use bytes::Bytes;
use serde::de::DeserializeOwned;

/// One round trip per protocol step. Implementations perform no retries;
/// the retry policy wraps these calls at the coordinator level.
#[async_trait]
pub trait UploadTransport: Send + Sync {
    async fn initiate(
        &self,
        request: &InitiateUploadRequest,
    ) -> Result<InitiateUploadResponse, ClientError>;

    async fn send_chunk(
        &self,
        session_id: &str,
        chunk_index: u32,
        chunk_hash: &str,
        chunk: Bytes,
    ) -> Result<ChunkReceipt, ClientError>;

    async fn complete(&self, session_id: &str) -> Result<AnalysisResult, ClientError>;
}

/// HTTP transport against a scan-store server.
pub struct HttpTransport {
    client: reqwest::Client,
    base_url: String,
}

impl HttpTransport {
    pub fn new(base_url: impl Into<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self {
            client: reqwest::Client::new(),
            base_url,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

#[async_trait]
impl UploadTransport for HttpTransport {
    async fn initiate(
        &self,
        request: &InitiateUploadRequest,
    ) -> Result<InitiateUploadResponse, ClientError> {
        let response = self
            .client
            .post(self.url("/upload/initiate"))
            .json(request)
            .send()
            .await?;
        decode(response).await
    }

    async fn send_chunk(
        &self,
        session_id: &str,
        chunk_index: u32,
        chunk_hash: &str,
        chunk: Bytes,
    ) -> Result<ChunkReceipt, ClientError> {
        let part = reqwest::multipart::Part::stream(reqwest::Body::from(chunk))
            .file_name(format!("chunk-{}", chunk_index));
        let form = reqwest::multipart::Form::new()
            .text("sessionId", session_id.to_string())
            .text("chunkIndex", chunk_index.to_string())
            .text("chunkHash", chunk_hash.to_string())
            .part("chunk", part);

        let response = self
            .client
            .post(self.url("/upload/chunk"))
            .multipart(form)
            .send()
            .await?;
        decode(response).await
    }

    async fn complete(&self, session_id: &str) -> Result<AnalysisResult, ClientError> {
        let response = self
            .client
            .post(self.url("/upload/complete"))
            .json(&CompleteUploadRequest {
                session_id: session_id.to_string(),
            })
            .send()
            .await?;
        decode(response).await
    }
}

/// Turn a non-2xx response into a tagged server error, extracting the
/// `error` field of the JSON body when present.
async fn decode<T: DeserializeOwned>(response: reqwest::Response) -> Result<T, ClientError> {
    let status = response.status();
    if !status.is_success() {
        let text = response.text().await.unwrap_or_default();
        let message = serde_json::from_str::<serde_json::Value>(&text)
            .ok()
            .and_then(|body| body.get("error").and_then(|e| e.as_str()).map(String::from))
            .unwrap_or(text);
        return Err(ClientError::Server {
            status: status.as_u16(),
            message,
        });
    }
    Ok(response.json().await?)
}
