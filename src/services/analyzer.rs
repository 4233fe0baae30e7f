//! Analyzer — the external analysis collaborator.
//!
//! The actual verdict logic lives in an upstream service. This module only
//! defines the seam (a trait) and the production HTTP implementation; the
//! verdict JSON is treated as opaque and stored verbatim.

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum AnalyzerError {
    #[error("analysis request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("analysis service returned {status}: {message}")]
    Upstream { status: u16, message: String },
}

/// Seam for the upstream analysis service: takes raw file bytes plus a
/// force-reanalyze flag and returns a JSON verdict.
#[async_trait]
pub trait Analyzer: Send + Sync {
    async fn analyze(
        &self,
        file_name: &str,
        bytes: Bytes,
        force: bool,
    ) -> Result<serde_json::Value, AnalyzerError>;
}

/// Production implementation: posts the file as multipart to a configured
/// endpoint and relays the verdict.
pub struct HttpAnalyzer {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpAnalyzer {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: endpoint.into(),
        }
    }
}

#[async_trait]
impl Analyzer for HttpAnalyzer {
    async fn analyze(
        &self,
        file_name: &str,
        bytes: Bytes,
        force: bool,
    ) -> Result<serde_json::Value, AnalyzerError> {
        debug!(file_name = %file_name, size = bytes.len(), force, "submitting file for analysis");

        let part = reqwest::multipart::Part::stream(reqwest::Body::from(bytes))
            .file_name(file_name.to_string());
        let form = reqwest::multipart::Form::new()
            .part("file", part)
            .text("force", force.to_string());

        let response = self
            .client
            .post(&self.endpoint)
            .multipart(form)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(AnalyzerError::Upstream {
                status: status.as_u16(),
                message,
            });
        }

        Ok(response.json().await?)
    }
}
