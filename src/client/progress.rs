//! Progress telemetry for in-flight uploads.
//!
//! Speed is a simple average from session start, not a sliding window; ETA
//! derives from it and reports zero rather than dividing by zero.

use serde::Serialize;
use std::time::Duration;

/// Lifecycle phase of a client upload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum UploadPhase {
    #[default]
    Idle,
    Preparing,
    Uploading,
    Processing,
    Completed,
    Cancelled,
    Error,
}

/// Snapshot published to progress observers after every chunk transfer.
#[derive(Debug, Clone, Serialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct UploadProgress {
    pub phase: UploadPhase,

    /// 0–100.
    pub percent: f64,

    /// Chunks fully transferred so far.
    pub current_chunk: u32,

    pub total_chunks: u32,

    pub session_id: Option<String>,

    /// Average throughput since the transfer started.
    pub speed_bytes_per_sec: f64,

    /// Estimated seconds remaining; zero when speed is zero.
    pub eta_secs: f64,

    pub error: Option<String>,
}

/// Derive `(percent, speed, eta)` from cumulative bytes and elapsed time.
pub fn transfer_rates(uploaded_bytes: u64, total_bytes: u64, elapsed: Duration) -> (f64, f64, f64) {
    let percent = if total_bytes == 0 {
        0.0
    } else {
        uploaded_bytes as f64 / total_bytes as f64 * 100.0
    };

    let elapsed_secs = elapsed.as_secs_f64();
    let speed = if elapsed_secs > 0.0 {
        uploaded_bytes as f64 / elapsed_secs
    } else {
        0.0
    };

    let eta = if speed > 0.0 {
        (total_bytes - uploaded_bytes) as f64 / speed
    } else {
        0.0
    };

    (percent, speed, eta)
}
