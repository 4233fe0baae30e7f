//! Bounded exponential-backoff retry for single network operations.
//!
//! Shared by session initiation and chunk transfer with identical
//! semantics: any failure is presumed transient and retried, except
//! cancellation, which always propagates immediately.

use super::ClientError;
use std::{future::Future, time::Duration};
use tokio_util::sync::CancellationToken;
use tracing::warn;

/// Default maximum attempts per operation.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Run `op` up to `max_attempts` times, sleeping `2^attempt` seconds
/// between failures. The backoff delay itself honors the cancellation
/// token. Exhausting attempts surfaces the last error.
pub async fn with_backoff<T, F, Fut>(
    op_name: &str,
    max_attempts: u32,
    cancel: &CancellationToken,
    mut op: F,
) -> Result<T, ClientError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ClientError>>,
{
    let mut attempt: u32 = 0;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_cancelled() => return Err(err),
            Err(err) => {
                attempt += 1;
                if attempt >= max_attempts {
                    warn!(
                        op = op_name,
                        attempts = attempt,
                        error = %err,
                        "giving up after exhausting retries"
                    );
                    return Err(err);
                }

                let delay = Duration::from_secs(1u64 << attempt);
                warn!(
                    op = op_name,
                    attempt,
                    delay_secs = delay.as_secs(),
                    error = %err,
                    "operation failed, backing off"
                );
                tokio::select! {
                    _ = cancel.cancelled() => return Err(ClientError::Cancelled),
                    _ = tokio::time::sleep(delay) => {}
                }
            }
        }
    }
}
