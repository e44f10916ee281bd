//! Batch retry on transient store faults
//!
//! Ingestion is idempotent, so a batch aborted by a store outage is simply
//! run again. The orchestrator never retries internally; this wrapper is
//! used by the binary around whole-batch calls.

use crate::error::IngestError;
use std::future::Future;
use std::time::{Duration, Instant};

const INITIAL_BACKOFF_MS: u64 = 10;
const MAX_BACKOFF_MS: u64 = 1000;

/// Retry `operation` with exponential backoff while it fails transiently
///
/// **Backoff:** 10 ms, doubling, capped at 1000 ms per sleep. Retries stop
/// once `max_wait_ms` has elapsed since the first attempt; the last error is
/// returned. Non-transient errors are returned immediately.
pub async fn retry_transient<F, Fut, T>(
    operation_name: &str,
    max_wait_ms: u64,
    mut operation: F,
) -> Result<T, IngestError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, IngestError>>,
{
    let start_time = Instant::now();
    let max_duration = Duration::from_millis(max_wait_ms);
    let mut attempt = 0u32;
    let mut backoff_ms = INITIAL_BACKOFF_MS;

    loop {
        attempt += 1;

        let err = match operation().await {
            Ok(result) => {
                if attempt > 1 {
                    tracing::info!(
                        operation = operation_name,
                        attempt,
                        elapsed_ms = start_time.elapsed().as_millis() as u64,
                        "Operation succeeded after retry"
                    );
                }
                return Ok(result);
            }
            Err(err) if err.is_transient() => err,
            Err(err) => return Err(err),
        };

        let elapsed = start_time.elapsed();
        if elapsed >= max_duration {
            tracing::error!(
                operation = operation_name,
                attempt,
                elapsed_ms = elapsed.as_millis() as u64,
                max_wait_ms,
                error = %err,
                "Giving up: max retry time exceeded"
            );
            return Err(err);
        }

        let sleep_ms = backoff_ms.min(MAX_BACKOFF_MS);
        tracing::warn!(
            operation = operation_name,
            attempt,
            backoff_ms = sleep_ms,
            remaining_ms = max_duration.saturating_sub(elapsed).as_millis() as u64,
            error = %err,
            "Transient failure, will retry after backoff"
        );

        tokio::time::sleep(Duration::from_millis(sleep_ms)).await;
        backoff_ms = (backoff_ms * 2).min(MAX_BACKOFF_MS);
    }
}
