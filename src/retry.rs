//! Retry logic with exponential backoff
//!
//! Chunk uploads go through [`with_retry`]: transient failures (timeouts, dropped
//! connections, throttling, 5xx) are retried with exponentially growing delays,
//! optionally jittered, up to [`RetryConfig::max_attempts`] retries. Permanent
//! failures are returned immediately.
//!
//! # Example
//!
//! ```no_run
//! use backup_relay::retry::{IsRetryable, with_retry};
//! use backup_relay::config::RetryConfig;
//!
//! #[derive(Debug)]
//! enum PutError {
//!     Throttled,
//!     Forbidden,
//! }
//!
//! impl std::fmt::Display for PutError {
//!     fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
//!         write!(f, "{:?}", self)
//!     }
//! }
//!
//! impl IsRetryable for PutError {
//!     fn is_retryable(&self) -> bool {
//!         matches!(self, PutError::Throttled)
//!     }
//! }
//!
//! # async fn example() -> Result<(), PutError> {
//! let config = RetryConfig::default();
//! with_retry(&config, || async { Ok::<_, PutError>(()) }).await?;
//! # Ok(())
//! # }
//! ```

use crate::config::RetryConfig;
use crate::error::ChunkUploadError;
use rand::Rng;
use std::future::Future;
use std::time::Duration;

/// Trait for errors that can be classified as retryable or not
///
/// Transient failures (timeouts, connection resets, throttling) return `true`.
/// Permanent failures (bad credentials, unknown session, unreadable file) return `false`.
pub trait IsRetryable {
    /// Returns true if the error is transient and the operation should be retried
    fn is_retryable(&self) -> bool;
}

/// HTTP statuses worth retrying: request timeout, throttling and server-side faults
pub fn is_retryable_status(status: u16) -> bool {
    matches!(status, 408 | 429 | 500 | 502 | 503 | 504)
}

/// Network failures worth retrying
pub fn is_retryable_request(error: &reqwest::Error) -> bool {
    error.is_timeout() || error.is_connect()
}

impl IsRetryable for ChunkUploadError {
    fn is_retryable(&self) -> bool {
        match self {
            ChunkUploadError::Request { source, .. } => is_retryable_request(source),
            ChunkUploadError::Rejected { status, .. } => is_retryable_status(*status),
            ChunkUploadError::Read { .. }
            | ChunkUploadError::Open { .. }
            | ChunkUploadError::EmptyFile { .. } => false,
        }
    }
}

/// Execute an async operation with exponential backoff retry logic
///
/// The operation runs once, then up to `config.max_attempts` more times while it
/// keeps failing with a retryable error. Delays start at `initial_delay`, grow by
/// `backoff_multiplier` and are capped at `max_delay`.
///
/// Returns the successful result or the last error.
pub async fn with_retry<F, Fut, T, E>(config: &RetryConfig, mut operation: F) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: IsRetryable + std::fmt::Display,
{
    let mut attempt = 0;
    let mut delay = config.initial_delay;

    loop {
        match operation().await {
            Ok(result) => {
                if attempt > 0 {
                    tracing::info!(attempts = attempt + 1, "Operation succeeded after retry");
                }
                return Ok(result);
            }
            Err(e) if e.is_retryable() && attempt < config.max_attempts => {
                attempt += 1;

                tracing::warn!(
                    error = %e,
                    attempt = attempt,
                    max_attempts = config.max_attempts,
                    delay_ms = delay.as_millis(),
                    "Operation failed, retrying"
                );

                let wait = if config.jitter {
                    add_jitter(delay)
                } else {
                    delay
                };
                tokio::time::sleep(wait).await;

                let next_delay =
                    Duration::from_secs_f64(delay.as_secs_f64() * config.backoff_multiplier);
                delay = next_delay.min(config.max_delay);
            }
            Err(e) => {
                if e.is_retryable() {
                    tracing::error!(
                        error = %e,
                        attempts = attempt + 1,
                        "Operation failed after all retry attempts exhausted"
                    );
                } else {
                    tracing::error!(error = %e, "Operation failed with non-retryable error");
                }
                return Err(e);
            }
        }
    }
}

/// Add random jitter to a delay
///
/// The result lies between `delay` and `2 * delay`.
fn add_jitter(delay: Duration) -> Duration {
    let mut rng = rand::thread_rng();
    let jitter_factor: f64 = rng.gen_range(0.0..=1.0);
    Duration::from_secs_f64(delay.as_secs_f64() * (1.0 + jitter_factor))
}
