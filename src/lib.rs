//! # backup-relay
//!
//! Moves the archives of a source backup API into a dated folder of a
//! destination drive, one resumable chunked upload per archive.
//!
//! ## Pipeline
//!
//! A run goes through these stages:
//! - **Credentials** - OAuth tokens for both authorities, cached until near expiry
//! - **Links** - the source lists the current backup's data and attachment archives
//! - **Folder** - a `<prefix>-<yyyy-mm-dd>` folder is created under the configured parent
//! - **Batches** - each list is processed in order: stream to scratch storage,
//!   open an upload session, send the file in 320 KiB-aligned chunks
//!
//! A failing archive is logged and skipped; the rest of its batch continues.
//! Failures before the batches start abort the run.
//!
//! ## Quick Start
//!
//! ```no_run
//! use backup_relay::{BackupRelay, Config};
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let relay = BackupRelay::new(Config::from_env()?)?;
//!
//!     let mut events = relay.subscribe();
//!     tokio::spawn(async move {
//!         while let Ok(event) = events.recv().await {
//!             println!("Event: {:?}", event);
//!         }
//!     });
//!
//!     let summary = relay.run(chrono::Utc::now().date_naive()).await?;
//!     std::process::exit(summary.exit_code().into());
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

/// OAuth token acquisition and caching
pub mod auth;
/// Configuration types
pub mod config;
/// Error types
pub mod error;
/// Streaming archive download
pub mod fetcher;
/// Run folder provisioning
pub mod provision;
/// Pipeline orchestration (decomposed into focused submodules)
pub mod relay;
/// Retry logic with exponential backoff
pub mod retry;
/// Upload session negotiation
pub mod session;
/// Chunked upload engine
pub mod transfer;
/// Core types
pub mod types;

// Re-export commonly used types
pub use config::{Config, RetryConfig};
pub use error::{
    AuthError, ChunkUploadError, DownloadError, Error, FolderProvisionError, Result, SessionError,
};
pub use relay::BackupRelay;
pub use types::{
    BackupRun, BatchReport, ChunkWindow, Event, EXIT_FATAL, EXIT_PARTIAL, EXIT_SUCCESS,
    ItemStatus, LinkKind, Provider, RunSummary, TransferItem,
};

/// Run the relay for `run_date`, giving up when a termination signal arrives
///
/// An interrupted run returns an error. Batch tasks still in flight are dropped
/// with the runtime, which removes their scratch files.
///
/// - **Unix:** listens for SIGTERM and SIGINT, with fallbacks if signal registration fails.
/// - **Windows/other:** listens for Ctrl+C via `tokio::signal::ctrl_c()`.
///
/// # Example
///
/// ```no_run
/// use backup_relay::{BackupRelay, Config, run_until_signal};
///
/// #[tokio::main(flavor = "current_thread")]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let relay = BackupRelay::new(Config::from_env()?)?;
///     let summary = run_until_signal(&relay, chrono::Utc::now().date_naive()).await?;
///     println!("{} archives uploaded", summary.completed_count());
///     Ok(())
/// }
/// ```
pub async fn run_until_signal(
    relay: &BackupRelay,
    run_date: chrono::NaiveDate,
) -> Result<RunSummary> {
    tokio::select! {
        result = relay.run(run_date) => result,
        _ = wait_for_signal() => {
            tracing::warn!("run interrupted before completion");
            Err(Error::Other("run interrupted by signal".to_string()))
        }
    }
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    // Registration may fail in restricted environments (containers, tests)
    let sigterm_result = signal(SignalKind::terminate());
    let sigint_result = signal(SignalKind::interrupt());

    match (sigterm_result, sigint_result) {
        (Ok(mut sigterm), Ok(mut sigint)) => {
            tokio::select! {
                _ = sigterm.recv() => {
                    tracing::info!("Received SIGTERM signal");
                }
                _ = sigint.recv() => {
                    tracing::info!("Received SIGINT signal (Ctrl+C)");
                }
            }
        }
        (Err(e), _) => {
            tracing::warn!(error = %e, "Could not register SIGTERM handler, waiting for SIGINT only");
            if let Ok(mut sigint) = signal(SignalKind::interrupt()) {
                sigint.recv().await;
                tracing::info!("Received SIGINT signal (Ctrl+C)");
            } else {
                tracing::error!("Could not register any signal handlers, using ctrl_c fallback");
                tokio::signal::ctrl_c().await.ok();
            }
        }
        (_, Err(e)) => {
            tracing::warn!(error = %e, "Could not register SIGINT handler, waiting for SIGTERM only");
            if let Ok(mut sigterm) = signal(SignalKind::terminate()) {
                sigterm.recv().await;
                tracing::info!("Received SIGTERM signal");
            } else {
                tracing::error!("Could not register any signal handlers, using ctrl_c fallback");
                tokio::signal::ctrl_c().await.ok();
            }
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => {
            tracing::info!("Received Ctrl+C signal");
        }
        Err(e) => {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C signal");
        }
    }
}
