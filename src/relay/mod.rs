//! Pipeline orchestration split into focused submodules.
//!
//! The `BackupRelay` struct and its methods are organized by stage:
//! - [`batch`] - Per-item download, session and upload with failure isolation
//! - [`run`] - Run provisioning and the two concurrent batches

mod batch;
mod run;

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
pub(crate) mod test_helpers;
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests;

use crate::auth::CredentialBroker;
use crate::config::{Config, HttpConfig};
use crate::error::Result;
use crate::fetcher::ArchiveFetcher;
use crate::provision::RunProvisioner;
use crate::session::SessionManager;
use crate::transfer::ChunkedUploader;
use crate::types::Event;
use std::sync::Arc;

/// Capacity of the event channel before slow subscribers start lagging
const EVENT_CHANNEL_CAPACITY: usize = 1000;

/// Moves source backup archives into a dated destination folder
///
/// Cloneable; every field is Arc-wrapped so the two batch tasks of a run share
/// one HTTP client and one token cache.
#[derive(Clone)]
pub struct BackupRelay {
    /// Validated configuration
    pub(crate) config: Arc<Config>,
    /// Event broadcast channel sender (multiple subscribers supported)
    pub(crate) event_tx: tokio::sync::broadcast::Sender<Event>,
    /// Token cache for both authorities
    pub(crate) broker: Arc<CredentialBroker>,
    /// Source download side
    pub(crate) fetcher: Arc<ArchiveFetcher>,
    /// Upload session negotiation
    pub(crate) sessions: Arc<SessionManager>,
    /// Chunked upload engine
    pub(crate) uploader: Arc<ChunkedUploader>,
    /// Run folder creation
    pub(crate) provisioner: Arc<RunProvisioner>,
}

/// Build the HTTP client shared by every component
///
/// Only the connect timeout is set on the client. Request deadlines are applied
/// per request by each component, since archive downloads must not be cut off
/// by a whole-request limit.
pub fn build_http_client(http: &HttpConfig) -> Result<reqwest::Client> {
    let client = reqwest::Client::builder()
        .connect_timeout(http.connect_timeout)
        .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
        .build()?;
    Ok(client)
}

impl BackupRelay {
    /// Create a relay from configuration
    ///
    /// Validates the configuration and builds the shared HTTP client.
    pub fn new(config: Config) -> Result<Self> {
        config.validate()?;
        let client = build_http_client(&config.http)?;
        Ok(Self::with_client(config, client))
    }

    /// Create a relay around an existing HTTP client
    ///
    /// The configuration is used as given; call [`Config::validate`] first.
    pub fn with_client(config: Config, client: reqwest::Client) -> Self {
        let (event_tx, _rx) = tokio::sync::broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let request_timeout = config.http.request_timeout;

        let broker = CredentialBroker::new(
            client.clone(),
            config.source.clone(),
            config.destination.clone(),
            config.tokens.clone(),
        )
        .with_request_timeout(request_timeout);
        let fetcher = ArchiveFetcher::new(
            client.clone(),
            config.source.auth_scheme.clone(),
            config.source.backup_urls_url.clone(),
            config.transfer.scratch_dir.clone(),
            config.transfer.keep_scratch_files,
        )
        .with_request_timeout(request_timeout)
        .with_idle_timeout(config.http.download_idle_timeout);
        let sessions = SessionManager::new(
            client.clone(),
            config.destination.graph_base.clone(),
            config.destination.drive_id.clone(),
        )
        .with_request_timeout(request_timeout);
        let uploader = ChunkedUploader::from_config(client.clone(), &config);
        let provisioner = RunProvisioner::new(
            client,
            config.destination.graph_base.clone(),
            config.destination.drive_id.clone(),
            config.transfer.folder_prefix.clone(),
        )
        .with_request_timeout(request_timeout);

        tracing::debug!(
            scratch_dir = %config.transfer.scratch_dir.display(),
            chunk_size = config.transfer.chunk_size,
            "backup relay initialized"
        );

        Self {
            config: Arc::new(config),
            event_tx,
            broker: Arc::new(broker),
            fetcher: Arc::new(fetcher),
            sessions: Arc::new(sessions),
            uploader: Arc::new(uploader),
            provisioner: Arc::new(provisioner),
        }
    }

    /// Subscribe to pipeline events
    ///
    /// Each subscriber receives every event independently. A subscriber that
    /// falls more than 1000 events behind gets `RecvError::Lagged`.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use backup_relay::{BackupRelay, Config};
    ///
    /// #[tokio::main(flavor = "current_thread")]
    /// async fn main() -> Result<(), Box<dyn std::error::Error>> {
    ///     let relay = BackupRelay::new(Config::from_env()?)?;
    ///
    ///     let mut events = relay.subscribe();
    ///     tokio::spawn(async move {
    ///         while let Ok(event) = events.recv().await {
    ///             tracing::info!(?event, "relay event");
    ///         }
    ///     });
    ///
    ///     let summary = relay.run(chrono::Utc::now().date_naive()).await?;
    ///     println!("{} completed, {} failed", summary.completed_count(), summary.failed_count());
    ///     Ok(())
    /// }
    /// ```
    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<Event> {
        self.event_tx.subscribe()
    }

    /// Current configuration
    pub fn config(&self) -> Arc<Config> {
        Arc::clone(&self.config)
    }

    /// Send an event to all subscribers; dropped silently when nobody listens
    pub(crate) fn emit_event(&self, event: Event) {
        self.event_tx.send(event).ok();
    }
}
