//! Configuration types for backup-relay

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Chunk sizes must be a multiple of this (320 KiB)
pub const CHUNK_SIZE_UNIT: u64 = 327_680;

/// Source backup API settings
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SourceConfig {
    /// Refresh-token grant endpoint
    #[serde(default = "default_source_token_url")]
    pub token_url: String,

    /// Endpoint returning the `data_links` / `attachment_links` lists
    #[serde(default = "default_backup_urls_url")]
    pub backup_urls_url: String,

    /// Long-lived refresh token
    #[serde(default)]
    pub refresh_token: String,

    /// OAuth client id
    #[serde(default)]
    pub client_id: String,

    /// OAuth client secret
    #[serde(default)]
    pub client_secret: String,

    /// Scheme placed before the token in the Authorization header
    #[serde(default = "default_source_auth_scheme")]
    pub auth_scheme: String,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            token_url: default_source_token_url(),
            backup_urls_url: default_backup_urls_url(),
            refresh_token: String::new(),
            client_id: String::new(),
            client_secret: String::new(),
            auth_scheme: default_source_auth_scheme(),
        }
    }
}

/// Destination storage API settings
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DestinationConfig {
    /// Client-credentials grant endpoint
    #[serde(default = "default_destination_token_url")]
    pub token_url: String,

    /// Base URL of the drive API (no trailing slash)
    #[serde(default = "default_graph_base")]
    pub graph_base: String,

    /// OAuth client id
    #[serde(default)]
    pub client_id: String,

    /// OAuth client secret
    #[serde(default)]
    pub client_secret: String,

    /// Scope requested in the client-credentials grant
    #[serde(default = "default_scope")]
    pub scope: String,

    /// Drive the run folders are created in
    #[serde(default)]
    pub drive_id: String,

    /// Folder under which each run folder is created
    #[serde(default)]
    pub parent_folder_id: String,
}

impl Default for DestinationConfig {
    fn default() -> Self {
        Self {
            token_url: default_destination_token_url(),
            graph_base: default_graph_base(),
            client_id: String::new(),
            client_secret: String::new(),
            scope: default_scope(),
            drive_id: String::new(),
            parent_folder_id: String::new(),
        }
    }
}

/// Transfer pipeline behavior
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TransferConfig {
    /// Bytes per upload chunk (default: 327680, must be a multiple of 320 KiB)
    #[serde(default = "default_chunk_size")]
    pub chunk_size: u64,

    /// Report progress every N chunks (default: 10)
    #[serde(default = "default_progress_every")]
    pub progress_every: usize,

    /// Where downloads are staged (default: the platform temp directory)
    #[serde(default = "default_scratch_dir")]
    pub scratch_dir: PathBuf,

    /// Prefix of the per-run folder name (default: "zCRMAutoBackup")
    #[serde(default = "default_folder_prefix")]
    pub folder_prefix: String,

    /// Keep scratch files after upload instead of deleting them
    #[serde(default)]
    pub keep_scratch_files: bool,

    /// Cancel the upload session when a chunk fails for good
    ///
    /// When false the partially uploaded session is left for the destination
    /// to expire on its own.
    #[serde(default)]
    pub cancel_failed_sessions: bool,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            progress_every: default_progress_every(),
            scratch_dir: default_scratch_dir(),
            folder_prefix: default_folder_prefix(),
            keep_scratch_files: false,
            cancel_failed_sessions: false,
        }
    }
}

/// HTTP client timeouts
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct HttpConfig {
    /// TCP/TLS connect timeout (default: 30 seconds)
    #[serde(default = "default_connect_timeout", with = "duration_serde")]
    pub connect_timeout: Duration,

    /// Deadline for token, session, folder and chunk requests (default: 600 seconds)
    ///
    /// Archive downloads only use it for the response head; their body is
    /// bounded by `download_idle_timeout` instead.
    #[serde(default = "default_request_timeout", with = "duration_serde")]
    pub request_timeout: Duration,

    /// Longest gap between two body chunks of an archive download (default: 120 seconds)
    #[serde(default = "default_download_idle_timeout", with = "duration_serde")]
    pub download_idle_timeout: Duration,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            connect_timeout: default_connect_timeout(),
            request_timeout: default_request_timeout(),
            download_idle_timeout: default_download_idle_timeout(),
        }
    }
}

/// Token cache behavior
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TokenConfig {
    /// Refresh a cached token this long before it expires (default: 60 seconds)
    #[serde(default = "default_refresh_margin", with = "duration_serde")]
    pub refresh_margin: Duration,

    /// Lifetime assumed when a token response has no `expires_in` (default: 3600 seconds)
    #[serde(default = "default_token_lifetime", with = "duration_serde")]
    pub default_lifetime: Duration,
}

impl Default for TokenConfig {
    fn default() -> Self {
        Self {
            refresh_margin: default_refresh_margin(),
            default_lifetime: default_token_lifetime(),
        }
    }
}

/// Retry configuration for transient chunk upload failures
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum number of retry attempts (default: 5)
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Initial delay before first retry (default: 1 second)
    #[serde(default = "default_initial_delay", with = "duration_serde")]
    pub initial_delay: Duration,

    /// Maximum delay between retries (default: 60 seconds)
    #[serde(default = "default_max_delay", with = "duration_serde")]
    pub max_delay: Duration,

    /// Multiplier for exponential backoff (default: 2.0)
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,

    /// Add random jitter to delays (default: true)
    #[serde(default = "default_true")]
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_delay: default_initial_delay(),
            max_delay: default_max_delay(),
            backoff_multiplier: default_backoff_multiplier(),
            jitter: true,
        }
    }
}

/// Main configuration for [`BackupRelay`](crate::BackupRelay)
///
/// Fields are grouped by concern:
/// - [`source`](SourceConfig) - backup API endpoints and credentials
/// - [`destination`](DestinationConfig) - drive API endpoints, credentials, target folder
/// - [`transfer`](TransferConfig) - chunking, scratch storage, folder naming
/// - [`http`](HttpConfig), [`tokens`](TokenConfig), [`retry`](RetryConfig)
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Config {
    /// Source backup API
    #[serde(default)]
    pub source: SourceConfig,

    /// Destination storage API
    #[serde(default)]
    pub destination: DestinationConfig,

    /// Transfer pipeline behavior
    #[serde(default)]
    pub transfer: TransferConfig,

    /// HTTP timeouts
    #[serde(default)]
    pub http: HttpConfig,

    /// Token cache behavior
    #[serde(default)]
    pub tokens: TokenConfig,

    /// Per-chunk retry policy
    #[serde(default)]
    pub retry: RetryConfig,
}

impl Config {
    /// Build configuration from process environment variables
    ///
    /// Required: `SOURCE_REFRESH_TOKEN`, `SOURCE_CLIENT_ID`, `SOURCE_CLIENT_SECRET`,
    /// `DEST_TENANT_ID`, `DEST_CLIENT_ID`, `DEST_CLIENT_SECRET`, `DEST_DRIVE_ID`,
    /// `DEST_PARENT_FOLDER_ID`.
    ///
    /// Optional overrides: `SOURCE_TOKEN_URL`, `SOURCE_BACKUP_URLS_URL`,
    /// `DEST_TOKEN_URL`, `DEST_GRAPH_BASE`, `SCRATCH_DIR`, `FOLDER_PREFIX`, `CHUNK_SIZE`,
    /// `HTTP_REQUEST_TIMEOUT` and `DOWNLOAD_IDLE_TIMEOUT` (seconds).
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build configuration from an arbitrary key lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let required = |key: &str| -> Result<String> {
            lookup(key)
                .filter(|v| !v.trim().is_empty())
                .ok_or_else(|| Error::config(format!("{} is not set", key), key))
        };

        let tenant = required("DEST_TENANT_ID")?;

        let mut config = Config {
            source: SourceConfig {
                refresh_token: required("SOURCE_REFRESH_TOKEN")?,
                client_id: required("SOURCE_CLIENT_ID")?,
                client_secret: required("SOURCE_CLIENT_SECRET")?,
                ..Default::default()
            },
            destination: DestinationConfig {
                token_url: destination_token_url(&tenant),
                client_id: required("DEST_CLIENT_ID")?,
                client_secret: required("DEST_CLIENT_SECRET")?,
                drive_id: required("DEST_DRIVE_ID")?,
                parent_folder_id: required("DEST_PARENT_FOLDER_ID")?,
                ..Default::default()
            },
            ..Default::default()
        };

        if let Some(url) = lookup("SOURCE_TOKEN_URL") {
            config.source.token_url = url;
        }
        if let Some(url) = lookup("SOURCE_BACKUP_URLS_URL") {
            config.source.backup_urls_url = url;
        }
        if let Some(url) = lookup("DEST_TOKEN_URL") {
            config.destination.token_url = url;
        }
        if let Some(url) = lookup("DEST_GRAPH_BASE") {
            config.destination.graph_base = url.trim_end_matches('/').to_string();
        }
        if let Some(dir) = lookup("SCRATCH_DIR") {
            config.transfer.scratch_dir = PathBuf::from(dir);
        }
        if let Some(prefix) = lookup("FOLDER_PREFIX") {
            config.transfer.folder_prefix = prefix;
        }
        if let Some(secs) = lookup("HTTP_REQUEST_TIMEOUT") {
            config.http.request_timeout = parse_seconds(&secs, "HTTP_REQUEST_TIMEOUT")?;
        }
        if let Some(secs) = lookup("DOWNLOAD_IDLE_TIMEOUT") {
            config.http.download_idle_timeout = parse_seconds(&secs, "DOWNLOAD_IDLE_TIMEOUT")?;
        }
        if let Some(size) = lookup("CHUNK_SIZE") {
            config.transfer.chunk_size = size.trim().parse().map_err(|_| {
                Error::config(format!("CHUNK_SIZE is not a number: {}", size), "CHUNK_SIZE")
            })?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Check invariants the pipeline relies on
    pub fn validate(&self) -> Result<()> {
        let chunk_size = self.transfer.chunk_size;
        if chunk_size == 0 || chunk_size % CHUNK_SIZE_UNIT != 0 {
            return Err(Error::config(
                format!(
                    "chunk size {} must be a non-zero multiple of {} bytes",
                    chunk_size, CHUNK_SIZE_UNIT
                ),
                "chunk_size",
            ));
        }

        if self.transfer.progress_every == 0 {
            return Err(Error::config(
                "progress_every must be at least 1",
                "progress_every",
            ));
        }

        if self.transfer.folder_prefix.trim().is_empty() {
            return Err(Error::config(
                "folder prefix must not be empty",
                "folder_prefix",
            ));
        }

        let secrets = [
            ("SOURCE_REFRESH_TOKEN", &self.source.refresh_token),
            ("SOURCE_CLIENT_ID", &self.source.client_id),
            ("SOURCE_CLIENT_SECRET", &self.source.client_secret),
            ("DEST_CLIENT_ID", &self.destination.client_id),
            ("DEST_CLIENT_SECRET", &self.destination.client_secret),
            ("DEST_DRIVE_ID", &self.destination.drive_id),
            ("DEST_PARENT_FOLDER_ID", &self.destination.parent_folder_id),
        ];
        if let Some((key, _)) = secrets.iter().find(|(_, value)| value.trim().is_empty()) {
            return Err(Error::config(format!("{} must not be empty", key), *key));
        }

        if self.retry.backoff_multiplier < 1.0 {
            return Err(Error::config(
                "backoff multiplier must be at least 1.0",
                "backoff_multiplier",
            ));
        }

        Ok(())
    }
}

fn parse_seconds(value: &str, key: &str) -> Result<Duration> {
    match value.trim().parse::<u64>() {
        Ok(secs) if secs > 0 => Ok(Duration::from_secs(secs)),
        _ => Err(Error::config(
            format!("{} must be a positive number of seconds: {}", key, value),
            key,
        )),
    }
}

/// Client-credentials endpoint for a directory tenant
pub fn destination_token_url(tenant: &str) -> String {
    format!(
        "https://login.microsoftonline.com/{}/oauth2/v2.0/token",
        tenant
    )
}

fn default_source_token_url() -> String {
    "https://accounts.zoho.com/oauth/v2/token".to_string()
}

fn default_backup_urls_url() -> String {
    "https://www.zohoapis.com/crm/bulk/v7/backup/urls".to_string()
}

fn default_source_auth_scheme() -> String {
    "Zoho-oauthtoken".to_string()
}

fn default_destination_token_url() -> String {
    destination_token_url("common")
}

fn default_graph_base() -> String {
    "https://graph.microsoft.com/v1.0".to_string()
}

fn default_scope() -> String {
    "https://graph.microsoft.com/.default".to_string()
}

fn default_chunk_size() -> u64 {
    CHUNK_SIZE_UNIT
}

fn default_progress_every() -> usize {
    10
}

fn default_scratch_dir() -> PathBuf {
    std::env::temp_dir()
}

fn default_folder_prefix() -> String {
    "zCRMAutoBackup".to_string()
}

fn default_connect_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_download_idle_timeout() -> Duration {
    Duration::from_secs(120)
}

fn default_request_timeout() -> Duration {
    Duration::from_secs(600)
}

fn default_refresh_margin() -> Duration {
    Duration::from_secs(60)
}

fn default_token_lifetime() -> Duration {
    Duration::from_secs(3600)
}

fn default_true() -> bool {
    true
}

fn default_max_attempts() -> u32 {
    5
}

fn default_initial_delay() -> Duration {
    Duration::from_secs(1)
}

fn default_max_delay() -> Duration {
    Duration::from_secs(60)
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

// Duration serialization helper (whole seconds)
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_secs())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}
