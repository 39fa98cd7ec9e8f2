//! Error types for backup-relay
//!
//! This module provides the error taxonomy for the transfer pipeline:
//! - A top-level [`Error`] used throughout the crate, with a [`Result`] alias
//! - One sub-enum per pipeline stage (auth, download, session, chunk upload,
//!   folder provisioning), each carrying enough context to explain the failure
//! - Classification of which failures abort a whole run and which only one item

use crate::types::{ChunkWindow, Provider};
use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for backup-relay operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for backup-relay
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error with context about which setting is invalid
    #[error("configuration error: {message}")]
    Config {
        /// Human-readable error message describing the configuration issue
        message: String,
        /// The configuration key that caused the error (e.g., "SOURCE_CLIENT_ID")
        key: Option<String>,
    },

    /// Token exchange with an OAuth authority failed
    #[error("authentication error: {0}")]
    Auth(#[from] AuthError),

    /// Fetching a source archive failed
    #[error("download error: {0}")]
    Download(#[from] DownloadError),

    /// Negotiating an upload session failed
    #[error("upload session error: {0}")]
    Session(#[from] SessionError),

    /// A byte range was rejected during chunked upload
    #[error("chunk upload error: {0}")]
    ChunkUpload(#[from] ChunkUploadError),

    /// The run folder could not be created
    #[error("folder provisioning error: {0}")]
    FolderProvision(#[from] FolderProvisionError),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Network error outside a specific pipeline stage
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Other error
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Shorthand for a configuration error tied to a specific key
    pub fn config(message: impl Into<String>, key: impl Into<String>) -> Self {
        Error::Config {
            message: message.into(),
            key: Some(key.into()),
        }
    }

    /// Whether this error should abort the whole run rather than a single item
    ///
    /// Per-item stages (download, session, chunk upload) are isolated by the
    /// batch loop. Everything else happens before the batches start.
    pub fn is_fatal_to_run(&self) -> bool {
        !matches!(
            self,
            Error::Download(_) | Error::Session(_) | Error::ChunkUpload(_)
        )
    }
}

/// Token exchange errors
#[derive(Debug, Error)]
pub enum AuthError {
    /// The token endpoint could not be reached
    #[error("{provider} token request failed: {source}")]
    Request {
        /// The authority that was being asked for a token
        provider: Provider,
        /// Underlying HTTP client error
        source: reqwest::Error,
    },

    /// The token endpoint answered with an error
    #[error("{provider} token request rejected with HTTP {status}: {body}")]
    Rejected {
        /// The authority that rejected the request
        provider: Provider,
        /// HTTP status code returned
        status: u16,
        /// Response body, for diagnostics
        body: String,
    },

    /// The token response did not contain an access token
    #[error("{provider} token response had no access_token{}", detail_suffix(.detail))]
    MissingToken {
        /// The authority that answered
        provider: Provider,
        /// Error text reported by the authority, if any
        detail: Option<String>,
    },
}

/// Archive download errors
#[derive(Debug, Error)]
pub enum DownloadError {
    /// The URL has no final path segment to name the local file after
    #[error("cannot derive a file name from {url}")]
    InvalidUrl {
        /// The offending source URL
        url: String,
    },

    /// The download request could not be sent
    #[error("request for {url} failed: {source}")]
    Request {
        /// The source URL
        url: String,
        /// Underlying HTTP client error
        source: reqwest::Error,
    },

    /// The source API answered with a non-success status
    #[error("{url} returned HTTP {status}")]
    Status {
        /// The source URL
        url: String,
        /// HTTP status code returned
        status: u16,
    },

    /// The response body stream broke mid-transfer
    #[error("stream for {url} failed after {received} bytes: {source}")]
    Stream {
        /// The source URL
        url: String,
        /// Bytes written before the failure
        received: u64,
        /// Underlying HTTP client error
        source: reqwest::Error,
    },

    /// No response head, or no further body bytes, arrived in time
    #[error("{url} stalled for {after:?} after {received} bytes")]
    Timeout {
        /// The source URL
        url: String,
        /// Bytes written before the stall
        received: u64,
        /// How long the fetcher waited
        after: std::time::Duration,
    },

    /// Writing the scratch file failed
    #[error("failed to write {path}: {source}")]
    Write {
        /// The scratch file path
        path: PathBuf,
        /// Underlying I/O error
        source: std::io::Error,
    },
}

/// Upload session negotiation errors
#[derive(Debug, Error)]
pub enum SessionError {
    /// The session request could not be sent
    #[error("session request for {file_name} failed: {source}")]
    Request {
        /// Target file name
        file_name: String,
        /// Underlying HTTP client error
        source: reqwest::Error,
    },

    /// The storage API refused to open a session
    #[error("session for {file_name} rejected with HTTP {status}: {body}")]
    Rejected {
        /// Target file name
        file_name: String,
        /// HTTP status code returned
        status: u16,
        /// Response body, for diagnostics
        body: String,
    },

    /// The session response did not contain an upload URL
    #[error("session response for {file_name} had no uploadUrl")]
    MissingUploadUrl {
        /// Target file name
        file_name: String,
    },
}

/// Chunk upload errors
///
/// Every variant tied to a byte range carries the failed [`ChunkWindow`] and the
/// file's total size so the caller can report exactly where the transfer stopped.
#[derive(Debug, Error)]
pub enum ChunkUploadError {
    /// The chunk request could not be sent (after retries, if transient)
    #[error("upload of {window}/{total} failed after {attempts} attempt(s): {source}")]
    Request {
        /// The window that failed
        window: ChunkWindow,
        /// Total file size in bytes
        total: u64,
        /// Number of attempts made
        attempts: u32,
        /// Underlying HTTP client error
        source: reqwest::Error,
    },

    /// The session endpoint rejected the chunk (after retries, if transient)
    #[error("upload of {window}/{total} rejected with HTTP {status} after {attempts} attempt(s): {body}")]
    Rejected {
        /// The window that failed
        window: ChunkWindow,
        /// Total file size in bytes
        total: u64,
        /// Number of attempts made
        attempts: u32,
        /// HTTP status code returned
        status: u16,
        /// Response body, for diagnostics
        body: String,
    },

    /// Reading the window from the scratch file failed
    #[error("failed to read {window}/{total} from {path}: {source}")]
    Read {
        /// The window being read
        window: ChunkWindow,
        /// Total file size in bytes
        total: u64,
        /// The scratch file path
        path: PathBuf,
        /// Underlying I/O error
        source: std::io::Error,
    },

    /// The scratch file could not be opened or measured
    #[error("failed to open {path}: {source}")]
    Open {
        /// The scratch file path
        path: PathBuf,
        /// Underlying I/O error
        source: std::io::Error,
    },

    /// Upload sessions cannot carry zero-byte files
    #[error("{path} is empty")]
    EmptyFile {
        /// The scratch file path
        path: PathBuf,
    },
}

impl ChunkUploadError {
    /// The byte range that failed, if the failure is tied to one
    pub fn window(&self) -> Option<&ChunkWindow> {
        match self {
            ChunkUploadError::Request { window, .. }
            | ChunkUploadError::Rejected { window, .. }
            | ChunkUploadError::Read { window, .. } => Some(window),
            ChunkUploadError::Open { .. } | ChunkUploadError::EmptyFile { .. } => None,
        }
    }
}

/// Run folder provisioning errors
#[derive(Debug, Error)]
pub enum FolderProvisionError {
    /// The folder request could not be sent
    #[error("folder request for {name} failed: {source}")]
    Request {
        /// Requested folder name
        name: String,
        /// Underlying HTTP client error
        source: reqwest::Error,
    },

    /// The storage API refused to create the folder
    #[error("folder {name} rejected with HTTP {status}: {body}")]
    Rejected {
        /// Requested folder name
        name: String,
        /// HTTP status code returned
        status: u16,
        /// Response body, for diagnostics
        body: String,
    },

    /// The folder response did not contain an id
    #[error("folder response for {name} had no id")]
    MissingId {
        /// Requested folder name
        name: String,
    },
}

fn detail_suffix(detail: &Option<String>) -> String {
    detail
        .as_deref()
        .map(|d| format!(" ({d})"))
        .unwrap_or_default()
}

/// Read a failed response's body for error reporting, never failing itself
pub(crate) async fn response_body(response: reqwest::Response) -> String {
    response.text().await.unwrap_or_default()
}
