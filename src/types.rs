//! Core types for backup-relay

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// OAuth authority a credential is issued by
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    /// The backup API the archives are downloaded from
    Source,
    /// The storage API the archives are uploaded to
    Destination,
}

impl std::fmt::Display for Provider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Provider::Source => write!(f, "source"),
            Provider::Destination => write!(f, "destination"),
        }
    }
}

/// Which input list an item was taken from
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LinkKind {
    /// Record data exports
    Data,
    /// File attachment exports
    Attachment,
}

impl std::fmt::Display for LinkKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LinkKind::Data => write!(f, "data"),
            LinkKind::Attachment => write!(f, "attachment"),
        }
    }
}

/// Lifecycle of a single transfer
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemStatus {
    /// Pulled from the input list, nothing done yet
    Pending,
    /// Streaming to scratch storage
    Downloading,
    /// Scratch file complete
    Downloaded,
    /// Upload session negotiated
    SessionOpen,
    /// Chunks in flight
    Uploading,
    /// Final chunk accepted
    Completed,
    /// Gave up on this item
    Failed,
}

impl ItemStatus {
    /// Completed and Failed are final
    pub fn is_terminal(&self) -> bool {
        matches!(self, ItemStatus::Completed | ItemStatus::Failed)
    }
}

/// One source archive moving through the pipeline
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TransferItem {
    /// URL the archive is downloaded from
    pub source_url: String,
    /// Input list the URL came from
    pub kind: LinkKind,
    /// Scratch path once the download finished
    pub local_path: Option<PathBuf>,
    /// Target file name (last path segment of the source URL)
    pub file_name: String,
    /// Upload session endpoint once negotiated
    pub session_url: Option<String>,
    /// Size of the downloaded archive
    pub bytes_total: u64,
    /// Bytes accepted by the destination so far
    pub bytes_sent: u64,
    /// Current pipeline stage
    pub status: ItemStatus,
    /// Failure message when `status` is `Failed`
    pub error: Option<String>,
}

impl TransferItem {
    /// Create a pending item for a source URL
    pub fn new(source_url: impl Into<String>, kind: LinkKind) -> Self {
        Self {
            source_url: source_url.into(),
            kind,
            local_path: None,
            file_name: String::new(),
            session_url: None,
            bytes_total: 0,
            bytes_sent: 0,
            status: ItemStatus::Pending,
            error: None,
        }
    }

    /// Move to `status` unless the item already reached a terminal state
    pub fn advance(&mut self, status: ItemStatus) {
        if self.status.is_terminal() {
            tracing::debug!(
                url = %self.source_url,
                current = ?self.status,
                requested = ?status,
                "ignoring transition out of terminal state"
            );
            return;
        }
        self.status = status;
    }

    /// Record acknowledged bytes; never moves backwards
    pub fn record_sent(&mut self, bytes_sent: u64) {
        self.bytes_sent = self.bytes_sent.max(bytes_sent);
    }

    /// Mark the item failed with a reason
    pub fn fail(&mut self, reason: impl Into<String>) {
        if self.status.is_terminal() {
            return;
        }
        self.error = Some(reason.into());
        self.status = ItemStatus::Failed;
    }
}

/// A bearer token together with its validity window
#[derive(Clone, Serialize, Deserialize)]
pub struct Credential {
    /// Authority that issued the token
    pub provider: Provider,
    /// The bearer token itself
    pub token: String,
    /// When the exchange completed
    pub obtained_at: DateTime<Utc>,
    /// When the authority says the token stops working
    pub expires_at: DateTime<Utc>,
}

impl Credential {
    /// Whether the token is still usable `margin` from `now`
    pub fn is_fresh(&self, now: DateTime<Utc>, margin: chrono::Duration) -> bool {
        now + margin < self.expires_at
    }
}

// Tokens must not end up in logs
impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credential")
            .field("provider", &self.provider)
            .field("token", &"<redacted>")
            .field("obtained_at", &self.obtained_at)
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// One contiguous byte range of a file submitted as a single chunk
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkWindow {
    /// First byte of the range
    pub offset: u64,
    /// Number of bytes in the range (never zero)
    pub length: u64,
    /// Whether this is the last range of the file
    pub is_final: bool,
}

impl ChunkWindow {
    /// Inclusive last byte of the range
    pub fn end(&self) -> u64 {
        self.offset + self.length - 1
    }

    /// `Content-Range` header value for a file of `total` bytes
    pub fn content_range(&self, total: u64) -> String {
        format!("bytes {}-{}/{}", self.offset, self.end(), total)
    }
}

impl std::fmt::Display for ChunkWindow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "bytes {}-{}", self.offset, self.end())
    }
}

/// Links returned by the source's "request backup URLs" endpoint
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupUrls {
    /// Record data archives
    #[serde(default)]
    pub data_links: Vec<String>,
    /// Attachment archives
    #[serde(default)]
    pub attachment_links: Vec<String>,
}

impl BackupUrls {
    /// Total number of links across both lists
    pub fn len(&self) -> usize {
        self.data_links.len() + self.attachment_links.len()
    }

    /// Whether both lists are empty
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A negotiated resumable upload session
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadSession {
    /// Opaque endpoint every chunk is sent to
    pub upload_url: String,
    /// When the destination will discard the session
    pub expires_at: Option<DateTime<Utc>>,
}

/// Result of a completed chunked upload
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadOutcome {
    /// Id of the created drive item, if the final response carried one
    pub item_id: Option<String>,
    /// Bytes accepted by the destination
    pub bytes_sent: u64,
    /// Number of chunk requests that succeeded
    pub chunks: usize,
}

/// Entry of a drive folder listing
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DriveItem {
    /// Drive item id
    pub id: String,
    /// Display name
    #[serde(default)]
    pub name: String,
    /// Present when the item is a folder
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub folder: Option<serde_json::Value>,
}

impl DriveItem {
    /// Whether the item is a folder
    pub fn is_folder(&self) -> bool {
        self.folder.is_some()
    }
}

/// Items processed by one invocation of the batch loop
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BatchReport {
    /// Which input list the batch covered
    pub kind: LinkKind,
    /// Items in input order
    pub items: Vec<TransferItem>,
}

impl BatchReport {
    /// Scratch paths of every successful download, regardless of upload outcome
    ///
    /// The files behind these paths are deleted once their item finishes unless
    /// `transfer.keep_scratch_files` is set, so after a batch they usually no
    /// longer exist.
    pub fn downloaded_paths(&self) -> Vec<PathBuf> {
        self.items
            .iter()
            .filter_map(|item| item.local_path.clone())
            .collect()
    }

    /// Items whose upload completed
    pub fn completed(&self) -> impl Iterator<Item = &TransferItem> {
        self.items
            .iter()
            .filter(|item| item.status == ItemStatus::Completed)
    }

    /// Items that failed at any stage
    pub fn failed(&self) -> impl Iterator<Item = &TransferItem> {
        self.items
            .iter()
            .filter(|item| item.status == ItemStatus::Failed)
    }
}

/// One execution of the pipeline into one destination folder
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BackupRun {
    /// `<prefix>-<yyyy-mm-dd>`
    pub folder_name: String,
    /// Id assigned by the destination when the folder was created
    pub folder_id: String,
    /// Date the folder name was derived from
    pub run_date: NaiveDate,
    /// Every item of the run, data batch first
    pub items: Vec<TransferItem>,
}

/// Process exit code when every item completed
pub const EXIT_SUCCESS: u8 = 0;
/// Process exit code when the run aborted before or while provisioning
pub const EXIT_FATAL: u8 = 1;
/// Process exit code when the run finished but some items failed
pub const EXIT_PARTIAL: u8 = 2;

/// Final state of a run after both batches finished
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RunSummary {
    /// The run, with all items in their terminal state
    pub run: BackupRun,
}

impl RunSummary {
    /// Number of items that completed
    pub fn completed_count(&self) -> usize {
        self.run
            .items
            .iter()
            .filter(|item| item.status == ItemStatus::Completed)
            .count()
    }

    /// Number of items that failed
    pub fn failed_count(&self) -> usize {
        self.run
            .items
            .iter()
            .filter(|item| item.status == ItemStatus::Failed)
            .count()
    }

    /// Exit code the binary should report for this run
    pub fn exit_code(&self) -> u8 {
        if self.failed_count() == 0 {
            EXIT_SUCCESS
        } else {
            EXIT_PARTIAL
        }
    }
}

/// Event emitted during a run
///
/// Subscribe with [`BackupRelay::subscribe`](crate::BackupRelay::subscribe).
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// The run folder was created
    FolderProvisioned {
        /// Folder name requested
        name: String,
        /// Id assigned by the destination
        folder_id: String,
    },

    /// An item left the queue
    ItemStarted {
        /// Source URL
        url: String,
        /// Input list
        kind: LinkKind,
    },

    /// An item finished downloading to scratch storage
    Downloaded {
        /// Target file name
        file_name: String,
        /// Scratch path
        path: PathBuf,
        /// Size in bytes
        bytes: u64,
    },

    /// An upload session was negotiated
    SessionOpened {
        /// Target file name
        file_name: String,
    },

    /// Periodic upload progress
    UploadProgress {
        /// Target file name
        file_name: String,
        /// Progress percentage (0.0 to 100.0)
        percent: f32,
        /// Bytes accepted so far
        bytes_sent: u64,
        /// File size
        bytes_total: u64,
    },

    /// An item's upload completed
    ItemCompleted {
        /// Target file name
        file_name: String,
        /// Bytes uploaded
        bytes: u64,
    },

    /// An item failed and was skipped
    ItemFailed {
        /// Source URL
        url: String,
        /// Error message
        error: String,
    },

    /// One batch loop finished
    BatchFinished {
        /// Input list
        kind: LinkKind,
        /// Items that completed
        completed: usize,
        /// Items that failed
        failed: usize,
    },

    /// Both batches finished
    RunFinished {
        /// Run folder id
        folder_id: String,
        /// Items that completed
        completed: usize,
        /// Items that failed
        failed: usize,
    },
}
