//! Streaming download of source archives into scratch storage.

use crate::config::HttpConfig;
use crate::error::{DownloadError, Error, Result};
use crate::types::{BackupUrls, LinkKind};
use futures::StreamExt;
use reqwest::header::AUTHORIZATION;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::io::{AsyncWriteExt, BufWriter};

/// Write buffer for scratch files (1 MB) - reduces syscalls for small body chunks
const WRITE_BUFFER_SIZE: usize = 1024 * 1024;

/// A downloaded archive on local disk
///
/// The file is deleted when the guard is dropped unless [`ScratchFile::keep`]
/// was called, so scratch space is released whether the upload succeeds or not.
#[derive(Debug)]
pub struct ScratchFile {
    path: PathBuf,
    bytes: u64,
    keep: bool,
}

impl ScratchFile {
    fn new(path: PathBuf) -> Self {
        Self {
            path,
            bytes: 0,
            keep: false,
        }
    }

    /// Location of the file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Size of the file in bytes
    pub fn len(&self) -> u64 {
        self.bytes
    }

    /// Whether the download produced zero bytes
    pub fn is_empty(&self) -> bool {
        self.bytes == 0
    }

    /// Leave the file in place when the guard is dropped
    pub fn keep(&mut self) {
        self.keep = true;
    }
}

impl Drop for ScratchFile {
    fn drop(&mut self) {
        if self.keep {
            return;
        }
        match std::fs::remove_file(&self.path) {
            Ok(()) => tracing::debug!(path = %self.path.display(), "removed scratch file"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                tracing::warn!(path = %self.path.display(), error = %e, "failed to remove scratch file")
            }
        }
    }
}

/// Derive the local file name from the last path segment of a URL
///
/// Query strings and fragments are ignored and percent-escapes decoded. Returns
/// `None` when the URL ends in a slash or the segment would escape the scratch
/// directory.
pub fn file_name_from_url(source_url: &str) -> Option<String> {
    let raw = match url::Url::parse(source_url) {
        Ok(parsed) => parsed
            .path_segments()
            .and_then(|mut segments| segments.next_back())
            .map(str::to_string)?,
        Err(_) => {
            let without_query = source_url.split(['?', '#']).next().unwrap_or(source_url);
            without_query.rsplit('/').next().unwrap_or(without_query).to_string()
        }
    };

    let decoded = urlencoding::decode(&raw).ok()?.into_owned();
    if decoded.is_empty()
        || decoded == "."
        || decoded == ".."
        || decoded.contains(['/', '\\'])
    {
        return None;
    }
    Some(decoded)
}

#[derive(Debug, Deserialize)]
struct BackupUrlsResponse {
    #[serde(default)]
    urls: BackupUrls,
}

/// Downloads archives from the source API
pub struct ArchiveFetcher {
    client: reqwest::Client,
    auth_scheme: String,
    backup_urls_url: String,
    scratch_dir: PathBuf,
    keep_files: bool,
    request_timeout: Duration,
    idle_timeout: Duration,
}

impl ArchiveFetcher {
    /// Create a fetcher writing into `scratch_dir`
    pub fn new(
        client: reqwest::Client,
        auth_scheme: impl Into<String>,
        backup_urls_url: impl Into<String>,
        scratch_dir: impl Into<PathBuf>,
        keep_files: bool,
    ) -> Self {
        Self {
            client,
            auth_scheme: auth_scheme.into(),
            backup_urls_url: backup_urls_url.into(),
            scratch_dir: scratch_dir.into(),
            keep_files,
            request_timeout: HttpConfig::default().request_timeout,
            idle_timeout: HttpConfig::default().download_idle_timeout,
        }
    }

    /// Deadline for the link request and for the head of each download
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Longest wait for the next body chunk of a download
    pub fn with_idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = timeout;
        self
    }

    /// Directory holding the downloads of one link kind
    ///
    /// The data and attachment batches run concurrently, so each writes into
    /// its own subdirectory.
    pub fn scratch_dir_for(&self, kind: LinkKind) -> PathBuf {
        self.scratch_dir.join(kind.to_string())
    }

    fn authorization(&self, token: &str) -> String {
        format!("{} {}", self.auth_scheme, token)
    }

    /// Ask the source API for the current backup's download links
    pub async fn request_backup_urls(&self, token: &str) -> Result<BackupUrls> {
        let url = self.backup_urls_url.as_str();
        let response = self
            .client
            .get(url)
            .header(AUTHORIZATION, self.authorization(token))
            .timeout(self.request_timeout)
            .send()
            .await
            .map_err(|source| DownloadError::Request {
                url: url.to_string(),
                source,
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(DownloadError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            }
            .into());
        }

        let body = response.bytes().await.map_err(Error::Network)?;
        let parsed: BackupUrlsResponse = serde_json::from_slice(&body)?;

        tracing::info!(
            data_links = parsed.urls.data_links.len(),
            attachment_links = parsed.urls.attachment_links.len(),
            "received backup URLs"
        );
        Ok(parsed.urls)
    }

    /// Stream `source_url` into the scratch directory of `kind`
    ///
    /// The body is written incrementally; it is never held in memory as a whole.
    /// There is no overall deadline on the body, only on the gap between chunks.
    /// On any failure the partial file is removed.
    pub async fn fetch(
        &self,
        source_url: &str,
        kind: LinkKind,
        token: &str,
    ) -> Result<ScratchFile> {
        let file_name =
            file_name_from_url(source_url).ok_or_else(|| DownloadError::InvalidUrl {
                url: source_url.to_string(),
            })?;

        let dir = self.scratch_dir_for(kind);
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|source| DownloadError::Write {
                path: dir.clone(),
                source,
            })?;
        let path = dir.join(&file_name);

        tracing::info!(url = %source_url, path = %path.display(), "starting download");

        let request = self
            .client
            .get(source_url)
            .header(AUTHORIZATION, self.authorization(token))
            .send();
        let response = tokio::time::timeout(self.request_timeout, request)
            .await
            .map_err(|_| DownloadError::Timeout {
                url: source_url.to_string(),
                received: 0,
                after: self.request_timeout,
            })?
            .map_err(|source| DownloadError::Request {
                url: source_url.to_string(),
                source,
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(DownloadError::Status {
                url: source_url.to_string(),
                status: status.as_u16(),
            }
            .into());
        }

        let write_err = |source| DownloadError::Write {
            path: path.clone(),
            source,
        };

        let file = tokio::fs::File::create(&path).await.map_err(write_err)?;
        let mut scratch = ScratchFile::new(path.clone());
        let mut writer = BufWriter::with_capacity(WRITE_BUFFER_SIZE, file);

        let mut received: u64 = 0;
        let mut stream = response.bytes_stream();
        loop {
            let next = tokio::time::timeout(self.idle_timeout, stream.next())
                .await
                .map_err(|_| DownloadError::Timeout {
                    url: source_url.to_string(),
                    received,
                    after: self.idle_timeout,
                })?;
            let Some(chunk) = next else {
                break;
            };
            let chunk = chunk.map_err(|source| DownloadError::Stream {
                url: source_url.to_string(),
                received,
                source,
            })?;
            writer.write_all(&chunk).await.map_err(write_err)?;
            received += chunk.len() as u64;
        }
        writer.flush().await.map_err(write_err)?;
        drop(writer);

        scratch.bytes = received;
        if self.keep_files {
            scratch.keep();
        }

        tracing::info!(path = %path.display(), bytes = received, "download complete");
        Ok(scratch)
    }
}
