//! Chunked upload of a scratch file into an open upload session.
//!
//! The file is split into fixed-size [`ChunkWindow`]s and each window is read from
//! disk just before it is sent, so memory use is bounded by one chunk regardless
//! of the archive size. Windows go out strictly in order: window `i + 1` is only
//! read once window `i` has been accepted. A window that keeps failing aborts the
//! whole transfer.

use crate::config::{Config, RetryConfig};
use crate::error::{ChunkUploadError, Result, response_body};
use crate::retry::with_retry;
use crate::types::{ChunkWindow, UploadOutcome};
use reqwest::header::{CONTENT_LENGTH, CONTENT_RANGE};
use std::path::Path;
use std::time::Duration;
use tokio::io::AsyncReadExt;

/// Iterator over the windows of a file, see [`chunk_windows`]
#[derive(Clone, Debug)]
pub struct ChunkWindows {
    total: u64,
    chunk_size: u64,
    next_offset: u64,
}

impl Iterator for ChunkWindows {
    type Item = ChunkWindow;

    fn next(&mut self) -> Option<ChunkWindow> {
        if self.chunk_size == 0 || self.next_offset >= self.total {
            return None;
        }
        let offset = self.next_offset;
        let length = self.chunk_size.min(self.total - offset);
        self.next_offset = offset + length;
        Some(ChunkWindow {
            offset,
            length,
            is_final: self.next_offset == self.total,
        })
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        if self.chunk_size == 0 {
            return (0, Some(0));
        }
        let remaining = self.total.saturating_sub(self.next_offset);
        let count = remaining.div_ceil(self.chunk_size) as usize;
        (count, Some(count))
    }
}

impl ExactSizeIterator for ChunkWindows {}

/// Partition `total` bytes into windows of `chunk_size`
///
/// Offsets are strictly increasing and contiguous; only the last window may be
/// shorter than `chunk_size` and only it has `is_final` set. Yields nothing for
/// an empty file.
pub fn chunk_windows(total: u64, chunk_size: u64) -> ChunkWindows {
    ChunkWindows {
        total,
        chunk_size,
        next_offset: 0,
    }
}

/// Progress after a window was accepted
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ChunkProgress {
    /// Zero-based window index
    pub index: usize,
    /// The window just accepted
    pub window: ChunkWindow,
    /// Bytes accepted so far, including this window
    pub bytes_sent: u64,
    /// File size
    pub bytes_total: u64,
}

impl ChunkProgress {
    /// Share of the file accepted, 0.0 to 100.0
    pub fn percent(&self) -> f32 {
        if self.bytes_total == 0 {
            return 100.0;
        }
        (self.bytes_sent as f64 / self.bytes_total as f64 * 100.0) as f32
    }

    /// Whether this window falls on the reporting cadence
    ///
    /// True for every `every`-th window starting with the first, and for the final one.
    pub fn is_report_point(&self, every: usize) -> bool {
        self.window.is_final || (every > 0 && self.index % every == 0)
    }
}

/// Sends a file to an upload session one window at a time
pub struct ChunkedUploader {
    client: reqwest::Client,
    chunk_size: u64,
    progress_every: usize,
    retry: RetryConfig,
    request_timeout: Duration,
}

impl ChunkedUploader {
    /// Create an uploader with explicit chunking and retry settings
    pub fn new(
        client: reqwest::Client,
        chunk_size: u64,
        progress_every: usize,
        retry: RetryConfig,
    ) -> Self {
        Self {
            client,
            chunk_size,
            progress_every,
            retry,
            request_timeout: crate::config::HttpConfig::default().request_timeout,
        }
    }

    /// Deadline for each chunk PUT; a timed-out chunk is retried
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Create an uploader from the transfer, retry and HTTP sections of `config`
    pub fn from_config(client: reqwest::Client, config: &Config) -> Self {
        Self::new(
            client,
            config.transfer.chunk_size,
            config.transfer.progress_every,
            config.retry.clone(),
        )
        .with_request_timeout(config.http.request_timeout)
    }

    /// Upload `local_path` to `session_url`
    ///
    /// `on_chunk` is called after every accepted window. The response to the final
    /// window carries the created drive item, whose id is returned when present.
    pub async fn transfer<F>(
        &self,
        session_url: &str,
        local_path: &Path,
        mut on_chunk: F,
    ) -> Result<UploadOutcome>
    where
        F: FnMut(&ChunkProgress),
    {
        let open_err = |source| ChunkUploadError::Open {
            path: local_path.to_path_buf(),
            source,
        };
        let mut file = tokio::fs::File::open(local_path).await.map_err(open_err)?;
        let total = file.metadata().await.map_err(open_err)?.len();
        if total == 0 {
            return Err(ChunkUploadError::EmptyFile {
                path: local_path.to_path_buf(),
            }
            .into());
        }

        tracing::info!(
            path = %local_path.display(),
            bytes = total,
            chunks = chunk_windows(total, self.chunk_size).len(),
            "starting chunked upload"
        );

        let mut buffer = vec![0u8; self.chunk_size.min(total) as usize];
        let mut outcome = UploadOutcome {
            item_id: None,
            bytes_sent: 0,
            chunks: 0,
        };

        for (index, window) in chunk_windows(total, self.chunk_size).enumerate() {
            let data = &mut buffer[..window.length as usize];
            file.read_exact(data)
                .await
                .map_err(|source| ChunkUploadError::Read {
                    window,
                    total,
                    path: local_path.to_path_buf(),
                    source,
                })?;

            let accepted = self.put_window(session_url, window, total, data).await?;

            outcome.bytes_sent = window.offset + window.length;
            outcome.chunks += 1;
            if window.is_final {
                outcome.item_id = accepted
                    .as_ref()
                    .and_then(|item| item.get("id"))
                    .and_then(|id| id.as_str())
                    .map(str::to_string);
            }

            let progress = ChunkProgress {
                index,
                window,
                bytes_sent: outcome.bytes_sent,
                bytes_total: total,
            };
            if progress.is_report_point(self.progress_every) {
                tracing::info!(
                    path = %local_path.display(),
                    range = %window.content_range(total),
                    percent = %format!("{:.1}", progress.percent()),
                    "upload progress"
                );
            }
            on_chunk(&progress);
        }

        tracing::info!(path = %local_path.display(), chunks = outcome.chunks, "upload completed");
        Ok(outcome)
    }

    /// Send one window, retrying transient failures
    async fn put_window(
        &self,
        session_url: &str,
        window: ChunkWindow,
        total: u64,
        data: &[u8],
    ) -> Result<Option<serde_json::Value>> {
        let mut attempts = 0u32;
        let accepted = with_retry(&self.retry, || {
            attempts += 1;
            self.send_window(session_url, window, total, data, attempts)
        })
        .await?;
        Ok(accepted)
    }

    async fn send_window(
        &self,
        session_url: &str,
        window: ChunkWindow,
        total: u64,
        data: &[u8],
        attempt: u32,
    ) -> std::result::Result<Option<serde_json::Value>, ChunkUploadError> {
        tracing::trace!(range = %window.content_range(total), attempt, "sending chunk");

        let response = self
            .client
            .put(session_url)
            .header(CONTENT_LENGTH, window.length)
            .header(CONTENT_RANGE, window.content_range(total))
            .body(data.to_vec())
            .timeout(self.request_timeout)
            .send()
            .await
            .map_err(|source| ChunkUploadError::Request {
                window,
                total,
                attempts: attempt,
                source,
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response_body(response).await;
            return Err(ChunkUploadError::Rejected {
                window,
                total,
                attempts: attempt,
                status: status.as_u16(),
                body,
            });
        }

        if window.is_final {
            // Final response is the created item; tolerate an empty or odd body
            Ok(response.json::<serde_json::Value>().await.ok())
        } else {
            Ok(None)
        }
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CHUNK_SIZE_UNIT;
    use crate::error::Error;
    use std::time::Duration;
    use tempfile::TempDir;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn no_retry() -> RetryConfig {
        RetryConfig {
            max_attempts: 0,
            ..RetryConfig::default()
        }
    }

    fn fast_retry(max_attempts: u32) -> RetryConfig {
        RetryConfig {
            max_attempts,
            initial_delay: Duration::from_millis(5),
            max_delay: Duration::from_millis(20),
            backoff_multiplier: 2.0,
            jitter: false,
        }
    }

    fn write_file(dir: &TempDir, name: &str, size: usize) -> std::path::PathBuf {
        let path = dir.path().join(name);
        let data: Vec<u8> = (0..size).map(|i| (i % 253) as u8).collect();
        std::fs::write(&path, data).unwrap();
        path
    }

    fn content_ranges(requests: &[wiremock::Request]) -> Vec<String> {
        requests
            .iter()
            .map(|r| {
                r.headers
                    .get("content-range")
                    .unwrap()
                    .to_str()
                    .unwrap()
                    .to_string()
            })
            .collect()
    }

    #[test]
    fn test_windows_cover_file_without_gaps() {
        let chunk = CHUNK_SIZE_UNIT;
        for total in [1, 2, chunk - 1, chunk, chunk + 1, 3 * chunk - 7, 1_000_000, 10 * chunk] {
            let windows: Vec<_> = chunk_windows(total, chunk).collect();

            let mut expected_offset = 0;
            for (i, w) in windows.iter().enumerate() {
                assert_eq!(w.offset, expected_offset, "total {}", total);
                assert!(w.length > 0);
                assert_eq!(w.is_final, i == windows.len() - 1);
                expected_offset += w.length;
            }
            assert_eq!(expected_offset, total);

            let last = windows.last().unwrap();
            let remainder = total % chunk;
            let expected_last = if remainder == 0 { chunk } else { remainder };
            assert_eq!(last.length, expected_last, "total {}", total);
        }
    }

    #[test]
    fn test_exact_multiple_has_no_empty_window() {
        let chunk = CHUNK_SIZE_UNIT;
        for n in 1..=5u64 {
            let windows: Vec<_> = chunk_windows(n * chunk, chunk).collect();
            assert_eq!(windows.len() as u64, n);
            assert!(windows.iter().all(|w| w.length == chunk));
        }
    }

    #[test]
    fn test_one_million_bytes_is_four_windows() {
        let windows: Vec<_> = chunk_windows(1_000_000, CHUNK_SIZE_UNIT).collect();
        assert_eq!(windows.len(), 4);
        assert_eq!(chunk_windows(1_000_000, CHUNK_SIZE_UNIT).len(), 4);
        assert_eq!(windows[3].offset, 983_040);
        assert_eq!(windows[3].length, 16_960);
    }

    #[test]
    fn test_empty_file_has_no_windows() {
        assert_eq!(chunk_windows(0, CHUNK_SIZE_UNIT).count(), 0);
        assert_eq!(chunk_windows(100, 0).count(), 0);
    }

    #[test]
    fn test_report_cadence() {
        let progress = |index: usize, is_final: bool| ChunkProgress {
            index,
            window: ChunkWindow {
                offset: 0,
                length: 1,
                is_final,
            },
            bytes_sent: 1,
            bytes_total: 2,
        };

        assert!(progress(0, false).is_report_point(10));
        assert!(!progress(1, false).is_report_point(10));
        assert!(!progress(9, false).is_report_point(10));
        assert!(progress(10, false).is_report_point(10));
        assert!(progress(13, true).is_report_point(10));
        assert_eq!(progress(0, false).percent(), 50.0);
    }

    #[tokio::test]
    async fn test_transfer_sends_contiguous_ranges_in_order() {
        let dir = TempDir::new().unwrap();
        let file = write_file(&dir, "Data_001.zip", 1_000_000);
        let server = MockServer::start().await;

        Mock::given(method("PUT"))
            .and(path("/session/abc"))
            .and(header("Content-Range", "bytes 983040-999999/1000000"))
            .respond_with(ResponseTemplate::new(201).set_body_json(serde_json::json!({
                "id": "ITEM-1",
                "name": "Data_001.zip",
                "size": 1_000_000
            })))
            .mount(&server)
            .await;
        Mock::given(method("PUT"))
            .and(path("/session/abc"))
            .respond_with(ResponseTemplate::new(202).set_body_json(serde_json::json!({
                "nextExpectedRanges": []
            })))
            .mount(&server)
            .await;

        let uploader =
            ChunkedUploader::new(reqwest::Client::new(), CHUNK_SIZE_UNIT, 10, no_retry());
        let mut seen = Vec::new();
        let outcome = uploader
            .transfer(&format!("{}/session/abc", server.uri()), &file, |p| {
                seen.push(p.bytes_sent)
            })
            .await
            .unwrap();

        assert_eq!(outcome.chunks, 4);
        assert_eq!(outcome.bytes_sent, 1_000_000);
        assert_eq!(outcome.item_id.as_deref(), Some("ITEM-1"));
        assert_eq!(seen, vec![327_680, 655_360, 983_040, 1_000_000]);

        let requests = server.received_requests().await.unwrap();
        assert_eq!(
            content_ranges(&requests),
            vec![
                "bytes 0-327679/1000000",
                "bytes 327680-655359/1000000",
                "bytes 655360-983039/1000000",
                "bytes 983040-999999/1000000",
            ]
        );

        let original = std::fs::read(&file).unwrap();
        let reassembled: Vec<u8> = requests.iter().flat_map(|r| r.body.clone()).collect();
        assert_eq!(reassembled, original);

        for request in &requests {
            assert_eq!(
                request.headers.get("content-length").unwrap().to_str().unwrap(),
                request.body.len().to_string()
            );
            assert!(request.headers.get("authorization").is_none());
        }
    }

    #[tokio::test]
    async fn test_failure_stops_later_windows() {
        let dir = TempDir::new().unwrap();
        let file = write_file(&dir, "Data_002.zip", 1_000_000);
        let server = MockServer::start().await;

        Mock::given(method("PUT"))
            .and(header("Content-Range", "bytes 327680-655359/1000000"))
            .respond_with(ResponseTemplate::new(400).set_body_string("invalidRange"))
            .mount(&server)
            .await;
        Mock::given(method("PUT"))
            .respond_with(ResponseTemplate::new(202))
            .mount(&server)
            .await;

        let uploader =
            ChunkedUploader::new(reqwest::Client::new(), CHUNK_SIZE_UNIT, 10, fast_retry(3));
        let result = uploader
            .transfer(&format!("{}/session/x", server.uri()), &file, |_| {})
            .await;

        match result {
            Err(Error::ChunkUpload(ChunkUploadError::Rejected {
                window,
                total,
                status,
                attempts,
                ..
            })) => {
                assert_eq!(window.offset, 327_680);
                assert_eq!(window.end(), 655_359);
                assert_eq!(total, 1_000_000);
                assert_eq!(status, 400);
                assert_eq!(attempts, 1, "client errors are not retried");
            }
            other => panic!("expected chunk upload error, got {:?}", other),
        }

        let requests = server.received_requests().await.unwrap();
        assert_eq!(
            content_ranges(&requests),
            vec!["bytes 0-327679/1000000", "bytes 327680-655359/1000000"]
        );
    }

    #[tokio::test]
    async fn test_transient_failure_is_retried() {
        let dir = TempDir::new().unwrap();
        let file = write_file(&dir, "Data_003.zip", 400_000);
        let server = MockServer::start().await;

        Mock::given(method("PUT"))
            .and(header("Content-Range", "bytes 0-327679/400000"))
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(2)
            .mount(&server)
            .await;
        Mock::given(method("PUT"))
            .respond_with(ResponseTemplate::new(202))
            .mount(&server)
            .await;

        let uploader =
            ChunkedUploader::new(reqwest::Client::new(), CHUNK_SIZE_UNIT, 10, fast_retry(3));
        let outcome = uploader
            .transfer(&format!("{}/session/y", server.uri()), &file, |_| {})
            .await
            .unwrap();

        assert_eq!(outcome.chunks, 2);
        assert_eq!(outcome.bytes_sent, 400_000);
        assert_eq!(server.received_requests().await.unwrap().len(), 4);
    }

    #[tokio::test]
    async fn test_slow_chunk_times_out_and_is_retried() {
        let dir = TempDir::new().unwrap();
        let file = write_file(&dir, "Data_005.zip", 1000);
        let server = MockServer::start().await;

        Mock::given(method("PUT"))
            .respond_with(ResponseTemplate::new(202).set_delay(Duration::from_secs(3)))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("PUT"))
            .respond_with(ResponseTemplate::new(201).set_body_json(serde_json::json!({
                "id": "ITEM-5"
            })))
            .mount(&server)
            .await;

        let uploader =
            ChunkedUploader::new(reqwest::Client::new(), CHUNK_SIZE_UNIT, 10, fast_retry(2))
                .with_request_timeout(Duration::from_millis(200));
        let outcome = uploader
            .transfer(&format!("{}/session/slow", server.uri()), &file, |_| {})
            .await
            .unwrap();

        assert_eq!(outcome.item_id.as_deref(), Some("ITEM-5"));
        assert_eq!(server.received_requests().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_exhausted_retries_report_attempts() {
        let dir = TempDir::new().unwrap();
        let file = write_file(&dir, "Data_004.zip", 1000);
        let server = MockServer::start().await;

        Mock::given(method("PUT"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let uploader =
            ChunkedUploader::new(reqwest::Client::new(), CHUNK_SIZE_UNIT, 10, fast_retry(2));
        let err = uploader
            .transfer(&format!("{}/session/z", server.uri()), &file, |_| {})
            .await
            .unwrap_err();

        match err {
            Error::ChunkUpload(ChunkUploadError::Rejected {
                attempts, window, ..
            }) => {
                assert_eq!(attempts, 3);
                assert!(window.is_final);
            }
            other => panic!("expected chunk upload error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_empty_file_is_rejected() {
        let dir = TempDir::new().unwrap();
        let file = write_file(&dir, "empty.zip", 0);
        let server = MockServer::start().await;

        let uploader =
            ChunkedUploader::new(reqwest::Client::new(), CHUNK_SIZE_UNIT, 10, no_retry());
        let err = uploader
            .transfer(&format!("{}/session/e", server.uri()), &file, |_| {})
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            Error::ChunkUpload(ChunkUploadError::EmptyFile { .. })
        ));
        assert!(server.received_requests().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_missing_file_is_open_error() {
        let dir = TempDir::new().unwrap();
        let uploader =
            ChunkedUploader::new(reqwest::Client::new(), CHUNK_SIZE_UNIT, 10, no_retry());
        let err = uploader
            .transfer(
                "http://127.0.0.1:9/session",
                &dir.path().join("nope.zip"),
                |_| {},
            )
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            Error::ChunkUpload(ChunkUploadError::Open { .. })
        ));
    }
}
