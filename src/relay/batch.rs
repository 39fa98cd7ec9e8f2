//! Sequential processing of one input list.

use super::BackupRelay;
use crate::error::{Error, Result};
use crate::fetcher::file_name_from_url;
use crate::types::{BatchReport, Event, ItemStatus, LinkKind, Provider, TransferItem};

impl BackupRelay {
    /// Process `source_urls` strictly in order into `folder_id`
    ///
    /// Each URL is downloaded, given an upload session and uploaded before the
    /// next one starts. A failure at any stage marks that item failed and moves
    /// on; it never aborts the batch. The report lists every item in input order.
    pub async fn run_batch(
        &self,
        kind: LinkKind,
        source_urls: &[String],
        folder_id: &str,
    ) -> BatchReport {
        tracing::info!(kind = %kind, items = source_urls.len(), "starting batch");
        let mut items = Vec::with_capacity(source_urls.len());

        for (index, url) in source_urls.iter().enumerate() {
            let mut item = TransferItem::new(url.clone(), kind);
            self.emit_event(Event::ItemStarted {
                url: url.clone(),
                kind,
            });

            if let Err(e) = self.process_item(&mut item, folder_id).await {
                tracing::error!(
                    kind = %kind,
                    index,
                    url = %url,
                    stage = ?item.status,
                    error = %e,
                    "item failed, continuing with next"
                );
                item.fail(e.to_string());
                self.emit_event(Event::ItemFailed {
                    url: url.clone(),
                    error: e.to_string(),
                });
            }

            items.push(item);
        }

        let report = BatchReport { kind, items };
        let completed = report.completed().count();
        let failed = report.failed().count();
        tracing::info!(kind = %kind, completed, failed, "batch finished");
        self.emit_event(Event::BatchFinished {
            kind,
            completed,
            failed,
        });
        report
    }

    /// Move one item through download, session and upload
    ///
    /// The scratch file is deleted when this returns, whatever the outcome.
    async fn process_item(&self, item: &mut TransferItem, folder_id: &str) -> Result<()> {
        item.file_name = file_name_from_url(&item.source_url).unwrap_or_default();
        item.advance(ItemStatus::Downloading);

        let source_token = self.broker.acquire_token(Provider::Source).await?;
        let scratch = self
            .fetcher
            .fetch(&item.source_url, item.kind, &source_token)
            .await?;

        item.local_path = Some(scratch.path().to_path_buf());
        item.bytes_total = scratch.len();
        item.advance(ItemStatus::Downloaded);
        self.emit_event(Event::Downloaded {
            file_name: item.file_name.clone(),
            path: scratch.path().to_path_buf(),
            bytes: scratch.len(),
        });

        let destination_token = self.broker.acquire_token(Provider::Destination).await?;
        let session = self
            .sessions
            .open_session(folder_id, &item.file_name, &destination_token)
            .await?;

        item.session_url = Some(session.upload_url.clone());
        item.advance(ItemStatus::SessionOpen);
        self.emit_event(Event::SessionOpened {
            file_name: item.file_name.clone(),
        });

        item.advance(ItemStatus::Uploading);
        let every = self.config.transfer.progress_every;
        let result = self
            .uploader
            .transfer(&session.upload_url, scratch.path(), |progress| {
                item.record_sent(progress.bytes_sent);
                if progress.is_report_point(every) {
                    self.emit_event(Event::UploadProgress {
                        file_name: item.file_name.clone(),
                        percent: progress.percent(),
                        bytes_sent: progress.bytes_sent,
                        bytes_total: progress.bytes_total,
                    });
                }
            })
            .await;

        match result {
            Ok(outcome) => {
                item.record_sent(outcome.bytes_sent);
                item.advance(ItemStatus::Completed);
                tracing::info!(
                    file = %item.file_name,
                    bytes = outcome.bytes_sent,
                    item_id = outcome.item_id.as_deref().unwrap_or("unknown"),
                    "upload completed"
                );
                self.emit_event(Event::ItemCompleted {
                    file_name: item.file_name.clone(),
                    bytes: outcome.bytes_sent,
                });
                Ok(())
            }
            Err(e) => {
                if matches!(e, Error::ChunkUpload(_)) && self.config.transfer.cancel_failed_sessions
                {
                    self.cancel_session_best_effort(&item.file_name, &session.upload_url)
                        .await;
                }
                Err(e)
            }
        }
    }

    async fn cancel_session_best_effort(&self, file_name: &str, upload_url: &str) {
        match self.sessions.cancel_session(upload_url).await {
            Ok(()) => tracing::info!(file = %file_name, "cancelled failed upload session"),
            Err(e) => {
                tracing::warn!(file = %file_name, error = %e, "failed to cancel upload session")
            }
        }
    }
}
