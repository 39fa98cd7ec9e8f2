//! Whole-run coordination: the fatal setup stage and the two batches.

use super::BackupRelay;
use crate::error::{Error, Result};
use crate::types::{BackupRun, BatchReport, DriveItem, Event, LinkKind, Provider, RunSummary};
use chrono::NaiveDate;
use std::sync::Arc;
use tokio::task::JoinHandle;

impl BackupRelay {
    /// Create the run folder for `run_date` under the configured parent
    ///
    /// The returned run has no items yet.
    pub async fn provision_run(&self, run_date: NaiveDate) -> Result<BackupRun> {
        let token = self.broker.acquire_token(Provider::Destination).await?;
        let folder_name = self.provisioner.folder_name_for(run_date);
        let folder_id = self
            .provisioner
            .provision_folder(&self.config.destination.parent_folder_id, run_date, &token)
            .await?;

        self.emit_event(Event::FolderProvisioned {
            name: folder_name.clone(),
            folder_id: folder_id.clone(),
        });

        Ok(BackupRun {
            folder_name,
            folder_id,
            run_date,
            items: Vec::new(),
        })
    }

    /// Execute a complete run
    ///
    /// Acquiring both tokens, fetching the backup links and creating the folder
    /// are fatal: any failure there returns `Err` and nothing is transferred.
    /// After that, the data and attachment lists run as two concurrent tasks and
    /// both are awaited. Item failures only show up in the summary.
    pub async fn run(&self, run_date: NaiveDate) -> Result<RunSummary> {
        let source_token = self.broker.acquire_token(Provider::Source).await?;
        self.broker.acquire_token(Provider::Destination).await?;

        let urls = self.fetcher.request_backup_urls(&source_token).await?;
        if urls.is_empty() {
            tracing::warn!("source reported no backup links");
        }

        let mut run = self.provision_run(run_date).await?;
        tracing::info!(
            folder = %run.folder_name,
            folder_id = %run.folder_id,
            data_links = urls.data_links.len(),
            attachment_links = urls.attachment_links.len(),
            "starting run"
        );

        let folder_id: Arc<str> = Arc::from(run.folder_id.as_str());
        let data = self.spawn_batch(LinkKind::Data, urls.data_links, folder_id.clone());
        let attachments = self.spawn_batch(LinkKind::Attachment, urls.attachment_links, folder_id);

        let (data, attachments) = tokio::join!(data, attachments);
        let data = join_report(LinkKind::Data, data)?;
        let attachments = join_report(LinkKind::Attachment, attachments)?;
        // Data items first, whichever batch finished first
        run.items.extend(data.items);
        run.items.extend(attachments.items);

        let summary = RunSummary { run };
        let completed = summary.completed_count();
        let failed = summary.failed_count();
        tracing::info!(
            folder_id = %summary.run.folder_id,
            completed,
            failed,
            "run finished"
        );
        self.emit_event(Event::RunFinished {
            folder_id: summary.run.folder_id.clone(),
            completed,
            failed,
        });
        Ok(summary)
    }

    fn spawn_batch(
        &self,
        kind: LinkKind,
        urls: Vec<String>,
        folder_id: Arc<str>,
    ) -> JoinHandle<BatchReport> {
        let relay = self.clone();
        tokio::spawn(async move { relay.run_batch(kind, &urls, &folder_id).await })
    }

    /// List the children of `parent_id`, or of the configured parent folder
    pub async fn list_folders(&self, parent_id: Option<&str>) -> Result<Vec<DriveItem>> {
        let token = self.broker.acquire_token(Provider::Destination).await?;
        let parent = parent_id.unwrap_or(&self.config.destination.parent_folder_id);
        self.provisioner.list_children(parent, &token).await
    }
}

fn join_report(
    kind: LinkKind,
    joined: std::result::Result<BatchReport, tokio::task::JoinError>,
) -> Result<BatchReport> {
    joined.map_err(|e| {
        tracing::error!(kind = %kind, error = %e, "batch task did not finish");
        Error::Other(format!("{} batch task failed: {}", kind, e))
    })
}
