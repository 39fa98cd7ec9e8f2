//! Per-run destination folder creation and folder listing.

use crate::error::{FolderProvisionError, Result, response_body};
use crate::types::DriveItem;
use chrono::NaiveDate;
use serde::Deserialize;
use std::time::Duration;

/// Name of the folder a run uploads into: `<prefix>-<yyyy-mm-dd>`
pub fn folder_name(prefix: &str, run_date: NaiveDate) -> String {
    format!("{}-{}", prefix, run_date.format("%Y-%m-%d"))
}

#[derive(Debug, Deserialize)]
struct CreatedFolder {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChildrenPage {
    #[serde(default)]
    value: Vec<DriveItem>,
}

/// Creates the run folder under the configured parent
pub struct RunProvisioner {
    client: reqwest::Client,
    graph_base: String,
    drive_id: String,
    folder_prefix: String,
    request_timeout: Duration,
}

impl RunProvisioner {
    /// Create a provisioner for one drive
    pub fn new(
        client: reqwest::Client,
        graph_base: impl Into<String>,
        drive_id: impl Into<String>,
        folder_prefix: impl Into<String>,
    ) -> Self {
        Self {
            client,
            graph_base: graph_base.into(),
            drive_id: drive_id.into(),
            folder_prefix: folder_prefix.into(),
            request_timeout: crate::config::HttpConfig::default().request_timeout,
        }
    }

    /// Deadline for folder requests
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    fn children_url(&self, parent_id: &str) -> String {
        format!(
            "{}/drives/{}/items/{}/children",
            self.graph_base,
            urlencoding::encode(&self.drive_id),
            urlencoding::encode(parent_id)
        )
    }

    /// Folder name this provisioner uses for `run_date`
    pub fn folder_name_for(&self, run_date: NaiveDate) -> String {
        folder_name(&self.folder_prefix, run_date)
    }

    /// Create the run folder and return its id
    ///
    /// Name clashes are resolved by the destination renaming the new folder, so a
    /// second run on the same date gets its own folder and id.
    pub async fn provision_folder(
        &self,
        parent_id: &str,
        run_date: NaiveDate,
        token: &str,
    ) -> Result<String> {
        let name = self.folder_name_for(run_date);
        let request_err = |source| FolderProvisionError::Request {
            name: name.clone(),
            source,
        };

        let body = serde_json::json!({
            "name": name,
            "folder": {},
            "@microsoft.graph.conflictBehavior": "rename",
        });

        let response = self
            .client
            .post(self.children_url(parent_id))
            .bearer_auth(token)
            .json(&body)
            .timeout(self.request_timeout)
            .send()
            .await
            .map_err(request_err)?;

        let status = response.status();
        if !status.is_success() {
            let body = response_body(response).await;
            return Err(FolderProvisionError::Rejected {
                name,
                status: status.as_u16(),
                body,
            }
            .into());
        }

        let created: CreatedFolder = response.json().await.map_err(request_err)?;
        let id = created
            .id
            .filter(|id| !id.is_empty())
            .ok_or_else(|| FolderProvisionError::MissingId { name: name.clone() })?;

        tracing::info!(
            requested = %name,
            created = created.name.as_deref().unwrap_or(&name),
            folder_id = %id,
            "provisioned run folder"
        );
        Ok(id)
    }

    /// List the children of `parent_id`
    ///
    /// Only the first page is returned.
    pub async fn list_children(&self, parent_id: &str, token: &str) -> Result<Vec<DriveItem>> {
        let name = parent_id.to_string();
        let response = self
            .client
            .get(self.children_url(parent_id))
            .bearer_auth(token)
            .timeout(self.request_timeout)
            .send()
            .await
            .map_err(|source| FolderProvisionError::Request {
                name: name.clone(),
                source,
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response_body(response).await;
            return Err(FolderProvisionError::Rejected {
                name,
                status: status.as_u16(),
                body,
            }
            .into());
        }

        let page: ChildrenPage = response
            .json()
            .await
            .map_err(|source| FolderProvisionError::Request { name, source })?;
        Ok(page.value)
    }
}
