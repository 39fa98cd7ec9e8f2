//! Resumable upload session negotiation against the destination drive.

use crate::error::{Result, SessionError, response_body};
use crate::types::UploadSession;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::time::Duration;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateSessionResponse {
    #[serde(default)]
    upload_url: Option<String>,
    #[serde(default)]
    expiration_date_time: Option<DateTime<Utc>>,
}

/// Opens and cancels upload sessions for files in a drive folder
pub struct SessionManager {
    client: reqwest::Client,
    graph_base: String,
    drive_id: String,
    request_timeout: Duration,
}

impl SessionManager {
    /// Create a session manager for one drive
    pub fn new(
        client: reqwest::Client,
        graph_base: impl Into<String>,
        drive_id: impl Into<String>,
    ) -> Self {
        Self {
            client,
            graph_base: graph_base.into(),
            drive_id: drive_id.into(),
            request_timeout: crate::config::HttpConfig::default().request_timeout,
        }
    }

    /// Deadline for session requests
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    fn create_session_url(&self, folder_id: &str, file_name: &str) -> String {
        format!(
            "{}/drives/{}/items/{}:/{}:/createUploadSession",
            self.graph_base,
            urlencoding::encode(&self.drive_id),
            urlencoding::encode(folder_id),
            urlencoding::encode(file_name)
        )
    }

    /// Negotiate an upload session for `file_name` inside `folder_id`
    ///
    /// No per-file conflict policy is sent; the destination applies its default.
    pub async fn open_session(
        &self,
        folder_id: &str,
        file_name: &str,
        token: &str,
    ) -> Result<UploadSession> {
        let url = self.create_session_url(folder_id, file_name);
        let request_err = |source| SessionError::Request {
            file_name: file_name.to_string(),
            source,
        };

        let response = self
            .client
            .post(&url)
            .bearer_auth(token)
            .json(&serde_json::json!({}))
            .timeout(self.request_timeout)
            .send()
            .await
            .map_err(request_err)?;

        let status = response.status();
        if !status.is_success() {
            let body = response_body(response).await;
            return Err(SessionError::Rejected {
                file_name: file_name.to_string(),
                status: status.as_u16(),
                body,
            }
            .into());
        }

        let parsed: CreateSessionResponse = response.json().await.map_err(request_err)?;
        let upload_url = parsed
            .upload_url
            .filter(|u| !u.is_empty())
            .ok_or_else(|| SessionError::MissingUploadUrl {
                file_name: file_name.to_string(),
            })?;

        tracing::info!(file = %file_name, expires_at = ?parsed.expiration_date_time, "opened upload session");
        Ok(UploadSession {
            upload_url,
            expires_at: parsed.expiration_date_time,
        })
    }

    /// Cancel an upload session, discarding any bytes already sent
    ///
    /// A session the destination no longer knows about counts as cancelled.
    pub async fn cancel_session(&self, upload_url: &str) -> Result<()> {
        let response = self
            .client
            .delete(upload_url)
            .timeout(self.request_timeout)
            .send()
            .await?;

        let status = response.status();
        if status.is_success() || status == reqwest::StatusCode::NOT_FOUND {
            tracing::info!("cancelled upload session");
            return Ok(());
        }

        let body = response_body(response).await;
        Err(SessionError::Rejected {
            file_name: String::new(),
            status: status.as_u16(),
            body,
        }
        .into())
    }
}
