//! Shared helpers for exercising a BackupRelay against a mock source and drive.

use crate::config::{Config, RetryConfig};
use crate::relay::BackupRelay;
use std::time::Duration;
use tempfile::TempDir;
use wiremock::matchers::{method, path, path_regex};
use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

pub(crate) const SOURCE_TOKEN: &str = "source-token";
pub(crate) const GRAPH_TOKEN: &str = "graph-token";
pub(crate) const DRIVE_ID: &str = "drive-1";
pub(crate) const PARENT_ID: &str = "parent-1";

/// Relay wired to a single mock server playing both APIs
pub(crate) struct TestRelay {
    pub(crate) relay: BackupRelay,
    pub(crate) server: MockServer,
    /// Scratch directory (must be kept alive)
    pub(crate) scratch: TempDir,
}

impl TestRelay {
    pub(crate) fn archive_url(&self, name: &str) -> String {
        format!("{}/download/{}", self.server.uri(), name)
    }

    /// Files currently left under the scratch directory, as `<kind>/<name>`
    pub(crate) fn scratch_files(&self) -> Vec<String> {
        let mut files = Vec::new();
        let Ok(kinds) = std::fs::read_dir(self.scratch.path()) else {
            return files;
        };
        for kind in kinds.filter_map(|e| e.ok()) {
            let Ok(entries) = std::fs::read_dir(kind.path()) else {
                continue;
            };
            for entry in entries.filter_map(|e| e.ok()) {
                files.push(format!(
                    "{}/{}",
                    kind.file_name().to_string_lossy(),
                    entry.file_name().to_string_lossy()
                ));
            }
        }
        files.sort();
        files
    }

    /// PUT requests received for `name`'s upload session
    pub(crate) async fn chunk_requests(&self, name: &str) -> Vec<Request> {
        let upload_path = format!("/upload/{}", name);
        self.server
            .received_requests()
            .await
            .unwrap_or_default()
            .into_iter()
            .filter(|r| r.method.as_str() == "PUT" && r.url.path() == upload_path)
            .collect()
    }
}

/// Configuration pointing every endpoint at `server`
pub(crate) fn test_config(server: &MockServer, scratch: &TempDir) -> Config {
    let uri = server.uri();
    let mut config = Config::default();

    config.source.token_url = format!("{}/oauth/v2/token", uri);
    config.source.backup_urls_url = format!("{}/crm/bulk/v7/backup/urls", uri);
    config.source.refresh_token = "refresh".to_string();
    config.source.client_id = "source-client".to_string();
    config.source.client_secret = "source-secret".to_string();

    config.destination.token_url = format!("{}/tenant/oauth2/v2.0/token", uri);
    config.destination.graph_base = format!("{}/v1.0", uri);
    config.destination.client_id = "dest-client".to_string();
    config.destination.client_secret = "dest-secret".to_string();
    config.destination.drive_id = DRIVE_ID.to_string();
    config.destination.parent_folder_id = PARENT_ID.to_string();

    config.transfer.scratch_dir = scratch.path().to_path_buf();
    config.retry = RetryConfig {
        max_attempts: 1,
        initial_delay: Duration::from_millis(5),
        max_delay: Duration::from_millis(20),
        backoff_multiplier: 2.0,
        jitter: false,
    };
    config
}

/// Start a mock server with both token endpoints mounted
pub(crate) async fn create_test_relay() -> TestRelay {
    create_test_relay_with(|_| {}).await
}

/// Like [`create_test_relay`], with a hook to adjust the configuration
pub(crate) async fn create_test_relay_with(adjust: impl FnOnce(&mut Config)) -> TestRelay {
    let server = MockServer::start().await;
    let scratch = tempfile::tempdir().unwrap();

    mount_tokens(&server).await;

    let mut config = test_config(&server, &scratch);
    adjust(&mut config);
    let relay = BackupRelay::new(config).unwrap();

    TestRelay {
        relay,
        server,
        scratch,
    }
}

pub(crate) async fn mount_tokens(server: &MockServer) {
    Mock::given(method("POST"))
        .and(path("/oauth/v2/token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "access_token": SOURCE_TOKEN,
            "expires_in": 3600
        })))
        .mount(server)
        .await;
    Mock::given(method("POST"))
        .and(path("/tenant/oauth2/v2.0/token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "access_token": GRAPH_TOKEN,
            "expires_in": 3599,
            "token_type": "Bearer"
        })))
        .mount(server)
        .await;
}

/// Serve `size` bytes at `/download/<name>`
pub(crate) async fn mount_archive(server: &MockServer, name: &str, size: usize) {
    let body: Vec<u8> = (0..size).map(|i| (i % 251) as u8).collect();
    Mock::given(method("GET"))
        .and(path(format!("/download/{}", name)))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(body))
        .mount(server)
        .await;
}

/// Make `/download/<name>` fail with `status`
pub(crate) async fn mount_broken_archive(server: &MockServer, name: &str, status: u16) {
    Mock::given(method("GET"))
        .and(path(format!("/download/{}", name)))
        .respond_with(ResponseTemplate::new(status))
        .mount(server)
        .await;
}

/// Answers session requests with an upload URL derived from the file name
struct SessionResponder {
    base: String,
}

impl Respond for SessionResponder {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        let path = request.url.path();
        let name = path
            .trim_end_matches(":/createUploadSession")
            .rsplit(":/")
            .next()
            .unwrap_or_default();
        ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "uploadUrl": format!("{}/upload/{}", self.base, name),
            "expirationDateTime": "2030-01-01T00:00:00Z"
        }))
    }
}

/// Mount session creation, chunk acceptance and run folder creation
pub(crate) async fn mount_drive(server: &MockServer, folder_id: &str) {
    Mock::given(method("POST"))
        .and(path(format!(
            "/v1.0/drives/{}/items/{}/children",
            DRIVE_ID, PARENT_ID
        )))
        .respond_with(ResponseTemplate::new(201).set_body_json(serde_json::json!({
            "id": folder_id,
            "name": "zCRMAutoBackup",
            "folder": { "childCount": 0 }
        })))
        .mount(server)
        .await;
    Mock::given(method("POST"))
        .and(path_regex(r":/createUploadSession$"))
        .respond_with(SessionResponder { base: server.uri() })
        .mount(server)
        .await;
    Mock::given(method("PUT"))
        .and(path_regex(r"^/upload/"))
        .respond_with(ResponseTemplate::new(201).set_body_json(serde_json::json!({
            "id": "UPLOADED-ITEM"
        })))
        .mount(server)
        .await;
}

/// Serve the backup link lists
pub(crate) async fn mount_backup_urls(server: &MockServer, data: &[String], attachments: &[String]) {
    Mock::given(method("GET"))
        .and(path("/crm/bulk/v7/backup/urls"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "urls": {
                "data_links": data,
                "attachment_links": attachments
            },
            "status": "success"
        })))
        .mount(server)
        .await;
}
