//! Mock source backup API and destination drive

use wiremock::matchers::{method, path, path_regex};
use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

/// Deterministic archive contents of `size` bytes, distinct per `seed`
pub fn archive_bytes(seed: u8, size: usize) -> Vec<u8> {
    (0..size)
        .map(|i| (i as u8).wrapping_mul(31).wrapping_add(seed))
        .collect()
}

/// Mount both token endpoints
pub async fn mount_token_endpoints(server: &MockServer) {
    Mock::given(method("POST"))
        .and(path("/oauth/v2/token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "access_token": "source-token",
            "api_domain": "https://www.zohoapis.com",
            "token_type": "Bearer",
            "expires_in": 3600
        })))
        .mount(server)
        .await;
    Mock::given(method("POST"))
        .and(path("/tenant/oauth2/v2.0/token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "token_type": "Bearer",
            "expires_in": 3599,
            "access_token": "graph-token"
        })))
        .mount(server)
        .await;
}

/// Serve `body` at `/download/<name>` and return its URL
pub async fn mount_archive(server: &MockServer, name: &str, body: Vec<u8>) -> String {
    Mock::given(method("GET"))
        .and(path(format!("/download/{}", name)))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(body))
        .mount(server)
        .await;
    format!("{}/download/{}", server.uri(), name)
}

/// Serve the backup link lists
pub async fn mount_backup_urls(server: &MockServer, data: &[String], attachments: &[String]) {
    Mock::given(method("GET"))
        .and(path("/crm/bulk/v7/backup/urls"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "urls": {
                "data_links": data,
                "attachment_links": attachments
            }
        })))
        .mount(server)
        .await;
}

struct SessionResponder {
    base: String,
}

impl Respond for SessionResponder {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        let name = request
            .url
            .path()
            .trim_end_matches(":/createUploadSession")
            .rsplit(":/")
            .next()
            .unwrap_or_default()
            .to_string();
        ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "uploadUrl": format!("{}/upload/{}", self.base, name),
            "expirationDateTime": "2030-01-01T00:00:00Z"
        }))
    }
}

/// Mount folder creation, session creation and chunk acceptance
pub async fn mount_drive(server: &MockServer, folder_id: &str) {
    Mock::given(method("POST"))
        .and(path("/v1.0/drives/drive-1/items/parent-1/children"))
        .respond_with(ResponseTemplate::new(201).set_body_json(serde_json::json!({
            "id": folder_id,
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
        .respond_with(ResponseTemplate::new(202).set_body_json(serde_json::json!({
            "nextExpectedRanges": []
        })))
        .mount(server)
        .await;
}
