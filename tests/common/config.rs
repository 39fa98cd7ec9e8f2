//! Test configuration helpers: environment maps for mock servers and live credentials

use backup_relay::{BackupRelay, Config};
use std::collections::HashMap;
use tempfile::TempDir;
use wiremock::MockServer;

/// Variables that must be present for a live run
pub const REQUIRED_VARS: [&str; 8] = [
    "SOURCE_REFRESH_TOKEN",
    "SOURCE_CLIENT_ID",
    "SOURCE_CLIENT_SECRET",
    "DEST_TENANT_ID",
    "DEST_CLIENT_ID",
    "DEST_CLIENT_SECRET",
    "DEST_DRIVE_ID",
    "DEST_PARENT_FOLDER_ID",
];

/// Environment pointing every endpoint at `server`, with scratch files in `scratch`
pub fn mock_env(server: &MockServer, scratch: &TempDir) -> HashMap<String, String> {
    let uri = server.uri();
    let mut env: HashMap<String, String> = [
        ("SOURCE_REFRESH_TOKEN", "refresh".to_string()),
        ("SOURCE_CLIENT_ID", "source-client".to_string()),
        ("SOURCE_CLIENT_SECRET", "source-secret".to_string()),
        ("DEST_TENANT_ID", "tenant".to_string()),
        ("DEST_CLIENT_ID", "dest-client".to_string()),
        ("DEST_CLIENT_SECRET", "dest-secret".to_string()),
        ("DEST_DRIVE_ID", "drive-1".to_string()),
        ("DEST_PARENT_FOLDER_ID", "parent-1".to_string()),
        ("SOURCE_TOKEN_URL", format!("{}/oauth/v2/token", uri)),
        ("SOURCE_BACKUP_URLS_URL", format!("{}/crm/bulk/v7/backup/urls", uri)),
        ("DEST_TOKEN_URL", format!("{}/tenant/oauth2/v2.0/token", uri)),
        ("DEST_GRAPH_BASE", format!("{}/v1.0/", uri)),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v))
    .collect();
    env.insert(
        "SCRATCH_DIR".to_string(),
        scratch.path().to_string_lossy().into_owned(),
    );
    env
}

/// Build a config the same way the binary does, from a variable map
pub fn config_from(env: &HashMap<String, String>) -> backup_relay::Result<Config> {
    Config::from_lookup(|key| env.get(key).cloned())
}

/// Relay for a mock server, with fast retries so transient-failure tests stay quick
pub fn mock_relay(server: &MockServer, scratch: &TempDir) -> BackupRelay {
    let mut config = config_from(&mock_env(server, scratch)).unwrap();
    config.retry.initial_delay = std::time::Duration::from_millis(5);
    config.retry.max_delay = std::time::Duration::from_millis(20);
    config.retry.jitter = false;
    BackupRelay::new(config).unwrap()
}

/// Check whether live credentials are available (from `.env` or the environment)
pub fn has_live_credentials() -> bool {
    dotenvy::dotenv().ok();
    REQUIRED_VARS
        .iter()
        .all(|key| std::env::var(key).is_ok_and(|v| !v.trim().is_empty()))
}
