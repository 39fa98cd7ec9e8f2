//! Custom assertions over what the mock drive received

use backup_relay::Event;
use wiremock::MockServer;

/// Chunk bodies received for `name`, concatenated in arrival order
pub async fn uploaded_bytes(server: &MockServer, name: &str) -> Vec<u8> {
    let upload_path = format!("/upload/{}", name);
    server
        .received_requests()
        .await
        .unwrap_or_default()
        .into_iter()
        .filter(|r| r.method.as_str() == "PUT" && r.url.path() == upload_path)
        .flat_map(|r| r.body)
        .collect()
}

/// Content-Range headers received for `name`, in arrival order
pub async fn uploaded_ranges(server: &MockServer, name: &str) -> Vec<String> {
    let upload_path = format!("/upload/{}", name);
    server
        .received_requests()
        .await
        .unwrap_or_default()
        .into_iter()
        .filter(|r| r.method.as_str() == "PUT" && r.url.path() == upload_path)
        .filter_map(|r| {
            r.headers
                .get("content-range")
                .and_then(|v| v.to_str().ok())
                .map(str::to_string)
        })
        .collect()
}

/// Assert the drive received exactly `expected` for `name`
pub async fn assert_uploaded(server: &MockServer, name: &str, expected: &[u8]) {
    let received = uploaded_bytes(server, name).await;
    assert_eq!(
        received.len(),
        expected.len(),
        "{}: received {} bytes, expected {}",
        name,
        received.len(),
        expected.len()
    );
    assert!(received == expected, "{}: uploaded bytes differ from source", name);
}

/// Drain every event already sent to `rx`
pub fn drain_events(rx: &mut tokio::sync::broadcast::Receiver<Event>) -> Vec<Event> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}
