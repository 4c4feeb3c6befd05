//! SSE session transport tests

mod harness;

use std::time::Duration;

use futures::StreamExt;
use harness::fake_upstream::{tool, FakeConnector};
use harness::server::TestHub;
use harness::settings_with_upstreams;
use serde_json::{json, Value};

/// Minimal SSE reader over a reqwest byte stream
struct SseStream {
    inner: std::pin::Pin<
        Box<dyn futures::Stream<Item = Result<bytes::Bytes, reqwest::Error>> + Send>,
    >,
    buffer: String,
}

impl SseStream {
    async fn open(client: &reqwest::Client, url: &str) -> Self {
        let response = client.get(url).send().await.expect("open sse");
        assert_eq!(response.status(), 200);
        Self {
            inner: Box::pin(response.bytes_stream()),
            buffer: String::new(),
        }
    }

    /// Next `(event, data)` pair, skipping keep-alive comments
    async fn next_event(&mut self, timeout: Duration) -> Option<(String, String)> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if let Some(event) = self.take_buffered_event() {
                return Some(event);
            }

            let chunk = tokio::time::timeout_at(deadline, self.inner.next())
                .await
                .ok()??;
            let chunk = chunk.ok()?;
            self.buffer.push_str(&String::from_utf8_lossy(&chunk));
        }
    }

    fn take_buffered_event(&mut self) -> Option<(String, String)> {
        loop {
            let end = self.buffer.find("\n\n")?;
            let block: String = self.buffer.drain(..end + 2).collect();

            let mut event = "message".to_string();
            let mut data = String::new();
            for line in block.lines() {
                if let Some(rest) = line.strip_prefix("event:") {
                    event = rest.trim().to_string();
                } else if let Some(rest) = line.strip_prefix("data:") {
                    data.push_str(rest.trim());
                }
            }

            // Comment-only blocks are keep-alives.
            if data.is_empty() && block.trim_start().starts_with(':') {
                continue;
            }
            return Some((event, data));
        }
    }
}

fn session_id_from_endpoint(endpoint: &str) -> String {
    endpoint
        .split("sessionId=")
        .nth(1)
        .expect("sessionId in endpoint event")
        .to_string()
}

#[tokio::test]
async fn sse_session_round_trips_requests() {
    let connector = FakeConnector::new();
    connector.script("echo", vec![tool("echo", "echoes input")]);

    let hub = TestHub::start(settings_with_upstreams(&["echo"]), connector)
        .await
        .unwrap();
    hub.wait_ready("echo").await;
    hub.wait_catalog_version(1).await;

    let mut stream = SseStream::open(hub.client(), &hub.url("/sse")).await;

    let (event, endpoint) = stream.next_event(Duration::from_secs(5)).await.unwrap();
    assert_eq!(event, "endpoint");
    assert!(endpoint.starts_with("/messages?sessionId="), "{endpoint}");
    let session_id = session_id_from_endpoint(&endpoint);

    // initialize over the paired POST endpoint
    let accepted = hub
        .client()
        .post(hub.url(&format!("/messages?sessionId={session_id}")))
        .json(&json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": "initialize",
            "params": { "protocolVersion": "2025-03-26", "capabilities": {},
                        "clientInfo": { "name": "sse-test", "version": "0" } }
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(accepted.status(), 202);

    let (event, data) = stream.next_event(Duration::from_secs(5)).await.unwrap();
    assert_eq!(event, "message");
    let response: Value = serde_json::from_str(&data).unwrap();
    assert_eq!(response["id"], 1);
    assert_eq!(response["result"]["serverInfo"]["name"], "manifold");

    // tools/call comes back on the stream as well
    let accepted = hub
        .client()
        .post(hub.url(&format!("/messages?sessionId={session_id}")))
        .json(&json!({
            "jsonrpc": "2.0",
            "id": 2,
            "method": "tools/call",
            "params": { "name": "echo", "arguments": { "text": "over sse" } }
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(accepted.status(), 202);

    let (_, data) = stream.next_event(Duration::from_secs(5)).await.unwrap();
    let response: Value = serde_json::from_str(&data).unwrap();
    assert_eq!(response["id"], 2);
    assert_eq!(response["result"]["content"][0]["text"], "over sse");
}

#[tokio::test]
async fn sse_session_receives_list_changed_notifications() {
    let connector = FakeConnector::new();
    connector.script("a", vec![tool("weather", "Get current weather")]);

    let hub = TestHub::start(settings_with_upstreams(&["a"]), connector)
        .await
        .unwrap();
    hub.wait_ready("a").await;
    hub.wait_catalog_version(1).await;

    let mut stream = SseStream::open(hub.client(), &hub.url("/sse")).await;
    let (_, endpoint) = stream.next_event(Duration::from_secs(5)).await.unwrap();
    let _session_id = session_id_from_endpoint(&endpoint);

    hub.store
        .mutate(|settings| {
            settings
                .upstreams
                .get_mut("a")
                .unwrap()
                .tools
                .insert(
                    "weather".to_string(),
                    manifold_config::ToolOverlay {
                        enabled: Some(true),
                        description: Some("Forecast service".to_string()),
                    },
                );
            Ok(())
        })
        .await
        .unwrap();

    let (event, data) = stream.next_event(Duration::from_secs(5)).await.unwrap();
    assert_eq!(event, "message");
    let notification: Value = serde_json::from_str(&data).unwrap();
    assert_eq!(notification["method"], "notifications/tools/list_changed");
}

#[tokio::test]
async fn unknown_sse_scope_is_rejected() {
    let connector = FakeConnector::new();
    let hub = TestHub::start(settings_with_upstreams(&[]), connector)
        .await
        .unwrap();

    let response = hub
        .client()
        .get(hub.url("/sse/no-such-scope"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 404);
}
