//! End-to-end tests over the streamable-HTTP surface

mod harness;

use std::sync::atomic::Ordering;

use harness::fake_upstream::{tool, FakeConnector};
use harness::server::{error_kind, TestHub};
use harness::settings_with_upstreams;
use serde_json::json;

// -- Add, list, call --

#[tokio::test]
async fn stdio_upstream_add_list_call() {
    let connector = FakeConnector::new();
    connector.script("echo", vec![tool("echo", "echoes input")]);

    let hub = TestHub::start(settings_with_upstreams(&["echo"]), connector)
        .await
        .unwrap();
    hub.wait_ready("echo").await;
    hub.wait_catalog_version(1).await;
    assert_eq!(hub.state.catalog.version(), 1);

    let session = hub.initialize(None).await;

    let tools = hub.tools_list(None, Some(&session)).await;
    assert_eq!(tools.len(), 1);
    assert_eq!(tools[0]["name"], "echo");
    assert_eq!(tools[0]["description"], "echoes input");
    assert!(tools[0]["inputSchema"].is_object());

    let response = hub
        .tools_call(None, Some(&session), "echo", json!({ "text": "hi" }))
        .await;
    assert_eq!(response["result"]["content"][0]["type"], "text");
    assert_eq!(response["result"]["content"][0]["text"], "hi");
}

// -- Name collision namespacing --

#[tokio::test]
async fn colliding_tool_names_are_namespaced() {
    let connector = FakeConnector::new();
    let a = connector.script("a", vec![tool("ping", "ping from a")]);
    let b = connector.script("b", vec![tool("ping", "ping from b")]);

    let hub = TestHub::start(settings_with_upstreams(&["a", "b"]), connector)
        .await
        .unwrap();
    hub.wait_ready("a").await;
    hub.wait_ready("b").await;
    hub.wait_catalog_version(2).await;

    let session = hub.initialize(None).await;

    let tools = hub.tools_list(None, Some(&session)).await;
    let names: Vec<&str> = tools.iter().map(|t| t["name"].as_str().unwrap()).collect();
    assert_eq!(names, vec!["a__ping", "b__ping"]);

    let response = hub
        .tools_call(None, Some(&session), "a__ping", json!({}))
        .await;
    assert!(response["error"].is_null(), "unexpected error: {response}");
    assert_eq!(a.call_count(), 1);
    assert_eq!(b.call_count(), 0);

    let not_found = hub.tools_call(None, Some(&session), "ping", json!({})).await;
    assert_eq!(error_kind(&not_found), "tool_not_found");
}

// -- Group allowlists --

#[tokio::test]
async fn group_allowlist_restricts_tools() {
    let connector = FakeConnector::new();
    connector.script("a", vec![tool("ping", "safe"), tool("nuke", "dangerous")]);

    let mut settings = settings_with_upstreams(&["a"]);
    settings.groups = toml::from_str::<manifold_config::Settings>(
        r#"
        [[groups]]
        name = "g"
        [[groups.servers]]
        upstream = "a"
        selected_tools = ["ping"]
        "#,
    )
    .unwrap()
    .groups;

    let hub = TestHub::start(settings, connector).await.unwrap();
    hub.wait_ready("a").await;
    hub.wait_catalog_version(1).await;

    let session = hub.initialize(Some("g")).await;

    let tools = hub.tools_list(None, Some(&session)).await;
    let names: Vec<&str> = tools.iter().map(|t| t["name"].as_str().unwrap()).collect();
    assert_eq!(names, vec!["ping"]);

    let blocked = hub.tools_call(None, Some(&session), "nuke", json!({})).await;
    assert_eq!(error_kind(&blocked), "tool_not_allowed");
}

// -- Hot-edit overlay --

#[tokio::test]
async fn description_override_applies_without_restart() {
    let connector = FakeConnector::new();
    let scripted = connector.script("a", vec![tool("weather", "Get current weather")]);

    let hub = TestHub::start(settings_with_upstreams(&["a"]), connector)
        .await
        .unwrap();
    hub.wait_ready("a").await;
    hub.wait_catalog_version(1).await;
    let connects_before = scripted.connects.load(Ordering::SeqCst);

    let session = hub.initialize(None).await;
    hub.tools_list(None, Some(&session)).await;

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
                        enabled: None,
                        description: Some("Forecast service".to_string()),
                    },
                );
            Ok(())
        })
        .await
        .unwrap();

    hub.wait_catalog_version(2).await;

    let tools = hub.tools_list(None, Some(&session)).await;
    assert_eq!(tools[0]["description"], "Forecast service");
    assert_eq!(scripted.connects.load(Ordering::SeqCst), connects_before);
}

#[tokio::test]
async fn overlay_change_piggybacks_list_changed_notification() {
    let connector = FakeConnector::new();
    connector.script("a", vec![tool("weather", "Get current weather")]);

    let hub = TestHub::start(settings_with_upstreams(&["a"]), connector)
        .await
        .unwrap();
    hub.wait_ready("a").await;
    hub.wait_catalog_version(1).await;

    let session = hub.initialize(None).await;
    hub.tools_list(None, Some(&session)).await;

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
                        enabled: None,
                        description: Some("Forecast service".to_string()),
                    },
                );
            Ok(())
        })
        .await
        .unwrap();
    hub.wait_catalog_version(2).await;

    // The notifier coalesces for 100ms before queueing; keep pinging until
    // the queued notification rides back on a POST response.
    for _ in 0..30 {
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        let response = hub
            .mcp_post(
                None,
                Some(&session),
                json!({ "jsonrpc": "2.0", "id": 9, "method": "ping" }),
            )
            .await;

        let content_type = response
            .headers()
            .get("content-type")
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();
        let body = response.text().await.unwrap();

        if content_type.starts_with("text/event-stream") {
            assert!(body.contains("notifications/tools/list_changed"), "{body}");
            assert!(body.contains("\"id\":9"), "{body}");
            return;
        }
    }
    panic!("list_changed notification never arrived");
}

// -- Upstream outage --

#[tokio::test]
async fn transport_failure_degrades_and_list_still_includes_tools() {
    let connector = FakeConnector::new();
    let scripted = connector.script("a", vec![tool("weather", "forecast")]);

    let hub = TestHub::start(settings_with_upstreams(&["a"]), connector)
        .await
        .unwrap();
    hub.wait_ready("a").await;
    hub.wait_catalog_version(1).await;

    let session = hub.initialize(None).await;

    scripted.healthy.store(false, Ordering::SeqCst);
    let failed = hub
        .tools_call(None, Some(&session), "weather", json!({}))
        .await;
    assert_eq!(error_kind(&failed), "upstream_unavailable");

    // hide_degraded_upstreams_from_list defaults to false: the tools stay
    // listed while the runtime is degraded.
    let tools = hub.tools_list(None, Some(&session)).await;
    assert_eq!(tools.len(), 1);

    // After the backoff the supervisor reconnects.
    scripted.healthy.store(true, Ordering::SeqCst);
    hub.wait_ready("a").await;
    let recovered = hub
        .tools_call(None, Some(&session), "weather", json!({}))
        .await;
    assert_eq!(recovered["result"]["content"][0]["text"], "weather result");
}

// -- Empty scopes and stateless requests --

#[tokio::test]
async fn empty_global_scope_lists_nothing_and_calls_fail() {
    let connector = FakeConnector::new();
    let hub = TestHub::start(settings_with_upstreams(&[]), connector)
        .await
        .unwrap();

    let session = hub.initialize(None).await;

    let tools = hub.tools_list(None, Some(&session)).await;
    assert!(tools.is_empty());

    let response = hub
        .tools_call(None, Some(&session), "anything", json!({}))
        .await;
    assert_eq!(error_kind(&response), "tool_not_found");
}

#[tokio::test]
async fn unknown_scope_is_rejected_at_session_creation() {
    let connector = FakeConnector::new();
    let hub = TestHub::start(settings_with_upstreams(&[]), connector)
        .await
        .unwrap();

    let response = hub
        .mcp_post(
            Some("no-such-group"),
            None,
            json!({
                "jsonrpc": "2.0",
                "id": 0,
                "method": "initialize",
                "params": { "protocolVersion": "2025-03-26", "capabilities": {},
                            "clientInfo": { "name": "t", "version": "0" } }
            }),
        )
        .await;
    assert_eq!(response.status(), 404);
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(error_kind(&body), "scope_not_found");
}

#[tokio::test]
async fn stateless_requests_work_without_a_session() {
    let connector = FakeConnector::new();
    connector.script("echo", vec![tool("echo", "echoes input")]);

    let hub = TestHub::start(settings_with_upstreams(&["echo"]), connector)
        .await
        .unwrap();
    hub.wait_ready("echo").await;
    hub.wait_catalog_version(1).await;

    let tools = hub.tools_list(None, None).await;
    assert_eq!(tools.len(), 1);

    let response = hub
        .tools_call(None, None, "echo", json!({ "text": "oneshot" }))
        .await;
    assert_eq!(response["result"]["content"][0]["text"], "oneshot");
}

// -- Session lifecycle --

#[tokio::test]
async fn delete_closes_the_session() {
    let connector = FakeConnector::new();
    let hub = TestHub::start(settings_with_upstreams(&[]), connector)
        .await
        .unwrap();

    let session = hub.initialize(None).await;

    let deleted = hub
        .client()
        .delete(hub.url("/mcp"))
        .header("mcp-session-id", &session)
        .send()
        .await
        .unwrap();
    assert_eq!(deleted.status(), 204);

    let stale = hub
        .mcp_post(
            None,
            Some(&session),
            json!({ "jsonrpc": "2.0", "id": 1, "method": "ping" }),
        )
        .await;
    assert_eq!(stale.status(), 404);
    let body: serde_json::Value = stale.json().await.unwrap();
    assert_eq!(error_kind(&body), "session_not_found");
}

// -- Server info and health --

#[tokio::test]
async fn server_info_reports_scope_and_upstream_count() {
    let connector = FakeConnector::new();
    connector.script("echo", vec![tool("echo", "echoes input")]);

    let hub = TestHub::start(settings_with_upstreams(&["echo"]), connector)
        .await
        .unwrap();
    hub.wait_ready("echo").await;

    let info: serde_json::Value = hub
        .client()
        .get(hub.url("/mcp"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(info["name"], "manifold");
    assert_eq!(info["scope"]["kind"], "global");
    assert_eq!(info["upstreams"], 1);
}

#[tokio::test]
async fn health_reports_upstream_states() {
    let connector = FakeConnector::new();
    connector.script("echo", vec![tool("echo", "echoes input")]);

    let hub = TestHub::start(settings_with_upstreams(&["echo"]), connector)
        .await
        .unwrap();
    hub.wait_ready("echo").await;
    hub.wait_catalog_version(1).await;

    let health: serde_json::Value = hub
        .client()
        .get(hub.url("/health"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(health["status"], "ok");
    assert_eq!(health["catalog_version"], 1);
    assert_eq!(health["upstreams"][0]["name"], "echo");
    assert_eq!(health["upstreams"][0]["state"], "ready");
}

// -- Multi-tenancy --

#[tokio::test]
async fn owned_upstreams_are_invisible_to_other_principals() {
    let connector = FakeConnector::new();
    connector.script("pub", vec![tool("echo", "public echo")]);
    connector.script("priv", vec![tool("secret", "private tool")]);

    let mut settings = settings_with_upstreams(&["pub", "priv"]);
    settings.upstreams.get_mut("priv").unwrap().owner = Some("alice".to_string());

    let hub = TestHub::start(settings, connector).await.unwrap();
    hub.wait_ready("pub").await;
    hub.wait_ready("priv").await;
    hub.wait_catalog_version(2).await;

    // Principal-scoped path: /{principal}/mcp
    let bob_tools: serde_json::Value = hub
        .client()
        .post(hub.url("/bob/mcp"))
        .json(&json!({ "jsonrpc": "2.0", "id": 1, "method": "tools/list" }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let names: Vec<&str> = bob_tools["result"]["tools"]
        .as_array()
        .unwrap()
        .iter()
        .map(|t| t["name"].as_str().unwrap())
        .collect();
    assert_eq!(names, vec!["echo"]);

    let alice_tools: serde_json::Value = hub
        .client()
        .post(hub.url("/alice/mcp"))
        .json(&json!({ "jsonrpc": "2.0", "id": 1, "method": "tools/list" }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let names: Vec<&str> = alice_tools["result"]["tools"]
        .as_array()
        .unwrap()
        .iter()
        .map(|t| t["name"].as_str().unwrap())
        .collect();
    assert_eq!(names, vec!["echo", "secret"]);
}
