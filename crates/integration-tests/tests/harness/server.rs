//! Hub wrapper running on a random port

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use manifold_config::{Settings, SettingsStore};
use manifold_server::{Hub, HubState};
use manifold_upstream::Connect;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;

/// A running hub instance plus the handles tests poke at
pub struct TestHub {
    addr: SocketAddr,
    pub store: Arc<SettingsStore>,
    pub state: Arc<HubState>,
    client: reqwest::Client,
    shutdown: CancellationToken,
}

impl TestHub {
    /// Start the hub with a scripted connector
    pub async fn start(settings: Settings, connector: Arc<dyn Connect>) -> anyhow::Result<Self> {
        let store = Arc::new(SettingsStore::new(settings));
        let hub = Hub::with_connector(Arc::clone(&store), connector).await?;
        let state = hub.state();

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;

        let shutdown = CancellationToken::new();
        let shutdown_clone = shutdown.clone();
        let router = hub.router();
        tokio::spawn(async move {
            axum::serve(listener, router)
                .with_graceful_shutdown(async move {
                    shutdown_clone.cancelled().await;
                })
                .await
                .ok();
        });

        Ok(Self {
            addr,
            store,
            state,
            client: reqwest::Client::new(),
            shutdown,
        })
    }

    pub fn url(&self, path: &str) -> String {
        format!("http://{}{path}", self.addr)
    }

    pub fn client(&self) -> &reqwest::Client {
        &self.client
    }

    /// Poll until the upstream reaches ready
    pub async fn wait_ready(&self, upstream: &str) {
        for _ in 0..300 {
            if self.state.upstream_ready(upstream) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("upstream '{upstream}' never became ready");
    }

    /// Poll until the catalog reaches at least the given version
    pub async fn wait_catalog_version(&self, at_least: u64) {
        for _ in 0..300 {
            if self.state.catalog.version() >= at_least {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("catalog never reached version {at_least}");
    }

    /// Poll until the vector index holds at least the given number of rows
    pub async fn wait_vector_rows(&self, rows: usize) {
        let index = self.state.vector.as_ref().expect("smart routing enabled");
        for _ in 0..300 {
            if index.len().await >= rows {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("vector index never reached {rows} rows");
    }

    /// POST a JSON-RPC message to `/mcp[/{scope}]`
    pub async fn mcp_post(
        &self,
        scope: Option<&str>,
        session: Option<&str>,
        body: Value,
    ) -> reqwest::Response {
        let path = match scope {
            Some(scope) => format!("/mcp/{scope}"),
            None => "/mcp".to_string(),
        };
        let mut request = self.client.post(self.url(&path)).json(&body);
        if let Some(session) = session {
            request = request.header("mcp-session-id", session);
        }
        request.send().await.expect("mcp post")
    }

    /// Open a streamable-HTTP session, returning its id
    pub async fn initialize(&self, scope: Option<&str>) -> String {
        let response = self
            .mcp_post(
                scope,
                None,
                json!({
                    "jsonrpc": "2.0",
                    "id": 0,
                    "method": "initialize",
                    "params": {
                        "protocolVersion": "2025-03-26",
                        "capabilities": {},
                        "clientInfo": { "name": "test-client", "version": "0.0.0" }
                    }
                }),
            )
            .await;
        assert_eq!(response.status(), 200, "initialize failed");
        response
            .headers()
            .get("mcp-session-id")
            .expect("session id header")
            .to_str()
            .unwrap()
            .to_string()
    }

    /// `tools/list` through a session, returning the tools array
    pub async fn tools_list(&self, scope: Option<&str>, session: Option<&str>) -> Vec<Value> {
        let response = self
            .mcp_post(
                scope,
                session,
                json!({ "jsonrpc": "2.0", "id": 1, "method": "tools/list" }),
            )
            .await;
        assert_eq!(response.status(), 200);
        let body: Value = response.json().await.expect("tools/list body");
        body["result"]["tools"]
            .as_array()
            .unwrap_or_else(|| panic!("no tools in {body}"))
            .clone()
    }

    /// `tools/call`, returning the whole JSON-RPC response
    pub async fn tools_call(
        &self,
        scope: Option<&str>,
        session: Option<&str>,
        name: &str,
        arguments: Value,
    ) -> Value {
        let response = self
            .mcp_post(
                scope,
                session,
                json!({
                    "jsonrpc": "2.0",
                    "id": 2,
                    "method": "tools/call",
                    "params": { "name": name, "arguments": arguments }
                }),
            )
            .await;
        response.json().await.expect("tools/call body")
    }
}

impl Drop for TestHub {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

/// The stable error kind of a JSON-RPC error response
pub fn error_kind(response: &Value) -> &str {
    response["error"]["data"]["kind"]
        .as_str()
        .unwrap_or_else(|| panic!("no error kind in {response}"))
}
