//! In-process scripted upstreams driven through the connector seam

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use manifold_config::TransportSpec;
use manifold_upstream::{Connect, ServerIdentity, ToolDef, UpstreamClient, UpstreamError};
use serde_json::{json, Map, Value};

/// Script and observation point for one upstream
pub struct ScriptedUpstream {
    pub tools: Mutex<Vec<ToolDef>>,
    /// When false, connects, calls, and probes fail with transport errors
    pub healthy: AtomicBool,
    pub connects: AtomicUsize,
    /// Recorded `(tool, arguments)` pairs
    pub calls: Mutex<Vec<(String, Value)>>,
}

impl ScriptedUpstream {
    fn new(tools: Vec<ToolDef>) -> Arc<Self> {
        Arc::new(Self {
            tools: Mutex::new(tools),
            healthy: AtomicBool::new(true),
            connects: AtomicUsize::new(0),
            calls: Mutex::new(Vec::new()),
        })
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    pub fn last_call(&self) -> Option<(String, Value)> {
        self.calls.lock().unwrap().last().cloned()
    }
}

/// A tool descriptor with a trivial string-argument schema
pub fn tool(name: &str, description: &str) -> ToolDef {
    ToolDef {
        name: name.to_string(),
        description: Some(description.to_string()),
        input_schema: json!({
            "type": "object",
            "properties": { "text": { "type": "string" } },
        }),
    }
}

/// Connector handing out scripted clients instead of real transports
#[derive(Default)]
pub struct FakeConnector {
    upstreams: Mutex<HashMap<String, Arc<ScriptedUpstream>>>,
}

impl FakeConnector {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Register the script for an upstream name
    pub fn script(&self, name: &str, tools: Vec<ToolDef>) -> Arc<ScriptedUpstream> {
        let scripted = ScriptedUpstream::new(tools);
        self.upstreams
            .lock()
            .unwrap()
            .insert(name.to_string(), Arc::clone(&scripted));
        scripted
    }
}

#[async_trait]
impl Connect for FakeConnector {
    async fn connect(
        &self,
        name: &str,
        _spec: &TransportSpec,
    ) -> Result<Arc<dyn UpstreamClient>, UpstreamError> {
        let scripted = self
            .upstreams
            .lock()
            .unwrap()
            .get(name)
            .cloned()
            .ok_or_else(|| UpstreamError::Transport(format!("no scripted upstream '{name}'")))?;

        scripted.connects.fetch_add(1, Ordering::SeqCst);
        if !scripted.healthy.load(Ordering::SeqCst) {
            return Err(UpstreamError::Transport("connection refused".to_string()));
        }

        Ok(Arc::new(FakeClient {
            identity: ServerIdentity {
                name: format!("{name}-server"),
                version: "1.0.0".to_string(),
                protocol_version: "2025-03-26".to_string(),
                capabilities: json!({ "tools": {} }),
            },
            upstream: scripted,
        }))
    }
}

struct FakeClient {
    identity: ServerIdentity,
    upstream: Arc<ScriptedUpstream>,
}

impl FakeClient {
    fn check_health(&self) -> Result<(), UpstreamError> {
        if self.upstream.healthy.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(UpstreamError::Transport("connection lost".to_string()))
        }
    }
}

#[async_trait]
impl UpstreamClient for FakeClient {
    fn identity(&self) -> &ServerIdentity {
        &self.identity
    }

    async fn list_tools(&self) -> Result<Vec<ToolDef>, UpstreamError> {
        self.check_health()?;
        Ok(self.upstream.tools.lock().unwrap().clone())
    }

    async fn call_tool(
        &self,
        name: &str,
        arguments: Option<Map<String, Value>>,
    ) -> Result<Value, UpstreamError> {
        self.check_health()?;

        let args = Value::Object(arguments.unwrap_or_default());
        self.upstream
            .calls
            .lock()
            .unwrap()
            .push((name.to_string(), args.clone()));

        // "echo" mirrors its text argument; everything else answers with a
        // recognizable marker.
        let text = if name == "echo" {
            args.get("text")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string()
        } else {
            format!("{name} result")
        };

        Ok(json!({ "content": [{ "type": "text", "text": text }] }))
    }

    async fn ping(&self) -> Result<(), UpstreamError> {
        self.check_health()
    }

    async fn close(&self) -> Result<(), UpstreamError> {
        Ok(())
    }
}
