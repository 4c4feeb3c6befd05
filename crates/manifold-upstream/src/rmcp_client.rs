use std::borrow::Cow;
use std::sync::Arc;

use async_trait::async_trait;
use manifold_config::{HeaderInsert, HttpTransport, StdioTransport, UpstreamAuth};
use rmcp::model::CallToolRequestParam;
use rmcp::service::{NotificationContext, Peer, RoleClient, RunningService, ServiceError, ServiceExt as _};
use rmcp::transport::TokioChildProcess;
use rmcp::ClientHandler;
use serde_json::Value;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};
use tokio::sync::Mutex;

use crate::client::{ServerIdentity, ToolDef, UpstreamClient, UpstreamEvent};
use crate::error::UpstreamError;

/// Client handler forwarding upstream list-change notifications
///
/// Everything else keeps the rmcp defaults; the hub advertises no sampling
/// or roots capabilities to upstreams.
#[derive(Clone)]
struct HubClientHandler {
    events: UnboundedSender<UpstreamEvent>,
}

impl ClientHandler for HubClientHandler {
    fn get_info(&self) -> rmcp::model::ClientInfo {
        rmcp::model::ClientInfo::default()
    }

    fn on_tool_list_changed(
        &self,
        _context: NotificationContext<RoleClient>,
    ) -> impl std::future::Future<Output = ()> + Send + '_ {
        let events = self.events.clone();
        async move {
            let _ = events.send(UpstreamEvent::ToolListChanged);
        }
    }
}

/// MCP upstream client over the rmcp transports (stdio, SSE, streamable
/// HTTP)
///
/// The peer handle is cloneable and lock-free, so concurrent `tools/call`
/// workers never serialize behind each other; the running service itself is
/// only touched again on close.
pub struct RmcpClient {
    upstream: String,
    identity: ServerIdentity,
    peer: Peer<RoleClient>,
    events: std::sync::Mutex<Option<UnboundedReceiver<UpstreamEvent>>>,
    service: Mutex<Option<RunningService<RoleClient, HubClientHandler>>>,
}

impl RmcpClient {
    /// Spawn the configured command and handshake over its standard streams
    ///
    /// The child's stderr is inherited into the hub's log sink tagged by the
    /// tracing span of the supervisor that owns it.
    pub async fn connect_stdio(name: &str, config: &StdioTransport) -> Result<Self, UpstreamError> {
        let mut cmd = tokio::process::Command::new(&config.command);
        cmd.args(&config.args);
        for (k, v) in &config.env {
            cmd.env(k, v);
        }

        let transport = TokioChildProcess::new(cmd)
            .map_err(|e| UpstreamError::Transport(format!("failed to spawn process: {e}")))?;

        let (events_tx, events_rx) = unbounded_channel();
        let service = HubClientHandler { events: events_tx }
            .serve(transport)
            .await
            .map_err(|e| UpstreamError::Transport(format!("stdio handshake failed: {e}")))?;

        Ok(Self::from_service(name, service, events_rx))
    }

    /// Open an SSE stream and handshake over the paired message endpoint
    pub async fn connect_sse(name: &str, config: &HttpTransport) -> Result<Self, UpstreamError> {
        use rmcp::transport::sse_client::SseClientConfig;
        use rmcp::transport::SseClientTransport;

        let sse_config = SseClientConfig {
            sse_endpoint: Arc::from(config.url.as_str()),
            ..Default::default()
        };

        let client = build_http_client(&config.headers, config.auth.as_ref())?;

        let transport = SseClientTransport::start_with_client(client, sse_config)
            .await
            .map_err(|e| UpstreamError::Transport(format!("SSE connection failed: {e}")))?;

        let (events_tx, events_rx) = unbounded_channel();
        let service = HubClientHandler { events: events_tx }
            .serve(transport)
            .await
            .map_err(|e| UpstreamError::Transport(format!("SSE handshake failed: {e}")))?;

        Ok(Self::from_service(name, service, events_rx))
    }

    /// Handshake over request/response streamable HTTP
    pub async fn connect_streamable_http(
        name: &str,
        config: &HttpTransport,
    ) -> Result<Self, UpstreamError> {
        use rmcp::transport::streamable_http_client::StreamableHttpClientTransportConfig;
        use rmcp::transport::StreamableHttpClientTransport;

        let transport_config = StreamableHttpClientTransportConfig::with_uri(config.url.as_str());

        let client = build_http_client(&config.headers, config.auth.as_ref())?;
        let transport = StreamableHttpClientTransport::with_client(client, transport_config);

        let (events_tx, events_rx) = unbounded_channel();
        let service = HubClientHandler { events: events_tx }
            .serve(transport)
            .await
            .map_err(|e| UpstreamError::Transport(format!("streamable HTTP handshake failed: {e}")))?;

        Ok(Self::from_service(name, service, events_rx))
    }

    fn from_service(
        name: &str,
        service: RunningService<RoleClient, HubClientHandler>,
        events: UnboundedReceiver<UpstreamEvent>,
    ) -> Self {
        let identity = service.peer_info().map(identity_from).unwrap_or_default();
        let peer = service.peer().clone();
        Self {
            upstream: name.to_string(),
            identity,
            peer,
            events: std::sync::Mutex::new(Some(events)),
            service: Mutex::new(Some(service)),
        }
    }
}

#[async_trait]
impl UpstreamClient for RmcpClient {
    fn identity(&self) -> &ServerIdentity {
        &self.identity
    }

    fn take_events(&self) -> Option<UnboundedReceiver<UpstreamEvent>> {
        self.events.lock().expect("events lock poisoned").take()
    }

    async fn list_tools(&self) -> Result<Vec<ToolDef>, UpstreamError> {
        let tools = self
            .peer
            .list_all_tools()
            .await
            .map_err(|e| map_service_error(&self.upstream, "tools/list", e))?;

        Ok(tools
            .into_iter()
            .map(|tool| ToolDef {
                name: tool.name.to_string(),
                description: tool.description.as_deref().map(ToString::to_string),
                input_schema: serde_json::to_value(&*tool.input_schema).unwrap_or_default(),
            })
            .collect())
    }

    async fn call_tool(
        &self,
        name: &str,
        arguments: Option<serde_json::Map<String, Value>>,
    ) -> Result<Value, UpstreamError> {
        let result = self
            .peer
            .call_tool(CallToolRequestParam {
                name: Cow::Owned(name.to_string()),
                arguments,
            })
            .await
            .map_err(|e| map_service_error(&self.upstream, "tools/call", e))?;

        serde_json::to_value(result).map_err(|e| {
            UpstreamError::Protocol(format!(
                "unserializable tool result from '{}': {e}",
                self.upstream
            ))
        })
    }

    async fn ping(&self) -> Result<(), UpstreamError> {
        self.peer
            .send_request(rmcp::model::ClientRequest::PingRequest(
                rmcp::model::PingRequest::default(),
            ))
            .await
            .map(|_| ())
            .map_err(|e| map_service_error(&self.upstream, "ping", e))
    }

    async fn close(&self) -> Result<(), UpstreamError> {
        let service = self.service.lock().await.take();
        if let Some(service) = service {
            service
                .cancel()
                .await
                .map_err(|e| UpstreamError::Transport(format!("shutdown failed: {e}")))?;
        }
        Ok(())
    }
}

/// Classify rmcp service errors into protocol vs transport failures
fn map_service_error(upstream: &str, method: &str, err: ServiceError) -> UpstreamError {
    match err {
        ServiceError::McpError(mcp) => UpstreamError::Protocol(format!(
            "{method} failed on '{upstream}': {}",
            mcp.message
        )),
        other => UpstreamError::Transport(format!("{method} failed on '{upstream}': {other}")),
    }
}

fn identity_from(info: &rmcp::model::ServerInfo) -> ServerIdentity {
    ServerIdentity {
        name: info.server_info.name.to_string(),
        version: info.server_info.version.to_string(),
        protocol_version: serde_json::to_value(&info.protocol_version)
            .ok()
            .and_then(|v| v.as_str().map(ToString::to_string))
            .unwrap_or_default(),
        capabilities: serde_json::to_value(&info.capabilities).unwrap_or_default(),
    }
}

/// Build a reqwest client carrying the configured headers and bearer auth
fn build_http_client(
    headers: &[HeaderInsert],
    auth: Option<&UpstreamAuth>,
) -> Result<reqwest::Client, UpstreamError> {
    let mut map = reqwest::header::HeaderMap::new();

    for header in headers {
        let name = reqwest::header::HeaderName::from_bytes(header.name.as_bytes())
            .map_err(|e| UpstreamError::Transport(format!("invalid header name '{}': {e}", header.name)))?;
        let value = reqwest::header::HeaderValue::from_str(&header.value)
            .map_err(|e| UpstreamError::Transport(format!("invalid header value for '{}': {e}", header.name)))?;
        map.insert(name, value);
    }

    if let Some(UpstreamAuth::Token { token }) = auth {
        use secrecy::ExposeSecret;
        let value = reqwest::header::HeaderValue::from_str(&format!("Bearer {}", token.expose_secret()))
            .map_err(|e| UpstreamError::Transport(format!("invalid auth token: {e}")))?;
        map.insert(reqwest::header::AUTHORIZATION, value);
    }

    reqwest::Client::builder()
        .default_headers(map)
        .build()
        .map_err(|e| UpstreamError::Transport(format!("failed to build HTTP client: {e}")))
}
