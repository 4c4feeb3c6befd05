use std::sync::Arc;

use async_trait::async_trait;
use manifold_config::TransportSpec;
use serde_json::Value;

use crate::error::UpstreamError;
use crate::openapi::OpenApiClient;
use crate::rmcp_client::RmcpClient;

/// Identity reported by an upstream after a successful initialize
#[derive(Debug, Clone, Default)]
pub struct ServerIdentity {
    pub name: String,
    pub version: String,
    pub protocol_version: String,
    pub capabilities: Value,
}

/// Tool descriptor as reported by an upstream, before any overlay
#[derive(Debug, Clone, PartialEq)]
pub struct ToolDef {
    pub name: String,
    pub description: Option<String>,
    pub input_schema: Value,
}

/// Out-of-band signal from an upstream connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpstreamEvent {
    /// The upstream announced `notifications/tools/list_changed`
    ToolListChanged,
}

/// Uniform contract over the four transport families
///
/// Connecting performs the MCP initialize handshake, so a constructed client
/// is already initialized. Call results cross this boundary as the raw
/// `CallToolResult` JSON so the hub stays a transparent proxy for payloads.
#[async_trait]
pub trait UpstreamClient: Send + Sync {
    /// Server identity captured during initialize
    fn identity(&self) -> &ServerIdentity;

    /// Take the connection's event stream, if the transport has one
    ///
    /// Yields at most once; the supervisor owns the receiver afterwards.
    fn take_events(&self) -> Option<tokio::sync::mpsc::UnboundedReceiver<UpstreamEvent>> {
        None
    }

    /// List the upstream's tools
    async fn list_tools(&self) -> Result<Vec<ToolDef>, UpstreamError>;

    /// Invoke a tool, returning the MCP `CallToolResult` verbatim
    async fn call_tool(
        &self,
        name: &str,
        arguments: Option<serde_json::Map<String, Value>>,
    ) -> Result<Value, UpstreamError>;

    /// Liveness probe
    async fn ping(&self) -> Result<(), UpstreamError>;

    /// Release the connection
    async fn close(&self) -> Result<(), UpstreamError>;
}

/// Factory producing connected upstream clients
///
/// The supervisor only ever sees this seam, which is what lets tests drive
/// it with in-process fakes.
#[async_trait]
pub trait Connect: Send + Sync {
    async fn connect(
        &self,
        name: &str,
        spec: &TransportSpec,
    ) -> Result<Arc<dyn UpstreamClient>, UpstreamError>;
}

/// Production connector covering all four transport families
#[derive(Debug, Default)]
pub struct Connector;

#[async_trait]
impl Connect for Connector {
    async fn connect(
        &self,
        name: &str,
        spec: &TransportSpec,
    ) -> Result<Arc<dyn UpstreamClient>, UpstreamError> {
        let client: Arc<dyn UpstreamClient> = match spec {
            TransportSpec::Stdio(config) => Arc::new(RmcpClient::connect_stdio(name, config).await?),
            TransportSpec::Sse(config) => Arc::new(RmcpClient::connect_sse(name, config).await?),
            TransportSpec::HttpStream(config) => {
                Arc::new(RmcpClient::connect_streamable_http(name, config).await?)
            }
            TransportSpec::Openapi(config) => Arc::new(OpenApiClient::connect(name, config).await?),
        };

        tracing::info!(upstream = name, kind = spec.kind(), "connected to upstream");
        Ok(client)
    }
}
