use std::collections::HashMap;

use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use url::Url;

/// Declarative record for one upstream MCP server
// No deny_unknown_fields here: serde does not support it together with the
// flattened transport tag.
#[derive(Debug, Clone, Deserialize)]
pub struct UpstreamSpec {
    /// Transport family and its connection parameters
    #[serde(flatten)]
    pub transport: TransportSpec,
    /// Disabled upstreams are driven to closed and drop out of every scope
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Per-tool enable/description overlay keyed by the upstream tool name
    #[serde(default)]
    pub tools: HashMap<String, ToolOverlay>,
    /// Keep-alive override in milliseconds; falls back to the global default
    #[serde(default)]
    pub keep_alive_interval_ms: Option<u64>,
    /// Owning principal; ownerless upstreams are visible to everyone
    #[serde(default)]
    pub owner: Option<String>,
}

fn default_true() -> bool {
    true
}

impl UpstreamSpec {
    /// Whether two specs can share a live connection
    ///
    /// A change in any connection-relevant field forces a close-and-recreate
    /// during reconciliation; overlay-only edits re-project the catalog
    /// without touching the transport.
    pub fn connection_eq(&self, other: &Self) -> bool {
        self.transport.connection_eq(&other.transport)
            && self.keep_alive_interval_ms == other.keep_alive_interval_ms
    }

    /// Whether the tool overlay (or ownership) differs
    pub fn overlay_eq(&self, other: &Self) -> bool {
        self.tools == other.tools && self.owner == other.owner
    }
}

/// Transport families for upstream connections
///
/// A closed set: the discriminator is the `transport` field in settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "transport", rename_all = "snake_case")]
pub enum TransportSpec {
    /// Child process speaking MCP over its standard streams
    Stdio(StdioTransport),
    /// Server-sent-event stream with a paired message endpoint
    Sse(HttpTransport),
    /// Request/response streamable HTTP
    HttpStream(HttpTransport),
    /// Tools synthesized from an OpenAPI description
    Openapi(OpenApiTransport),
}

impl TransportSpec {
    /// Short kind tag used in logs and the health endpoint
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Stdio(_) => "stdio",
            Self::Sse(_) => "sse",
            Self::HttpStream(_) => "http_stream",
            Self::Openapi(_) => "openapi",
        }
    }

    /// Whether this transport holds a persistent channel worth pinging
    pub fn has_persistent_channel(&self) -> bool {
        matches!(self, Self::Stdio(_) | Self::Sse(_))
    }

    pub(crate) fn connection_eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Stdio(a), Self::Stdio(b)) => {
                a.command == b.command && a.args == b.args && a.env == b.env
            }
            (Self::Sse(a), Self::Sse(b)) | (Self::HttpStream(a), Self::HttpStream(b)) => {
                a.url == b.url && a.headers == b.headers && auth_eq(&a.auth, &b.auth)
            }
            (Self::Openapi(a), Self::Openapi(b)) => {
                a.spec_url == b.spec_url
                    && a.base_url == b.base_url
                    && a.headers == b.headers
                    && security_eq(&a.security, &b.security)
            }
            _ => false,
        }
    }
}

/// Standard-stream transport parameters
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StdioTransport {
    /// Command to execute
    pub command: String,
    /// Command arguments
    #[serde(default)]
    pub args: Vec<String>,
    /// Environment variables for the child process
    #[serde(default)]
    pub env: HashMap<String, String>,
}

/// HTTP transport parameters shared by the SSE and streamable variants
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HttpTransport {
    /// Server URL
    pub url: Url,
    /// Extra headers sent on every request
    #[serde(default)]
    pub headers: Vec<HeaderInsert>,
    /// Authentication applied to outgoing requests
    #[serde(default)]
    pub auth: Option<UpstreamAuth>,
}

/// Upstream authentication
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum UpstreamAuth {
    /// Static bearer token
    Token { token: SecretString },
}

/// Header inserted on requests to an upstream
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HeaderInsert {
    pub name: String,
    pub value: String,
}

/// OpenAPI-synthesized transport parameters
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OpenApiTransport {
    /// Location of the OpenAPI document (fetched at connect time)
    pub spec_url: Url,
    /// Overrides the server URL declared in the document
    #[serde(default)]
    pub base_url: Option<Url>,
    /// Security scheme applied to synthesized calls
    #[serde(default)]
    pub security: Option<OpenApiSecurity>,
    /// Extra headers sent on every synthesized call
    #[serde(default)]
    pub headers: Vec<HeaderInsert>,
}

/// Security schemes for OpenAPI-backed upstreams
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "scheme", rename_all = "snake_case")]
pub enum OpenApiSecurity {
    /// API key carried in a header or query parameter
    ApiKey {
        name: String,
        #[serde(default)]
        location: ApiKeyLocation,
        value: SecretString,
    },
    /// Bearer token in the Authorization header
    Bearer { token: SecretString },
}

/// Where an OpenAPI api-key is carried
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApiKeyLocation {
    #[default]
    Header,
    Query,
}

/// Per-tool overlay applied on top of the upstream-reported descriptor
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ToolOverlay {
    /// Absent counts as enabled
    #[serde(default)]
    pub enabled: Option<bool>,
    /// Replaces the upstream-reported description everywhere, embeddings
    /// included
    #[serde(default)]
    pub description: Option<String>,
}

fn auth_eq(a: &Option<UpstreamAuth>, b: &Option<UpstreamAuth>) -> bool {
    match (a, b) {
        (None, None) => true,
        (Some(UpstreamAuth::Token { token: ta }), Some(UpstreamAuth::Token { token: tb })) => {
            ta.expose_secret() == tb.expose_secret()
        }
        _ => false,
    }
}

fn security_eq(a: &Option<OpenApiSecurity>, b: &Option<OpenApiSecurity>) -> bool {
    match (a, b) {
        (None, None) => true,
        (
            Some(OpenApiSecurity::ApiKey {
                name: na,
                location: la,
                value: va,
            }),
            Some(OpenApiSecurity::ApiKey {
                name: nb,
                location: lb,
                value: vb,
            }),
        ) => na == nb && la == lb && va.expose_secret() == vb.expose_secret(),
        (
            Some(OpenApiSecurity::Bearer { token: ta }),
            Some(OpenApiSecurity::Bearer { token: tb }),
        ) => ta.expose_secret() == tb.expose_secret(),
        _ => false,
    }
}
