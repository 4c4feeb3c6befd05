use thiserror::Error;

/// Upstream connection and call errors
///
/// Transport failures feed the supervisor's degradation logic; protocol
/// failures surface to the caller unchanged. Neither is retried on behalf of
/// an individual `tools/call`.
#[derive(Debug, Error)]
pub enum UpstreamError {
    /// Connection or communication failure
    #[error("transport error: {0}")]
    Transport(String),

    /// The upstream answered with malformed or unexpected MCP
    #[error("upstream protocol error: {0}")]
    Protocol(String),

    /// The OpenAPI document could not be fetched or understood
    #[error("openapi document error: {0}")]
    Document(String),
}

impl UpstreamError {
    /// Whether the supervisor should treat this as evidence the connection
    /// is broken
    pub fn is_transport(&self) -> bool {
        matches!(self, Self::Transport(_))
    }
}
