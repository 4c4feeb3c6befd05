use http::StatusCode;
use manifold_core::HttpError;
use serde_json::Value;
use thiserror::Error;

use crate::protocol::{JsonRpcError, JsonRpcResponse};

/// Wire-visible hub errors
///
/// Every failure reaches the downstream client as an MCP error carrying the
/// original request id, a stable `kind`, and a human-readable message.
/// Partial results are never emitted.
#[derive(Debug, Error)]
pub enum HubError {
    /// The requested upstream is not in ready state
    #[error("upstream '{upstream}' is not available")]
    UpstreamUnavailable { upstream: String },

    /// Per-call deadline elapsed
    #[error("call to '{tool}' on '{upstream}' timed out after {seconds}s")]
    UpstreamTimeout {
        upstream: String,
        tool: String,
        seconds: u64,
    },

    /// The upstream returned malformed MCP
    #[error("upstream protocol error: {0}")]
    UpstreamProtocol(String),

    /// The effective name does not map in the current session view
    #[error("tool not found: {tool}")]
    ToolNotFound { tool: String },

    /// The mapping exists but the scope or principal filters it out
    #[error("tool not allowed: {tool}")]
    ToolNotAllowed { tool: String },

    /// The requested group or upstream does not exist or is invisible
    #[error("scope not found: {scope}")]
    ScopeNotFound { scope: String },

    /// Stale or unknown session id
    #[error("session not found: {session_id}")]
    SessionNotFound { session_id: String },

    /// Principal lacks permission for the scope
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// Smart search failed because the embedder is down
    #[error("embedder unavailable: {0}")]
    EmbedderUnavailable(String),

    /// Malformed JSON-RPC envelope or parameters
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Unknown MCP method
    #[error("method not found: {0}")]
    MethodNotFound(String),

    /// Anything else
    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl HubError {
    /// JSON-RPC error code; the `kind` in `data` is the stable contract
    pub fn rpc_code(&self) -> i64 {
        match self {
            Self::InvalidRequest(_) => -32600,
            Self::MethodNotFound(_) => -32601,
            Self::ToolNotFound { .. } => -32602,
            Self::Internal(_) => -32603,
            _ => -32000,
        }
    }

    /// Render as a JSON-RPC error response with the caller's request id
    pub fn to_response(&self, id: Value) -> JsonRpcResponse {
        JsonRpcResponse::failure(
            id,
            JsonRpcError {
                code: self.rpc_code(),
                message: self.client_message(),
                data: Some(serde_json::json!({ "kind": self.kind() })),
            },
        )
    }
}

impl HttpError for HubError {
    fn status_code(&self) -> StatusCode {
        match self {
            Self::ToolNotFound { .. }
            | Self::ScopeNotFound { .. }
            | Self::SessionNotFound { .. } => StatusCode::NOT_FOUND,
            Self::ToolNotAllowed { .. } | Self::Unauthorized(_) => StatusCode::FORBIDDEN,
            Self::UpstreamUnavailable { .. } | Self::UpstreamProtocol(_) => StatusCode::BAD_GATEWAY,
            Self::UpstreamTimeout { .. } => StatusCode::GATEWAY_TIMEOUT,
            Self::EmbedderUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            Self::MethodNotFound(_) => StatusCode::NOT_IMPLEMENTED,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn kind(&self) -> &str {
        match self {
            Self::UpstreamUnavailable { .. } => "upstream_unavailable",
            Self::UpstreamTimeout { .. } => "upstream_timeout",
            Self::UpstreamProtocol(_) => "upstream_protocol_error",
            Self::ToolNotFound { .. } => "tool_not_found",
            Self::ToolNotAllowed { .. } => "tool_not_allowed",
            Self::ScopeNotFound { .. } => "scope_not_found",
            Self::SessionNotFound { .. } => "session_not_found",
            Self::Unauthorized(_) => "unauthorized",
            Self::EmbedderUnavailable(_) => "embedder_unavailable",
            Self::InvalidRequest(_) => "invalid_request",
            Self::MethodNotFound(_) => "method_not_found",
            Self::Internal(_) => "internal_error",
        }
    }

    fn client_message(&self) -> String {
        match self {
            Self::Internal(_) => "internal server error".to_string(),
            other => other.to_string(),
        }
    }
}

impl From<manifold_vector::VectorError> for HubError {
    fn from(e: manifold_vector::VectorError) -> Self {
        match e {
            manifold_vector::VectorError::Embedder(message) => Self::EmbedderUnavailable(message),
            manifold_vector::VectorError::Store(message) => {
                Self::Internal(anyhow::anyhow!("vector store: {message}"))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_response_carries_kind_and_id() {
        let err = HubError::ToolNotFound {
            tool: "ping".to_string(),
        };
        let response = err.to_response(serde_json::json!(42));
        assert_eq!(response.id, serde_json::json!(42));
        let error = response.error.unwrap();
        assert_eq!(error.code, -32602);
        assert_eq!(error.data.unwrap()["kind"], "tool_not_found");
    }

    #[test]
    fn internal_details_are_not_exposed() {
        let err = HubError::Internal(anyhow::anyhow!("secret path /etc/shadow"));
        assert_eq!(err.client_message(), "internal server error");
    }
}
