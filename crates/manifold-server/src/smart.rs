use serde_json::{json, Map, Value};

use crate::error::HubError;
use crate::protocol::{JsonRpcResponse, WireTool};
use crate::resolve::Resolution;
use crate::router::{call_upstream, RequestCtx};
use crate::HubState;

/// Synthetic tool: similarity search over the catalog
pub const SEARCH_TOOLS: &str = "search_tools";
/// Synthetic tool: invoke a discovered tool by key
pub const CALL_TOOL: &str = "call_tool";

const DEFAULT_K: u64 = 10;
const DEFAULT_THRESHOLD: f64 = 0.7;

/// The two tools every smart-scope session sees
pub fn meta_tools() -> Vec<WireTool> {
    vec![
        WireTool {
            name: CALL_TOOL.to_string(),
            description: "Invoke a tool previously discovered with search_tools.".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "upstreamName": { "type": "string", "description": "Server the tool lives on" },
                    "toolName": { "type": "string", "description": "Tool name on that server" },
                    "arguments": { "type": "object", "description": "Arguments for the tool" }
                },
                "required": ["upstreamName", "toolName"]
            }),
        },
        WireTool {
            name: SEARCH_TOOLS.to_string(),
            description: "Find tools matching a natural-language task description.".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "query": { "type": "string", "description": "What you want to do" },
                    "k": { "type": "integer", "description": "Maximum results", "default": DEFAULT_K },
                    "threshold": {
                        "type": "number",
                        "description": "Minimum similarity in [0, 1]",
                        "default": DEFAULT_THRESHOLD
                    }
                },
                "required": ["query"]
            }),
        },
    ]
}

/// Dispatch a `tools/call` in the smart scope
///
/// Only the two synthetic names are legal.
pub async fn smart_call(
    state: &HubState,
    ctx: &RequestCtx<'_>,
    id: Value,
    name: &str,
    arguments: Option<Map<String, Value>>,
    resolution: &Resolution,
) -> Option<JsonRpcResponse> {
    match name {
        SEARCH_TOOLS => Some(
            match search_tools(state, resolution, arguments.unwrap_or_default()).await {
                Ok(result) => JsonRpcResponse::success(id, result),
                Err(e) => e.to_response(id),
            },
        ),
        CALL_TOOL => forward_call(state, ctx, id, arguments.unwrap_or_default(), resolution).await,
        other => Some(
            HubError::ToolNotFound {
                tool: other.to_string(),
            }
            .to_response(id),
        ),
    }
}

async fn search_tools(
    state: &HubState,
    resolution: &Resolution,
    arguments: Map<String, Value>,
) -> Result<Value, HubError> {
    let Some(query) = arguments.get("query").and_then(Value::as_str) else {
        return Err(HubError::InvalidRequest(
            "search_tools requires a query".to_string(),
        ));
    };
    let k = match arguments.get("k") {
        None => DEFAULT_K,
        Some(value) => value.as_u64().filter(|k| *k >= 1).ok_or_else(|| {
            HubError::InvalidRequest("k must be a positive integer".to_string())
        })?,
    };
    let threshold = match arguments.get("threshold") {
        None => DEFAULT_THRESHOLD,
        Some(value) => value
            .as_f64()
            .filter(|t| (0.0..=1.0).contains(t))
            .ok_or_else(|| {
                HubError::InvalidRequest("threshold must be a number in [0, 1]".to_string())
            })?,
    };

    let Some(index) = &state.vector else {
        return Err(HubError::EmbedderUnavailable(
            "smart routing is not configured".to_string(),
        ));
    };

    let catalog = state.catalog.snapshot();
    let hits = index
        .search(query, k as usize, threshold, &catalog)
        .await?;

    // Visibility filter applied post-hoc: only upstreams the resolver
    // handed back for this principal.
    let matches: Vec<Value> = hits
        .into_iter()
        .filter(|hit| resolution.allows(&hit.key.upstream, &hit.key.tool))
        .map(|hit| {
            let description = catalog
                .get(&hit.key.upstream, &hit.key.tool)
                .map(|t| t.description.clone())
                .unwrap_or_default();
            json!({
                "upstreamName": hit.key.upstream,
                "toolName": hit.key.tool,
                "description": description,
                "confidence": hit.similarity,
            })
        })
        .collect();

    tracing::debug!(query, results = matches.len(), "smart search complete");

    let text = serde_json::to_string_pretty(&matches)
        .map_err(|e| HubError::Internal(anyhow::anyhow!("unserializable search result: {e}")))?;

    Ok(json!({
        "content": [{ "type": "text", "text": text }],
        "structuredContent": { "matches": matches },
    }))
}

async fn forward_call(
    state: &HubState,
    ctx: &RequestCtx<'_>,
    id: Value,
    arguments: Map<String, Value>,
    resolution: &Resolution,
) -> Option<JsonRpcResponse> {
    let upstream = arguments.get("upstreamName").and_then(Value::as_str);
    let tool = arguments.get("toolName").and_then(Value::as_str);
    let (Some(upstream), Some(tool)) = (upstream, tool) else {
        return Some(
            HubError::InvalidRequest("call_tool requires upstreamName and toolName".to_string())
                .to_response(id),
        );
    };
    let tool_arguments = arguments
        .get("arguments")
        .and_then(Value::as_object)
        .cloned();

    // The target must exist in the catalog and be visible to the principal.
    let catalog = state.catalog.snapshot();
    if !catalog.contains_enabled(upstream, tool) || !resolution.allows(upstream, tool) {
        return Some(
            HubError::ToolNotAllowed {
                tool: format!("{upstream}/{tool}"),
            }
            .to_response(id),
        );
    }

    let cancel = ctx.session.map(|s| s.cancel.clone());
    match call_upstream(state, cancel, upstream, tool, tool_arguments).await {
        Ok(Some(result)) => Some(JsonRpcResponse::success(id, result)),
        Ok(None) => None,
        Err(e) => Some(e.to_response(id)),
    }
}
