use std::collections::HashMap;
use std::sync::Arc;

use manifold_catalog::EffectiveTool;
use manifold_upstream::UpstreamError;
use serde_json::{json, Map, Value};
use tokio_util::sync::CancellationToken;

use crate::error::HubError;
use crate::protocol::{
    JsonRpcRequest, JsonRpcResponse, WireTool, JSONRPC_VERSION, LATEST_PROTOCOL_VERSION,
    SUPPORTED_PROTOCOL_VERSIONS,
};
use crate::resolve::{resolve, Resolution};
use crate::session::{Session, SessionView};
use crate::{smart, HubState};

/// Separator between upstream name and tool name in namespaced effective
/// names
pub const NAMESPACE_SEPARATOR: &str = "__";

/// Per-request routing context
pub struct RequestCtx<'a> {
    pub scope: &'a crate::scope::Scope,
    pub principal: &'a manifold_core::Principal,
    /// Absent for stateless one-shot requests
    pub session: Option<&'a Arc<Session>>,
}

/// Dispatch one downstream JSON-RPC message
///
/// Returns `None` for notifications and for requests cancelled by session
/// close; the downstream never receives a response for those ids.
pub async fn dispatch(
    state: &HubState,
    ctx: RequestCtx<'_>,
    request: JsonRpcRequest,
) -> Option<JsonRpcResponse> {
    if request.is_notification() {
        // Only the initialized handshake marker is meaningful; everything
        // else is absorbed.
        tracing::debug!(method = %request.method, "downstream notification");
        return None;
    }

    let id = request.id.clone().unwrap_or(Value::Null);

    if request.jsonrpc != JSONRPC_VERSION {
        return Some(
            HubError::InvalidRequest("jsonrpc must be \"2.0\"".to_string()).to_response(id),
        );
    }

    let result = match request.method.as_str() {
        "initialize" => initialize_result(request.params.as_ref()),
        "ping" => Ok(json!({})),
        "tools/list" => tools_list(state, &ctx).await,
        "tools/call" => return tools_call(state, &ctx, id, request.params).await,
        other => Err(HubError::MethodNotFound(other.to_string())),
    };

    Some(match result {
        Ok(value) => JsonRpcResponse::success(id, value),
        Err(e) => e.to_response(id),
    })
}

/// `initialize`: echo a supported protocol version, advertise tools
///
/// Never forwarded to upstreams.
fn initialize_result(params: Option<&Value>) -> Result<Value, HubError> {
    let requested = params
        .and_then(|p| p.get("protocolVersion"))
        .and_then(Value::as_str);

    let protocol_version = match requested {
        Some(version) if SUPPORTED_PROTOCOL_VERSIONS.contains(&version) => version,
        _ => LATEST_PROTOCOL_VERSION,
    };

    Ok(json!({
        "protocolVersion": protocol_version,
        "capabilities": { "tools": { "listChanged": true } },
        "serverInfo": {
            "name": "manifold",
            "version": env!("CARGO_PKG_VERSION"),
        },
    }))
}

async fn tools_list(state: &HubState, ctx: &RequestCtx<'_>) -> Result<Value, HubError> {
    let settings = state.settings.snapshot();
    let resolution = resolve(ctx.scope, ctx.principal, &settings)?;

    if resolution.is_smart {
        let tools = smart::meta_tools();
        if let Some(session) = ctx.session {
            session.set_view(Arc::new(SessionView {
                catalog_version: state.catalog.version(),
                fingerprint: fingerprint_of(&tools),
                names: tools.iter().map(|t| t.name.clone()).collect(),
                map: HashMap::new(),
            }));
        }
        return Ok(json!({ "tools": tools }));
    }

    let (view, tools) = build_view(state, &resolution);
    if let Some(session) = ctx.session {
        session.set_view(view);
    }
    Ok(json!({ "tools": tools }))
}

async fn tools_call(
    state: &HubState,
    ctx: &RequestCtx<'_>,
    id: Value,
    params: Option<Value>,
) -> Option<JsonRpcResponse> {
    let params = match params {
        Some(Value::Object(map)) => map,
        _ => {
            return Some(
                HubError::InvalidRequest("tools/call requires object params".to_string())
                    .to_response(id),
            );
        }
    };
    let Some(name) = params.get("name").and_then(Value::as_str) else {
        return Some(
            HubError::InvalidRequest("tools/call requires a tool name".to_string()).to_response(id),
        );
    };
    let arguments = params.get("arguments").and_then(Value::as_object).cloned();

    let settings = state.settings.snapshot();
    let resolution = match resolve(ctx.scope, ctx.principal, &settings) {
        Ok(resolution) => resolution,
        Err(e) => return Some(e.to_response(id)),
    };

    if resolution.is_smart {
        return smart::smart_call(state, ctx, id, name, arguments, &resolution).await;
    }

    let (upstream, tool) = match lookup_target(state, ctx, &resolution, name) {
        Ok(target) => target,
        Err(e) => return Some(e.to_response(id)),
    };

    let cancel = ctx.session.map(|s| s.cancel.clone());
    match call_upstream(state, cancel, &upstream, &tool, arguments).await {
        Ok(Some(result)) => Some(JsonRpcResponse::success(id, result)),
        Ok(None) => None,
        Err(e) => Some(e.to_response(id)),
    }
}

/// Reverse-map an effective name using the session's pinned view
///
/// The view is rebuilt when the catalog version moved on. A name that
/// exists in the catalog but is blocked by the scope's allowlist comes back
/// as `ToolNotAllowed`; a name with no mapping at all is `ToolNotFound`.
fn lookup_target(
    state: &HubState,
    ctx: &RequestCtx<'_>,
    resolution: &Resolution,
    effective: &str,
) -> Result<(String, String), HubError> {
    let catalog = state.catalog.snapshot();

    let view = ctx
        .session
        .and_then(|s| s.view())
        .filter(|v| v.catalog_version == catalog.version());
    let view = match view {
        Some(view) => view,
        None => {
            let (view, _) = build_view(state, resolution);
            if let Some(session) = ctx.session {
                session.set_view(Arc::clone(&view));
            }
            view
        }
    };

    if let Some((upstream, tool)) = view.map.get(effective) {
        return Ok((upstream.clone(), tool.clone()));
    }

    for route in &resolution.routes {
        if let Some(tool) = catalog.get(&route.upstream, effective) {
            if tool.enabled && !route.filter.allows(effective) {
                return Err(HubError::ToolNotAllowed {
                    tool: effective.to_string(),
                });
            }
        }
    }

    if let Some((upstream, tool)) = effective.split_once(NAMESPACE_SEPARATOR) {
        if let (Some(descriptor), Some(route)) =
            (catalog.get(upstream, tool), resolution.route_for(upstream))
        {
            if descriptor.enabled && !route.filter.allows(tool) {
                return Err(HubError::ToolNotAllowed {
                    tool: effective.to_string(),
                });
            }
        }
    }

    Err(HubError::ToolNotFound {
        tool: effective.to_string(),
    })
}

/// Forward a call to a ready upstream
///
/// Runs under the per-call deadline and the session's cancellation token;
/// `Ok(None)` means the session closed mid-flight and no response must be
/// sent. Transport failures are reported to the supervisor and surface as
/// `UpstreamUnavailable` without a retry.
pub async fn call_upstream(
    state: &HubState,
    cancel: Option<CancellationToken>,
    upstream: &str,
    tool: &str,
    arguments: Option<Map<String, Value>>,
) -> Result<Option<Value>, HubError> {
    let client = state
        .upstreams
        .status(upstream)
        .filter(|s| s.state == manifold_upstream::UpstreamState::Ready)
        .and_then(|s| s.client);
    let Some(client) = client else {
        return Err(HubError::UpstreamUnavailable {
            upstream: upstream.to_string(),
        });
    };

    let deadline = state.settings.snapshot().call_timeout();
    let call = async {
        match deadline {
            Some(limit) => match tokio::time::timeout(limit, client.call_tool(tool, arguments)).await
            {
                Ok(result) => result.map_err(|e| classify_call_error(state, upstream, e)),
                Err(_) => Err(HubError::UpstreamTimeout {
                    upstream: upstream.to_string(),
                    tool: tool.to_string(),
                    seconds: limit.as_secs(),
                }),
            },
            None => client
                .call_tool(tool, arguments)
                .await
                .map_err(|e| classify_call_error(state, upstream, e)),
        }
    };

    match cancel {
        Some(token) => tokio::select! {
            () = token.cancelled() => {
                tracing::debug!(upstream, tool, "call cancelled by session close");
                Ok(None)
            }
            result = call => result.map(Some),
        },
        None => call.await.map(Some),
    }
}

fn classify_call_error(state: &HubState, upstream: &str, error: UpstreamError) -> HubError {
    match error {
        UpstreamError::Transport(message) => {
            state.upstreams.report_failure(upstream, message);
            HubError::UpstreamUnavailable {
                upstream: upstream.to_string(),
            }
        }
        UpstreamError::Protocol(message) | UpstreamError::Document(message) => {
            HubError::UpstreamProtocol(message)
        }
    }
}

/// Compute the filtered, namespaced tool view for a resolution
///
/// Tools of degraded upstreams stay listed unless
/// `hide_degraded_upstreams_from_list` is set.
pub fn build_view(state: &HubState, resolution: &Resolution) -> (Arc<SessionView>, Vec<WireTool>) {
    let settings = state.settings.snapshot();
    let catalog = state.catalog.snapshot();
    let hide_degraded = settings.hide_degraded_upstreams_from_list;

    let mut filtered: Vec<&EffectiveTool> = Vec::new();
    for route in &resolution.routes {
        if hide_degraded && !state.upstream_ready(&route.upstream) {
            continue;
        }
        for tool in catalog.by_upstream(&route.upstream) {
            if tool.enabled && route.filter.allows(&tool.name) {
                filtered.push(tool);
            }
        }
    }

    let named = assign_effective_names(&filtered);

    let mut names = Vec::with_capacity(named.len());
    let mut map = HashMap::with_capacity(named.len());
    let mut wire = Vec::with_capacity(named.len());
    for (effective, tool) in named {
        names.push(effective.clone());
        map.insert(
            effective.clone(),
            (tool.upstream.clone(), tool.name.clone()),
        );
        wire.push(WireTool {
            name: effective,
            description: tool.description.clone(),
            input_schema: tool.input_schema.clone(),
        });
    }

    (
        Arc::new(SessionView {
            catalog_version: catalog.version(),
            fingerprint: fingerprint_of(&wire),
            names,
            map,
        }),
        wire,
    )
}

/// Hash the rendered list so unchanged views stay silent
fn fingerprint_of(tools: &[WireTool]) -> u64 {
    use std::hash::{Hash, Hasher};

    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    for tool in tools {
        tool.name.hash(&mut hasher);
        tool.description.hash(&mut hasher);
        tool.input_schema.to_string().hash(&mut hasher);
    }
    hasher.finish()
}

/// Recompute the view a scope and principal would see right now
///
/// Used to seed fresh sessions and by the change notifier. Returns `None`
/// when the principal lost access to the scope.
pub fn compute_view(
    state: &HubState,
    scope: &crate::scope::Scope,
    principal: &manifold_core::Principal,
) -> Option<Arc<SessionView>> {
    let settings = state.settings.snapshot();
    let resolution = resolve(scope, principal, &settings).ok()?;

    if resolution.is_smart {
        let tools = smart::meta_tools();
        return Some(Arc::new(SessionView {
            catalog_version: state.catalog.version(),
            fingerprint: fingerprint_of(&tools),
            names: tools.iter().map(|t| t.name.clone()).collect(),
            map: HashMap::new(),
        }));
    }

    Some(build_view(state, &resolution).0)
}

/// Assign effective names, prefixing only colliding tool names
///
/// Stable under permutations of the input: a unique tool name never
/// changes, and every occurrence of a duplicated name gets the
/// `upstream__tool` prefix. Output is sorted by effective name.
pub fn assign_effective_names<'a>(
    tools: &[&'a EffectiveTool],
) -> Vec<(String, &'a EffectiveTool)> {
    let mut counts: HashMap<&str, usize> = HashMap::new();
    for tool in tools {
        *counts.entry(tool.name.as_str()).or_default() += 1;
    }

    let mut named: Vec<(String, &EffectiveTool)> = tools
        .iter()
        .map(|tool| {
            let effective = if counts[tool.name.as_str()] > 1 {
                format!("{}{NAMESPACE_SEPARATOR}{}", tool.upstream, tool.name)
            } else {
                tool.name.clone()
            };
            (effective, *tool)
        })
        .collect();

    named.sort_by(|a, b| a.0.cmp(&b.0));
    named
}
