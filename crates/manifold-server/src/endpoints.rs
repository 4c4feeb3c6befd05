use std::collections::HashMap;
use std::convert::Infallible;
use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use manifold_core::HttpError as _;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::mpsc;

use crate::auth::principal_from;
use crate::error::HubError;
use crate::protocol::{JsonRpcRequest, JsonRpcResponse, SESSION_ID_HEADER};
use crate::resolve::{resolve, Resolution};
use crate::router::{compute_view, dispatch, RequestCtx};
use crate::scope::Scope;
use crate::session::{Session, SessionChannel, SessionManager, SseFrame};
use crate::HubState;

/// Downstream routes, state applied by the hub assembly
pub fn routes() -> Router<Arc<HubState>> {
    Router::new()
        .route("/sse", get(sse_open))
        .route("/sse/{scope}", get(sse_open))
        .route("/messages", axum::routing::post(messages_post))
        .route("/mcp", axum::routing::post(mcp_post).get(mcp_get).delete(mcp_delete))
        .route(
            "/mcp/{scope}",
            axum::routing::post(mcp_post).get(mcp_get).delete(mcp_delete),
        )
        .route("/{principal}/sse", get(sse_open))
        .route("/{principal}/sse/{scope}", get(sse_open))
        .route(
            "/{principal}/mcp",
            axum::routing::post(mcp_post).get(mcp_get).delete(mcp_delete),
        )
        .route(
            "/{principal}/mcp/{scope}",
            axum::routing::post(mcp_post).get(mcp_get).delete(mcp_delete),
        )
}

/// Health endpoint: per-upstream state plus catalog version
pub async fn health_handler(State(state): State<Arc<HubState>>) -> Json<Value> {
    let upstreams: Vec<Value> = state
        .upstreams
        .statuses()
        .into_iter()
        .map(|(name, status)| {
            json!({
                "name": name,
                "state": status.state.as_str(),
                "tools": status.tool_count,
                "error": status.last_error,
            })
        })
        .collect();

    Json(json!({
        "status": "ok",
        "catalog_version": state.catalog.version(),
        "sessions": state.sessions.len(),
        "upstreams": upstreams,
    }))
}

/// Session creation is refused when the scope resolves to nothing
///
/// Global is the exception: an empty hub still accepts sessions there.
fn creation_rejected(scope: &Scope, resolution: &Resolution) -> bool {
    resolution.is_empty() && !resolution.is_smart && *scope != Scope::Global
}

/// Plain HTTP error body for non-JSON-RPC surfaces
fn http_error(error: &HubError) -> Response {
    let body = json!({
        "error": {
            "kind": error.kind(),
            "message": error.client_message(),
        }
    });
    (error.status_code(), Json(body)).into_response()
}

/// JSON-RPC error body with the matching HTTP status
fn rpc_error(error: &HubError, id: Value) -> Response {
    (error.status_code(), Json(error.to_response(id))).into_response()
}

/// Drops the session when an SSE stream goes away
struct SessionGuard {
    manager: Arc<SessionManager>,
    id: String,
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        self.manager.remove(&self.id);
    }
}

/// `GET /sse[/{scope}]`: open an SSE session
///
/// The first event is `endpoint`, carrying the paired message-post URL with
/// the allocated session id.
async fn sse_open(
    State(state): State<Arc<HubState>>,
    Path(params): Path<HashMap<String, String>>,
    headers: HeaderMap,
) -> Response {
    let settings = state.settings.snapshot();
    let principal = principal_from(&headers, params.get("principal").map(String::as_str), &settings);
    let scope = Scope::parse(params.get("scope").map(String::as_str), &settings);

    let resolution = match resolve(&scope, &principal, &settings) {
        Ok(resolution) => resolution,
        Err(e) => return http_error(&e),
    };
    if creation_rejected(&scope, &resolution) {
        return http_error(&HubError::ScopeNotFound {
            scope: scope.to_string(),
        });
    }

    let (tx, mut rx) = mpsc::channel::<SseFrame>(64);
    let session = state
        .sessions
        .create(scope, principal, SessionChannel::Sse { tx });
    if let Some(view) = compute_view(&state, &session.scope, &session.principal) {
        session.set_view(view);
    }

    let endpoint = format!("{}/messages?sessionId={}", state.base_path, session.id);
    let cancel = session.cancel.clone();
    let guard = SessionGuard {
        manager: Arc::clone(&state.sessions),
        id: session.id.clone(),
    };

    let stream = async_stream::stream! {
        let _guard = guard;
        yield Ok::<Event, Infallible>(Event::default().event("endpoint").data(endpoint));

        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                frame = rx.recv() => match frame {
                    None => break,
                    Some(SseFrame::Endpoint(url)) => {
                        yield Ok(Event::default().event("endpoint").data(url));
                    }
                    Some(SseFrame::Message(value)) => {
                        if let Ok(payload) = serde_json::to_string(&value) {
                            yield Ok(Event::default().event("message").data(payload));
                        }
                    }
                }
            }
        }
    };

    Sse::new(stream).keep_alive(KeepAlive::default()).into_response()
}

#[derive(Debug, Deserialize)]
struct MessagesQuery {
    #[serde(rename = "sessionId")]
    session_id: String,
}

/// `POST /messages?sessionId=…`: client→server message for an SSE session
///
/// The response travels back on the event stream; requests within one
/// session run on independent tasks.
async fn messages_post(
    State(state): State<Arc<HubState>>,
    Query(query): Query<MessagesQuery>,
    Json(payload): Json<Value>,
) -> Response {
    let Some(session) = state.sessions.get(&query.session_id) else {
        return http_error(&HubError::SessionNotFound {
            session_id: query.session_id,
        });
    };
    session.touch();

    let request: JsonRpcRequest = match serde_json::from_value(payload) {
        Ok(request) => request,
        Err(e) => return http_error(&HubError::InvalidRequest(e.to_string())),
    };

    let state = Arc::clone(&state);
    tokio::spawn(async move {
        let ctx = RequestCtx {
            scope: &session.scope,
            principal: &session.principal,
            session: Some(&session),
        };
        if let Some(response) = dispatch(&state, ctx, request).await {
            if let Ok(value) = serde_json::to_value(&response) {
                let _ = session.send_sse(SseFrame::Message(value)).await;
            }
        }
    });

    StatusCode::ACCEPTED.into_response()
}

/// `POST /mcp[/{scope}]`: streamable-HTTP MCP request
///
/// `initialize` without a session header creates a session and returns its
/// id in the response header; other headerless requests run stateless.
async fn mcp_post(
    State(state): State<Arc<HubState>>,
    Path(params): Path<HashMap<String, String>>,
    headers: HeaderMap,
    Json(payload): Json<Value>,
) -> Response {
    let settings = state.settings.snapshot();

    let request: JsonRpcRequest = match serde_json::from_value(payload) {
        Ok(request) => request,
        Err(e) => return http_error(&HubError::InvalidRequest(e.to_string())),
    };
    let id = request.id.clone().unwrap_or(Value::Null);

    if let Some(session_id) = header_session_id(&headers) {
        let Some(session) = state.sessions.get(&session_id) else {
            return rpc_error(&HubError::SessionNotFound { session_id }, id);
        };
        session.touch();

        let ctx = RequestCtx {
            scope: &session.scope,
            principal: &session.principal,
            session: Some(&session),
        };
        let response = dispatch(&state, ctx, request).await;
        return stream_or_json(&session, response);
    }

    let principal = principal_from(&headers, params.get("principal").map(String::as_str), &settings);
    let scope = Scope::parse(params.get("scope").map(String::as_str), &settings);

    if request.method == "initialize" && !request.is_notification() {
        let resolution = match resolve(&scope, &principal, &settings) {
            Ok(resolution) => resolution,
            Err(e) => return rpc_error(&e, id),
        };
        if creation_rejected(&scope, &resolution) {
            return rpc_error(
                &HubError::ScopeNotFound {
                    scope: scope.to_string(),
                },
                id,
            );
        }

        let session = state.sessions.create(
            scope,
            principal,
            SessionChannel::HttpStream {
                pending: std::sync::Mutex::new(std::collections::VecDeque::new()),
            },
        );
        if let Some(view) = compute_view(&state, &session.scope, &session.principal) {
            session.set_view(view);
        }

        let ctx = RequestCtx {
            scope: &session.scope,
            principal: &session.principal,
            session: Some(&session),
        };
        let mut response = match dispatch(&state, ctx, request).await {
            Some(response) => Json(response).into_response(),
            None => StatusCode::ACCEPTED.into_response(),
        };
        if let Ok(value) = HeaderValue::from_str(&session.id) {
            response.headers_mut().insert(SESSION_ID_HEADER, value);
        }
        return response;
    }

    // Stateless one-shot
    let ctx = RequestCtx {
        scope: &scope,
        principal: &principal,
        session: None,
    };
    match dispatch(&state, ctx, request).await {
        Some(response) => Json(response).into_response(),
        None => StatusCode::ACCEPTED.into_response(),
    }
}

/// `GET /mcp[/{scope}]`: server info for the scope
async fn mcp_get(
    State(state): State<Arc<HubState>>,
    Path(params): Path<HashMap<String, String>>,
    headers: HeaderMap,
) -> Response {
    let settings = state.settings.snapshot();
    let principal = principal_from(&headers, params.get("principal").map(String::as_str), &settings);
    let scope = Scope::parse(params.get("scope").map(String::as_str), &settings);

    let resolution = match resolve(&scope, &principal, &settings) {
        Ok(resolution) => resolution,
        Err(e) => return http_error(&e),
    };

    Json(json!({
        "name": "manifold",
        "version": env!("CARGO_PKG_VERSION"),
        "scope": { "kind": scope.kind(), "id": scope.to_string() },
        "upstreams": resolution.routes.len(),
        "smart": resolution.is_smart,
    }))
    .into_response()
}

/// `DELETE /mcp[/{scope}]`: close a streamable-HTTP session
async fn mcp_delete(
    State(state): State<Arc<HubState>>,
    Path(_params): Path<HashMap<String, String>>,
    headers: HeaderMap,
) -> Response {
    let Some(session_id) = header_session_id(&headers) else {
        return http_error(&HubError::InvalidRequest(format!(
            "missing {SESSION_ID_HEADER} header"
        )));
    };

    match state.sessions.remove(&session_id) {
        Some(_) => StatusCode::NO_CONTENT.into_response(),
        None => http_error(&HubError::SessionNotFound { session_id }),
    }
}

fn header_session_id(headers: &HeaderMap) -> Option<String> {
    headers
        .get(SESSION_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(ToString::to_string)
}

/// Respond to a stateful POST, piggybacking queued notifications
///
/// With nothing queued the response is plain JSON; otherwise the body is
/// SSE-framed in streamable-HTTP fashion, notifications first.
fn stream_or_json(session: &Session, response: Option<JsonRpcResponse>) -> Response {
    let pending = session.drain_pending();
    if pending.is_empty() {
        return match response {
            Some(response) => Json(response).into_response(),
            None => StatusCode::ACCEPTED.into_response(),
        };
    }

    let mut body = String::new();
    for message in pending {
        push_event(&mut body, &message);
    }
    if let Some(response) = response {
        if let Ok(value) = serde_json::to_value(&response) {
            push_event(&mut body, &value);
        }
    }

    (
        [(axum::http::header::CONTENT_TYPE, "text/event-stream")],
        body,
    )
        .into_response()
}

fn push_event(body: &mut String, message: &Value) {
    body.push_str("event: message\ndata: ");
    body.push_str(&message.to_string());
    body.push_str("\n\n");
}
