use std::collections::HashMap;

use async_trait::async_trait;
use manifold_config::{ApiKeyLocation, HeaderInsert, OpenApiSecurity, OpenApiTransport};
use secrecy::ExposeSecret;
use serde::Deserialize;
use serde_json::{json, Map, Value};

use crate::client::{ServerIdentity, ToolDef, UpstreamClient};
use crate::error::UpstreamError;

/// Upstream synthesized from an OpenAPI description
///
/// One MCP tool per document operation. Calls are translated back into HTTP
/// requests; HTTP-level failures come back as MCP tool errors
/// (`isError: true`), never as transport errors, so a misbehaving API does
/// not degrade the runtime.
pub struct OpenApiClient {
    upstream: String,
    identity: ServerIdentity,
    base_url: String,
    operations: HashMap<String, Operation>,
    security: Option<OpenApiSecurity>,
    extra_headers: Vec<HeaderInsert>,
    http: reqwest::Client,
}

impl OpenApiClient {
    /// Fetch the document and synthesize the tool set
    pub async fn connect(name: &str, config: &OpenApiTransport) -> Result<Self, UpstreamError> {
        let http = reqwest::Client::new();

        let response = http
            .get(config.spec_url.as_str())
            .send()
            .await
            .map_err(|e| UpstreamError::Document(format!("failed to fetch OpenAPI document: {e}")))?;

        if !response.status().is_success() {
            return Err(UpstreamError::Document(format!(
                "OpenAPI document fetch returned {}",
                response.status()
            )));
        }

        let document: Document = response
            .json()
            .await
            .map_err(|e| UpstreamError::Document(format!("invalid OpenAPI document: {e}")))?;

        Self::from_document(name, config, document)
    }

    fn from_document(
        name: &str,
        config: &OpenApiTransport,
        document: Document,
    ) -> Result<Self, UpstreamError> {
        let base_url = config
            .base_url
            .as_ref()
            .map(|u| u.as_str().trim_end_matches('/').to_string())
            .or_else(|| {
                document
                    .servers
                    .first()
                    .map(|s| s.url.trim_end_matches('/').to_string())
            })
            .ok_or_else(|| {
                UpstreamError::Document(
                    "document declares no servers and no base_url is configured".to_string(),
                )
            })?;

        let operations = synthesize(&document);
        if operations.is_empty() {
            tracing::warn!(upstream = name, "OpenAPI document yields no operations");
        }

        let identity = ServerIdentity {
            name: document.info.title,
            version: document.info.version,
            protocol_version: String::new(),
            capabilities: json!({ "tools": {} }),
        };

        Ok(Self {
            upstream: name.to_string(),
            identity,
            base_url,
            operations,
            security: config.security.clone(),
            extra_headers: config.headers.clone(),
            http: reqwest::Client::new(),
        })
    }
}

#[async_trait]
impl UpstreamClient for OpenApiClient {
    fn identity(&self) -> &ServerIdentity {
        &self.identity
    }

    async fn list_tools(&self) -> Result<Vec<ToolDef>, UpstreamError> {
        let mut tools: Vec<ToolDef> = self.operations.values().map(|op| op.tool.clone()).collect();
        tools.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(tools)
    }

    async fn call_tool(
        &self,
        name: &str,
        arguments: Option<Map<String, Value>>,
    ) -> Result<Value, UpstreamError> {
        let Some(op) = self.operations.get(name) else {
            return Ok(tool_error(format!(
                "unknown operation '{name}' on '{}'",
                self.upstream
            )));
        };

        let args = arguments.unwrap_or_default();
        let parts = match op.request_parts(&args) {
            Ok(parts) => parts,
            Err(message) => return Ok(tool_error(message)),
        };

        let method = reqwest::Method::from_bytes(op.method.as_bytes())
            .map_err(|e| UpstreamError::Protocol(format!("bad method '{}': {e}", op.method)))?;

        let url = format!("{}{}", self.base_url, parts.path);
        let mut request = self.http.request(method, &url).query(&parts.query);

        for header in &self.extra_headers {
            request = request.header(&header.name, &header.value);
        }
        for (name, value) in &parts.headers {
            request = request.header(name, value);
        }

        request = match &self.security {
            Some(OpenApiSecurity::ApiKey {
                name,
                location: ApiKeyLocation::Header,
                value,
            }) => request.header(name, value.expose_secret()),
            Some(OpenApiSecurity::ApiKey {
                name,
                location: ApiKeyLocation::Query,
                value,
            }) => request.query(&[(name.as_str(), value.expose_secret())]),
            Some(OpenApiSecurity::Bearer { token }) => {
                request.header("Authorization", format!("Bearer {}", token.expose_secret()))
            }
            None => request,
        };

        if let Some(body) = parts.body {
            request = request.json(&body);
        }

        let response = match request.send().await {
            Ok(response) => response,
            Err(e) => return Ok(tool_error(format!("request to '{url}' failed: {e}"))),
        };

        let status = response.status();
        let media_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("application/octet-stream")
            .split(';')
            .next()
            .unwrap_or_default()
            .to_string();

        if is_textual(&media_type) {
            let text = response.text().await.unwrap_or_default();
            if status.is_success() {
                Ok(json!({ "content": [{ "type": "text", "text": text }] }))
            } else {
                Ok(tool_error(format!("HTTP {status}: {text}")))
            }
        } else {
            use base64::Engine as _;
            let bytes = response.bytes().await.unwrap_or_default();
            if status.is_success() {
                Ok(json!({
                    "content": [{
                        "type": "resource",
                        "resource": {
                            "uri": url,
                            "mimeType": media_type,
                            "blob": base64::engine::general_purpose::STANDARD.encode(&bytes),
                        }
                    }]
                }))
            } else {
                Ok(tool_error(format!("HTTP {status} ({media_type} response)")))
            }
        }
    }

    async fn ping(&self) -> Result<(), UpstreamError> {
        // No persistent channel to probe; requests reconnect on their own.
        Ok(())
    }

    async fn close(&self) -> Result<(), UpstreamError> {
        Ok(())
    }
}

/// An MCP tool error result
fn tool_error(message: String) -> Value {
    json!({ "content": [{ "type": "text", "text": message }], "isError": true })
}

fn is_textual(media_type: &str) -> bool {
    media_type.starts_with("text/")
        || media_type == "application/json"
        || media_type.ends_with("+json")
        || media_type == "application/xml"
        || media_type.ends_with("+xml")
}

// -- Document model (the subset the synthesis needs) --

#[derive(Debug, Deserialize)]
struct Document {
    info: Info,
    #[serde(default)]
    servers: Vec<Server>,
    #[serde(default)]
    paths: HashMap<String, PathItem>,
}

#[derive(Debug, Deserialize)]
struct Info {
    title: String,
    version: String,
}

#[derive(Debug, Deserialize)]
struct Server {
    url: String,
}

#[derive(Debug, Default, Deserialize)]
struct PathItem {
    #[serde(default)]
    get: Option<RawOperation>,
    #[serde(default)]
    put: Option<RawOperation>,
    #[serde(default)]
    post: Option<RawOperation>,
    #[serde(default)]
    delete: Option<RawOperation>,
    #[serde(default)]
    patch: Option<RawOperation>,
    #[serde(default)]
    parameters: Vec<RawParameter>,
}

#[derive(Debug, Deserialize)]
struct RawOperation {
    #[serde(rename = "operationId")]
    operation_id: Option<String>,
    summary: Option<String>,
    description: Option<String>,
    #[serde(default)]
    parameters: Vec<RawParameter>,
    #[serde(rename = "requestBody")]
    request_body: Option<RawRequestBody>,
}

#[derive(Debug, Clone, Deserialize)]
struct RawParameter {
    name: String,
    #[serde(rename = "in")]
    location: String,
    #[serde(default)]
    required: bool,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    schema: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct RawRequestBody {
    #[serde(default)]
    required: bool,
    #[serde(default)]
    content: HashMap<String, RawMediaType>,
}

#[derive(Debug, Deserialize)]
struct RawMediaType {
    #[serde(default)]
    schema: Option<Value>,
}

// -- Synthesis --

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ParamLocation {
    Path,
    Query,
    Header,
}

#[derive(Debug, Clone)]
struct ParamSpec {
    name: String,
    location: ParamLocation,
    required: bool,
}

#[derive(Debug)]
struct Operation {
    tool: ToolDef,
    method: String,
    path_template: String,
    params: Vec<ParamSpec>,
    /// Body argument names merged into the input schema (empty when the
    /// body rides under a single `body` property)
    body_properties: Vec<String>,
    has_body: bool,
}

#[derive(Debug, Default)]
struct RequestParts {
    path: String,
    query: Vec<(String, String)>,
    headers: Vec<(String, String)>,
    body: Option<Value>,
}

impl Operation {
    /// Split tool arguments into path/query/header parameters and the body
    fn request_parts(&self, args: &Map<String, Value>) -> Result<RequestParts, String> {
        let mut parts = RequestParts {
            path: self.path_template.clone(),
            ..RequestParts::default()
        };

        for param in &self.params {
            let value = args.get(&param.name);
            let Some(value) = value else {
                if param.required {
                    return Err(format!("missing required parameter '{}'", param.name));
                }
                continue;
            };
            let rendered = render(value);
            match param.location {
                ParamLocation::Path => {
                    parts.path = parts.path.replace(&format!("{{{}}}", param.name), &rendered);
                }
                ParamLocation::Query => parts.query.push((param.name.clone(), rendered)),
                ParamLocation::Header => parts.headers.push((param.name.clone(), rendered)),
            }
        }

        if self.has_body {
            if let Some(body) = args.get("body") {
                parts.body = Some(body.clone());
            } else {
                let mut body = Map::new();
                for name in &self.body_properties {
                    if let Some(value) = args.get(name) {
                        body.insert(name.clone(), value.clone());
                    }
                }
                if !body.is_empty() {
                    parts.body = Some(Value::Object(body));
                }
            }
        }

        Ok(parts)
    }
}

fn render(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Synthesize one tool per operation in the document
fn synthesize(document: &Document) -> HashMap<String, Operation> {
    let mut operations = HashMap::new();

    let mut paths: Vec<(&String, &PathItem)> = document.paths.iter().collect();
    paths.sort_by_key(|(path, _)| path.as_str());

    for (path, item) in paths {
        let methods = [
            ("get", &item.get),
            ("put", &item.put),
            ("post", &item.post),
            ("delete", &item.delete),
            ("patch", &item.patch),
        ];

        for (method, raw) in methods {
            let Some(raw) = raw else { continue };
            let op = build_operation(method, path, raw, &item.parameters);
            operations.insert(op.tool.name.clone(), op);
        }
    }

    operations
}

fn build_operation(
    method: &str,
    path: &str,
    raw: &RawOperation,
    shared_params: &[RawParameter],
) -> Operation {
    let name = raw
        .operation_id
        .clone()
        .unwrap_or_else(|| default_operation_name(method, path));

    let description = raw
        .summary
        .clone()
        .or_else(|| raw.description.clone())
        .unwrap_or_else(|| format!("{} {path}", method.to_uppercase()));

    let mut properties = Map::new();
    let mut required: Vec<String> = Vec::new();
    let mut params = Vec::new();

    for raw_param in shared_params.iter().chain(&raw.parameters) {
        let location = match raw_param.location.as_str() {
            "path" => ParamLocation::Path,
            "query" => ParamLocation::Query,
            "header" => ParamLocation::Header,
            _ => continue,
        };

        let mut schema = raw_param
            .schema
            .clone()
            .unwrap_or_else(|| json!({ "type": "string" }));
        if let (Some(desc), Some(obj)) = (&raw_param.description, schema.as_object_mut()) {
            obj.entry("description").or_insert_with(|| json!(desc));
        }
        properties.insert(raw_param.name.clone(), schema);

        // Path parameters are always required on the wire.
        let is_required = raw_param.required || location == ParamLocation::Path;
        if is_required {
            required.push(raw_param.name.clone());
        }
        params.push(ParamSpec {
            name: raw_param.name.clone(),
            location,
            required: is_required,
        });
    }

    let mut body_properties = Vec::new();
    let mut has_body = false;

    if let Some(body) = &raw.request_body {
        let schema = body
            .content
            .get("application/json")
            .or_else(|| body.content.values().next())
            .and_then(|m| m.schema.clone());

        if let Some(schema) = schema {
            has_body = true;
            let object_props = schema
                .get("properties")
                .and_then(Value::as_object)
                .cloned();
            match object_props {
                // Flatten object bodies into top-level tool arguments.
                Some(props) => {
                    let body_required: Vec<String> = schema
                        .get("required")
                        .and_then(Value::as_array)
                        .map(|r| {
                            r.iter()
                                .filter_map(Value::as_str)
                                .map(ToString::to_string)
                                .collect()
                        })
                        .unwrap_or_default();

                    for (prop_name, prop_schema) in props {
                        body_properties.push(prop_name.clone());
                        properties.insert(prop_name.clone(), prop_schema);
                        if body.required && body_required.contains(&prop_name) {
                            required.push(prop_name);
                        }
                    }
                }
                // Non-object bodies ride under a single `body` argument.
                None => {
                    properties.insert("body".to_string(), schema);
                    if body.required {
                        required.push("body".to_string());
                    }
                }
            }
        }
    }

    let mut input_schema = Map::new();
    input_schema.insert("type".to_string(), json!("object"));
    input_schema.insert("properties".to_string(), Value::Object(properties));
    if !required.is_empty() {
        required.sort();
        required.dedup();
        input_schema.insert("required".to_string(), json!(required));
    }

    Operation {
        tool: ToolDef {
            name,
            description: Some(description),
            input_schema: Value::Object(input_schema),
        },
        method: method.to_uppercase(),
        path_template: path.to_string(),
        params,
        body_properties,
        has_body,
    }
}

/// Fallback tool name when an operation has no operationId
fn default_operation_name(method: &str, path: &str) -> String {
    let sanitized: String = path
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect();
    format!("{method}_{}", sanitized.trim_matches('_'))
}
