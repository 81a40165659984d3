//! MCP (Model Context Protocol) JSON-RPC endpoint.
//!
//! `POST /mcp` serves a configurable set of tools, resources, and prompts
//! over JSON-RPC 2.0. Tool calls are answered by matching the
//! JSON-serialized arguments against configured regex patterns, falling
//! back to Markov text. The sibling [`control`] module exposes the admin
//! mutators as MCP tools; [`stdio`] runs that dispatcher over
//! newline-delimited JSON-RPC.

pub mod control;
pub mod stdio;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use parking_lot::RwLock;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::error::MockError;
use crate::markov::MarkovResponder;
use crate::server::AppState;

// ============== JSON-RPC 2.0 ==============

/// Standard JSON-RPC 2.0 error codes.
pub const PARSE_ERROR: i64 = -32700;
pub const INVALID_REQUEST: i64 = -32600;
pub const METHOD_NOT_FOUND: i64 = -32601;
pub const INVALID_PARAMS: i64 = -32602;

/// A JSON-RPC 2.0 request message.
#[derive(Debug, Clone, Deserialize)]
pub struct JsonRpcRequest {
    #[serde(default)]
    pub jsonrpc: String,
    #[serde(default)]
    pub id: Option<Value>,
    #[serde(default)]
    pub method: String,
    #[serde(default)]
    pub params: Option<Value>,
}

/// A JSON-RPC 2.0 response message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    pub jsonrpc: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcError {
    pub code: i64,
    pub message: String,
}

pub fn rpc_result(id: Option<Value>, result: Value) -> JsonRpcResponse {
    JsonRpcResponse {
        jsonrpc: "2.0".to_string(),
        id,
        result: Some(result),
        error: None,
    }
}

pub fn rpc_error(id: Option<Value>, code: i64, message: impl Into<String>) -> JsonRpcResponse {
    JsonRpcResponse {
        jsonrpc: "2.0".to_string(),
        id,
        result: None,
        error: Some(JsonRpcError {
            code,
            message: message.into(),
        }),
    }
}

/// Decode a JSON-RPC request body and run it through a dispatcher,
/// producing the standard parse and version errors. Shared by the HTTP
/// endpoints and the stdio transport.
pub fn handle_jsonrpc_bytes<F>(body: &[u8], dispatch: F) -> JsonRpcResponse
where
    F: FnOnce(JsonRpcRequest) -> JsonRpcResponse,
{
    let req: JsonRpcRequest = match serde_json::from_slice(body) {
        Ok(req) => req,
        Err(e) => return rpc_error(None, PARSE_ERROR, format!("Parse error: {e}")),
    };
    if req.jsonrpc != "2.0" {
        return rpc_error(
            req.id,
            INVALID_REQUEST,
            "Invalid Request: jsonrpc must be \"2.0\"",
        );
    }
    dispatch(req)
}

// ============== MCP configuration ==============

/// A tool advertised by the MCP server.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct McpToolConfig {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_schema: Option<Map<String, Value>>,
    #[serde(default)]
    pub responses: Vec<McpToolResponse>,
}

/// A pattern-matched response for an MCP tool call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct McpToolResponse {
    pub pattern: String,
    pub result: String,
}

/// A resource advertised by the MCP server.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct McpResourceConfig {
    pub uri: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub mime_type: String,
    #[serde(default)]
    pub content: String,
}

/// A prompt advertised by the MCP server.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct McpPromptConfig {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub arguments: Vec<McpPromptArgument>,
    #[serde(default)]
    pub template: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct McpPromptArgument {
    pub name: String,
    #[serde(default)]
    pub required: bool,
}

/// The MCP configuration section.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct McpConfig {
    pub tools: Vec<McpToolConfig>,
    pub resources: Vec<McpResourceConfig>,
    pub prompts: Vec<McpPromptConfig>,
}

// ============== MCP runtime state ==============

struct McpInner {
    tools: Vec<McpToolConfig>,
    resources: Vec<McpResourceConfig>,
    prompts: Vec<McpPromptConfig>,
}

/// Runtime MCP state, mutable through the /_mock/mcp endpoints.
pub struct McpState {
    inner: RwLock<McpInner>,
    initial: McpConfig,
}

impl McpState {
    pub fn new(config: McpConfig) -> Self {
        Self {
            inner: RwLock::new(McpInner {
                tools: config.tools.clone(),
                resources: config.resources.clone(),
                prompts: config.prompts.clone(),
            }),
            initial: config,
        }
    }

    pub fn tools(&self) -> Vec<McpToolConfig> {
        self.inner.read().tools.clone()
    }

    pub fn resources(&self) -> Vec<McpResourceConfig> {
        self.inner.read().resources.clone()
    }

    pub fn prompts(&self) -> Vec<McpPromptConfig> {
        self.inner.read().prompts.clone()
    }

    pub fn add_tools(&self, tools: Vec<McpToolConfig>) {
        self.inner.write().tools.extend(tools);
    }

    pub fn add_resources(&self, resources: Vec<McpResourceConfig>) {
        self.inner.write().resources.extend(resources);
    }

    pub fn add_prompts(&self, prompts: Vec<McpPromptConfig>) {
        self.inner.write().prompts.extend(prompts);
    }

    pub fn clear_tools(&self) {
        self.inner.write().tools.clear();
    }

    pub fn clear_resources(&self) {
        self.inner.write().resources.clear();
    }

    pub fn clear_prompts(&self) {
        self.inner.write().prompts.clear();
    }

    /// Restore the startup configuration.
    pub fn reset(&self) {
        let mut inner = self.inner.write();
        inner.tools = self.initial.tools.clone();
        inner.resources = self.initial.resources.clone();
        inner.prompts = self.initial.prompts.clone();
    }
}

// ============== Dispatcher ==============

/// Route an MCP JSON-RPC request to its handler.
pub fn dispatch(state: &McpState, markov: &MarkovResponder, req: JsonRpcRequest) -> JsonRpcResponse {
    match req.method.as_str() {
        "initialize" => initialize(req),
        "tools/list" => tools_list(state, req),
        "tools/call" => tools_call(state, markov, req),
        "resources/list" => resources_list(state, req),
        "resources/read" => resources_read(state, req),
        "prompts/list" => prompts_list(state, req),
        "prompts/get" => prompts_get(state, req),
        other => rpc_error(req.id, METHOD_NOT_FOUND, format!("Method not found: {other}")),
    }
}

fn initialize(req: JsonRpcRequest) -> JsonRpcResponse {
    rpc_result(
        req.id,
        json!({
            "protocolVersion": "2025-03-26",
            "serverInfo": {
                "name": "llmock",
                "version": env!("CARGO_PKG_VERSION"),
            },
            "capabilities": {
                "tools": {},
                "resources": {},
                "prompts": {},
            },
        }),
    )
}

fn tools_list(state: &McpState, req: JsonRpcRequest) -> JsonRpcResponse {
    let tools: Vec<Value> = state
        .tools()
        .into_iter()
        .map(|t| {
            let mut entry = json!({
                "name": t.name,
                "description": t.description,
            });
            if let Some(schema) = t.input_schema {
                entry["inputSchema"] = Value::Object(schema);
            }
            entry
        })
        .collect();
    rpc_result(req.id, json!({"tools": tools}))
}

#[derive(Debug, Default, Deserialize)]
struct ToolCallParams {
    #[serde(default)]
    name: String,
    #[serde(default)]
    arguments: Map<String, Value>,
}

fn tools_call(state: &McpState, markov: &MarkovResponder, req: JsonRpcRequest) -> JsonRpcResponse {
    let params: ToolCallParams = match parse_params(req.params.clone()) {
        Ok(p) => p,
        Err(e) => return rpc_error(req.id, INVALID_PARAMS, format!("Invalid params: {e}")),
    };
    if params.name.is_empty() {
        return rpc_error(req.id, INVALID_PARAMS, "Invalid params: name is required");
    }

    let tools = state.tools();
    let Some(tool) = tools.iter().find(|t| t.name == params.name) else {
        return rpc_error(
            req.id,
            INVALID_PARAMS,
            format!("Unknown tool: {}", params.name),
        );
    };

    // First pattern matching the JSON-encoded arguments wins.
    let args_json = serde_json::to_string(&params.arguments).unwrap_or_default();
    let mut result_text = String::new();
    for response in &tool.responses {
        let Ok(re) = Regex::new(&response.pattern) else {
            continue;
        };
        if re.is_match(&args_json) {
            result_text = response.result.clone();
            break;
        }
    }
    if result_text.is_empty() {
        result_text = markov.generate(50);
    }

    rpc_result(
        req.id,
        json!({
            "content": [{"type": "text", "text": result_text}],
        }),
    )
}

fn resources_list(state: &McpState, req: JsonRpcRequest) -> JsonRpcResponse {
    let resources: Vec<Value> = state
        .resources()
        .into_iter()
        .map(|r| {
            let mut entry = json!({
                "uri": r.uri,
                "name": r.name,
            });
            if !r.mime_type.is_empty() {
                entry["mimeType"] = json!(r.mime_type);
            }
            entry
        })
        .collect();
    rpc_result(req.id, json!({"resources": resources}))
}

#[derive(Debug, Default, Deserialize)]
struct ResourceReadParams {
    #[serde(default)]
    uri: String,
}

fn resources_read(state: &McpState, req: JsonRpcRequest) -> JsonRpcResponse {
    let params: ResourceReadParams = match parse_params(req.params.clone()) {
        Ok(p) => p,
        Err(e) => return rpc_error(req.id, INVALID_PARAMS, format!("Invalid params: {e}")),
    };
    if params.uri.is_empty() {
        return rpc_error(req.id, INVALID_PARAMS, "Invalid params: uri is required");
    }

    for r in state.resources() {
        if r.uri == params.uri {
            let mime_type = if r.mime_type.is_empty() {
                "text/plain".to_string()
            } else {
                r.mime_type
            };
            return rpc_result(
                req.id,
                json!({
                    "contents": [{
                        "uri": r.uri,
                        "mimeType": mime_type,
                        "text": r.content,
                    }],
                }),
            );
        }
    }

    rpc_error(
        req.id,
        INVALID_PARAMS,
        format!("Resource not found: {}", params.uri),
    )
}

fn prompts_list(state: &McpState, req: JsonRpcRequest) -> JsonRpcResponse {
    let prompts: Vec<Value> = state
        .prompts()
        .into_iter()
        .map(|p| {
            let args: Vec<Value> = p
                .arguments
                .iter()
                .map(|a| json!({"name": a.name, "required": a.required}))
                .collect();
            json!({
                "name": p.name,
                "description": p.description,
                "arguments": args,
            })
        })
        .collect();
    rpc_result(req.id, json!({"prompts": prompts}))
}

#[derive(Debug, Default, Deserialize)]
struct PromptGetParams {
    #[serde(default)]
    name: String,
    #[serde(default)]
    arguments: std::collections::HashMap<String, String>,
}

fn prompts_get(state: &McpState, req: JsonRpcRequest) -> JsonRpcResponse {
    let params: PromptGetParams = match parse_params(req.params.clone()) {
        Ok(p) => p,
        Err(e) => return rpc_error(req.id, INVALID_PARAMS, format!("Invalid params: {e}")),
    };
    if params.name.is_empty() {
        return rpc_error(req.id, INVALID_PARAMS, "Invalid params: name is required");
    }

    for p in state.prompts() {
        if p.name == params.name {
            let mut text = p.template.clone();
            for (key, value) in &params.arguments {
                text = text.replace(&format!("{{{{{key}}}}}"), value);
            }
            return rpc_result(
                req.id,
                json!({
                    "messages": [{
                        "role": "user",
                        "content": {"type": "text", "text": text},
                    }],
                }),
            );
        }
    }

    rpc_error(
        req.id,
        INVALID_PARAMS,
        format!("Prompt not found: {}", params.name),
    )
}

fn parse_params<T: Default + serde::de::DeserializeOwned>(
    params: Option<Value>,
) -> Result<T, serde_json::Error> {
    match params {
        Some(value) => serde_json::from_value(value),
        None => Ok(T::default()),
    }
}

// ============== HTTP handlers ==============

/// POST /mcp
pub async fn handle_mcp(State(state): State<AppState>, body: Bytes) -> Json<JsonRpcResponse> {
    let response = handle_jsonrpc_bytes(&body, |req| {
        dispatch(state.mcp(), state.markov(), req)
    });
    Json(response)
}

/// GET /_mock/mcp/{tools,resources,prompts}
pub async fn get_mcp_tools(State(state): State<AppState>) -> Json<Value> {
    Json(json!({"tools": state.mcp().tools()}))
}

pub async fn get_mcp_resources(State(state): State<AppState>) -> Json<Value> {
    Json(json!({"resources": state.mcp().resources()}))
}

pub async fn get_mcp_prompts(State(state): State<AppState>) -> Json<Value> {
    Json(json!({"prompts": state.mcp().prompts()}))
}

#[derive(Debug, Deserialize)]
struct AddMcpToolsRequest {
    #[serde(default)]
    tools: Vec<McpToolConfig>,
}

#[derive(Debug, Deserialize)]
struct AddMcpResourcesRequest {
    #[serde(default)]
    resources: Vec<McpResourceConfig>,
}

#[derive(Debug, Deserialize)]
struct AddMcpPromptsRequest {
    #[serde(default)]
    prompts: Vec<McpPromptConfig>,
}

/// POST /_mock/mcp/tools
pub async fn post_mcp_tools(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Response, MockError> {
    let req: AddMcpToolsRequest = serde_json::from_slice(&body)?;
    if req.tools.is_empty() {
        return Err(MockError::EmptyMessages("tools"));
    }
    state.mcp().add_tools(req.tools);
    Ok((StatusCode::CREATED, Json(json!({"status": "ok"}))).into_response())
}

/// POST /_mock/mcp/resources
pub async fn post_mcp_resources(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Response, MockError> {
    let req: AddMcpResourcesRequest = serde_json::from_slice(&body)?;
    if req.resources.is_empty() {
        return Err(MockError::EmptyMessages("resources"));
    }
    state.mcp().add_resources(req.resources);
    Ok((StatusCode::CREATED, Json(json!({"status": "ok"}))).into_response())
}

/// POST /_mock/mcp/prompts
pub async fn post_mcp_prompts(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Response, MockError> {
    let req: AddMcpPromptsRequest = serde_json::from_slice(&body)?;
    if req.prompts.is_empty() {
        return Err(MockError::EmptyMessages("prompts"));
    }
    state.mcp().add_prompts(req.prompts);
    Ok((StatusCode::CREATED, Json(json!({"status": "ok"}))).into_response())
}

/// DELETE /_mock/mcp/{tools,resources,prompts}
pub async fn delete_mcp_tools(State(state): State<AppState>) -> Json<Value> {
    state.mcp().clear_tools();
    Json(json!({"status": "ok"}))
}

pub async fn delete_mcp_resources(State(state): State<AppState>) -> Json<Value> {
    state.mcp().clear_resources();
    Json(json!({"status": "ok"}))
}

pub async fn delete_mcp_prompts(State(state): State<AppState>) -> Json<Value> {
    state.mcp().clear_prompts();
    Json(json!({"status": "ok"}))
}
