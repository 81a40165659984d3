//! MCP control plane: the admin mutators exposed as callable tools.
//!
//! `POST /mcp/control` lets an AI agent drive llmock's behavior — adding
//! rules and faults, inspecting the request log — over the same JSON-RPC
//! shape as the main MCP endpoint. The dispatcher is shared with the stdio
//! transport.

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::{json, Map, Value};

use crate::admin::AdminState;
use crate::fault::{Fault, FaultState};
use crate::rules::Rule;
use crate::server::AppState;

use super::{
    handle_jsonrpc_bytes, rpc_error, rpc_result, JsonRpcRequest, JsonRpcResponse,
    INVALID_PARAMS, METHOD_NOT_FOUND,
};

/// The admin control plane behind `POST /mcp/control` and the stdio
/// transport.
pub struct ControlPlane {
    admin: Arc<AdminState>,
    faults: Arc<FaultState>,
}

fn empty_object_schema() -> Value {
    json!({"type": "object", "properties": {}})
}

/// Tool definitions for the control plane's tools/list response.
fn control_tool_defs() -> Vec<Value> {
    vec![
        json!({
            "name": "llmock_add_rule",
            "description": "Add a response rule. The rule's regex pattern is matched against incoming user messages; when matched, one of the responses is returned.",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "pattern": {"type": "string", "description": "Regex pattern to match against user messages"},
                    "responses": {"type": "array", "items": {"type": "string"}, "description": "Response templates (one is chosen randomly)"},
                    "priority": {"type": "integer", "description": "0=prepend (default), -1=append, N=insert at index N"},
                },
                "required": ["pattern", "responses"],
            },
        }),
        json!({
            "name": "llmock_list_rules",
            "description": "List all current response rules with their patterns and responses.",
            "inputSchema": empty_object_schema(),
        }),
        json!({
            "name": "llmock_reset_rules",
            "description": "Reset rules to the initial startup configuration.",
            "inputSchema": empty_object_schema(),
        }),
        json!({
            "name": "llmock_add_fault",
            "description": "Add a fault injection. Types: error (HTTP error), delay (latency), timeout (hang), malformed (bad response), rate_limit (429).",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "type": {"type": "string", "enum": ["error", "delay", "timeout", "malformed", "rate_limit"], "description": "Fault type"},
                    "status": {"type": "integer", "description": "HTTP status code (for error faults)"},
                    "message": {"type": "string", "description": "Error message"},
                    "delay_ms": {"type": "integer", "description": "Delay in milliseconds (for delay faults)"},
                    "probability": {"type": "number", "description": "Probability of firing (0-1, default 1)"},
                    "count": {"type": "integer", "description": "Auto-clear after N triggers (0=unlimited)"},
                },
                "required": ["type"],
            },
        }),
        json!({
            "name": "llmock_list_faults",
            "description": "List all active fault injections.",
            "inputSchema": empty_object_schema(),
        }),
        json!({
            "name": "llmock_clear_faults",
            "description": "Clear all active fault injections.",
            "inputSchema": empty_object_schema(),
        }),
        json!({
            "name": "llmock_list_requests",
            "description": "View the recent request log (last 100 requests).",
            "inputSchema": empty_object_schema(),
        }),
        json!({
            "name": "llmock_clear_requests",
            "description": "Clear the request log.",
            "inputSchema": empty_object_schema(),
        }),
        json!({
            "name": "llmock_reset",
            "description": "Full reset: restore rules to initial config, clear all faults, and clear the request log.",
            "inputSchema": empty_object_schema(),
        }),
    ]
}

impl ControlPlane {
    pub fn new(admin: Arc<AdminState>, faults: Arc<FaultState>) -> Self {
        Self { admin, faults }
    }

    /// Route a control-plane JSON-RPC request.
    pub fn dispatch(&self, req: JsonRpcRequest) -> JsonRpcResponse {
        match req.method.as_str() {
            "initialize" => rpc_result(
                req.id,
                json!({
                    "protocolVersion": "2025-03-26",
                    "serverInfo": {
                        "name": "llmock-control",
                        "version": env!("CARGO_PKG_VERSION"),
                    },
                    "capabilities": {"tools": {}},
                }),
            ),
            "tools/list" => rpc_result(req.id, json!({"tools": control_tool_defs()})),
            "tools/call" => self.tools_call(req),
            other => rpc_error(req.id, METHOD_NOT_FOUND, format!("Method not found: {other}")),
        }
    }

    fn tools_call(&self, req: JsonRpcRequest) -> JsonRpcResponse {
        let (name, arguments) = match req.params {
            Some(Value::Object(ref params)) => {
                let name = params
                    .get("name")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string();
                let arguments = match params.get("arguments") {
                    Some(Value::Object(args)) => args.clone(),
                    _ => Map::new(),
                };
                (name, arguments)
            }
            Some(_) => {
                return rpc_error(req.id, INVALID_PARAMS, "Invalid params: expected object")
            }
            None => (String::new(), Map::new()),
        };

        if name.is_empty() {
            return rpc_error(req.id, INVALID_PARAMS, "Invalid params: name is required");
        }

        let result = match name.as_str() {
            "llmock_add_rule" => self.call_add_rule(&arguments),
            "llmock_list_rules" => self.call_list_rules(),
            "llmock_reset_rules" => self.call_reset_rules(),
            "llmock_add_fault" => self.call_add_fault(arguments),
            "llmock_list_faults" => self.call_list_faults(),
            "llmock_clear_faults" => self.call_clear_faults(),
            "llmock_list_requests" => self.call_list_requests(),
            "llmock_clear_requests" => self.call_clear_requests(),
            "llmock_reset" => self.call_reset(),
            other => {
                return rpc_error(req.id, INVALID_PARAMS, format!("Unknown tool: {other}"));
            }
        };

        // Tool-level validation errors are a successful JSON-RPC response
        // flagged with isError, per the MCP tool-result convention.
        match result {
            Ok(text) => rpc_result(
                req.id,
                json!({"content": [{"type": "text", "text": text}]}),
            ),
            Err(text) => rpc_result(
                req.id,
                json!({
                    "content": [{"type": "text", "text": text}],
                    "isError": true,
                }),
            ),
        }
    }

    fn call_add_rule(&self, args: &Map<String, Value>) -> Result<String, String> {
        let pattern = args.get("pattern").and_then(Value::as_str).unwrap_or_default();
        if pattern.is_empty() {
            return Err("pattern is required".to_string());
        }

        let responses: Vec<String> = match args.get("responses") {
            Some(Value::Array(arr)) if !arr.is_empty() => {
                let mut out = Vec::with_capacity(arr.len());
                for v in arr {
                    match v.as_str() {
                        Some(s) => out.push(s.to_string()),
                        None => return Err("responses must be an array of strings".to_string()),
                    }
                }
                out
            }
            _ => return Err("responses is required and must not be empty".to_string()),
        };

        let priority = args
            .get("priority")
            .and_then(Value::as_i64)
            .unwrap_or(0);

        let rule = Rule::compile(pattern, responses, None, None)
            .map_err(|e| format!("invalid regex: {e}"))?;
        self.admin.add_rules(vec![rule], priority);
        Ok("Rule added successfully".to_string())
    }

    fn call_list_rules(&self) -> Result<String, String> {
        serde_json::to_string(&self.admin.rules_json()).map_err(|e| e.to_string())
    }

    fn call_reset_rules(&self) -> Result<String, String> {
        self.admin.reset_rules();
        Ok("Rules reset to initial configuration".to_string())
    }

    fn call_add_fault(&self, args: Map<String, Value>) -> Result<String, String> {
        if !args.contains_key("type") {
            return Err("type is required".to_string());
        }
        let fault: Fault = serde_json::from_value(Value::Object(args))
            .map_err(|e| format!("invalid fault: {e}"))?;
        self.faults.add_faults(vec![fault]);
        Ok("Fault added successfully".to_string())
    }

    fn call_list_faults(&self) -> Result<String, String> {
        serde_json::to_string(&self.faults.list()).map_err(|e| e.to_string())
    }

    fn call_clear_faults(&self) -> Result<String, String> {
        self.faults.clear();
        Ok("All faults cleared".to_string())
    }

    fn call_list_requests(&self) -> Result<String, String> {
        serde_json::to_string(&self.admin.requests()).map_err(|e| e.to_string())
    }

    fn call_clear_requests(&self) -> Result<String, String> {
        self.admin.clear_requests();
        Ok("Request log cleared".to_string())
    }

    fn call_reset(&self) -> Result<String, String> {
        self.admin.full_reset();
        self.faults.clear();
        Ok("Full reset complete".to_string())
    }
}

/// POST /mcp/control
pub async fn handle_control(State(state): State<AppState>, body: Bytes) -> Response {
    let Some(control) = state.control() else {
        return StatusCode::NOT_FOUND.into_response();
    };
    let response = handle_jsonrpc_bytes(&body, |req| control.dispatch(req));
    Json(response).into_response()
}
