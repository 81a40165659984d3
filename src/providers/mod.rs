//! Protocol adapters and the shared response pipeline.
//!
//! Each adapter decodes its provider's request shape into internal
//! messages, then runs the common pipeline: fault evaluation happens in the
//! handler, the responder produces a reply, tool calls are demoted when the
//! conversation already contains tool results, auto tool-calling fills in
//! when enabled, and emitted calls are filtered to the declared tool list.

pub mod anthropic;
pub mod gemini;
pub mod openai;

use axum::response::Response as AxumResponse;
use chrono::Utc;
use serde::de::DeserializeOwned;

use crate::admin::RequestLogEntry;
use crate::autotool::generate_tool_call;
use crate::error::{protocol_error, ApiFlavor, MockError};
use crate::server::AppState;
use crate::types::{extract_input, InternalMessage, Reply, RequestTool, Response};

/// Flat completion-token estimate for tool-call responses.
pub const TOOL_CALL_COMPLETION_TOKENS: u32 = 5;

/// Text used when a tool call must be demoted but the responder keeps
/// producing tool calls.
const TOOL_RESULT_CONTINUATION: &str =
    "Thanks, I've processed the tool results. Let me know if you need anything else.";

/// Decode a JSON request body, producing the protocol's 400 error shape on
/// failure.
pub fn decode_json<T: DeserializeOwned>(
    body: &[u8],
    flavor: ApiFlavor,
) -> Result<T, Box<AxumResponse>> {
    serde_json::from_slice(body).map_err(|e| {
        Box::new(protocol_error(
            flavor,
            axum::http::StatusCode::BAD_REQUEST,
            "invalid_request_error",
            &format!("invalid JSON: {e}"),
        ))
    })
}

/// The shared middle of the pipeline: invoke the responder, auto-generate
/// a tool call if enabled, demote tool calls when the conversation already
/// contains tool results, and filter calls to the declared tool list.
pub fn produce_response(
    state: &AppState,
    internal: &[InternalMessage],
    tools: &[RequestTool],
    has_tool_results: bool,
) -> Result<Reply, MockError> {
    let mut reply = state.responder().respond(internal)?;

    if state.auto_tool_calls()
        && !has_tool_results
        && !reply.response.is_tool_call()
        && !tools.is_empty()
    {
        if let Some(tc) = generate_tool_call(tools, state.rng()) {
            reply.response = Response::ToolCalls(vec![tc]);
        }
    }

    // A conversation that already carries tool results must get text back,
    // or client agent loops never terminate.
    if has_tool_results && reply.response.is_tool_call() {
        reply = force_text_reply(state, internal)?;
    }

    if reply.response.is_tool_call() && !tools.is_empty() {
        if let Response::ToolCalls(calls) = &reply.response {
            let valid: Vec<_> = calls
                .iter()
                .filter(|tc| tools.iter().any(|t| t.name == tc.name))
                .cloned()
                .collect();
            reply.response = if valid.is_empty() {
                // No declared tool survived: fall through to a text response.
                Response::Text(String::new())
            } else {
                Response::ToolCalls(valid)
            };
        }
    }

    Ok(reply)
}

/// Re-invoke the responder for a text answer; if it insists on a tool call,
/// substitute a generic continuation.
fn force_text_reply(state: &AppState, internal: &[InternalMessage]) -> Result<Reply, MockError> {
    let reply = state.responder().respond(internal)?;
    if reply.response.is_tool_call() {
        return Ok(Reply {
            response: Response::Text(TOOL_RESULT_CONTINUATION.to_string()),
            matched_rule: reply.matched_rule,
        });
    }
    Ok(reply)
}

/// Record the request in the admin log, when the admin API is enabled.
pub fn log_request(state: &AppState, method: &str, path: &str, internal: &[InternalMessage], reply: &Reply) {
    let Some(admin) = state.admin() else {
        return;
    };
    admin.log_request(RequestLogEntry {
        timestamp: Utc::now(),
        method: method.to_string(),
        path: path.to_string(),
        user_message: extract_input(internal),
        matched_rule: reply.matched_rule.clone().unwrap_or_default(),
        response: reply.response.text_content().to_string(),
    });
}
