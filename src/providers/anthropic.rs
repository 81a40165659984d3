//! Anthropic Messages adapter (`POST /v1/messages`).

use axum::body::Bytes;
use axum::extract::{OriginalUri, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response as AxumResponse};
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::error::{protocol_error, ApiFlavor};
use crate::fault::{execute_fault, FaultOutcome};
use crate::server::streaming::{split_string, sse_response, tokenize_chunks, SseFrame};
use crate::server::AppState;
use crate::toolcall::mint_tool_call_id;
use crate::types::{count_tokens, estimate_tokens, InternalMessage, RequestTool, ResolvedToolCall, Response};

use super::{decode_json, log_request, produce_response, TOOL_CALL_COMPLETION_TOKENS};

// ============== Request types ==============

/// An Anthropic Messages API request.
#[derive(Debug, Clone, Deserialize)]
pub struct AnthropicRequest {
    #[serde(default)]
    pub model: String,
    #[serde(default)]
    pub messages: Vec<AnthropicMessage>,
    #[serde(default)]
    pub max_tokens: u32,
    #[serde(default)]
    pub stream: bool,
    #[serde(default)]
    pub system: Option<String>,
    #[serde(default)]
    pub tools: Vec<AnthropicToolDef>,
}

/// A message whose content is either a plain string or content blocks.
#[derive(Debug, Clone, Deserialize)]
pub struct AnthropicMessage {
    #[serde(default)]
    pub role: String,
    #[serde(default)]
    pub content: Option<AnthropicContent>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum AnthropicContent {
    Text(String),
    Blocks(Vec<AnthropicBlock>),
}

/// One content block: text, tool_use, or tool_result. A tool_result's own
/// content may again be a string or nested text blocks.
#[derive(Debug, Clone, Deserialize)]
pub struct AnthropicBlock {
    #[serde(default, rename = "type")]
    pub block_type: String,
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub content: Option<ToolResultContent>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum ToolResultContent {
    Text(String),
    Blocks(Vec<AnthropicBlock>),
}

/// A tool definition in an Anthropic request.
#[derive(Debug, Clone, Deserialize)]
pub struct AnthropicToolDef {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub input_schema: Option<Map<String, Value>>,
}

// ============== Response types ==============

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnthropicResponse {
    pub id: String,
    #[serde(rename = "type")]
    pub response_type: String,
    pub role: String,
    pub content: Vec<AnthropicContentBlock>,
    pub model: String,
    pub stop_reason: String,
    pub stop_sequence: Option<String>,
    pub usage: AnthropicUsage,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnthropicContentBlock {
    #[serde(rename = "type")]
    pub block_type: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub text: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input: Option<Map<String, Value>>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct AnthropicUsage {
    pub input_tokens: u32,
    pub output_tokens: u32,
}

// ============== Decoding ==============

/// Flatten a message's content for rule matching: text blocks plus
/// tool-result payloads, joined with newlines. Pure tool_use blocks
/// contribute nothing.
fn content_text(content: &Option<AnthropicContent>) -> String {
    match content {
        None => String::new(),
        Some(AnthropicContent::Text(t)) => t.clone(),
        Some(AnthropicContent::Blocks(blocks)) => flatten_blocks(blocks),
    }
}

fn flatten_blocks(blocks: &[AnthropicBlock]) -> String {
    let mut parts = Vec::new();
    for block in blocks {
        match block.block_type.as_str() {
            "text" => {
                if !block.text.is_empty() {
                    parts.push(block.text.clone());
                }
            }
            "tool_result" => match &block.content {
                Some(ToolResultContent::Text(t)) if !t.is_empty() => parts.push(t.clone()),
                Some(ToolResultContent::Blocks(nested)) => {
                    let flattened = flatten_blocks(nested);
                    if !flattened.is_empty() {
                        parts.push(flattened);
                    }
                }
                _ => {}
            },
            _ => {}
        }
    }
    parts.join("\n")
}

pub fn to_internal(system: &Option<String>, messages: &[AnthropicMessage]) -> Vec<InternalMessage> {
    let mut internal = Vec::with_capacity(messages.len() + 1);
    if let Some(system) = system {
        if !system.is_empty() {
            internal.push(InternalMessage::system(system.clone()));
        }
    }
    for m in messages {
        internal.push(InternalMessage::new(m.role.clone(), content_text(&m.content)));
    }
    internal
}

fn has_tool_results(messages: &[AnthropicMessage]) -> bool {
    messages.iter().any(|m| {
        matches!(&m.content, Some(AnthropicContent::Blocks(blocks))
            if blocks.iter().any(|b| b.block_type == "tool_result"))
    })
}

fn request_tools(tools: &[AnthropicToolDef]) -> Vec<RequestTool> {
    tools
        .iter()
        .map(|t| RequestTool {
            name: t.name.clone(),
            parameters: t.input_schema.clone(),
        })
        .collect()
}

// ============== Handler ==============

/// POST /v1/messages
pub async fn messages(
    State(state): State<AppState>,
    OriginalUri(uri): OriginalUri,
    body: Bytes,
) -> AxumResponse {
    let req: AnthropicRequest = match decode_json(&body, ApiFlavor::Anthropic) {
        Ok(r) => r,
        Err(resp) => return *resp,
    };

    if req.messages.is_empty() {
        return protocol_error(
            ApiFlavor::Anthropic,
            StatusCode::BAD_REQUEST,
            "invalid_request_error",
            "messages array is required and must not be empty",
        );
    }

    if let Some(fault) = state.faults().evaluate() {
        match execute_fault(&fault, ApiFlavor::Anthropic, req.stream).await {
            FaultOutcome::Continue => {}
            FaultOutcome::Respond(resp) => return resp,
        }
    }

    let internal = to_internal(&req.system, &req.messages);
    let tools = request_tools(&req.tools);
    let with_tool_results = has_tool_results(&req.messages);

    let reply = match produce_response(&state, &internal, &tools, with_tool_results) {
        Ok(r) => r,
        Err(e) => return e.into_protocol_response(ApiFlavor::Anthropic),
    };

    log_request(&state, "POST", uri.path(), &internal, &reply);

    let model = if req.model.is_empty() {
        state.default_model().to_string()
    } else {
        req.model.clone()
    };
    let id = mint_tool_call_id("msg_");
    let input_tokens = estimate_tokens(&internal);

    match reply.response {
        Response::ToolCalls(calls) => {
            if req.stream {
                return sse_response(tool_call_stream_frames(&state, &id, &model, input_tokens, &calls));
            }
            let content = calls
                .iter()
                .map(|tc| AnthropicContentBlock {
                    block_type: "tool_use".to_string(),
                    text: String::new(),
                    id: mint_tool_call_id("toolu_"),
                    name: tc.name.clone(),
                    input: Some(tc.arguments.clone()),
                })
                .collect();
            let response = AnthropicResponse {
                id,
                response_type: "message".to_string(),
                role: "assistant".to_string(),
                content,
                model,
                stop_reason: "tool_use".to_string(),
                stop_sequence: None,
                usage: AnthropicUsage {
                    input_tokens,
                    output_tokens: TOOL_CALL_COMPLETION_TOKENS,
                },
            };
            Json(response).into_response()
        }
        Response::Text(text) => {
            if req.stream {
                return sse_response(text_stream_frames(&state, &id, &model, input_tokens, &text));
            }
            let output_tokens = count_tokens(&text);
            let response = AnthropicResponse {
                id,
                response_type: "message".to_string(),
                role: "assistant".to_string(),
                content: vec![AnthropicContentBlock {
                    block_type: "text".to_string(),
                    text,
                    id: String::new(),
                    name: String::new(),
                    input: None,
                }],
                model,
                stop_reason: "end_turn".to_string(),
                stop_sequence: None,
                usage: AnthropicUsage {
                    input_tokens,
                    output_tokens,
                },
            };
            Json(response).into_response()
        }
    }
}

// ============== Streaming ==============

fn message_start_frame(id: &str, model: &str, input_tokens: u32) -> SseFrame {
    SseFrame::event(
        "message_start",
        json!({
            "type": "message_start",
            "message": {
                "id": id,
                "type": "message",
                "role": "assistant",
                "content": [],
                "model": model,
                "stop_reason": null,
                "stop_sequence": null,
                "usage": {"input_tokens": input_tokens, "output_tokens": 0},
            },
        })
        .to_string(),
    )
}

fn message_close_frames(stop_reason: &str, output_tokens: u32) -> [SseFrame; 2] {
    [
        SseFrame::event(
            "message_delta",
            json!({
                "type": "message_delta",
                "delta": {"stop_reason": stop_reason, "stop_sequence": null},
                "usage": {"output_tokens": output_tokens},
            })
            .to_string(),
        ),
        SseFrame::event("message_stop", json!({"type": "message_stop"}).to_string()),
    ]
}

fn text_stream_frames(
    state: &AppState,
    id: &str,
    model: &str,
    input_tokens: u32,
    text: &str,
) -> Vec<SseFrame> {
    let delay = state.token_delay();
    let chunks = {
        let mut rng = state.rng().lock();
        tokenize_chunks(text, &mut rng)
    };
    let output_tokens = count_tokens(text);

    let mut frames = Vec::with_capacity(chunks.len() + 5);
    frames.push(message_start_frame(id, model, input_tokens));
    frames.push(SseFrame::event(
        "content_block_start",
        json!({
            "type": "content_block_start",
            "index": 0,
            "content_block": {"type": "text", "text": ""},
        })
        .to_string(),
    ));

    for (i, chunk) in chunks.iter().enumerate() {
        let mut frame = SseFrame::event(
            "content_block_delta",
            json!({
                "type": "content_block_delta",
                "index": 0,
                "delta": {"type": "text_delta", "text": chunk},
            })
            .to_string(),
        );
        if i > 0 {
            frame = frame.with_delay(delay);
        }
        frames.push(frame);
    }

    frames.push(SseFrame::event(
        "content_block_stop",
        json!({"type": "content_block_stop", "index": 0}).to_string(),
    ));
    frames.extend(message_close_frames("end_turn", output_tokens));
    frames
}

fn tool_call_stream_frames(
    state: &AppState,
    id: &str,
    model: &str,
    input_tokens: u32,
    calls: &[ResolvedToolCall],
) -> Vec<SseFrame> {
    let delay = state.token_delay();
    let mut frames = Vec::new();
    frames.push(message_start_frame(id, model, input_tokens));

    for (i, tc) in calls.iter().enumerate() {
        frames.push(SseFrame::event(
            "content_block_start",
            json!({
                "type": "content_block_start",
                "index": i,
                "content_block": {
                    "type": "tool_use",
                    "id": mint_tool_call_id("toolu_"),
                    "name": tc.name,
                    "input": {},
                },
            })
            .to_string(),
        ));

        let args_json = serde_json::to_string(&tc.arguments).unwrap_or_default();
        for (j, slice) in split_string(&args_json, 20).into_iter().enumerate() {
            let mut frame = SseFrame::event(
                "content_block_delta",
                json!({
                    "type": "content_block_delta",
                    "index": i,
                    "delta": {"type": "input_json_delta", "partial_json": slice},
                })
                .to_string(),
            );
            if j > 0 {
                frame = frame.with_delay(delay);
            }
            frames.push(frame);
        }

        frames.push(SseFrame::event(
            "content_block_stop",
            json!({"type": "content_block_stop", "index": i}).to_string(),
        ));
    }

    frames.extend(message_close_frames("tool_use", TOOL_CALL_COMPLETION_TOKENS));
    frames
}
