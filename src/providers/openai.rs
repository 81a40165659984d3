//! OpenAI Chat Completions adapter (`POST /v1/chat/completions`).

use axum::body::Bytes;
use axum::extract::{OriginalUri, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response as AxumResponse};
use axum::Json;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use uuid::Uuid;

use crate::error::{protocol_error, ApiFlavor};
use crate::fault::{execute_fault, FaultOutcome};
use crate::server::streaming::{split_string, sse_response, tokenize_chunks, SseFrame};
use crate::server::AppState;
use crate::types::{count_tokens, estimate_tokens, InternalMessage, RequestTool, ResolvedToolCall, Response};

use super::{decode_json, log_request, produce_response, TOOL_CALL_COMPLETION_TOKENS};

// ============== Request types ==============

/// An OpenAI chat completion request.
#[derive(Debug, Clone, Deserialize)]
pub struct ChatCompletionRequest {
    #[serde(default)]
    pub model: String,
    #[serde(default)]
    pub messages: Vec<ChatMessage>,
    #[serde(default)]
    pub stream: bool,
    #[serde(default)]
    pub tools: Vec<OpenAiToolDef>,
}

/// A chat message. Content may be a string, null (for pure tool-call
/// assistant turns), or an array of content parts.
#[derive(Debug, Clone, Deserialize)]
pub struct ChatMessage {
    #[serde(default)]
    pub role: String,
    #[serde(default)]
    pub content: Option<MessageContent>,
    #[serde(default)]
    pub tool_calls: Option<Vec<Value>>,
    #[serde(default)]
    pub tool_call_id: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Parts(Vec<ContentPart>),
}

#[derive(Debug, Clone, Deserialize)]
pub struct ContentPart {
    #[serde(default, rename = "type")]
    pub part_type: String,
    #[serde(default)]
    pub text: String,
}

/// A tool definition in an OpenAI request.
#[derive(Debug, Clone, Deserialize)]
pub struct OpenAiToolDef {
    #[serde(default, rename = "type")]
    pub tool_type: String,
    #[serde(default)]
    pub function: OpenAiFunctionDef,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct OpenAiFunctionDef {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub parameters: Option<Map<String, Value>>,
}

// ============== Response types ==============

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatCompletionResponse {
    pub id: String,
    pub object: String,
    pub created: i64,
    pub model: String,
    pub choices: Vec<Choice>,
    pub usage: Usage,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Choice {
    pub index: u32,
    pub message: ChoiceMessage,
    pub finish_reason: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChoiceMessage {
    pub role: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<OpenAiToolCall>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenAiToolCall {
    pub id: String,
    #[serde(rename = "type")]
    pub call_type: String,
    pub function: OpenAiFunctionCall,
}

/// The function half of a tool call; arguments are JSON-encoded.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenAiFunctionCall {
    pub name: String,
    pub arguments: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

impl Usage {
    pub fn new(prompt_tokens: u32, completion_tokens: u32) -> Self {
        Self {
            prompt_tokens,
            completion_tokens,
            total_tokens: prompt_tokens + completion_tokens,
        }
    }
}

// ============== Decoding ==============

fn content_text(content: &Option<MessageContent>) -> String {
    match content {
        None => String::new(),
        Some(MessageContent::Text(t)) => t.clone(),
        Some(MessageContent::Parts(parts)) => parts
            .iter()
            .filter(|p| !p.text.is_empty())
            .map(|p| p.text.as_str())
            .collect::<Vec<_>>()
            .join("\n"),
    }
}

pub fn to_internal(messages: &[ChatMessage]) -> Vec<InternalMessage> {
    messages
        .iter()
        .map(|m| InternalMessage::new(m.role.clone(), content_text(&m.content)))
        .collect()
}

fn request_tools(tools: &[OpenAiToolDef]) -> Vec<RequestTool> {
    tools
        .iter()
        .map(|t| RequestTool {
            name: t.function.name.clone(),
            parameters: t.function.parameters.clone(),
        })
        .collect()
}

fn tool_call_json(tc: &ResolvedToolCall) -> OpenAiToolCall {
    OpenAiToolCall {
        id: tc.id.clone(),
        call_type: "function".to_string(),
        function: OpenAiFunctionCall {
            name: tc.name.clone(),
            arguments: serde_json::to_string(&tc.arguments).unwrap_or_default(),
        },
    }
}

fn completion_id() -> String {
    let hex = Uuid::new_v4().simple().to_string();
    format!("chatcmpl-{}", &hex[..24])
}

// ============== Handler ==============

/// POST /v1/chat/completions
pub async fn chat_completions(
    State(state): State<AppState>,
    OriginalUri(uri): OriginalUri,
    body: Bytes,
) -> AxumResponse {
    let req: ChatCompletionRequest = match decode_json(&body, ApiFlavor::OpenAi) {
        Ok(r) => r,
        Err(resp) => return *resp,
    };

    if req.messages.is_empty() {
        return protocol_error(
            ApiFlavor::OpenAi,
            StatusCode::BAD_REQUEST,
            "invalid_request_error",
            "messages array is required and must not be empty",
        );
    }

    if let Some(fault) = state.faults().evaluate() {
        match execute_fault(&fault, ApiFlavor::OpenAi, req.stream).await {
            FaultOutcome::Continue => {}
            FaultOutcome::Respond(resp) => return resp,
        }
    }

    let internal = to_internal(&req.messages);
    let tools = request_tools(&req.tools);
    let has_tool_results = req.messages.iter().any(|m| m.role == "tool");

    let reply = match produce_response(&state, &internal, &tools, has_tool_results) {
        Ok(r) => r,
        Err(e) => return e.into_protocol_response(ApiFlavor::OpenAi),
    };

    log_request(&state, "POST", uri.path(), &internal, &reply);

    let model = if req.model.is_empty() {
        state.default_model().to_string()
    } else {
        req.model.clone()
    };
    let id = completion_id();
    let prompt_tokens = estimate_tokens(&internal);

    match reply.response {
        Response::ToolCalls(calls) => {
            if req.stream {
                return sse_response(tool_call_stream_frames(&state, &id, &model, &calls));
            }
            let response = ChatCompletionResponse {
                id,
                object: "chat.completion".to_string(),
                created: Utc::now().timestamp(),
                model,
                choices: vec![Choice {
                    index: 0,
                    message: ChoiceMessage {
                        role: "assistant".to_string(),
                        content: None,
                        tool_calls: Some(calls.iter().map(tool_call_json).collect()),
                    },
                    finish_reason: "tool_calls".to_string(),
                }],
                usage: Usage::new(prompt_tokens, TOOL_CALL_COMPLETION_TOKENS),
            };
            Json(response).into_response()
        }
        Response::Text(text) => {
            if req.stream {
                return sse_response(text_stream_frames(&state, &id, &model, &text));
            }
            let completion_tokens = count_tokens(&text);
            let response = ChatCompletionResponse {
                id,
                object: "chat.completion".to_string(),
                created: Utc::now().timestamp(),
                model,
                choices: vec![Choice {
                    index: 0,
                    message: ChoiceMessage {
                        role: "assistant".to_string(),
                        content: Some(text),
                        tool_calls: None,
                    },
                    finish_reason: "stop".to_string(),
                }],
                usage: Usage::new(prompt_tokens, completion_tokens),
            };
            Json(response).into_response()
        }
    }
}

// ============== Streaming ==============

fn chunk_event(id: &str, model: &str, created: i64, delta: Value, finish_reason: Value) -> String {
    json!({
        "id": id,
        "object": "chat.completion.chunk",
        "created": created,
        "model": model,
        "choices": [{
            "index": 0,
            "delta": delta,
            "finish_reason": finish_reason,
        }],
    })
    .to_string()
}

fn text_stream_frames(state: &AppState, id: &str, model: &str, text: &str) -> Vec<SseFrame> {
    let created = Utc::now().timestamp();
    let delay = state.token_delay();
    let chunks = {
        let mut rng = state.rng().lock();
        tokenize_chunks(text, &mut rng)
    };

    let mut frames = Vec::with_capacity(chunks.len() + 2);
    for (i, chunk) in chunks.iter().enumerate() {
        let mut delta = json!({"content": chunk});
        if i == 0 {
            delta["role"] = json!("assistant");
        }
        let mut frame = SseFrame::data(chunk_event(id, model, created, delta, Value::Null));
        if i > 0 {
            frame = frame.with_delay(delay);
        }
        frames.push(frame);
    }

    frames.push(SseFrame::data(chunk_event(
        id,
        model,
        created,
        json!({}),
        json!("stop"),
    )));
    frames.push(SseFrame::data("[DONE]"));
    frames
}

fn tool_call_stream_frames(
    state: &AppState,
    id: &str,
    model: &str,
    calls: &[ResolvedToolCall],
) -> Vec<SseFrame> {
    let created = Utc::now().timestamp();
    let delay = state.token_delay();
    let mut frames = Vec::new();

    for (i, tc) in calls.iter().enumerate() {
        let args_json = serde_json::to_string(&tc.arguments).unwrap_or_default();

        // Opening delta carries the id and function name; argument bytes
        // follow as suffix slices.
        let mut delta = json!({
            "tool_calls": [{
                "index": i,
                "id": tc.id,
                "type": "function",
                "function": {"name": tc.name, "arguments": ""},
            }],
        });
        if i == 0 {
            delta["role"] = json!("assistant");
        }
        let mut frame = SseFrame::data(chunk_event(id, model, created, delta, Value::Null));
        if !frames.is_empty() {
            frame = frame.with_delay(delay);
        }
        frames.push(frame);

        for slice in split_string(&args_json, 20) {
            let delta = json!({
                "tool_calls": [{
                    "index": i,
                    "function": {"arguments": slice},
                }],
            });
            frames.push(
                SseFrame::data(chunk_event(id, model, created, delta, Value::Null))
                    .with_delay(delay),
            );
        }
    }

    frames.push(SseFrame::data(chunk_event(
        id,
        model,
        created,
        json!({}),
        json!("tool_calls"),
    )));
    frames.push(SseFrame::data("[DONE]"));
    frames
}
