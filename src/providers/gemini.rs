//! Google Gemini adapter (`POST /v1beta/models/{model}:generateContent`
//! and `:streamGenerateContent`).
//!
//! The model name and method share one path segment, so the route captures
//! the whole segment and splits on the colon.

use axum::body::Bytes;
use axum::extract::{OriginalUri, Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response as AxumResponse};
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{protocol_error, ApiFlavor};
use crate::fault::{execute_fault, FaultOutcome};
use crate::server::streaming::{sse_response, tokenize_chunks, SseFrame};
use crate::server::AppState;
use crate::types::{count_tokens, estimate_tokens, InternalMessage, RequestTool, ResolvedToolCall, Response};

use super::{decode_json, log_request, produce_response, TOOL_CALL_COMPLETION_TOKENS};

// ============== Request types ==============

/// A Gemini generateContent request.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeminiRequest {
    #[serde(default)]
    pub contents: Vec<GeminiContent>,
    #[serde(default)]
    pub system_instruction: Option<GeminiContent>,
    #[serde(default)]
    pub tools: Vec<GeminiToolDef>,
}

/// A content entry: a role plus parts.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GeminiContent {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub role: String,
    #[serde(default)]
    pub parts: Vec<GeminiPart>,
}

/// A part holds text, a function call, or a function response.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeminiPart {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub function_call: Option<GeminiFunctionCall>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub function_response: Option<GeminiFunctionResponse>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeminiFunctionCall {
    pub name: String,
    #[serde(default)]
    pub args: Map<String, Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeminiFunctionResponse {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub response: Map<String, Value>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeminiToolDef {
    #[serde(default)]
    pub function_declarations: Vec<GeminiFunctionDecl>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GeminiFunctionDecl {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub parameters: Option<Map<String, Value>>,
}

// ============== Response types ==============

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeminiResponse {
    pub candidates: Vec<GeminiCandidate>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage_metadata: Option<GeminiUsageMetadata>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeminiCandidate {
    pub content: GeminiContent,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finish_reason: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeminiUsageMetadata {
    pub prompt_token_count: u32,
    pub candidates_token_count: u32,
    pub total_token_count: u32,
}

impl GeminiUsageMetadata {
    fn new(prompt: u32, candidates: u32) -> Self {
        Self {
            prompt_token_count: prompt,
            candidates_token_count: candidates,
            total_token_count: prompt + candidates,
        }
    }
}

// ============== Decoding ==============

/// Text for rule matching: text parts plus any string `result` carried in a
/// function response, joined with newlines.
fn content_text(content: &GeminiContent) -> String {
    let mut parts = Vec::new();
    for p in &content.parts {
        if !p.text.is_empty() {
            parts.push(p.text.clone());
        }
        if let Some(fr) = &p.function_response {
            if let Some(Value::String(result)) = fr.response.get("result") {
                parts.push(result.clone());
            }
        }
    }
    parts.join("\n")
}

fn has_function_call(content: &GeminiContent) -> bool {
    content.parts.iter().any(|p| p.function_call.is_some())
}

pub fn to_internal(
    contents: &[GeminiContent],
    system_instruction: &Option<GeminiContent>,
) -> Vec<InternalMessage> {
    let mut internal = Vec::with_capacity(contents.len() + 1);

    if let Some(system) = system_instruction {
        let text = content_text(system);
        if !text.is_empty() {
            internal.push(InternalMessage::system(text));
        }
    }

    for c in contents {
        let role = match c.role.as_str() {
            "model" => "assistant",
            "" => "user",
            other => other,
        };
        let text = content_text(c);
        if text.is_empty() {
            // Pure function-call model turns stay in the sequence as empty
            // assistant messages; anything else empty is dropped.
            if role == "assistant" && has_function_call(c) {
                internal.push(InternalMessage::assistant(""));
            }
            continue;
        }
        internal.push(InternalMessage::new(role, text));
    }
    internal
}

fn has_tool_results(contents: &[GeminiContent]) -> bool {
    contents
        .iter()
        .any(|c| c.parts.iter().any(|p| p.function_response.is_some()))
}

fn request_tools(tools: &[GeminiToolDef]) -> Vec<RequestTool> {
    tools
        .iter()
        .flat_map(|t| &t.function_declarations)
        .map(|fd| RequestTool {
            name: fd.name.clone(),
            parameters: fd.parameters.clone(),
        })
        .collect()
}

fn tool_call_parts(calls: &[ResolvedToolCall]) -> Vec<GeminiPart> {
    calls
        .iter()
        .map(|tc| GeminiPart {
            text: String::new(),
            function_call: Some(GeminiFunctionCall {
                name: tc.name.clone(),
                args: tc.arguments.clone(),
            }),
            function_response: None,
        })
        .collect()
}

// ============== Handler ==============

/// POST /v1beta/models/{model}:generateContent or :streamGenerateContent.
pub async fn model_call(
    State(state): State<AppState>,
    Path(model_call): Path<String>,
    OriginalUri(uri): OriginalUri,
    body: Bytes,
) -> AxumResponse {
    let Some((_model, action)) = model_call.split_once(':') else {
        return protocol_error(
            ApiFlavor::Gemini,
            StatusCode::NOT_FOUND,
            "not_found",
            "unknown Gemini method",
        );
    };

    let streaming = match action {
        "generateContent" => false,
        "streamGenerateContent" => true,
        _ => {
            return protocol_error(
                ApiFlavor::Gemini,
                StatusCode::NOT_FOUND,
                "not_found",
                "unknown Gemini method",
            );
        }
    };

    let req: GeminiRequest = match decode_json(&body, ApiFlavor::Gemini) {
        Ok(r) => r,
        Err(resp) => return *resp,
    };

    if req.contents.is_empty() {
        return protocol_error(
            ApiFlavor::Gemini,
            StatusCode::BAD_REQUEST,
            "invalid_request_error",
            "contents array is required and must not be empty",
        );
    }

    if let Some(fault) = state.faults().evaluate() {
        match execute_fault(&fault, ApiFlavor::Gemini, streaming).await {
            FaultOutcome::Continue => {}
            FaultOutcome::Respond(resp) => return resp,
        }
    }

    let internal = to_internal(&req.contents, &req.system_instruction);
    let tools = request_tools(&req.tools);
    let with_tool_results = has_tool_results(&req.contents);

    let reply = match produce_response(&state, &internal, &tools, with_tool_results) {
        Ok(r) => r,
        Err(e) => return e.into_protocol_response(ApiFlavor::Gemini),
    };

    log_request(&state, "POST", uri.path(), &internal, &reply);

    let prompt_tokens = estimate_tokens(&internal);

    match reply.response {
        Response::ToolCalls(calls) => {
            let response = GeminiResponse {
                candidates: vec![GeminiCandidate {
                    content: GeminiContent {
                        role: "model".to_string(),
                        parts: tool_call_parts(&calls),
                    },
                    finish_reason: Some("STOP".to_string()),
                }],
                usage_metadata: Some(GeminiUsageMetadata::new(
                    prompt_tokens,
                    TOOL_CALL_COMPLETION_TOKENS,
                )),
            };
            if streaming {
                // Tool calls stream as a single chunk.
                let data = serde_json::to_string(&response).unwrap_or_default();
                return sse_response(vec![SseFrame::data(data)]);
            }
            Json(response).into_response()
        }
        Response::Text(text) => {
            if streaming {
                return sse_response(text_stream_frames(&state, prompt_tokens, &text));
            }
            let completion_tokens = count_tokens(&text);
            let response = GeminiResponse {
                candidates: vec![GeminiCandidate {
                    content: GeminiContent {
                        role: "model".to_string(),
                        parts: vec![GeminiPart {
                            text,
                            function_call: None,
                            function_response: None,
                        }],
                    },
                    finish_reason: Some("STOP".to_string()),
                }],
                usage_metadata: Some(GeminiUsageMetadata::new(prompt_tokens, completion_tokens)),
            };
            Json(response).into_response()
        }
    }
}

// ============== Streaming ==============

fn text_stream_frames(state: &AppState, prompt_tokens: u32, text: &str) -> Vec<SseFrame> {
    let delay = state.token_delay();
    let output_tokens = count_tokens(text);
    let mut chunks = {
        let mut rng = state.rng().lock();
        tokenize_chunks(text, &mut rng)
    };
    if chunks.is_empty() {
        chunks.push(String::new());
    }

    let last = chunks.len() - 1;
    chunks
        .into_iter()
        .enumerate()
        .map(|(i, chunk)| {
            let response = GeminiResponse {
                candidates: vec![GeminiCandidate {
                    content: GeminiContent {
                        role: "model".to_string(),
                        parts: vec![GeminiPart {
                            text: chunk,
                            function_call: None,
                            function_response: None,
                        }],
                    },
                    finish_reason: (i == last).then(|| "STOP".to_string()),
                }],
                usage_metadata: (i == last)
                    .then(|| GeminiUsageMetadata::new(prompt_tokens, output_tokens)),
            };
            let mut frame = SseFrame::data(serde_json::to_string(&response).unwrap_or_default());
            if i > 0 {
                frame = frame.with_delay(delay);
            }
            frame
        })
        .collect()
}
