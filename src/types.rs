//! Core types shared across the response pipeline.
//!
//! Every protocol adapter decodes its request into a sequence of
//! [`InternalMessage`]s, runs them through a [`Responder`], and encodes the
//! resulting [`Response`] back into the provider's native shape.

use serde_json::{Map, Value};

use crate::error::MockError;

/// Internal representation of a chat message, used as the common format
/// between the provider-specific request types.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InternalMessage {
    pub role: String,
    pub content: String,
}

impl InternalMessage {
    pub fn new(role: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new("user", content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new("assistant", content)
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new("system", content)
    }
}

/// A tool call resolved from a rule template or auto-generated from a
/// request's tool schema. The id carries a protocol-appropriate prefix.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedToolCall {
    pub id: String,
    pub name: String,
    pub arguments: Map<String, Value>,
}

/// The result of a responder: either text content or one or more tool
/// calls, never both.
#[derive(Debug, Clone, PartialEq)]
pub enum Response {
    Text(String),
    ToolCalls(Vec<ResolvedToolCall>),
}

impl Response {
    pub fn text(s: impl Into<String>) -> Self {
        Self::Text(s.into())
    }

    pub fn is_tool_call(&self) -> bool {
        matches!(self, Self::ToolCalls(calls) if !calls.is_empty())
    }

    /// The text payload, or empty for tool-call responses. Used for the
    /// request log summary.
    pub fn text_content(&self) -> &str {
        match self {
            Self::Text(t) => t,
            Self::ToolCalls(_) => "",
        }
    }
}

/// What a responder produced, along with the rule pattern that matched
/// (if any) for the request log.
#[derive(Debug, Clone)]
pub struct Reply {
    pub response: Response,
    pub matched_rule: Option<String>,
}

impl Reply {
    pub fn text(s: impl Into<String>) -> Self {
        Self {
            response: Response::Text(s.into()),
            matched_rule: None,
        }
    }
}

/// Generates a response for a conversation.
pub trait Responder: Send + Sync {
    fn respond(&self, messages: &[InternalMessage]) -> Result<Reply, MockError>;
}

/// Echoes the last user message (or the last message if no user message).
#[derive(Debug, Clone, Copy, Default)]
pub struct EchoResponder;

impl Responder for EchoResponder {
    fn respond(&self, messages: &[InternalMessage]) -> Result<Reply, MockError> {
        let input = extract_input(messages);
        if input.is_empty() {
            return Err(MockError::NoMessages);
        }
        Ok(Reply::text(input))
    }
}

/// A tool definition carried in an API request: name plus the JSON schema
/// of its parameters.
#[derive(Debug, Clone)]
pub struct RequestTool {
    pub name: String,
    pub parameters: Option<Map<String, Value>>,
}

/// The input string fed to rule matching: content of the last message with
/// role "user", else the content of the last message regardless of role,
/// else empty.
pub fn extract_input(messages: &[InternalMessage]) -> String {
    for m in messages.iter().rev() {
        if m.role == "user" {
            return m.content.clone();
        }
    }
    messages.last().map(|m| m.content.clone()).unwrap_or_default()
}

/// Rough token estimate: ~1.3 tokens per whitespace-delimited word, rounded,
/// never zero for non-empty input.
pub fn count_tokens(s: &str) -> u32 {
    let words = s.split_whitespace().count();
    let tokens = (words as f64 * 1.3).round() as u32;
    if tokens == 0 && !s.is_empty() {
        1
    } else {
        tokens
    }
}

/// Token estimate for a message sequence, with 4 tokens of per-message
/// overhead for role and separators.
pub fn estimate_tokens(messages: &[InternalMessage]) -> u32 {
    messages
        .iter()
        .map(|m| count_tokens(&m.content) + 4)
        .sum()
}
