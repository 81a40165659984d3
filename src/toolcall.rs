//! Tool-call templates and resolution.

use std::fmt::Write as _;

use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::rules::expand_dollar_placeholders;
use crate::types::ResolvedToolCall;

/// A tool call to emit when a rule matches. String argument values may use
/// `$1`..`$9` and `${input}` placeholders; other values pass through as-is.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolCallTemplate {
    pub name: String,
    #[serde(default)]
    pub arguments: Map<String, Value>,
}

/// Mint a realistic-looking tool call id: the prefix followed by 12
/// cryptographically random bytes in hex. OpenAI uses `call_`, Anthropic
/// uses `toolu_`.
pub fn mint_tool_call_id(prefix: &str) -> String {
    let mut bytes = [0u8; 12];
    OsRng.fill_bytes(&mut bytes);
    let mut id = String::with_capacity(prefix.len() + 24);
    id.push_str(prefix);
    for b in bytes {
        let _ = write!(id, "{b:02x}");
    }
    id
}

/// Resolve a template into a concrete tool call, expanding capture-group
/// and `${input}` placeholders in string argument values.
pub fn resolve_tool_call(
    template: &ToolCallTemplate,
    captures: &[String],
    input: &str,
) -> ResolvedToolCall {
    let mut arguments = Map::with_capacity(template.arguments.len());
    for (key, value) in &template.arguments {
        let resolved = match value {
            Value::String(s) => {
                Value::String(expand_dollar_placeholders(s, captures, input))
            }
            other => other.clone(),
        };
        arguments.insert(key.clone(), resolved);
    }
    ResolvedToolCall {
        id: mint_tool_call_id("call_"),
        name: template.name.clone(),
        arguments,
    }
}
