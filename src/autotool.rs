//! Auto-generation of tool calls from JSON schemas.
//!
//! When enabled and no rule produced a tool call, the server picks one of
//! the request's declared tools at random and generates arguments that
//! conform to its parameters schema.

use parking_lot::Mutex;
use rand::prelude::*;
use serde_json::{Map, Number, Value};

use crate::toolcall::mint_tool_call_id;
use crate::types::{RequestTool, ResolvedToolCall};

/// Pick a tool from the request and generate arguments conforming to its
/// JSON schema. Returns `None` when no tools are declared.
pub fn generate_tool_call(
    tools: &[RequestTool],
    rng: &Mutex<StdRng>,
) -> Option<ResolvedToolCall> {
    if tools.is_empty() {
        return None;
    }
    let mut rng = rng.lock();
    let tool = &tools[rng.gen_range(0..tools.len())];

    let args = match &tool.parameters {
        Some(schema) => generate_from_schema(schema, &mut rng),
        None => Value::Object(Map::new()),
    };
    let arguments = match args {
        Value::Object(map) => map,
        _ => Map::new(),
    };

    Some(ResolvedToolCall {
        id: mint_tool_call_id("call_"),
        name: tool.name.clone(),
        arguments,
    })
}

/// Generate a value conforming to a JSON schema node. Handles type,
/// properties, required, enum, items, and nesting.
fn generate_from_schema(schema: &Map<String, Value>, rng: &mut StdRng) -> Value {
    // Enum wins over everything else.
    if let Some(Value::Array(options)) = schema.get("enum") {
        if !options.is_empty() {
            return options[rng.gen_range(0..options.len())].clone();
        }
    }

    let typ = schema.get("type").and_then(Value::as_str).unwrap_or("");

    match typ {
        "object" => Value::Object(generate_object(schema, rng)),
        "array" => Value::Array(generate_array(schema, rng)),
        "string" => Value::String(generate_string(schema, rng)),
        "number" => {
            let n = rng.gen_range(0..1000) as f64 / 10.0;
            Number::from_f64(n).map(Value::Number).unwrap_or(Value::Null)
        }
        "integer" => Value::Number(Number::from(rng.gen_range(0..100))),
        "boolean" => Value::Bool(rng.gen_bool(0.5)),
        "null" => Value::Null,
        _ => {
            // Unspecified type with properties present: treat as object.
            if schema.contains_key("properties") {
                Value::Object(generate_object(schema, rng))
            } else {
                Value::Object(Map::new())
            }
        }
    }
}

/// All required properties, plus each optional property with probability 1/2.
fn generate_object(schema: &Map<String, Value>, rng: &mut StdRng) -> Map<String, Value> {
    let mut result = Map::new();

    let Some(Value::Object(props)) = schema.get("properties") else {
        return result;
    };

    let required: Vec<&str> = schema
        .get("required")
        .and_then(Value::as_array)
        .map(|arr| arr.iter().filter_map(Value::as_str).collect())
        .unwrap_or_default();

    for (name, prop_schema) in props {
        let Value::Object(prop) = prop_schema else {
            continue;
        };
        if required.contains(&name.as_str()) || rng.gen_bool(0.5) {
            result.insert(name.clone(), generate_from_schema(prop, rng));
        }
    }

    result
}

/// 1-3 items matching the items schema.
fn generate_array(schema: &Map<String, Value>, rng: &mut StdRng) -> Vec<Value> {
    let count = 1 + rng.gen_range(0..3);
    let empty = Map::new();
    let item_schema = match schema.get("items") {
        Some(Value::Object(m)) => m,
        _ => &empty,
    };
    (0..count).map(|_| generate_from_schema(item_schema, rng)).collect()
}

const SAMPLE_STRINGS: &[&str] = &[
    "hello", "world", "test", "example", "foo", "bar", "sample", "data", "value", "mock",
    "item", "entry",
];

const SAMPLE_CITIES: &[&str] = &[
    "San Francisco", "New York", "London", "Tokyo", "Berlin", "Paris",
];

const SAMPLE_NAMES: &[&str] = &["Alice", "Bob", "Charlie", "Dana", "Eve"];

const SAMPLE_LANGUAGES: &[&str] = &["en", "fr", "de", "ja", "es"];

/// A string value: format takes priority, then description hints, then a
/// generic sample.
fn generate_string(schema: &Map<String, Value>, rng: &mut StdRng) -> String {
    if let Some(format) = schema.get("format").and_then(Value::as_str) {
        match format {
            "date" => {
                return format!("2024-{:02}-{:02}", 1 + rng.gen_range(0..12), 1 + rng.gen_range(0..28));
            }
            "date-time" => {
                return format!(
                    "2024-{:02}-{:02}T{:02}:{:02}:{:02}Z",
                    1 + rng.gen_range(0..12),
                    1 + rng.gen_range(0..28),
                    rng.gen_range(0..24),
                    rng.gen_range(0..60),
                    rng.gen_range(0..60),
                );
            }
            "email" => {
                return format!("{}@example.com", pick(SAMPLE_STRINGS, rng));
            }
            "uri" | "url" => {
                return format!("https://example.com/{}", pick(SAMPLE_STRINGS, rng));
            }
            _ => {}
        }
    }

    if let Some(desc) = schema.get("description").and_then(Value::as_str) {
        let lower = desc.to_lowercase();
        if lower.contains("location") || lower.contains("city") {
            return pick(SAMPLE_CITIES, rng).to_string();
        }
        if lower.contains("name") {
            return pick(SAMPLE_NAMES, rng).to_string();
        }
        if lower.contains("language") {
            return pick(SAMPLE_LANGUAGES, rng).to_string();
        }
    }

    pick(SAMPLE_STRINGS, rng).to_string()
}

fn pick<'a>(options: &'a [&'a str], rng: &mut StdRng) -> &'a str {
    options[rng.gen_range(0..options.len())]
}
