//! OpenAI endpoint tests.

use serde_json::{json, Value};

use crate::common::*;

#[tokio::test]
async fn test_chat_completion_echo() {
    let server = TestServer::spawn().await;

    let response = server
        .post("/v1/chat/completions", chat_request("m", "Hello, world!"))
        .await;
    assert_eq!(response.status().as_u16(), 200);

    let body: Value = response.json().await.unwrap();
    assert_eq!(body["object"], "chat.completion");
    assert_eq!(body["choices"][0]["message"]["content"], "Hello, world!");
    assert_eq!(body["choices"][0]["message"]["role"], "assistant");
    assert_eq!(body["choices"][0]["finish_reason"], "stop");
    assert!(body["id"].as_str().unwrap().starts_with("chatcmpl-"));
    assert!(body["usage"]["prompt_tokens"].as_u64().unwrap() > 0);
    assert!(body["usage"]["completion_tokens"].as_u64().unwrap() > 0);
    assert_eq!(
        body["usage"]["total_tokens"].as_u64().unwrap(),
        body["usage"]["prompt_tokens"].as_u64().unwrap()
            + body["usage"]["completion_tokens"].as_u64().unwrap()
    );
}

#[tokio::test]
async fn test_echo_uses_last_user_message() {
    let server = TestServer::spawn().await;

    let body = json!({
        "model": "m",
        "messages": [
            {"role": "system", "content": "be helpful"},
            {"role": "user", "content": "first"},
            {"role": "assistant", "content": "reply"},
            {"role": "user", "content": "second"}
        ]
    });
    let response = server.post("/v1/chat/completions", body).await;
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["choices"][0]["message"]["content"], "second");
}

#[tokio::test]
async fn test_missing_model_uses_default() {
    let server = TestServer::spawn().await;

    let body = json!({"messages": [{"role": "user", "content": "hi"}]});
    let response = server.post("/v1/chat/completions", body).await;
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["model"], "llmock-1");
}

#[tokio::test]
async fn test_empty_messages_is_400() {
    let server = TestServer::spawn().await;

    let response = server
        .post("/v1/chat/completions", json!({"model": "m", "messages": []}))
        .await;
    assert_eq!(response.status().as_u16(), 400);

    let body: Value = response.json().await.unwrap();
    assert_eq!(body["error"]["type"], "invalid_request_error");
}

#[tokio::test]
async fn test_invalid_json_is_400() {
    let server = TestServer::spawn().await;

    let response = server.post_raw("/v1/chat/completions", "{not json").await;
    assert_eq!(response.status().as_u16(), 400);

    let body: Value = response.json().await.unwrap();
    assert!(body["error"]["message"]
        .as_str()
        .unwrap()
        .contains("invalid JSON"));
}

#[tokio::test]
async fn test_get_on_post_route_is_405() {
    let server = TestServer::spawn().await;
    let response = server.get("/v1/chat/completions").await;
    assert_eq!(response.status().as_u16(), 405);
}

#[tokio::test]
async fn test_unknown_path_is_404() {
    let server = TestServer::spawn().await;
    let response = server.get("/v1/definitely/not/here").await;
    assert_eq!(response.status().as_u16(), 404);
}

#[tokio::test]
async fn test_streaming_reconstructs_text() {
    let server = TestServer::spawn().await;

    let body = json!({
        "model": "m",
        "stream": true,
        "messages": [{"role": "user", "content": "The quick brown fox jumps over the lazy dog"}]
    });
    let response = server.post("/v1/chat/completions", body).await;
    assert_eq!(response.status().as_u16(), 200);
    assert!(response
        .headers()
        .get("content-type")
        .unwrap()
        .to_str()
        .unwrap()
        .starts_with("text/event-stream"));

    let text = response.text().await.unwrap();
    let lines = sse_data_lines(&text);
    assert_eq!(lines.last().map(String::as_str), Some("[DONE]"));

    let chunks: Vec<Value> = lines[..lines.len() - 1]
        .iter()
        .map(|l| serde_json::from_str(l).unwrap())
        .collect();

    // All chunks share one id and the right object type.
    let id = chunks[0]["id"].as_str().unwrap();
    for chunk in &chunks {
        assert_eq!(chunk["id"], id);
        assert_eq!(chunk["object"], "chat.completion.chunk");
    }

    // First content chunk carries the role.
    assert_eq!(chunks[0]["choices"][0]["delta"]["role"], "assistant");

    // Concatenating deltas reproduces the echoed text.
    let assembled: String = chunks
        .iter()
        .filter_map(|c| c["choices"][0]["delta"]["content"].as_str())
        .collect();
    assert_eq!(assembled, "The quick brown fox jumps over the lazy dog");

    // Final chunk has an empty delta and finish_reason stop.
    let last = chunks.last().unwrap();
    assert_eq!(last["choices"][0]["finish_reason"], "stop");
    assert_eq!(last["choices"][0]["delta"], json!({}));
}

#[tokio::test]
async fn test_tool_call_rule() {
    let config = config_from_yaml(
        r#"
rules:
  - pattern: "weather"
    tool_call:
      name: get_weather
      arguments:
        city: London
"#,
    );
    let server = TestServer::spawn_with_config(config).await;

    let body = json!({
        "model": "m",
        "messages": [{"role": "user", "content": "What is the weather?"}],
        "tools": [{"type": "function", "function": {"name": "get_weather"}}]
    });
    let response = server.post("/v1/chat/completions", body).await;
    let body: Value = response.json().await.unwrap();

    assert_eq!(body["choices"][0]["finish_reason"], "tool_calls");
    let tc = &body["choices"][0]["message"]["tool_calls"][0];
    assert!(tc["id"].as_str().unwrap().starts_with("call_"));
    assert_eq!(tc["type"], "function");
    assert_eq!(tc["function"]["name"], "get_weather");
    let args: Value = serde_json::from_str(tc["function"]["arguments"].as_str().unwrap()).unwrap();
    assert_eq!(args, json!({"city": "London"}));
}

#[tokio::test]
async fn test_tool_call_filtered_when_not_declared() {
    let config = config_from_yaml(
        r#"
rules:
  - pattern: "weather"
    responses: ["Sunny."]
    tool_call:
      name: get_weather
      arguments:
        city: London
"#,
    );
    let server = TestServer::spawn_with_config(config).await;

    // The declared tool list does not contain get_weather, so the call is
    // filtered out and the response falls through to text.
    let body = json!({
        "model": "m",
        "messages": [{"role": "user", "content": "weather please"}],
        "tools": [{"type": "function", "function": {"name": "something_else"}}]
    });
    let response = server.post("/v1/chat/completions", body).await;
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["choices"][0]["finish_reason"], "stop");
}

#[tokio::test]
async fn test_max_calls_exhaustion() {
    let config = config_from_yaml(
        r#"
rules:
  - pattern: "fetch"
    responses: ["Done fetching."]
    tool_call:
      name: fetch_results
    max_calls: 2
"#,
    );
    let server = TestServer::spawn_with_config(config).await;

    let request = json!({
        "model": "m",
        "messages": [{"role": "user", "content": "fetch results"}],
        "tools": [{"type": "function", "function": {"name": "fetch_results"}}]
    });

    for _ in 0..2 {
        let response = server.post("/v1/chat/completions", request.clone()).await;
        let body: Value = response.json().await.unwrap();
        assert_eq!(body["choices"][0]["finish_reason"], "tool_calls");
    }

    let response = server.post("/v1/chat/completions", request).await;
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["choices"][0]["finish_reason"], "stop");
    assert_eq!(body["choices"][0]["message"]["content"], "Done fetching.");
}

#[tokio::test]
async fn test_streaming_tool_call_arguments_reassemble() {
    let config = config_from_yaml(
        r#"
rules:
  - pattern: "weather"
    tool_call:
      name: get_weather
      arguments:
        city: London
        units: celsius
"#,
    );
    let server = TestServer::spawn_with_config(config).await;

    let body = json!({
        "model": "m",
        "stream": true,
        "messages": [{"role": "user", "content": "weather please"}],
        "tools": [{"type": "function", "function": {"name": "get_weather"}}]
    });
    let response = server.post("/v1/chat/completions", body).await;
    let text = response.text().await.unwrap();
    let lines = sse_data_lines(&text);
    assert_eq!(lines.last().map(String::as_str), Some("[DONE]"));

    let chunks: Vec<Value> = lines[..lines.len() - 1]
        .iter()
        .map(|l| serde_json::from_str(l).unwrap())
        .collect();

    // Opening chunk announces the call with an empty arguments string.
    let open = &chunks[0]["choices"][0]["delta"]["tool_calls"][0];
    assert_eq!(open["function"]["name"], "get_weather");
    assert_eq!(open["function"]["arguments"], "");
    assert!(open["id"].as_str().unwrap().starts_with("call_"));

    // Concatenated argument slices decode to the resolved arguments.
    let assembled: String = chunks[1..]
        .iter()
        .filter_map(|c| {
            c["choices"][0]["delta"]["tool_calls"][0]["function"]["arguments"].as_str()
        })
        .collect();
    let args: Value = serde_json::from_str(&assembled).unwrap();
    assert_eq!(args, json!({"city": "London", "units": "celsius"}));

    assert_eq!(
        chunks.last().unwrap()["choices"][0]["finish_reason"],
        "tool_calls"
    );
}

#[tokio::test]
async fn test_tool_results_demote_tool_calls() {
    let config = config_from_yaml(
        r#"
rules:
  - pattern: "(?i)weather"
    tool_call:
      name: get_weather
      arguments:
        location: Paris
  - pattern: ".*"
    responses: ["fallback"]
"#,
    );
    let server = TestServer::spawn_with_config(config).await;

    // Without tool results the rule fires a tool call.
    let first = json!({
        "model": "m",
        "messages": [{"role": "user", "content": "What's the weather?"}],
        "tools": [{"type": "function", "function": {"name": "get_weather"}}]
    });
    let response = server.post("/v1/chat/completions", first).await;
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["choices"][0]["finish_reason"], "tool_calls");

    // With a tool-role result in the conversation, the response must be text.
    let second = json!({
        "model": "m",
        "messages": [
            {"role": "user", "content": "What's the weather?"},
            {"role": "assistant", "content": null, "tool_calls": [
                {"id": "call_1", "type": "function",
                 "function": {"name": "get_weather", "arguments": "{\"location\":\"Paris\"}"}}
            ]},
            {"role": "tool", "tool_call_id": "call_1", "content": "72F and sunny"}
        ],
        "tools": [{"type": "function", "function": {"name": "get_weather"}}]
    });
    let response = server.post("/v1/chat/completions", second).await;
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["choices"][0]["finish_reason"], "stop");
    assert!(!body["choices"][0]["message"]["content"]
        .as_str()
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn test_auto_tool_calls_from_schema() {
    let mut config = test_config();
    config.defaults.auto_tool_calls = true;
    let server = TestServer::spawn_with_config(config).await;

    let request = json!({
        "model": "m",
        "messages": [{"role": "user", "content": "look up the forecast"}],
        "tools": [{"type": "function", "function": {
            "name": "get_forecast",
            "parameters": {
                "type": "object",
                "properties": {
                    "city": {"type": "string", "description": "The city to look up"}
                },
                "required": ["city"]
            }
        }}]
    });
    let response = server.post("/v1/chat/completions", request).await;
    let body: Value = response.json().await.unwrap();

    assert_eq!(body["choices"][0]["finish_reason"], "tool_calls");
    let tc = &body["choices"][0]["message"]["tool_calls"][0];
    assert_eq!(tc["function"]["name"], "get_forecast");
    let args: Value = serde_json::from_str(tc["function"]["arguments"].as_str().unwrap()).unwrap();
    assert!(args["city"].is_string());
}

#[tokio::test]
async fn test_auto_tool_calls_suppressed_by_tool_results() {
    let mut config = test_config();
    config.defaults.auto_tool_calls = true;
    let server = TestServer::spawn_with_config(config).await;

    let request = json!({
        "model": "m",
        "messages": [
            {"role": "user", "content": "do it"},
            {"role": "assistant", "content": null, "tool_calls": [
                {"id": "call_1", "type": "function", "function": {"name": "act", "arguments": "{}"}}
            ]},
            {"role": "tool", "tool_call_id": "call_1", "content": "done"},
            {"role": "user", "content": "thanks"}
        ],
        "tools": [{"type": "function", "function": {"name": "act"}}]
    });
    let response = server.post("/v1/chat/completions", request).await;
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["choices"][0]["finish_reason"], "stop");
}

#[tokio::test]
async fn test_multipart_content_matches_rules() {
    let config = config_from_yaml(
        r#"
rules:
  - pattern: "second part"
    responses: ["matched parts"]
"#,
    );
    let server = TestServer::spawn_with_config(config).await;

    let request = json!({
        "model": "m",
        "messages": [{"role": "user", "content": [
            {"type": "text", "text": "first part"},
            {"type": "text", "text": "second part"}
        ]}]
    });
    let response = server.post("/v1/chat/completions", request).await;
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["choices"][0]["message"]["content"], "matched parts");
}
