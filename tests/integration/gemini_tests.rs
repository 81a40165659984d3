//! Gemini endpoint tests.

use serde_json::{json, Value};

use crate::common::*;

#[tokio::test]
async fn test_generate_content_echo() {
    let server = TestServer::spawn().await;

    let response = server
        .post(
            "/v1beta/models/gemini-pro:generateContent",
            gemini_request("Hello Gemini"),
        )
        .await;
    assert_eq!(response.status().as_u16(), 200);

    let body: Value = response.json().await.unwrap();
    let candidate = &body["candidates"][0];
    assert_eq!(candidate["content"]["role"], "model");
    assert_eq!(candidate["content"]["parts"][0]["text"], "Hello Gemini");
    assert_eq!(candidate["finishReason"], "STOP");
    assert!(body["usageMetadata"]["promptTokenCount"].as_u64().unwrap() > 0);
    assert_eq!(
        body["usageMetadata"]["totalTokenCount"].as_u64().unwrap(),
        body["usageMetadata"]["promptTokenCount"].as_u64().unwrap()
            + body["usageMetadata"]["candidatesTokenCount"]
                .as_u64()
                .unwrap()
    );
}

#[tokio::test]
async fn test_empty_contents_is_400_gemini_shape() {
    let server = TestServer::spawn().await;

    let response = server
        .post("/v1beta/models/gemini-pro:generateContent", json!({"contents": []}))
        .await;
    assert_eq!(response.status().as_u16(), 400);

    let body: Value = response.json().await.unwrap();
    assert_eq!(body["error"]["code"], 400);
    assert!(body["error"]["message"]
        .as_str()
        .unwrap()
        .contains("contents"));
}

#[tokio::test]
async fn test_unknown_method_suffix_is_404() {
    let server = TestServer::spawn().await;
    let response = server
        .post("/v1beta/models/gemini-pro:countTokens", gemini_request("x"))
        .await;
    assert_eq!(response.status().as_u16(), 404);
}

#[tokio::test]
async fn test_stream_generate_content() {
    let server = TestServer::spawn().await;

    let response = server
        .post(
            "/v1beta/models/gemini-pro:streamGenerateContent",
            gemini_request("Hello streaming world"),
        )
        .await;
    assert_eq!(response.status().as_u16(), 200);
    assert!(response
        .headers()
        .get("content-type")
        .unwrap()
        .to_str()
        .unwrap()
        .starts_with("text/event-stream"));

    let text = response.text().await.unwrap();
    let chunks: Vec<Value> = sse_data_lines(&text)
        .iter()
        .map(|l| serde_json::from_str(l).unwrap())
        .collect();
    assert!(!chunks.is_empty());

    let assembled: String = chunks
        .iter()
        .filter_map(|c| c["candidates"][0]["content"]["parts"][0]["text"].as_str())
        .collect();
    assert_eq!(assembled, "Hello streaming world");

    // Intermediate chunks carry no finish reason; the final one does,
    // along with populated usage metadata.
    for chunk in &chunks[..chunks.len() - 1] {
        assert!(chunk["candidates"][0]["finishReason"].is_null());
    }
    let last = chunks.last().unwrap();
    assert_eq!(last["candidates"][0]["finishReason"], "STOP");
    assert!(last["usageMetadata"]["promptTokenCount"].as_u64().unwrap() > 0);
}

#[tokio::test]
async fn test_function_call_response() {
    let config = config_from_yaml(
        r#"
rules:
  - pattern: "(?i)translate"
    tool_call:
      name: translate_text
      arguments:
        target: fr
"#,
    );
    let server = TestServer::spawn_with_config(config).await;

    let request = json!({
        "contents": [{"role": "user", "parts": [{"text": "Translate this please"}]}],
        "tools": [{"functionDeclarations": [{"name": "translate_text"}]}]
    });
    let response = server
        .post("/v1beta/models/gemini-pro:generateContent", request)
        .await;
    let body: Value = response.json().await.unwrap();

    let part = &body["candidates"][0]["content"]["parts"][0];
    assert_eq!(part["functionCall"]["name"], "translate_text");
    assert_eq!(part["functionCall"]["args"], json!({"target": "fr"}));
    assert_eq!(body["candidates"][0]["finishReason"], "STOP");
}

#[tokio::test]
async fn test_function_response_suppresses_function_call() {
    let config = config_from_yaml(
        r#"
rules:
  - pattern: "(?i)translate"
    tool_call:
      name: translate_text
      arguments:
        target: fr
  - pattern: ".*"
    responses: ["ok"]
"#,
    );
    let server = TestServer::spawn_with_config(config).await;

    let request = json!({
        "contents": [
            {"role": "user", "parts": [{"text": "Translate this please"}]},
            {"role": "model", "parts": [
                {"functionCall": {"name": "translate_text", "args": {"target": "fr"}}}
            ]},
            {"role": "user", "parts": [
                {"functionResponse": {"name": "translate_text",
                 "response": {"result": "translate done"}}}
            ]}
        ],
        "tools": [{"functionDeclarations": [{"name": "translate_text"}]}]
    });
    let response = server
        .post("/v1beta/models/gemini-pro:generateContent", request)
        .await;
    let body: Value = response.json().await.unwrap();

    let part = &body["candidates"][0]["content"]["parts"][0];
    assert!(part["functionCall"].is_null());
    assert!(part["text"].is_string());
}

#[tokio::test]
async fn test_system_instruction_used_for_matching() {
    let config = config_from_yaml(
        r#"
rules:
  - pattern: "harness"
    responses: ["from system"]
"#,
    );
    let server = TestServer::spawn_with_config(config).await;

    // With only a model message, input extraction falls back to the last
    // message; a system-instruction-only conversation keeps working.
    let request = json!({
        "systemInstruction": {"parts": [{"text": "You are a harness"}]},
        "contents": [{"role": "user", "parts": [{"text": "talk to the harness"}]}]
    });
    let response = server
        .post("/v1beta/models/gemini-pro:generateContent", request)
        .await;
    let body: Value = response.json().await.unwrap();
    assert_eq!(
        body["candidates"][0]["content"]["parts"][0]["text"],
        "from system"
    );
}
