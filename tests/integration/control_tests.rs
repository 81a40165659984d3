//! Control plane tests: admin mutators exposed as MCP tools.

use serde_json::{json, Value};

use crate::common::*;

async fn control_call(server: &TestServer, name: &str, args: Value) -> Value {
    server
        .post(
            "/mcp/control",
            json!({
                "jsonrpc": "2.0",
                "id": 1,
                "method": "tools/call",
                "params": {"name": name, "arguments": args}
            }),
        )
        .await
        .json()
        .await
        .unwrap()
}

#[tokio::test]
async fn test_initialize_and_tools_list() {
    let server = TestServer::spawn().await;

    let resp: Value = server
        .post(
            "/mcp/control",
            json!({"jsonrpc": "2.0", "id": 1, "method": "initialize"}),
        )
        .await
        .json()
        .await
        .unwrap();
    assert_eq!(resp["result"]["serverInfo"]["name"], "llmock-control");

    let resp: Value = server
        .post(
            "/mcp/control",
            json!({"jsonrpc": "2.0", "id": 2, "method": "tools/list"}),
        )
        .await
        .json()
        .await
        .unwrap();
    let names: Vec<&str> = resp["result"]["tools"]
        .as_array()
        .unwrap()
        .iter()
        .map(|t| t["name"].as_str().unwrap())
        .collect();
    assert_eq!(names.len(), 9);
    for expected in [
        "llmock_add_rule",
        "llmock_list_rules",
        "llmock_reset_rules",
        "llmock_add_fault",
        "llmock_list_faults",
        "llmock_clear_faults",
        "llmock_list_requests",
        "llmock_clear_requests",
        "llmock_reset",
    ] {
        assert!(names.contains(&expected), "missing {expected}");
    }
}

#[tokio::test]
async fn test_add_rule_changes_responses() {
    let server = TestServer::spawn().await;

    let resp = control_call(
        &server,
        "llmock_add_rule",
        json!({"pattern": "(?i)status", "responses": ["all good"]}),
    )
    .await;
    assert_eq!(resp["result"]["content"][0]["text"], "Rule added successfully");

    let body: Value = server
        .post("/v1/chat/completions", chat_request("m", "status please"))
        .await
        .json()
        .await
        .unwrap();
    assert_eq!(body["choices"][0]["message"]["content"], "all good");
}

#[tokio::test]
async fn test_add_fault_and_clear_via_control() {
    let server = TestServer::spawn().await;

    control_call(&server, "llmock_add_fault", json!({"type": "rate_limit"})).await;

    let response = server
        .post("/v1/chat/completions", chat_request("m", "hi"))
        .await;
    assert_eq!(response.status().as_u16(), 429);

    control_call(&server, "llmock_clear_faults", json!({})).await;
    let response = server
        .post("/v1/chat/completions", chat_request("m", "hi"))
        .await;
    assert_eq!(response.status().as_u16(), 200);
}

#[tokio::test]
async fn test_list_requests_via_control() {
    let server = TestServer::spawn().await;

    server
        .post("/v1/chat/completions", chat_request("m", "logged message"))
        .await;

    let resp = control_call(&server, "llmock_list_requests", json!({})).await;
    let text = resp["result"]["content"][0]["text"].as_str().unwrap();
    let entries: Value = serde_json::from_str(text).unwrap();
    assert_eq!(entries[0]["user_message"], "logged message");

    control_call(&server, "llmock_clear_requests", json!({})).await;
    let resp = control_call(&server, "llmock_list_requests", json!({})).await;
    let text = resp["result"]["content"][0]["text"].as_str().unwrap();
    assert_eq!(serde_json::from_str::<Value>(text).unwrap(), json!([]));
}

#[tokio::test]
async fn test_validation_error_uses_is_error_result() {
    let server = TestServer::spawn().await;

    let resp = control_call(&server, "llmock_add_rule", json!({"responses": ["x"]})).await;
    assert_eq!(resp["result"]["isError"], json!(true));
    assert!(resp["error"].is_null());

    let resp = control_call(
        &server,
        "llmock_add_rule",
        json!({"pattern": "(bad", "responses": ["x"]}),
    )
    .await;
    assert_eq!(resp["result"]["isError"], json!(true));
}

#[tokio::test]
async fn test_unknown_tool_is_rpc_error() {
    let server = TestServer::spawn().await;
    let resp = control_call(&server, "llmock_nonexistent", json!({})).await;
    assert_eq!(resp["error"]["code"], -32602);
}

#[tokio::test]
async fn test_full_reset_via_control_clears_faults_too() {
    let server = TestServer::spawn().await;

    control_call(
        &server,
        "llmock_add_rule",
        json!({"pattern": "x", "responses": ["y"]}),
    )
    .await;
    control_call(&server, "llmock_add_fault", json!({"type": "error"})).await;

    let resp = control_call(&server, "llmock_reset", json!({})).await;
    assert_eq!(resp["result"]["content"][0]["text"], "Full reset complete");

    // Unlike POST /_mock/reset, the control-plane reset clears faults.
    let faults: Value = server.get("/_mock/faults").await.json().await.unwrap();
    assert_eq!(faults["faults"], json!([]));

    let rules: Value = server.get("/_mock/rules").await.json().await.unwrap();
    assert_eq!(rules["rules"], json!([]));
}

#[tokio::test]
async fn test_wrong_version_on_control() {
    let server = TestServer::spawn().await;
    let resp: Value = server
        .post(
            "/mcp/control",
            json!({"jsonrpc": "2.0-beta", "id": 1, "method": "tools/list"}),
        )
        .await
        .json()
        .await
        .unwrap();
    assert_eq!(resp["error"]["code"], -32600);
}
