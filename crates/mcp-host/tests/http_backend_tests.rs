//! Tests for the HTTP backend transport, driven against wiremock.

use std::collections::BTreeMap;
use std::sync::Arc;

use mcp_host::backend::{HttpBackend, ServerManager};
use mcp_host::config::BackendConfig;
use serde_json::json;
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, Request, ResponseTemplate};

fn http_config(url: &str) -> BackendConfig {
    serde_json::from_value(json!({
        "transport": "http",
        "url": url,
        "tools": {
            "remote_upper": {
                "description": "Uppercase a string remotely",
                "parameters": [
                    {"name": "s", "type": "string", "required": true}
                ]
            }
        }
    }))
    .unwrap()
}

#[tokio::test]
async fn test_tool_call_round_trip() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/"))
        .and(body_partial_json(json!({
            "jsonrpc": "2.0",
            "method": "tools/call",
            "params": { "name": "remote_upper", "arguments": { "s": "ab" } },
        })))
        .respond_with(move |req: &Request| {
            let envelope: serde_json::Value = serde_json::from_slice(&req.body).unwrap();
            ResponseTemplate::new(200).set_body_json(json!({
                "jsonrpc": "2.0",
                "result": { "out": "AB" },
                "id": envelope["id"],
            }))
        })
        .mount(&server)
        .await;

    let backend = HttpBackend::new("remote", &http_config(&server.uri())).unwrap();
    let result = backend
        .execute_tool("remote_upper", json!({"s": "ab"}))
        .await
        .unwrap();
    assert_eq!(result, json!({"out": "AB"}));
}

#[tokio::test]
async fn test_backend_error_forwarded_verbatim() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "jsonrpc": "2.0",
            "error": {
                "code": -32011,
                "message": "quota exhausted",
                "data": { "retry_after": 30 },
            },
            "id": 1,
        })))
        .mount(&server)
        .await;

    let backend = HttpBackend::new("remote", &http_config(&server.uri())).unwrap();
    let err = backend
        .execute_tool("remote_upper", json!({"s": "x"}))
        .await
        .unwrap_err();
    assert_eq!(err.code, -32011);
    assert_eq!(err.message, "quota exhausted");
    assert_eq!(err.data.unwrap()["retry_after"], 30);
}

#[tokio::test]
async fn test_malformed_reply_wrapped_as_execution_failure() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({"unexpected": true})),
        )
        .mount(&server)
        .await;

    let backend = HttpBackend::new("remote", &http_config(&server.uri())).unwrap();
    let err = backend
        .execute_tool("remote_upper", json!({}))
        .await
        .unwrap_err();
    assert_eq!(err.code, -32000);
    assert_eq!(err.message, "tool execution failed");
}

#[tokio::test]
async fn test_declared_tools_advertised() {
    let backend = HttpBackend::new("remote", &http_config("http://127.0.0.1:9")).unwrap();
    let tools = backend.tool_descriptors();
    assert_eq!(tools.len(), 1);
    assert_eq!(tools[0].name, "remote_upper");
    assert_eq!(tools[0].input_schema["required"], json!(["s"]));
}

#[tokio::test]
async fn test_manager_routes_to_http_backend() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(move |req: &Request| {
            let envelope: serde_json::Value = serde_json::from_slice(&req.body).unwrap();
            ResponseTemplate::new(200).set_body_json(json!({
                "jsonrpc": "2.0",
                "result": { "ok": true },
                "id": envelope["id"],
            }))
        })
        .mount(&server)
        .await;

    let mut configs = BTreeMap::new();
    configs.insert("remote".to_string(), http_config(&server.uri()));

    let manager = Arc::new(ServerManager::new(configs));
    manager.start().await;

    assert!(manager.resolves("remote_upper"));
    let result = manager
        .execute_tool(None, "remote_upper", json!({"s": "x"}))
        .await
        .unwrap();
    assert_eq!(result["ok"], true);

    manager.shutdown().await;
}
