//! Router-level tests for the HTTP surface.
//!
//! Drives the axum router in-process with `tower::ServiceExt::oneshot`;
//! no sockets involved.

use std::collections::BTreeMap;

use axum::body::Body;
use axum::http::{Request, StatusCode, header};
use futures::StreamExt;
use mcp_host::server::McpHost;
use serde_json::{Value, json};
use tower::util::ServiceExt;

fn host() -> McpHost {
    McpHost::new(BTreeMap::new())
}

fn rpc_request(body: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/mcp/rpc")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), 1024 * 1024)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

// =============================================================================
// POST /mcp/rpc
// =============================================================================

#[tokio::test]
async fn test_invalid_json_is_http_200_with_parse_error() {
    let response = host()
        .router()
        .oneshot(rpc_request("{not json"))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let envelope = body_json(response).await;
    assert_eq!(envelope["jsonrpc"], "2.0");
    assert_eq!(envelope["id"], Value::Null);
    assert_eq!(envelope["error"]["code"], -32700);
    assert_eq!(envelope["error"]["message"], "Parse error");
    assert!(envelope["error"]["data"].is_object());
}

#[tokio::test]
async fn test_builtin_echo_end_to_end() {
    let body = r#"{"jsonrpc":"2.0","method":"invoke_tool","params":{"tool":"echo","parameters":{"message":"hi"}},"id":7}"#;
    let response = host().router().oneshot(rpc_request(body)).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let envelope = body_json(response).await;
    assert_eq!(envelope["id"], 7);
    assert_eq!(envelope["result"]["echo"], "hi");
    assert!(envelope["result"]["timestamp"].is_string());
    assert!(envelope.get("error").is_none());
}

#[tokio::test]
async fn test_unknown_method_envelope() {
    let body = r#"{"jsonrpc":"2.0","method":"nope","id":3}"#;
    let response = host().router().oneshot(rpc_request(body)).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let envelope = body_json(response).await;
    assert_eq!(envelope["id"], 3);
    assert_eq!(envelope["error"]["code"], -32601);
    assert_eq!(envelope["error"]["message"], "Method not found");
    assert_eq!(envelope["error"]["data"]["method"], "nope");
}

#[tokio::test]
async fn test_notification_is_204_with_empty_body() {
    let body = r#"{"jsonrpc":"2.0","method":"bump","params":{}}"#;
    let response = host().router().oneshot(rpc_request(body)).await.unwrap();

    assert_eq!(response.status(), StatusCode::NO_CONTENT);
    let bytes = axum::body::to_bytes(response.into_body(), 1024).await.unwrap();
    assert!(bytes.is_empty());
}

#[tokio::test]
async fn test_mcp_alias_route() {
    let body = r#"{"jsonrpc":"2.0","method":"ping","id":1}"#;
    let request = Request::builder()
        .method("POST")
        .uri("/mcp")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body))
        .unwrap();
    let response = host().router().oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let envelope = body_json(response).await;
    assert_eq!(envelope["result"], json!({}));
}

#[tokio::test]
async fn test_client_id_echoed_and_minted() {
    // Echoed when supplied.
    let mut request = rpc_request(r#"{"jsonrpc":"2.0","method":"ping","id":1}"#);
    request
        .headers_mut()
        .insert("x-mcp-client-id", "client-42".parse().unwrap());
    let response = host().router().oneshot(request).await.unwrap();
    assert_eq!(response.headers()["x-mcp-client-id"], "client-42");

    // Minted when absent.
    let response = host()
        .router()
        .oneshot(rpc_request(r#"{"jsonrpc":"2.0","method":"ping","id":1}"#))
        .await
        .unwrap();
    let minted = response.headers()["x-mcp-client-id"].to_str().unwrap();
    assert!(uuid::Uuid::parse_str(minted).is_ok());
}

#[tokio::test]
async fn test_initialize_repeats_byte_identical() {
    let host = host();
    let body = r#"{"jsonrpc":"2.0","method":"initialize","id":1}"#;

    let mut documents = Vec::new();
    for _ in 0..3 {
        let response = host
            .router()
            .oneshot(rpc_request(body))
            .await
            .unwrap();
        let bytes = axum::body::to_bytes(response.into_body(), 1024 * 1024)
            .await
            .unwrap();
        documents.push(bytes);
    }
    assert_eq!(documents[0], documents[1]);
    assert_eq!(documents[1], documents[2]);
}

#[tokio::test]
async fn test_initialize_lists_builtin_tools() {
    let body = r#"{"jsonrpc":"2.0","method":"initialize","id":1}"#;
    let response = host().router().oneshot(rpc_request(body)).await.unwrap();
    let envelope = body_json(response).await;

    let tools = envelope["result"]["tools"].as_array().unwrap();
    let names: Vec<&str> = tools.iter().map(|t| t["name"].as_str().unwrap()).collect();
    assert!(names.contains(&"echo"));
    assert!(names.contains(&"timestamp"));
    assert!(names.contains(&"random_number"));
    assert!(envelope["result"]["resources"].is_array());
    assert_eq!(envelope["result"]["protocolVersion"], "0.1.0");
}

// =============================================================================
// SSE-upgraded POST
// =============================================================================

#[tokio::test]
async fn test_request_with_event_stream_accept_streams_response() {
    let mut request = rpc_request(r#"{"jsonrpc":"2.0","method":"ping","id":5}"#);
    request
        .headers_mut()
        .insert(header::ACCEPT, "text/event-stream".parse().unwrap());
    let response = host().router().oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert!(
        response.headers()[header::CONTENT_TYPE]
            .to_str()
            .unwrap()
            .starts_with("text/event-stream")
    );

    let bytes = axum::body::to_bytes(response.into_body(), 1024 * 1024)
        .await
        .unwrap();
    let text = String::from_utf8(bytes.to_vec()).unwrap();
    assert!(text.contains("event: message"));
    assert!(text.contains(r#""id":5"#));
}

// =============================================================================
// GET /mcp/stream
// =============================================================================

#[tokio::test]
async fn test_stream_opens_with_capabilities_then_delivers_notification() {
    let host = host();
    let router = host.router();
    let bus = host.bus();

    let request = Request::builder()
        .method("GET")
        .uri("/mcp/stream")
        .body(Body::empty())
        .unwrap();
    let response = router.oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[header::CACHE_CONTROL], "no-cache");
    let client_id = response.headers()["x-mcp-client-id"]
        .to_str()
        .unwrap()
        .to_string();

    let mut chunks = response.into_body().into_data_stream();

    let first = chunks.next().await.unwrap().unwrap();
    let first = String::from_utf8(first.to_vec()).unwrap();
    assert!(first.contains("event: capabilities"));
    assert!(first.contains("protocolVersion"));

    // A payload published to the client's topic arrives as a notification.
    let payload = json!({"jsonrpc":"2.0","method":"task/done","params":{"n":1}});
    let delivered =
        bus.publish(&format!("mcp:notifications:{client_id}"), payload.clone());
    assert_eq!(delivered, 1);

    let next = chunks.next().await.unwrap().unwrap();
    let next = String::from_utf8(next.to_vec()).unwrap();
    assert!(next.contains("event: notification"));
    let data_line = next
        .lines()
        .find_map(|l| l.strip_prefix("data: "))
        .unwrap();
    assert_eq!(serde_json::from_str::<Value>(data_line).unwrap(), payload);
}

#[tokio::test]
async fn test_connect_event_broadcast() {
    let host = host();
    let router = host.router();
    let bus = host.bus();
    let mut observer = bus.subscribe("observer", &["mcp:client_connected"]);

    let request = Request::builder()
        .method("GET")
        .uri("/mcp/stream")
        .header("x-mcp-client-id", "watched-client")
        .body(Body::empty())
        .unwrap();
    let response = router.oneshot(request).await.unwrap();
    let mut chunks = response.into_body().into_data_stream();
    let _ = chunks.next().await;

    let event = observer.recv().await.unwrap();
    assert_eq!(event.payload["client_id"], "watched-client");
}

// =============================================================================
// Health endpoints
// =============================================================================

#[tokio::test]
async fn test_health_and_ready() {
    let request = Request::builder()
        .method("GET")
        .uri("/health")
        .body(Body::empty())
        .unwrap();
    let response = host().router().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["status"], "ok");

    let request = Request::builder()
        .method("GET")
        .uri("/ready")
        .body(Body::empty())
        .unwrap();
    let response = host().router().oneshot(request).await.unwrap();
    let body = body_json(response).await;
    assert_eq!(body["status"], "ready");
    assert_eq!(body["backends"], 0);
}
