//! HTTP surface: the axum router and handlers.
//!
//! `POST /mcp/rpc` (alias `/mcp`) carries one JSON-RPC message per body;
//! `GET /mcp/stream` opens the long-lived SSE stream. JSON-RPC errors ride
//! inside a 200; only transport failures surface as other statuses.

use std::sync::Arc;

use axum::{
    Json, Router,
    body::Bytes,
    extract::State,
    http::{HeaderMap, HeaderValue, StatusCode, header},
    response::{IntoResponse, Response, sse::Sse},
    routing::{get, post},
};
use serde_json::json;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use super::dispatch::{Dispatcher, HttpReply};
use super::sse;
use crate::backend::ServerManager;
use crate::bus::NotificationBus;

/// Header carrying the opaque client identifier, echoed on every reply.
pub const CLIENT_ID_HEADER: &str = "x-mcp-client-id";

/// Shared state for HTTP handlers.
pub struct AppState {
    pub dispatcher: Dispatcher,
    pub bus: Arc<NotificationBus>,
    pub manager: Arc<ServerManager>,
}

/// Create the HTTP router.
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/ready", get(readiness_check))
        .route("/mcp", post(handle_rpc))
        .route("/mcp/rpc", post(handle_rpc))
        .route("/mcp/stream", get(handle_stream))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health_check() -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "service": env!("CARGO_PKG_NAME"),
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

async fn readiness_check(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(json!({
        "status": "ready",
        "service": env!("CARGO_PKG_NAME"),
        "version": env!("CARGO_PKG_VERSION"),
        "backends": state.manager.running_backends().await,
        "tools": state.manager.routed_tools().len(),
        "clients": state.bus.subscriber_count(),
    }))
}

/// One JSON-RPC message per POST body.
async fn handle_rpc(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let client_id = client_id_from(&headers);
    let accept = headers
        .get(header::ACCEPT)
        .and_then(|v| v.to_str().ok());

    let reply = state
        .dispatcher
        .handle_post(&client_id, &body, accept)
        .await;

    let mut response = match reply {
        HttpReply::Json(envelope) => Json(envelope).into_response(),
        HttpReply::NoContent => StatusCode::NO_CONTENT.into_response(),
        HttpReply::Stream(envelope) => {
            Sse::new(sse::response_stream(envelope)).into_response()
        }
    };
    set_client_id(&mut response, &client_id);
    response
}

/// Long-lived SSE stream for server-initiated events.
async fn handle_stream(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Response {
    let client_id = client_id_from(&headers);
    let capabilities = state.dispatcher.capabilities();

    let stream = sse::client_stream(
        Arc::clone(&state.bus),
        client_id.clone(),
        capabilities,
    );

    let mut response = Sse::new(stream).into_response();
    set_client_id(&mut response, &client_id);
    let response_headers = response.headers_mut();
    response_headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    response_headers.insert(header::CONNECTION, HeaderValue::from_static("keep-alive"));
    response_headers.insert("x-accel-buffering", HeaderValue::from_static("no"));
    response
}

/// Accept the caller's id when present, mint a UUID otherwise.
fn client_id_from(headers: &HeaderMap) -> String {
    headers
        .get(CLIENT_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .map_or_else(|| uuid::Uuid::new_v4().to_string(), String::from)
}

fn set_client_id(response: &mut Response, client_id: &str) {
    if let Ok(value) = HeaderValue::from_str(client_id) {
        response.headers_mut().insert(CLIENT_ID_HEADER, value);
    }
}
