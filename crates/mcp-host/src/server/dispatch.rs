//! Client-facing JSON-RPC dispatch.
//!
//! The sole entry point from the HTTP layer: parses the request body,
//! validates the envelope, dispatches by method, and formats the reply.
//! JSON-RPC errors never escape as Rust errors; a handler that cannot
//! complete returns an error envelope.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use serde_json::{Value, json};

use crate::backend::ServerManager;
use crate::bus::{NotificationBus, topics};
use crate::error::ToolError;
use crate::protocol::{
    Incoming, JsonRpcRequest, JsonRpcResponse, PROTOCOL_VERSION, codes, parse_incoming,
};
use crate::tools::{BuiltinTool, register_builtin_tools};

/// What the HTTP layer should send back.
#[derive(Debug)]
pub enum HttpReply {
    /// 200 with the response envelope as the JSON body.
    Json(JsonRpcResponse),
    /// 204, empty body: the input was a notification.
    NoContent,
    /// The caller asked for `text/event-stream`: emit the terminal response
    /// envelope as a single SSE event, then close.
    Stream(JsonRpcResponse),
}

/// Which parameter key naming a tool-call method uses.
#[derive(Clone, Copy)]
enum ParamStyle {
    /// `{server_id?, tool, parameters}` (invoke_tool, execute).
    Tool,
    /// `{server_id?, name, arguments}` (call_tool, upstream MCP naming).
    Name,
}

impl ParamStyle {
    const fn tool_key(self) -> &'static str {
        match self {
            Self::Tool => "tool",
            Self::Name => "name",
        }
    }

    const fn arguments_key(self) -> &'static str {
        match self {
            Self::Tool => "parameters",
            Self::Name => "arguments",
        }
    }
}

/// Routes client RPCs to built-ins or the backend pool.
pub struct Dispatcher {
    manager: Arc<ServerManager>,
    bus: Arc<NotificationBus>,
    builtins: Vec<Box<dyn BuiltinTool>>,
}

impl Dispatcher {
    #[must_use]
    pub fn new(manager: Arc<ServerManager>, bus: Arc<NotificationBus>) -> Self {
        Self { manager, bus, builtins: register_builtin_tools() }
    }

    /// Handle one POSTed JSON-RPC body.
    ///
    /// Parse and envelope errors come back as error envelopes with HTTP
    /// 200; only the transport layer above decides anything else.
    pub async fn handle_post(
        &self,
        client_id: &str,
        raw_body: &[u8],
        accept: Option<&str>,
    ) -> HttpReply {
        let started = Instant::now();

        let incoming = match parse_incoming(raw_body) {
            Ok(incoming) => incoming,
            Err(failure) => {
                tracing::debug!(
                    client = %client_id,
                    code = failure.code,
                    "Rejected malformed request"
                );
                return HttpReply::Json(failure.into_response());
            }
        };

        match incoming {
            Incoming::Notification(notification) => {
                tracing::debug!(
                    client = %client_id,
                    method = %notification.method,
                    "Accepted notification"
                );
                let envelope = serde_json::to_value(&notification).unwrap_or_default();
                self.publish_request_event(client_id, envelope, None, started);
                HttpReply::NoContent
            }
            Incoming::Request(request) => {
                let response = self.dispatch_request(&request).await;
                let envelope = serde_json::to_value(&request).unwrap_or_default();
                self.publish_request_event(client_id, envelope, Some(&response), started);
                if wants_event_stream(accept) {
                    HttpReply::Stream(response)
                } else {
                    HttpReply::Json(response)
                }
            }
        }
    }

    async fn dispatch_request(&self, request: &JsonRpcRequest) -> JsonRpcResponse {
        let id = request.id.clone();
        match request.method.as_str() {
            "initialize" => JsonRpcResponse::success(id, self.capabilities()),
            "tools/list" => {
                JsonRpcResponse::success(id, json!({ "tools": self.merged_tools() }))
            }
            "ping" => JsonRpcResponse::success(id, json!({})),
            "notifications/initialized" | "initialized" => {
                JsonRpcResponse::success(id, json!({}))
            }
            "invoke_tool" | "execute" => {
                self.handle_tool_call(request, ParamStyle::Tool).await
            }
            "call_tool" => self.handle_tool_call(request, ParamStyle::Name).await,
            other => JsonRpcResponse::error_with_data(
                id,
                codes::METHOD_NOT_FOUND,
                "Method not found",
                json!({ "method": other }),
            ),
        }
    }

    async fn handle_tool_call(
        &self,
        request: &JsonRpcRequest,
        style: ParamStyle,
    ) -> JsonRpcResponse {
        let id = request.id.clone();

        let Some(params) = request.params.as_ref().and_then(Value::as_object) else {
            return JsonRpcResponse::error_with_data(
                id,
                codes::INVALID_PARAMS,
                "Invalid params",
                json!({ "missing": style.tool_key() }),
            );
        };

        let Some(tool) = params.get(style.tool_key()).and_then(Value::as_str) else {
            return JsonRpcResponse::error_with_data(
                id,
                codes::INVALID_PARAMS,
                "Invalid params",
                json!({ "missing": style.tool_key() }),
            );
        };

        let server_id = match params.get("server_id") {
            None | Some(Value::Null) => None,
            Some(Value::String(s)) => Some(s.as_str()),
            Some(_) => {
                return JsonRpcResponse::error_with_data(
                    id,
                    codes::INVALID_PARAMS,
                    "Invalid params",
                    json!({ "invalid": "server_id" }),
                );
            }
        };

        let arguments = params
            .get(style.arguments_key())
            .cloned()
            .unwrap_or_else(|| json!({}));

        // Built-ins only answer when no backend was named explicitly.
        if server_id.is_none() {
            if let Some(builtin) = self.builtins.iter().find(|b| b.name() == tool) {
                tracing::info!(tool = %tool, "Executing built-in tool");
                return match builtin.execute(arguments).await {
                    Ok(result) => JsonRpcResponse::success(id, result),
                    Err(e) => builtin_error_response(id, &e),
                };
            }
        }

        tracing::info!(tool = %tool, server = ?server_id, "Routing tool call");
        match self.manager.execute_tool(server_id, tool, arguments).await {
            Ok(result) => JsonRpcResponse::success(id, result),
            Err(rpc_error) => JsonRpcResponse::from_error(id, rpc_error),
        }
    }

    /// The merged capabilities document, identical to the `initialize`
    /// result and the first SSE event.
    ///
    /// Assembly is deterministic (name-sorted tools, static resource list)
    /// so repeated calls return byte-identical documents.
    #[must_use]
    pub fn capabilities(&self) -> Value {
        json!({
            "protocolVersion": PROTOCOL_VERSION,
            "serverInfo": {
                "name": env!("CARGO_PKG_NAME"),
                "version": env!("CARGO_PKG_VERSION"),
            },
            "capabilities": {
                "tools": { "listChanged": false },
            },
            "tools": self.merged_tools(),
            "resources": [
                {
                    "uri": "mcp://host/backends",
                    "name": "backends",
                    "description": "Configured backends and their status",
                },
                {
                    "uri": "mcp://host/routing",
                    "name": "routing",
                    "description": "Tool-name to backend routing table",
                },
            ],
        })
    }

    /// All advertised tools in name order: routed backend tools, with
    /// built-ins shadowing on name collision (built-ins win dispatch when
    /// no server_id is given).
    fn merged_tools(&self) -> Vec<Value> {
        let mut merged: BTreeMap<String, Value> = BTreeMap::new();
        for entry in self.manager.routed_tools() {
            let mut tool = serde_json::to_value(&entry.descriptor)
                .unwrap_or_else(|_| json!({ "name": entry.descriptor.name }));
            tool["server_id"] = json!(entry.backend_id);
            merged.insert(entry.descriptor.name.clone(), tool);
        }
        for builtin in &self.builtins {
            let descriptor = builtin.descriptor();
            let mut tool =
                serde_json::to_value(&descriptor).unwrap_or_else(|_| json!({}));
            tool["server_id"] = Value::Null;
            merged.insert(descriptor.name.clone(), tool);
        }
        merged.into_values().collect()
    }

    fn publish_request_event(
        &self,
        client_id: &str,
        envelope: Value,
        response: Option<&JsonRpcResponse>,
        started: Instant,
    ) {
        #[allow(clippy::cast_possible_truncation)]
        let latency_ms = started.elapsed().as_millis() as u64;
        self.bus.publish(
            topics::REQUESTS,
            json!({
                "client_id": client_id,
                "envelope": envelope,
                "latency_ms": latency_ms,
                "error": response.is_some_and(JsonRpcResponse::is_error),
                "notification": response.is_none(),
            }),
        );
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("builtins", &self.builtins.len())
            .finish()
    }
}

fn wants_event_stream(accept: Option<&str>) -> bool {
    accept.is_some_and(|a| a.contains("text/event-stream"))
}

fn builtin_error_response(id: Value, error: &ToolError) -> JsonRpcResponse {
    match error {
        ToolError::Validation { field, .. } => JsonRpcResponse::error_with_data(
            id,
            codes::INVALID_PARAMS,
            error.to_string(),
            json!({ "field": field }),
        ),
        ToolError::Serialization(_) => {
            JsonRpcResponse::error(id, codes::INTERNAL_ERROR, "Internal error")
        }
    }
}
