//! JSON-RPC 2.0 message types and parsing.
//!
//! Pure data module, no I/O. Envelope constructors, a validating parser for
//! client-originated bytes, and the well-known error codes as named
//! constants. Encoding preserves a fixed field order so wire output is
//! stable under snapshot tests.

use std::borrow::Cow;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// JSON-RPC protocol version string.
pub const JSONRPC_VERSION: &str = "2.0";

/// MCP protocol version offered to backends and advertised to clients.
pub const PROTOCOL_VERSION: &str = "0.1.0";

/// Well-known JSON-RPC error codes.
///
/// The range -32000..-32099 is reserved for server-defined codes.
pub mod codes {
    /// Invalid JSON was received.
    pub const PARSE_ERROR: i32 = -32700;
    /// The JSON sent is not a valid request envelope.
    pub const INVALID_REQUEST: i32 = -32600;
    /// The method does not exist.
    pub const METHOD_NOT_FOUND: i32 = -32601;
    /// Invalid method parameters.
    pub const INVALID_PARAMS: i32 = -32602;
    /// Internal JSON-RPC error.
    pub const INTERNAL_ERROR: i32 = -32603;

    /// Tool execution failed on the backend.
    pub const TOOL_EXECUTION_FAILED: i32 = -32000;
    /// The backend process exited with calls still in flight.
    pub const BACKEND_TERMINATED: i32 = -32002;
    /// The backend did not answer within the call deadline.
    pub const TOOL_TIMEOUT: i32 = -32003;
    /// No running backend matches the requested id or tool.
    pub const SERVER_NOT_FOUND: i32 = -32004;
    /// The caller went away before the backend answered.
    pub const CLIENT_CANCELLED: i32 = -32800;
}

/// A JSON-RPC request. Expects exactly one response with the same `id`.
///
/// `id` is any JSON string, number, or null; a request with `id: null` is
/// still a request, not a notification (the `id` key must be *absent* for
/// that).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: Cow<'static, str>,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
    pub id: Value,
}

impl JsonRpcRequest {
    #[must_use]
    pub fn new(method: impl Into<String>, params: Option<Value>, id: impl Into<Value>) -> Self {
        Self {
            jsonrpc: Cow::Borrowed(JSONRPC_VERSION),
            method: method.into(),
            params,
            id: id.into(),
        }
    }
}

/// A JSON-RPC notification: a request-shaped message without an `id`.
/// Never replied to.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JsonRpcNotification {
    pub jsonrpc: Cow<'static, str>,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl JsonRpcNotification {
    #[must_use]
    pub fn new(method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: Cow::Borrowed(JSONRPC_VERSION),
            method: method.into(),
            params,
        }
    }
}

/// A JSON-RPC response, carrying exactly one of `result` or `error`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JsonRpcResponse {
    pub jsonrpc: Cow<'static, str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
    pub id: Value,
}

/// The `error` member of a response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcError {
    pub code: i32,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl JsonRpcError {
    #[must_use]
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self { code, message: message.into(), data: None }
    }

    #[must_use]
    pub fn with_data(code: i32, message: impl Into<String>, data: Value) -> Self {
        Self { code, message: message.into(), data: Some(data) }
    }
}

impl JsonRpcResponse {
    #[must_use]
    pub fn success(id: Value, result: Value) -> Self {
        Self {
            jsonrpc: Cow::Borrowed(JSONRPC_VERSION),
            result: Some(result),
            error: None,
            id,
        }
    }

    #[must_use]
    pub fn error(id: Value, code: i32, message: impl Into<String>) -> Self {
        Self::from_error(id, JsonRpcError::new(code, message))
    }

    #[must_use]
    pub fn error_with_data(id: Value, code: i32, message: impl Into<String>, data: Value) -> Self {
        Self::from_error(id, JsonRpcError::with_data(code, message, data))
    }

    #[must_use]
    pub fn from_error(id: Value, error: JsonRpcError) -> Self {
        Self {
            jsonrpc: Cow::Borrowed(JSONRPC_VERSION),
            result: None,
            error: Some(error),
            id,
        }
    }

    #[must_use]
    pub const fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

/// A successfully parsed client message.
#[derive(Debug, Clone, PartialEq)]
pub enum Incoming {
    Request(JsonRpcRequest),
    Notification(JsonRpcNotification),
}

impl Incoming {
    #[must_use]
    pub fn method(&self) -> &str {
        match self {
            Self::Request(r) => &r.method,
            Self::Notification(n) => &n.method,
        }
    }

    #[must_use]
    pub fn params(&self) -> Option<&Value> {
        match self {
            Self::Request(r) => r.params.as_ref(),
            Self::Notification(n) => n.params.as_ref(),
        }
    }
}

/// Why a client message could not be accepted.
///
/// Carries everything needed to build the error envelope: the code
/// (-32700 or -32600), a message, optional diagnostic data, and the
/// request id when one could be recovered (null otherwise).
#[derive(Debug, Clone, PartialEq)]
pub struct ParseFailure {
    pub code: i32,
    pub message: String,
    pub data: Option<Value>,
    pub id: Value,
}

impl ParseFailure {
    fn invalid(message: impl Into<String>, id: Value) -> Self {
        Self {
            code: codes::INVALID_REQUEST,
            message: message.into(),
            data: None,
            id,
        }
    }

    /// Build the response envelope for this failure.
    #[must_use]
    pub fn into_response(self) -> JsonRpcResponse {
        let error = JsonRpcError { code: self.code, message: self.message, data: self.data };
        JsonRpcResponse::from_error(self.id, error)
    }
}

/// How many leading bytes of an unparseable body to echo back in error data.
const PREVIEW_LEN: usize = 64;

/// Parse and validate a raw client message body.
///
/// Distinguishes requests from notifications by the *presence* of the `id`
/// key, per JSON-RPC 2.0. Returns a [`ParseFailure`] with code -32700 for
/// invalid JSON and -32600 for a well-formed document that is not a valid
/// envelope.
pub fn parse_incoming(raw: &[u8]) -> Result<Incoming, ParseFailure> {
    let value: Value = match serde_json::from_slice(raw) {
        Ok(v) => v,
        Err(e) => {
            let prefix = &raw[..raw.len().min(PREVIEW_LEN)];
            return Err(ParseFailure {
                code: codes::PARSE_ERROR,
                message: "Parse error".to_string(),
                data: Some(serde_json::json!({
                    "first_bytes": String::from_utf8_lossy(prefix),
                    "preview": e.to_string(),
                })),
                id: Value::Null,
            });
        }
    };

    let Some(obj) = value.as_object() else {
        return Err(ParseFailure::invalid("message must be a JSON object", Value::Null));
    };

    // Recover the id for error echoing before anything else can fail.
    let id = match obj.get("id") {
        None => None,
        Some(id @ (Value::String(_) | Value::Number(_) | Value::Null)) => Some(id.clone()),
        Some(_) => {
            return Err(ParseFailure::invalid(
                "id must be a string, number, or null",
                Value::Null,
            ));
        }
    };
    let echo_id = id.clone().unwrap_or(Value::Null);

    match obj.get("jsonrpc").and_then(Value::as_str) {
        Some(JSONRPC_VERSION) => {}
        _ => return Err(ParseFailure::invalid("jsonrpc must be exactly \"2.0\"", echo_id)),
    }

    let method = match obj.get("method").and_then(Value::as_str) {
        Some(m) if !m.is_empty() => m.to_string(),
        Some(_) => return Err(ParseFailure::invalid("method must be non-empty", echo_id)),
        None => return Err(ParseFailure::invalid("method must be a string", echo_id)),
    };

    let params = match obj.get("params") {
        None => None,
        Some(p @ (Value::Object(_) | Value::Array(_))) => Some(p.clone()),
        Some(_) => {
            return Err(ParseFailure::invalid("params must be an object or array", echo_id));
        }
    };

    Ok(match id {
        Some(id) => Incoming::Request(JsonRpcRequest {
            jsonrpc: Cow::Borrowed(JSONRPC_VERSION),
            method,
            params,
            id,
        }),
        None => Incoming::Notification(JsonRpcNotification {
            jsonrpc: Cow::Borrowed(JSONRPC_VERSION),
            method,
            params,
        }),
    })
}

/// Encode a message as a single JSON line (no trailing newline).
///
/// Serialization of the envelope types cannot fail; the signature stays
/// fallible so callers forwarding arbitrary `Value` payloads keep their
/// error path.
pub fn encode<T: Serialize>(message: &T) -> serde_json::Result<String> {
    serde_json::to_string(message)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn request_and_notification_distinguished_by_id_presence() {
        let req = parse_incoming(br#"{"jsonrpc":"2.0","method":"ping","id":null}"#).unwrap();
        assert!(matches!(req, Incoming::Request(_)));

        let note = parse_incoming(br#"{"jsonrpc":"2.0","method":"ping"}"#).unwrap();
        assert!(matches!(note, Incoming::Notification(_)));
    }

    #[test]
    fn invalid_json_is_parse_error_with_preview() {
        let err = parse_incoming(b"{not json").unwrap_err();
        assert_eq!(err.code, codes::PARSE_ERROR);
        assert_eq!(err.id, Value::Null);
        let data = err.data.unwrap();
        assert_eq!(data["first_bytes"], "{not json");
    }

    #[test]
    fn wrong_version_is_invalid_request() {
        let err = parse_incoming(br#"{"jsonrpc":"1.0","method":"x","id":1}"#).unwrap_err();
        assert_eq!(err.code, codes::INVALID_REQUEST);
        assert_eq!(err.id, json!(1));
    }

    #[test]
    fn empty_method_rejected() {
        let err = parse_incoming(br#"{"jsonrpc":"2.0","method":"","id":1}"#).unwrap_err();
        assert_eq!(err.code, codes::INVALID_REQUEST);
    }

    #[test]
    fn scalar_params_rejected() {
        let err = parse_incoming(br#"{"jsonrpc":"2.0","method":"x","params":3,"id":1}"#)
            .unwrap_err();
        assert_eq!(err.code, codes::INVALID_REQUEST);
    }

    #[test]
    fn boolean_id_rejected() {
        let err = parse_incoming(br#"{"jsonrpc":"2.0","method":"x","id":true}"#).unwrap_err();
        assert_eq!(err.code, codes::INVALID_REQUEST);
        assert_eq!(err.id, Value::Null);
    }

    #[test]
    fn request_encodes_in_wire_order() {
        let req = JsonRpcRequest::new("tools/call", Some(json!({"name":"upper"})), 1);
        assert_eq!(
            encode(&req).unwrap(),
            r#"{"jsonrpc":"2.0","method":"tools/call","params":{"name":"upper"},"id":1}"#
        );
    }

    #[test]
    fn response_carries_exactly_one_of_result_or_error() {
        let ok = JsonRpcResponse::success(json!(7), json!({"x": 1}));
        assert!(ok.result.is_some() && ok.error.is_none());

        let err = JsonRpcResponse::error(json!(7), codes::METHOD_NOT_FOUND, "Method not found");
        assert!(err.result.is_none() && err.error.is_some());
        assert_eq!(
            encode(&err).unwrap(),
            r#"{"jsonrpc":"2.0","error":{"code":-32601,"message":"Method not found"},"id":7}"#
        );
    }
}
