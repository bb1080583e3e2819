//! Remote backend over HTTP.
//!
//! A `transport: http` backend has no child process; each JSON-RPC request
//! envelope is POSTed to the configured URL and the response envelope comes
//! back in the HTTP body. Capabilities come from the config-declared tool
//! map since there is no handshake to discover them.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicI64, Ordering};

use serde_json::{Value, json};

use crate::config::{self, BackendConfig, timing};
use crate::error::{BackendError, BackendResult};
use crate::protocol::{JsonRpcError, JsonRpcRequest, codes};
use crate::tools::ToolDescriptor;

/// Handle to one remote backend.
pub struct HttpBackend {
    backend_id: String,
    url: String,
    client: reqwest::Client,
    next_request_id: AtomicI64,
    tools: BTreeMap<String, ToolDescriptor>,
}

impl HttpBackend {
    /// Build the client for a `transport: http` entry.
    pub fn new(backend_id: &str, config: &BackendConfig) -> BackendResult<Self> {
        let url = config.url.clone().ok_or_else(|| BackendError::Handshake {
            backend_id: backend_id.to_string(),
            detail: "no url configured".to_string(),
        })?;

        let client = reqwest::Client::builder()
            .timeout(timing::RPC_TIMEOUT)
            .build()?;

        let mut tools = BTreeMap::new();
        if let Some(fallback) = config::static_tool_schemas(backend_id) {
            for (name, spec) in &fallback {
                tools.insert(name.clone(), spec.descriptor(name));
            }
        }
        for (name, spec) in &config.tools {
            tools.insert(name.clone(), spec.descriptor(name));
        }

        Ok(Self {
            backend_id: backend_id.to_string(),
            url,
            client,
            next_request_id: AtomicI64::new(1),
            tools,
        })
    }

    /// Invoke a tool on the remote service.
    pub async fn execute_tool(
        &self,
        tool: &str,
        arguments: Value,
    ) -> Result<Value, JsonRpcError> {
        let id = self.next_request_id.fetch_add(1, Ordering::SeqCst);
        let request = JsonRpcRequest::new(
            "tools/call",
            Some(json!({ "name": tool, "arguments": arguments })),
            id,
        );

        let response = self
            .client
            .post(&self.url)
            .json(&request)
            .send()
            .await
            .map_err(|e| transport_error(&e))?;

        let envelope: Value = response.json().await.map_err(|e| transport_error(&e))?;

        if envelope.get("id").and_then(Value::as_i64) != Some(id) {
            tracing::warn!(
                backend = %self.backend_id,
                id,
                "Remote backend echoed a different request id"
            );
        }

        if let Some(error) = envelope.get("error") {
            return Err(serde_json::from_value::<JsonRpcError>(error.clone()).unwrap_or_else(
                |_| {
                    JsonRpcError::with_data(
                        codes::TOOL_EXECUTION_FAILED,
                        "tool execution failed",
                        json!({ "original": error }),
                    )
                },
            ));
        }
        envelope.get("result").cloned().ok_or_else(|| {
            JsonRpcError::with_data(
                codes::TOOL_EXECUTION_FAILED,
                "tool execution failed",
                json!({ "original": envelope }),
            )
        })
    }

    #[must_use]
    pub fn backend_id(&self) -> &str {
        &self.backend_id
    }

    /// Tools this backend advertises, in name order.
    #[must_use]
    pub fn tool_descriptors(&self) -> Vec<ToolDescriptor> {
        self.tools.values().cloned().collect()
    }
}

impl std::fmt::Debug for HttpBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpBackend")
            .field("backend_id", &self.backend_id)
            .field("url", &self.url)
            .finish()
    }
}

fn transport_error(error: &reqwest::Error) -> JsonRpcError {
    if error.is_timeout() {
        JsonRpcError::new(codes::TOOL_TIMEOUT, "tool call timed out")
    } else {
        JsonRpcError::with_data(
            codes::TOOL_EXECUTION_FAILED,
            "tool execution failed",
            json!({ "original": error.to_string() }),
        )
    }
}
