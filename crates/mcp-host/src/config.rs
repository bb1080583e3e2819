//! Configuration for the MCP host.
//!
//! The backend fleet is described by a JSON document keyed by backend id,
//! compatible with the `mcpServers` format used by common MCP clients.
//! Unknown keys are tolerated so configs can be shared with other tools.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::Path;

use serde::Deserialize;
use serde_json::{Value, json};

use crate::error::ConfigError;
use crate::tools::ToolDescriptor;

/// Deadlines and intervals used across the host.
pub mod timing {
    use std::time::Duration;

    /// Per-call deadline for a tool invocation, issue to completion.
    pub const RPC_TIMEOUT: Duration = Duration::from_secs(60);

    /// SSE keep-alive interval on idle streams.
    pub const SSE_KEEPALIVE: Duration = Duration::from_secs(30);

    /// Deadline for the backend initialize handshake.
    pub const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

    /// Grace period between closing a backend's stdin and killing it.
    pub const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);
}

/// Top-level backend configuration file.
///
/// ```json
/// {"mcpServers": {"files": {"command": "mcp-files", "args": ["--root", "/srv"]}}}
/// ```
#[derive(Debug, Clone, Deserialize)]
pub struct McpServersFile {
    #[serde(rename = "mcpServers", default)]
    pub mcp_servers: BTreeMap<String, BackendConfig>,
}

/// How the host talks to a backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    /// Child process, line-delimited JSON-RPC on stdin/stdout.
    #[default]
    Stdio,
    /// Remote service, JSON-RPC envelopes POSTed to a URL.
    Http,
}

/// Whether a crashed backend is respawned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RestartPolicy {
    /// Leave the backend stopped; its tools drop out of the routing table.
    #[default]
    None,
    /// Respawn once per exit.
    OnExit,
}

/// One entry under `mcpServers`. Immutable after load.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackendConfig {
    /// Executable to spawn (stdio transport).
    #[serde(default)]
    pub command: Option<String>,

    /// Command-line arguments.
    #[serde(default)]
    pub args: Vec<String>,

    /// Environment for the child. Replaces the host environment entirely,
    /// except PATH which is inherited.
    #[serde(default)]
    pub env: HashMap<String, String>,

    /// Skipped entirely when true.
    #[serde(default)]
    pub disabled: bool,

    /// Tools the operator has pre-approved for unattended execution.
    #[serde(default)]
    pub auto_approve: HashSet<String>,

    /// Transport selector; stdio unless stated otherwise.
    #[serde(default)]
    pub transport: TransportKind,

    /// Service URL (http transport).
    #[serde(default)]
    pub url: Option<String>,

    /// Restart policy on unexpected exit.
    #[serde(default)]
    pub restart: RestartPolicy,

    /// Tools declared in the config, used when the backend's initialize
    /// response omits schemas.
    #[serde(default)]
    pub tools: BTreeMap<String, ToolSpec>,
}

/// Declared tool shape in the config file.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ToolSpec {
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub parameters: Vec<ParameterSpec>,
}

/// One declared tool parameter.
#[derive(Debug, Clone, Deserialize)]
pub struct ParameterSpec {
    pub name: String,
    #[serde(rename = "type", default)]
    pub kind: ParameterKind,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub description: String,
}

/// JSON type of a declared parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParameterKind {
    #[default]
    String,
    Number,
    Boolean,
    Array,
    Object,
}

impl ParameterKind {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Number => "number",
            Self::Boolean => "boolean",
            Self::Array => "array",
            Self::Object => "object",
        }
    }
}

impl ToolSpec {
    /// Render the declared parameters as a JSON Schema object.
    #[must_use]
    pub fn input_schema(&self) -> Value {
        let mut properties = serde_json::Map::new();
        let mut required = Vec::new();
        for param in &self.parameters {
            let mut prop = serde_json::Map::new();
            prop.insert("type".to_string(), json!(param.kind.as_str()));
            if !param.description.is_empty() {
                prop.insert("description".to_string(), json!(param.description));
            }
            properties.insert(param.name.clone(), Value::Object(prop));
            if param.required {
                required.push(json!(param.name));
            }
        }
        json!({
            "type": "object",
            "properties": properties,
            "required": required,
        })
    }

    /// Full descriptor under a given tool name.
    #[must_use]
    pub fn descriptor(&self, name: &str) -> ToolDescriptor {
        ToolDescriptor {
            name: name.to_string(),
            description: self.description.clone(),
            input_schema: self.input_schema(),
        }
    }
}

/// Load and validate the backend configuration file.
///
/// # Errors
///
/// Returns [`ConfigError`] when the file cannot be read, is not valid
/// JSON, or contains an entry whose transport lacks its required field.
pub fn load_backend_configs(
    path: &Path,
) -> Result<BTreeMap<String, BackendConfig>, ConfigError> {
    let raw = std::fs::read(path).map_err(|source| ConfigError::Io {
        path: path.display().to_string(),
        source,
    })?;

    let file: McpServersFile = serde_json::from_slice(&raw).map_err(|source| {
        ConfigError::Parse { path: path.display().to_string(), source }
    })?;

    for (backend_id, config) in &file.mcp_servers {
        match config.transport {
            TransportKind::Stdio if config.command.is_none() => {
                return Err(ConfigError::Invalid {
                    backend_id: backend_id.clone(),
                    reason: "stdio transport requires a command".to_string(),
                });
            }
            TransportKind::Http if config.url.is_none() => {
                return Err(ConfigError::Invalid {
                    backend_id: backend_id.clone(),
                    reason: "http transport requires a url".to_string(),
                });
            }
            _ => {}
        }
    }

    Ok(file.mcp_servers)
}

/// Hard-coded tool schemas for well-known backends whose initialize
/// response omits them. Keyed by backend id; merged below both discovered
/// and config-declared tools.
#[must_use]
pub fn static_tool_schemas(backend_id: &str) -> Option<BTreeMap<String, ToolSpec>> {
    match backend_id {
        "filesystem" => {
            let mut tools = BTreeMap::new();
            tools.insert(
                "read_file".to_string(),
                ToolSpec {
                    description: "Read the contents of a file".to_string(),
                    parameters: vec![ParameterSpec {
                        name: "path".to_string(),
                        kind: ParameterKind::String,
                        required: true,
                        description: "Absolute path to read".to_string(),
                    }],
                },
            );
            tools.insert(
                "list_directory".to_string(),
                ToolSpec {
                    description: "List the entries of a directory".to_string(),
                    parameters: vec![ParameterSpec {
                        name: "path".to_string(),
                        kind: ParameterKind::String,
                        required: true,
                        description: "Absolute path to list".to_string(),
                    }],
                },
            );
            Some(tools)
        }
        _ => None,
    }
}
