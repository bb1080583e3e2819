//! Tool descriptors and built-in tools.
//!
//! Built-ins run inside the host without touching a backend and exercise
//! the dispatch path end-to-end. They are only consulted when the caller
//! supplied no explicit backend id.

mod builtin;

pub use builtin::{EchoTool, RandomNumberTool, TimestampTool};

use serde::Serialize;
use serde_json::Value;

use crate::error::ToolResult;

/// An advertised tool: name, description, and JSON Schema for its input.
///
/// This is the shape that appears in the capabilities document, whether the
/// tool lives on a backend or in the host itself.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolDescriptor {
    pub name: String,
    pub description: String,
    #[serde(rename = "inputSchema")]
    pub input_schema: Value,
}

/// Trait for tools executed inside the host.
#[async_trait::async_trait]
pub trait BuiltinTool: Send + Sync {
    /// Tool name (e.g., "echo").
    fn name(&self) -> &'static str;

    /// Tool description for clients.
    fn description(&self) -> &'static str;

    /// JSON Schema for input parameters.
    fn input_schema(&self) -> Value;

    /// Execute the tool with given arguments.
    async fn execute(&self, arguments: Value) -> ToolResult<Value>;
}

impl dyn BuiltinTool {
    /// Descriptor for the capabilities document.
    #[must_use]
    pub fn descriptor(&self) -> ToolDescriptor {
        ToolDescriptor {
            name: self.name().to_string(),
            description: self.description().to_string(),
            input_schema: self.input_schema(),
        }
    }
}

/// Register all built-in tools.
#[must_use]
pub fn register_builtin_tools() -> Vec<Box<dyn BuiltinTool>> {
    vec![
        Box::new(EchoTool),
        Box::new(TimestampTool),
        Box::new(RandomNumberTool),
    ]
}
