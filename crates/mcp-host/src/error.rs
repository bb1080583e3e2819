//! Error types for the MCP host.
//!
//! Uses `thiserror` for structured error handling with automatic `From`
//! implementations. JSON-RPC level failures travel as
//! [`protocol::JsonRpcError`](crate::protocol::JsonRpcError) values instead;
//! the enums here cover host-side lifecycle and I/O.

use std::time::Duration;

/// Errors while loading or validating the backend configuration file.
#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    /// Config file could not be read
    #[error("failed to read config file {path}: {source}")]
    Io {
        /// Path that was attempted
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// Config file is not valid JSON
    #[error("failed to parse config file {path}: {source}")]
    Parse {
        /// Path that was attempted
        path: String,
        #[source]
        source: serde_json::Error,
    },

    /// A backend entry is structurally valid JSON but unusable
    #[error("invalid backend '{backend_id}': {reason}")]
    Invalid {
        /// The offending `mcpServers` key
        backend_id: String,
        /// What is missing or contradictory
        reason: String,
    },
}

/// Errors from backend process lifecycle and transport.
#[derive(thiserror::Error, Debug)]
pub enum BackendError {
    /// Child process could not be spawned
    #[error("failed to spawn backend '{backend_id}': {source}")]
    Spawn {
        /// Backend that failed to start
        backend_id: String,
        #[source]
        source: std::io::Error,
    },

    /// A stdio pipe was not available after spawn
    #[error("backend '{backend_id}' did not expose {pipe}")]
    MissingPipe {
        /// Backend in question
        backend_id: String,
        /// "stdin", "stdout", or "stderr"
        pipe: &'static str,
    },

    /// The initialize handshake failed or returned an error
    #[error("backend '{backend_id}' handshake failed: {detail}")]
    Handshake {
        /// Backend in question
        backend_id: String,
        /// Human-readable cause
        detail: String,
    },

    /// The handshake did not complete within the startup deadline
    #[error("backend '{backend_id}' handshake timed out after {timeout:?}")]
    HandshakeTimeout {
        /// Backend in question
        backend_id: String,
        /// The startup deadline that elapsed
        timeout: Duration,
    },

    /// The backend is not in a state that accepts calls
    #[error("backend '{backend_id}' is not running")]
    NotRunning {
        /// Backend in question
        backend_id: String,
    },

    /// HTTP transport error for remote backends
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON encoding/decoding failure on the wire
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl BackendError {
    /// Create a handshake error.
    #[must_use]
    pub fn handshake(backend_id: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::Handshake { backend_id: backend_id.into(), detail: detail.into() }
    }
}

/// Errors from built-in tool execution.
#[derive(thiserror::Error, Debug)]
pub enum ToolError {
    /// Input validation failed
    #[error("invalid input for '{field}': {message}")]
    Validation {
        /// Field that failed validation
        field: String,
        /// Validation error message
        message: String,
    },

    /// JSON serialization/deserialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl ToolError {
    /// Create a validation error.
    #[must_use]
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Validation { field: field.into(), message: message.into() }
    }
}

/// Result type alias for backend operations.
pub type BackendResult<T> = Result<T, BackendError>;

/// Result type alias for built-in tool operations.
pub type ToolResult<T> = Result<T, ToolError>;
