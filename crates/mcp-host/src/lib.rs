//! MCP Host
//!
//! A long-lived process that multiplexes AI clients over HTTP onto a fleet
//! of locally-spawned MCP tool servers. Clients get a JSON-RPC 2.0 endpoint
//! plus a Server-Sent Events stream for unsolicited notifications; backends
//! are supervised child processes speaking line-delimited JSON-RPC on
//! stdio, or remote services reached over HTTP.
//!
//! # Example
//!
//! ```no_run
//! use mcp_host::{config, server::McpHost};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let configs = config::load_backend_configs("mcp_servers.json".as_ref())?;
//!     let listener = tokio::net::TcpListener::bind("127.0.0.1:8000").await?;
//!     McpHost::new(configs).serve(listener).await
//! }
//! ```

pub mod backend;
pub mod bus;
pub mod config;
pub mod error;
pub mod protocol;
pub mod server;
pub mod tools;

pub use backend::{BackendProcess, ServerManager};
pub use bus::NotificationBus;
pub use error::{BackendError, ConfigError, ToolError};
pub use server::McpHost;
