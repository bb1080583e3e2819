//! Backend process pool: supervised children and tool routing.
//!
//! A backend is either a spawned child speaking line-delimited JSON-RPC on
//! stdio, or a remote service reached over HTTP. The [`ServerManager`] owns
//! the fleet and the tool-name routing table.

pub mod framing;
mod http;
mod pool;
mod process;

pub use http::HttpBackend;
pub use pool::{RouteEntry, ServerManager};
pub use process::{BackendProcess, BackendStatus};
