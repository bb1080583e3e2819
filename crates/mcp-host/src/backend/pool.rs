//! The backend pool and tool routing table.
//!
//! The manager owns every backend's lifecycle and resolves tool names to
//! backends. The routing table is rebuilt on every backend start and stop;
//! merging walks backends in config order so a later backend shadows an
//! earlier one on tool-name collisions.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};

use serde_json::{Value, json};
use tokio::sync::RwLock as AsyncRwLock;

use super::http::HttpBackend;
use super::process::{BackendProcess, BackendStatus};
use crate::config::{BackendConfig, RestartPolicy, TransportKind};
use crate::error::{BackendError, BackendResult};
use crate::protocol::{JsonRpcError, codes};
use crate::tools::ToolDescriptor;

/// One row of the routing table.
#[derive(Debug, Clone)]
pub struct RouteEntry {
    pub backend_id: String,
    pub descriptor: ToolDescriptor,
}

/// A running backend, whichever transport it uses.
#[derive(Clone)]
enum Backend {
    Stdio(Arc<BackendProcess>),
    Http(Arc<HttpBackend>),
}

impl Backend {
    fn is_ready(&self) -> bool {
        match self {
            Self::Stdio(p) => p.status() == BackendStatus::Ready,
            Self::Http(_) => true,
        }
    }

    fn tool_descriptors(&self) -> Vec<ToolDescriptor> {
        match self {
            Self::Stdio(p) => p.tool_descriptors(),
            Self::Http(h) => h.tool_descriptors(),
        }
    }

    async fn execute_tool(&self, tool: &str, arguments: Value) -> Result<Value, JsonRpcError> {
        match self {
            Self::Stdio(p) => p.execute_tool(tool, arguments).await,
            Self::Http(h) => h.execute_tool(tool, arguments).await,
        }
    }
}

/// Owns the backend fleet and the tool routing table.
pub struct ServerManager {
    configs: BTreeMap<String, BackendConfig>,
    backends: AsyncRwLock<HashMap<String, Backend>>,
    /// Read-mostly; never held across an await.
    routing: RwLock<HashMap<String, RouteEntry>>,
    shutting_down: AtomicBool,
}

impl ServerManager {
    #[must_use]
    pub fn new(configs: BTreeMap<String, BackendConfig>) -> Self {
        Self {
            configs,
            backends: AsyncRwLock::new(HashMap::new()),
            routing: RwLock::new(HashMap::new()),
            shutting_down: AtomicBool::new(false),
        }
    }

    /// Start every non-disabled backend concurrently.
    ///
    /// A backend that fails to spawn or handshake is logged and skipped;
    /// its tools simply stay unavailable. Host startup never aborts here.
    pub async fn start(self: &Arc<Self>) {
        let mut launches = Vec::new();
        for (backend_id, config) in &self.configs {
            if config.disabled {
                tracing::info!(backend = %backend_id, "Skipping disabled backend");
                continue;
            }
            launches.push(Arc::clone(self).start_backend(backend_id.clone()));
        }
        futures::future::join_all(launches).await;
        self.rebuild_routing().await;
    }

    async fn start_backend(self: Arc<Self>, backend_id: String) {
        let Some(config) = self.configs.get(&backend_id).cloned() else {
            return;
        };
        match self.launch(&backend_id, &config).await {
            Ok(backend) => {
                if let Backend::Stdio(process) = &backend {
                    Arc::clone(&self).supervise(
                        backend_id.clone(),
                        Arc::clone(process),
                        config.restart,
                    );
                }
                self.backends
                    .write()
                    .await
                    .insert(backend_id.clone(), backend);
                tracing::info!(backend = %backend_id, "Backend started");
            }
            Err(e) => {
                tracing::error!(backend = %backend_id, error = %e, "Failed to start backend");
            }
        }
    }

    async fn launch(&self, backend_id: &str, config: &BackendConfig) -> BackendResult<Backend> {
        match config.transport {
            TransportKind::Stdio => {
                let process = BackendProcess::spawn(backend_id, config).await?;
                process.handshake(config).await?;
                Ok(Backend::Stdio(Arc::new(process)))
            }
            TransportKind::Http => {
                Ok(Backend::Http(Arc::new(HttpBackend::new(backend_id, config)?)))
            }
        }
    }

    /// Watch a stdio backend for exit: drop its routes, and respawn it when
    /// its restart policy asks for that.
    fn supervise(
        self: Arc<Self>,
        backend_id: String,
        process: Arc<BackendProcess>,
        restart: RestartPolicy,
    ) {
        tokio::spawn(async move {
            let mut status = process.status_stream();
            loop {
                let current = *status.borrow_and_update();
                if matches!(current, BackendStatus::Stopped | BackendStatus::Failed) {
                    break;
                }
                if status.changed().await.is_err() {
                    break;
                }
            }

            if self.shutting_down.load(Ordering::SeqCst) {
                return;
            }
            // Explicit stop removes the entry first; nothing left to do.
            if !self.backends.read().await.contains_key(&backend_id) {
                return;
            }

            self.rebuild_routing().await;

            match restart {
                RestartPolicy::None => {
                    tracing::warn!(backend = %backend_id, "Backend exited, not restarting");
                }
                RestartPolicy::OnExit => {
                    tracing::warn!(backend = %backend_id, "Backend exited, respawning");
                    Arc::clone(&self).start_backend(backend_id).await;
                    self.rebuild_routing().await;
                }
            }
        });
    }

    /// Rebuild the tool routing table from currently-ready backends.
    pub async fn rebuild_routing(&self) {
        let backends = self.backends.read().await;
        let mut routing = HashMap::new();
        for backend_id in self.configs.keys() {
            let Some(backend) = backends.get(backend_id) else { continue };
            if !backend.is_ready() {
                continue;
            }
            for descriptor in backend.tool_descriptors() {
                routing.insert(
                    descriptor.name.clone(),
                    RouteEntry { backend_id: backend_id.clone(), descriptor },
                );
            }
        }
        drop(backends);
        *self.routing.write().expect("lock poisoned") = routing;
    }

    /// Execute a named tool, routing explicitly when `backend_id` is given
    /// and through the routing table otherwise.
    pub async fn execute_tool(
        &self,
        backend_id: Option<&str>,
        tool: &str,
        arguments: Value,
    ) -> Result<Value, JsonRpcError> {
        let target = match backend_id {
            Some(id) => id.to_string(),
            None => {
                let routing = self.routing.read().expect("lock poisoned");
                match routing.get(tool) {
                    Some(entry) => entry.backend_id.clone(),
                    None => {
                        return Err(JsonRpcError::with_data(
                            codes::SERVER_NOT_FOUND,
                            "no backend provides this tool",
                            json!({ "tool": tool }),
                        ));
                    }
                }
            }
        };

        let backend = self.backends.read().await.get(&target).cloned();
        let Some(backend) = backend else {
            return Err(JsonRpcError::with_data(
                codes::SERVER_NOT_FOUND,
                "no such backend",
                json!({ "server_id": target }),
            ));
        };
        backend.execute_tool(tool, arguments).await
    }

    /// Gracefully stop one backend and drop its routes.
    pub async fn stop(&self, backend_id: &str) -> BackendResult<()> {
        let backend = self
            .backends
            .write()
            .await
            .remove(backend_id)
            .ok_or_else(|| BackendError::NotRunning {
                backend_id: backend_id.to_string(),
            })?;
        if let Backend::Stdio(process) = &backend {
            process.stop().await?;
        }
        self.rebuild_routing().await;
        Ok(())
    }

    /// Stop the whole fleet (host shutdown path).
    pub async fn shutdown(&self) {
        self.shutting_down.store(true, Ordering::SeqCst);
        let drained: Vec<(String, Backend)> =
            self.backends.write().await.drain().collect();
        for (backend_id, backend) in drained {
            if let Backend::Stdio(process) = &backend {
                if let Err(e) = process.stop().await {
                    tracing::warn!(backend = %backend_id, error = %e, "Shutdown error");
                }
            }
        }
        self.rebuild_routing().await;
    }

    /// Current routing table rows, sorted by tool name. Used to assemble
    /// the capabilities document deterministically.
    #[must_use]
    pub fn routed_tools(&self) -> Vec<RouteEntry> {
        let routing = self.routing.read().expect("lock poisoned");
        let mut entries: Vec<RouteEntry> = routing.values().cloned().collect();
        entries.sort_by(|a, b| a.descriptor.name.cmp(&b.descriptor.name));
        entries
    }

    /// Whether a tool resolves through the routing table.
    #[must_use]
    pub fn resolves(&self, tool: &str) -> bool {
        self.routing.read().expect("lock poisoned").contains_key(tool)
    }

    /// Number of running backends (for readiness reporting).
    pub async fn running_backends(&self) -> usize {
        self.backends
            .read()
            .await
            .values()
            .filter(|b| b.is_ready())
            .count()
    }
}

impl std::fmt::Debug for ServerManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerManager")
            .field("configured", &self.configs.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_unknown_tool_is_server_not_found() {
        let manager = Arc::new(ServerManager::new(BTreeMap::new()));
        let err = manager
            .execute_tool(None, "nope", json!({}))
            .await
            .unwrap_err();
        assert_eq!(err.code, codes::SERVER_NOT_FOUND);
    }

    #[tokio::test]
    async fn test_unknown_backend_is_server_not_found() {
        let manager = Arc::new(ServerManager::new(BTreeMap::new()));
        let err = manager
            .execute_tool(Some("ghost"), "x", json!({}))
            .await
            .unwrap_err();
        assert_eq!(err.code, codes::SERVER_NOT_FOUND);
        assert_eq!(err.data.as_ref().unwrap()["server_id"], "ghost");
    }

    #[tokio::test]
    async fn test_stop_unknown_backend_errors() {
        let manager = Arc::new(ServerManager::new(BTreeMap::new()));
        assert!(manager.stop("ghost").await.is_err());
    }
}
