//! Host assembly.
//!
//! Wires config, backend pool, notification bus, and dispatcher into one
//! HTTP service with graceful shutdown.

pub mod dispatch;
pub mod http;
pub mod sse;

use std::collections::BTreeMap;
use std::sync::Arc;

use tokio::net::TcpListener;

use crate::backend::ServerManager;
use crate::bus::NotificationBus;
use crate::config::BackendConfig;
use dispatch::Dispatcher;
use http::AppState;

/// The MCP host: backend pool, notification bus, HTTP surface.
pub struct McpHost {
    manager: Arc<ServerManager>,
    bus: Arc<NotificationBus>,
}

impl McpHost {
    /// Assemble a host from loaded backend configs.
    #[must_use]
    pub fn new(configs: BTreeMap<String, BackendConfig>) -> Self {
        Self {
            manager: Arc::new(ServerManager::new(configs)),
            bus: Arc::new(NotificationBus::new()),
        }
    }

    /// Handle to the backend pool (tests and diagnostics).
    #[must_use]
    pub fn manager(&self) -> Arc<ServerManager> {
        Arc::clone(&self.manager)
    }

    /// Handle to the notification bus.
    #[must_use]
    pub fn bus(&self) -> Arc<NotificationBus> {
        Arc::clone(&self.bus)
    }

    /// Build the router without binding, for in-process tests.
    #[must_use]
    pub fn router(&self) -> axum::Router {
        let state = Arc::new(AppState {
            dispatcher: Dispatcher::new(Arc::clone(&self.manager), Arc::clone(&self.bus)),
            bus: Arc::clone(&self.bus),
            manager: Arc::clone(&self.manager),
        });
        http::create_router(state)
    }

    /// Start the backend fleet and serve HTTP until shutdown.
    ///
    /// # Errors
    ///
    /// Returns error on server failure. Binding happens in the caller so
    /// the binary can map bind failures to their own exit code.
    pub async fn serve(self, listener: TcpListener) -> anyhow::Result<()> {
        self.manager.start().await;
        tracing::info!(
            backends = self.manager.running_backends().await,
            "Backend pool started"
        );

        let router = self.router();
        if let Ok(addr) = listener.local_addr() {
            tracing::info!("HTTP server listening on http://{addr}");
        }

        axum::serve(listener, router)
            .with_graceful_shutdown(shutdown_signal())
            .await?;

        tracing::info!("HTTP server shut down, stopping backends");
        self.manager.shutdown().await;
        Ok(())
    }
}

impl std::fmt::Debug for McpHost {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("McpHost").finish()
    }
}

async fn shutdown_signal() {
    tokio::signal::ctrl_c().await.expect("Failed to install CTRL+C handler");
    tracing::info!("Received shutdown signal");
}
