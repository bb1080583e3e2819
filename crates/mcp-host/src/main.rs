//! MCP Host - Entry Point
//!
//! Loads the backend fleet config, binds the HTTP listener, and serves
//! until shutdown. Exit codes: 0 graceful, 1 config failure, 2 bind
//! failure. Individual backend spawn failures never exit the host.

use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;

use clap::Parser;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use mcp_host::{config, server::McpHost};

#[derive(Parser, Debug)]
#[command(name = "mcp-host")]
#[command(about = "MCP host - multiplexes clients onto a pool of MCP tool servers")]
#[command(version)]
struct Cli {
    /// Path to the mcpServers configuration file
    #[arg(long, default_value = "mcp_servers.json", env = "MCP_SERVERS_CONFIG")]
    config: PathBuf,

    /// Address to bind
    #[arg(long, default_value = "0.0.0.0", env = "HOST")]
    host: IpAddr,

    /// HTTP server port
    #[arg(long, default_value = "8000", env = "PORT")]
    port: u16,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info", env = "RUST_LOG")]
    log_level: String,

    /// Output logs as JSON
    #[arg(long)]
    json_logs: bool,
}

fn init_tracing(log_level: &str, json: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(log_level));

    let subscriber = tracing_subscriber::registry().with(filter);

    if json {
        subscriber
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        subscriber
            .with(tracing_subscriber::fmt::layer().compact())
            .init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    init_tracing(&cli.log_level, cli.json_logs);

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        config = %cli.config.display(),
        "Starting MCP host"
    );

    let configs = match config::load_backend_configs(&cli.config) {
        Ok(configs) => configs,
        Err(e) => {
            tracing::error!(error = %e, "Failed to load backend configuration");
            std::process::exit(1);
        }
    };
    tracing::info!(backends = configs.len(), "Loaded backend configuration");

    let addr = SocketAddr::new(cli.host, cli.port);
    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(listener) => listener,
        Err(e) => {
            tracing::error!(%addr, error = %e, "Failed to bind");
            std::process::exit(2);
        }
    };

    McpHost::new(configs).serve(listener).await?;

    Ok(())
}
