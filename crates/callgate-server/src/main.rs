//! callgate-server: realtime connection gateway.
//!
//! Serves the WebSocket gateway on its own listener until SIGINT or SIGTERM,
//! then disconnects every peer and releases the port.

use anyhow::Context;
use callgate_server::{CliOverrides, Gateway, ServerConfig};
use clap::Parser;
use std::path::PathBuf;
use tracing::{info, warn};

/// callgate-server — realtime connection gateway
#[derive(Parser, Debug)]
#[command(name = "callgate-server", version, about = "Realtime connection gateway")]
struct Cli {
    /// Config file path
    #[arg(long, default_value = "~/.callgate/config.toml")]
    config: String,

    /// Listen port (0 picks an ephemeral port)
    #[arg(short, long)]
    port: Option<u16>,

    /// Transport path prefix
    #[arg(long)]
    path: Option<String>,

    /// Allowed cross-origin callers: "*" or a comma-separated list
    #[arg(long)]
    origin: Option<String>,

    /// Process name advertised to connected peers
    #[arg(long)]
    name: Option<String>,

    /// Host to bind the listener on
    #[arg(long, default_value = "0.0.0.0")]
    bind: String,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize tracing
    use tracing_subscriber::EnvFilter;
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&cli.log_level));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .init();

    info!(version = env!("CARGO_PKG_VERSION"), "starting callgate-server");

    let config_path = PathBuf::from(&cli.config);
    let server_config = ServerConfig::load(
        Some(&config_path),
        CliOverrides {
            port: cli.port,
            path: cli.path,
            origin: cli.origin,
            name: cli.name,
        },
    )
    .context("failed to load config")?;

    let mut gateway = Gateway::from_input(&server_config.gateway, &server_config.process)
        .with_bind_host(cli.bind);
    gateway.serve().await.context("failed to start gateway")?;

    shutdown_signal().await;
    info!("received shutdown signal");

    gateway.stop().await.context("failed to stop gateway")?;
    info!("callgate-server stopped");
    Ok(())
}

/// Wait for SIGTERM or SIGINT (Ctrl+C).
async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(e) => {
                warn!(error = %e, "cannot install SIGTERM handler, waiting for Ctrl+C only");
                ctrl_c.await.ok();
            }
        }
    }

    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
    }
}
