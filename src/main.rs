//! ssh-dispatch - Entry point
//!
//! Parses CLI arguments, validates configuration, starts the SSH client and
//! the MCP server on stdio transport, and handles graceful shutdown.

use clap::Parser;
use rmcp::service::ServiceExt;
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use ssh_dispatch::config::{Args, Config};
use ssh_dispatch::error::Result;
use ssh_dispatch::server::SshDispatchServer;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing/logging to stderr (stdout is for MCP JSON-RPC)
    FmtSubscriber::builder()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    // Parse CLI arguments
    let args = Args::parse();

    // Validate and create config
    let config = Config::from_args(args)?;

    info!("ssh-dispatch v{} starting...", env!("CARGO_PKG_VERSION"));
    info!("Target: {}", config.target());
    info!(
        "Reconnect interval: {}ms, handshake timeout: {}ms, cipher: {}",
        config.session.reconnect_interval_ms,
        config.session.handshake_timeout_ms,
        config.session.cipher,
    );

    // Start the SSH client and the MCP server around it
    let server = SshDispatchServer::connect(config);

    info!("ssh-dispatch running on stdio");

    // Create a clone for the shutdown handler
    let server_for_shutdown = server.clone();

    // Spawn a task to handle shutdown signals
    let shutdown_handle = tokio::spawn(async move {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Received SIGINT (Ctrl+C), shutting down...");
            }
            _ = terminate() => {
                info!("Received SIGTERM, shutting down...");
            }
        }

        server_for_shutdown.shutdown().await;
        std::process::exit(0);
    });

    // Start the MCP server on stdio transport
    match server.clone().serve(rmcp::transport::io::stdio()).await {
        Ok(running_server) => {
            info!("MCP server is serving...");
            if let Err(e) = running_server.waiting().await {
                error!("Server error: {}", e);
            }
        }
        Err(e) => {
            error!("Failed to start MCP server: {}", e);
            return Err(ssh_dispatch::SshDispatchError::connection(e.to_string()));
        }
    }

    // Cancel the shutdown handler if we exit normally
    shutdown_handle.abort();
    server.shutdown().await;

    info!("ssh-dispatch stopped");

    Ok(())
}

/// Resolves on SIGTERM; never on platforms without it
async fn terminate() {
    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
                return;
            }
            Err(e) => error!("Failed to register SIGTERM handler: {}", e),
        }
    }
    std::future::pending::<()>().await
}
