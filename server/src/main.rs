use std::{net::SocketAddr, path::PathBuf, time::Duration};

use anyhow::{Context, Result};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;
use trirpc_common::config::{
    TlsMaterialPath, LOOPBACK_PORT, SERVER_CERT_FILE, SERVER_KEY_FILE, SOCKET_PATH, TLS_PORT,
};
use trirpc_server::{RpcServer, ServerConfig};

#[derive(Parser, Debug)]
#[command(name = "trirpc-server")]
#[command(about = "JSON-RPC server on loopback, mutual TLS and a local socket")]
struct Args {
    /// Default log filter, overridden by RUST_LOG
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Directory holding server.crt and server.key (defaults to $TRIRPC_CERTS_DIR or ./certs)
    #[arg(long)]
    certs_dir: Option<PathBuf>,

    /// Plaintext loopback listener
    #[arg(long, default_value_t = SocketAddr::from(([127, 0, 0, 1], LOOPBACK_PORT)))]
    loopback: SocketAddr,

    /// Mutual-TLS listener
    #[arg(long, default_value_t = SocketAddr::from(([0, 0, 0, 0], TLS_PORT)))]
    public: SocketAddr,

    /// Local socket path; a leading '@' selects the abstract namespace
    #[arg(long, default_value = SOCKET_PATH)]
    socket: String,

    /// Seconds to wait for in-flight requests on shutdown
    #[arg(long, default_value_t = 10)]
    drain_timeout: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level)),
        )
        .with_target(false)
        .init();

    let tls = match args.certs_dir {
        Some(dir) => TlsMaterialPath::in_dir(dir, SERVER_CERT_FILE, SERVER_KEY_FILE),
        None => TlsMaterialPath::server(),
    };
    let config = ServerConfig::new()
        .with_loopback_addr(args.loopback)
        .with_public_addr(args.public)
        .with_socket_path(args.socket)
        .with_tls(tls)
        .with_drain_timeout(Duration::from_secs(args.drain_timeout));

    let shutdown = CancellationToken::new();
    tokio::spawn(cancel_on_signal(shutdown.clone()));

    tracing::info!("Starting trirpc server...");
    RpcServer::with_default_methods(config)
        .run(shutdown)
        .await
        .context("Server error")?;
    tracing::info!("Server stopped");
    Ok(())
}

/// Cancels `shutdown` on SIGINT or SIGTERM.
async fn cancel_on_signal(shutdown: CancellationToken) {
    if let Err(e) = wait_for_signal().await {
        tracing::error!("Failed to install signal handlers: {}", e);
        return;
    }
    shutdown.cancel();
}

#[cfg(unix)]
async fn wait_for_signal() -> std::io::Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;

    tokio::select! {
        _ = sigterm.recv() => tracing::info!("Received SIGTERM"),
        _ = sigint.recv() => tracing::info!("Received SIGINT"),
    }
    Ok(())
}

#[cfg(not(unix))]
async fn wait_for_signal() -> std::io::Result<()> {
    tokio::signal::ctrl_c().await?;
    tracing::info!("Received Ctrl-C");
    Ok(())
}
