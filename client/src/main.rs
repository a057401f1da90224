use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::EnvFilter;
use trirpc_client::{ClientConfig, RpcClient};
use trirpc_common::{
    config::{CLIENT_CERT_FILE, CLIENT_KEY_FILE, SOCKET_PATH, TLS_PORT},
    summary::{ServerSummary, ServerSummaryQuery, GET_SERVER_SUMMARY},
    TlsMaterial, TlsMaterialPath,
};

#[derive(Parser, Debug)]
#[command(name = "trirpc-client")]
#[command(about = "Queries a trirpc server over mutual TLS and over its local socket")]
struct Args {
    /// Server host or IP address for the TLS call
    addr: String,

    /// TLS port
    #[arg(long, default_value_t = TLS_PORT)]
    port: u16,

    /// Local socket path; a leading '@' selects the abstract namespace
    #[arg(long, default_value = SOCKET_PATH)]
    socket: String,

    /// Directory holding client.crt and client.key (defaults to $TRIRPC_CERTS_DIR or ./certs)
    #[arg(long)]
    certs_dir: Option<PathBuf>,

    /// Server name to query
    #[arg(long, default_value = "superserver")]
    server_name: String,

    /// Default log filter, overridden by RUST_LOG
    #[arg(short, long, default_value = "warn")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    let query = ServerSummaryQuery::new(args.server_name.as_str());

    println!("Via HTTP/2 connection:");
    if let Err(e) = via_tls(&args, &query).await {
        println!("TLS call failed: {e:#}");
    }

    println!("\n");

    println!("Via unix socket connection:");
    if let Err(e) = via_socket(&args, &query).await {
        println!("Socket call failed: {e:#}");
    }

    Ok(())
}

async fn via_tls(args: &Args, query: &ServerSummaryQuery) -> Result<()> {
    let paths = match &args.certs_dir {
        Some(dir) => TlsMaterialPath::in_dir(dir, CLIENT_CERT_FILE, CLIENT_KEY_FILE),
        None => TlsMaterialPath::client(),
    };
    let material = TlsMaterial::load(&paths).context("Failed to load client certificates")?;
    let client = RpcClient::tls(&args.addr, args.port, &material, ClientConfig::new())
        .context("Failed to create TLS client")?;

    let summary: ServerSummary = client.call(GET_SERVER_SUMMARY, query).await?;
    print_json(&summary)
}

#[cfg(unix)]
async fn via_socket(args: &Args, query: &ServerSummaryQuery) -> Result<()> {
    let client = RpcClient::local(&args.socket, ClientConfig::new());
    let summary: ServerSummary = client.call(GET_SERVER_SUMMARY, query).await?;
    print_json(&summary)
}

#[cfg(not(unix))]
async fn via_socket(_args: &Args, _query: &ServerSummaryQuery) -> Result<()> {
    anyhow::bail!("local sockets are not supported on this platform")
}

fn print_json(summary: &ServerSummary) -> Result<()> {
    let pretty = serde_json::to_string_pretty(summary).context("Failed to format result")?;
    println!("{pretty}");
    Ok(())
}
