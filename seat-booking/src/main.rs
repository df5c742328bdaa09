use anyhow::Context;
use clap::Parser;
use config::ServerConfig;
use server::Server;
use tracing::Level;

mod config;
mod grid;
mod pool;
mod protocol;
mod server;

const DEFAULT_PORT: u16 = 8123;
const DEFAULT_WORKERS: usize = 1024;
const DEFAULT_RECV_TIMEOUT: u64 = 3;

#[derive(clap::Parser, Debug)]
#[command(version, about = "Venue seat booking server", long_about = None)]
struct Args {
    /// Number of rows in the venue
    #[arg(short, long)]
    rows: u32,

    /// Number of seats in every row
    #[arg(short = 'p', long, visible_alias = "pols")]
    cols: u32,

    #[arg(short = 'l', long, default_value_t = DEFAULT_PORT)]
    port: u16,

    /// Maximum number of connections served at the same time
    #[arg(short = 't', long = "nthreads", default_value_t = DEFAULT_WORKERS)]
    max_workers: usize,

    /// Seconds a client has to send its request
    #[arg(short = 'o', long = "recvto", default_value_t = DEFAULT_RECV_TIMEOUT)]
    recv_timeout: u64,

    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // connect tracing to stdout
    tracing_subscriber::fmt()
        .with_max_level(if args.verbose {
            Level::DEBUG
        } else {
            Level::INFO
        })
        .init();

    let config = ServerConfig::new(
        args.rows,
        args.cols,
        args.port,
        args.max_workers,
        args.recv_timeout,
    )?;
    tracing::debug!("starting setup with {:?}", config);

    let shutdown = shutdown_signal().context("unable to register the signal handlers")?;
    let server = Server::bind(config.clone(), ("0.0.0.0", config.port)).await?;

    tracing::debug!("max receive buffer size: {}B", config.max_request_bytes);
    tracing::debug!(
        "max command GetAvailableSeats send buffer size: {}B",
        config.max_listing_bytes
    );
    tracing::debug!("receive timeout: {:?}", config.recv_timeout);
    tracing::info!("Server listening on: {}", server.local_addr()?);

    server.run_until(shutdown).await
}

// Resolves on the first SIGINT or SIGTERM.
#[cfg(unix)]
fn shutdown_signal() -> std::io::Result<impl std::future::Future<Output = ()>> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut interrupt = signal(SignalKind::interrupt())?;
    let mut terminate = signal(SignalKind::terminate())?;

    Ok(async move {
        tokio::select! {
            _ = interrupt.recv() => tracing::info!("received SIGINT, shutting down"),
            _ = terminate.recv() => tracing::info!("received SIGTERM, shutting down"),
        }
    })
}

#[cfg(not(unix))]
fn shutdown_signal() -> std::io::Result<impl std::future::Future<Output = ()>> {
    Ok(async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            tracing::error!("unable to listen for ctrl-c: {}", err);
            std::future::pending::<()>().await;
        }
        tracing::info!("received ctrl-c, shutting down");
    })
}
