//! warden-worker: answers heartbeat and authorization requests on its socket
//! until SIGINT/SIGTERM, then removes the socket and exits.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;
use warden_protocol::access::DEFAULT_CAPACITY;
use warden_protocol::server::Dispatcher;

#[derive(Parser)]
#[command(name = "warden-worker", about = "Supervised worker for the warden daemon")]
struct Args {
    /// Socket path to bind
    #[arg(short, long)]
    socket: PathBuf,

    /// Maximum number of authorized peer processes
    #[arg(long, default_value_t = DEFAULT_CAPACITY)]
    capacity: usize,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    warden_daemon::init_tracing();

    let dispatcher = Dispatcher::bind(&args.socket, args.capacity)
        .with_context(|| format!("Failed to start worker on {}", args.socket.display()))?;
    info!(
        "Worker {} serving {:?}",
        warden_unix::process::current_pid(),
        args.socket
    );

    dispatcher.run(warden_daemon::shutdown_signal()).await;
    info!("Worker stopped");
    Ok(())
}
