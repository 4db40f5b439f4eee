//! Supervisor for the warden server/proxy worker pair.

use std::future::Future;

use tokio::signal::unix::{Signal, SignalKind, signal};
use tracing::{info, warn};

pub mod config;
pub mod errors;
pub mod supervisor;
pub mod worker;

/// Initialize tracing for a binary: `RUST_LOG` filtering with an INFO default.
pub fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();
}

/// Resolve on the first SIGINT or SIGTERM.
///
/// The handlers are installed when this is called, not when the future is
/// first polled, so a signal arriving in between is not lost.
pub fn shutdown_signal() -> impl Future<Output = ()> + Send + 'static {
    let mut sigint = listen(SignalKind::interrupt(), "SIGINT");
    let mut sigterm = listen(SignalKind::terminate(), "SIGTERM");

    async move {
        tokio::select! {
            _ = receive(&mut sigint) => info!("Received SIGINT"),
            _ = receive(&mut sigterm) => info!("Received SIGTERM"),
        }
    }
}

fn listen(kind: SignalKind, name: &str) -> Option<Signal> {
    match signal(kind) {
        Ok(stream) => Some(stream),
        Err(e) => {
            warn!("Failed to install {} handler: {}", name, e);
            None
        }
    }
}

async fn receive(stream: &mut Option<Signal>) {
    match stream {
        Some(stream) => {
            stream.recv().await;
        }
        None => std::future::pending::<()>().await,
    }
}
