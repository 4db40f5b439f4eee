use std::path::PathBuf;

use thiserror::Error;
use warden_protocol::errors::ExchangeError;
use warden_unix::TransportError;

use crate::worker::WorkerRole;

/// Format a YAML error for user-friendly display, including the field path
fn format_yaml_error(e: &serde_path_to_error::Error<serde_yaml::Error>) -> String {
    let path = e.path().to_string();
    let inner = e.inner();
    let msg = inner.to_string();

    let located = if let Some(loc) = inner.location() {
        format!("Line {}, Column {}: {}", loc.line(), loc.column(), msg)
    } else {
        msg
    };

    if path.is_empty() || path == "." {
        located
    } else {
        format!("{}: {}", path, located)
    }
}

#[derive(Error, Debug)]
pub enum DaemonError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Failed to parse config file '{path}':\n  {}", format_yaml_error(.source))]
    ConfigParse {
        path: PathBuf,
        #[source]
        source: serde_path_to_error::Error<serde_yaml::Error>,
    },

    #[error("Config file not found: {0}")]
    ConfigNotFound(PathBuf),

    #[error("Failed to read config file '{path}': {source}")]
    ConfigRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to open monitor socket: {0}")]
    MonitorSocket(#[source] TransportError),

    #[error("Failed to launch {role} worker: {source}")]
    Launch {
        role: WorkerRole,
        #[source]
        source: std::io::Error,
    },

    #[error("{role} worker has no command to run")]
    EmptyCommand { role: WorkerRole },

    #[error("Failed to terminate {role} worker (pid {pid}): {source}")]
    Terminate {
        role: WorkerRole,
        pid: u32,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to authorize pid {new_pid} with the {peer} worker: {source}")]
    Authorize {
        peer: WorkerRole,
        new_pid: u32,
        #[source]
        source: ExchangeError,
    },
}

pub type Result<T> = std::result::Result<T, DaemonError>;
