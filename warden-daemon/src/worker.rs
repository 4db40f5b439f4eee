//! Worker processes supervised by the daemon.
//!
//! The supervisor only sees workers through [`Launcher`] and
//! [`WorkerHandle`]: it can start one for a role, learn its pid, kill it and
//! wait for it to be reaped. How the process is created is up to the launcher.

use std::future::Future;
use std::path::PathBuf;
use std::process::Stdio;

use tokio::process::{Child, Command};
use tracing::{debug, info, warn};

use crate::config::DaemonConfig;
use crate::errors::{DaemonError, Result};

/// Name of the bundled worker binary, installed next to `warden-daemon`.
pub const WORKER_BINARY: &str = "warden-worker";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WorkerRole {
    Server,
    Proxy,
}

impl WorkerRole {
    /// Polling order.
    pub const ALL: [WorkerRole; 2] = [WorkerRole::Server, WorkerRole::Proxy];

    /// The sibling that authorizes this role's replacements.
    pub fn other(self) -> Self {
        match self {
            WorkerRole::Server => WorkerRole::Proxy,
            WorkerRole::Proxy => WorkerRole::Server,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            WorkerRole::Server => "server",
            WorkerRole::Proxy => "proxy",
        }
    }
}

impl std::fmt::Display for WorkerRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A running worker process.
pub trait WorkerHandle: Send {
    fn pid(&self) -> u32;

    /// Forcibly terminate the process. Does not wait for it.
    fn terminate(&mut self) -> Result<()>;

    /// Resolve once the process has exited and been reaped.
    fn await_exit(&mut self) -> impl Future<Output = ()> + Send;
}

/// Starts workers by role.
pub trait Launcher: Send {
    type Handle: WorkerHandle;

    fn spawn(&mut self, role: WorkerRole) -> Result<Self::Handle>;
}

/// A worker started as a child process.
#[derive(Debug)]
pub struct ChildWorker {
    role: WorkerRole,
    pid: u32,
    child: Child,
}

impl WorkerHandle for ChildWorker {
    fn pid(&self) -> u32 {
        self.pid
    }

    fn terminate(&mut self) -> Result<()> {
        debug!("Killing {} worker {}", self.role, self.pid);
        warden_unix::process::force_kill(self.pid).map_err(|source| DaemonError::Terminate {
            role: self.role,
            pid: self.pid,
            source,
        })
    }

    async fn await_exit(&mut self) {
        match self.child.wait().await {
            Ok(status) => debug!("Reaped {} worker {}: {}", self.role, self.pid, status),
            Err(e) => warn!("Failed to reap {} worker {}: {}", self.role, self.pid, e),
        }
    }
}

/// Launches each role from a program and argument list.
#[derive(Debug, Clone)]
pub struct CommandLauncher {
    server: Vec<String>,
    proxy: Vec<String>,
}

impl CommandLauncher {
    pub fn new(server: Vec<String>, proxy: Vec<String>) -> Self {
        Self { server, proxy }
    }

    /// Commands from the config. A role without a command runs the bundled
    /// worker binary on its configured address.
    pub fn from_config(config: &DaemonConfig) -> Result<Self> {
        let resolve = |role: WorkerRole| -> Result<Vec<String>> {
            let worker = config.worker(role);
            if !worker.command.is_empty() {
                return Ok(worker.command.clone());
            }
            let program = bundled_worker().map_err(|source| DaemonError::Launch { role, source })?;
            Ok(vec![
                program.to_string_lossy().into_owned(),
                "--socket".to_string(),
                worker.address.to_string_lossy().into_owned(),
            ])
        };

        Ok(Self::new(
            resolve(WorkerRole::Server)?,
            resolve(WorkerRole::Proxy)?,
        ))
    }

    pub fn command(&self, role: WorkerRole) -> &[String] {
        match role {
            WorkerRole::Server => &self.server,
            WorkerRole::Proxy => &self.proxy,
        }
    }
}

impl Launcher for CommandLauncher {
    type Handle = ChildWorker;

    fn spawn(&mut self, role: WorkerRole) -> Result<ChildWorker> {
        let Some((program, args)) = self.command(role).split_first() else {
            return Err(DaemonError::EmptyCommand { role });
        };

        let mut cmd = Command::new(program);
        cmd.args(args).stdin(Stdio::null()).kill_on_drop(true);

        let child = cmd
            .spawn()
            .map_err(|source| DaemonError::Launch { role, source })?;
        let pid = child.id().ok_or_else(|| DaemonError::Launch {
            role,
            source: std::io::Error::other("worker exited before its pid was read"),
        })?;

        info!("Started {} worker {}: {} {:?}", role, pid, program, args);
        Ok(ChildWorker { role, pid, child })
    }
}

/// Path of the worker binary next to the running executable.
fn bundled_worker() -> std::io::Result<PathBuf> {
    Ok(std::env::current_exe()?.with_file_name(WORKER_BINARY))
}
