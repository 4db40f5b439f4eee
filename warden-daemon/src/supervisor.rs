//! Heartbeat supervision of the server/proxy worker pair.
//!
//! The supervisor owns one [`ProcessRecord`] per role and polls them
//! round-robin over a single monitor socket. Each failed heartbeat raises the
//! record's lag; once lag reaches `max_lag` the worker is killed, reaped and
//! relaunched, and its sibling is told to authorize the replacement pid in
//! place of the old one.
//!
//! Exchanges are strictly sequential: every exchange borrows the monitor
//! socket mutably from connect through receive.

use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::{debug, error, info, warn};
use warden_protocol::client::Exchange;
use warden_unix::AuthSocket;

use crate::config::{DaemonConfig, format_duration};
use crate::errors::{DaemonError, Result};
use crate::worker::{Launcher, WorkerHandle, WorkerRole};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SupervisorSettings {
    pub max_lag: u32,
    pub poll_interval: Duration,
    pub settle_delay: Duration,
}

impl SupervisorSettings {
    pub fn from_config(config: &DaemonConfig) -> Self {
        Self {
            max_lag: config.max_lag,
            poll_interval: config.poll_interval,
            settle_delay: config.settle_delay,
        }
    }
}

/// Liveness bookkeeping for one supervised worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessRecord {
    pub role: WorkerRole,
    pub address: PathBuf,
    /// Consecutive failed heartbeats, never above `max_lag`
    pub lag: u32,
    pub max_lag: u32,
    pub sequence_number: u64,
    /// 0 until the first launch succeeds
    pub pid: u32,
}

impl ProcessRecord {
    pub fn new(role: WorkerRole, address: PathBuf, max_lag: u32) -> Self {
        Self {
            role,
            address,
            lag: 0,
            max_lag,
            sequence_number: 0,
            pid: 0,
        }
    }

    fn next_sequence_number(&mut self) -> u64 {
        let seq = self.sequence_number;
        self.sequence_number = self.sequence_number.wrapping_add(1);
        seq
    }
}

/// What one heartbeat poll did to its record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome {
    /// The worker answered; lag is back to 0
    Alive,
    /// The exchange failed on our side; the worker is not penalized
    LocalFault,
    /// The worker did not answer properly
    Missed { lag: u32 },
    /// Lag hit the limit and the worker was replaced
    Recovered { old_pid: u32, new_pid: u32 },
    /// The worker was replaced but its sibling did not confirm the new pid
    Unconfirmed { old_pid: u32, new_pid: u32 },
    /// Lag hit the limit and no replacement could be launched
    RecoveryFailed,
}

struct Slot<H> {
    record: ProcessRecord,
    handle: Option<H>,
}

pub struct Supervisor<L: Launcher> {
    socket: AuthSocket,
    launcher: L,
    settings: SupervisorSettings,
    server: Slot<L::Handle>,
    proxy: Slot<L::Handle>,
}

impl<L: Launcher> Supervisor<L> {
    pub fn new(
        socket: AuthSocket,
        launcher: L,
        settings: SupervisorSettings,
        server_address: PathBuf,
        proxy_address: PathBuf,
    ) -> Self {
        let slot = |role, address| Slot {
            record: ProcessRecord::new(role, address, settings.max_lag),
            handle: None,
        };
        Self {
            socket,
            launcher,
            settings,
            server: slot(WorkerRole::Server, server_address),
            proxy: slot(WorkerRole::Proxy, proxy_address),
        }
    }

    /// Bind the monitor socket described by `config`.
    pub fn bind(config: &DaemonConfig, launcher: L) -> Result<Self> {
        let socket = AuthSocket::bind(&config.monitor_address, config.receive_timeout)
            .map_err(DaemonError::MonitorSocket)?;
        Ok(Self::new(
            socket,
            launcher,
            SupervisorSettings::from_config(config),
            config.server.address.clone(),
            config.proxy.address.clone(),
        ))
    }

    pub fn settings(&self) -> &SupervisorSettings {
        &self.settings
    }

    pub fn monitor_address(&self) -> &Path {
        self.socket.path()
    }

    pub fn record(&self, role: WorkerRole) -> &ProcessRecord {
        &self.slot(role).record
    }

    /// Snapshot of both records, in polling order.
    pub fn records(&self) -> [ProcessRecord; 2] {
        WorkerRole::ALL.map(|role| self.record(role).clone())
    }

    fn slot(&self, role: WorkerRole) -> &Slot<L::Handle> {
        match role {
            WorkerRole::Server => &self.server,
            WorkerRole::Proxy => &self.proxy,
        }
    }

    fn slot_mut(&mut self, role: WorkerRole) -> &mut Slot<L::Handle> {
        match role {
            WorkerRole::Server => &mut self.server,
            WorkerRole::Proxy => &mut self.proxy,
        }
    }

    /// Launch both workers, then seed each one's access store with its
    /// sibling's pid once they have had time to bind.
    ///
    /// Only a failed launch is an error. A failed handshake is logged and
    /// left to the heartbeat loop, which replaces workers that do not answer.
    pub async fn start(&mut self) -> Result<()> {
        self.launch()?;
        tokio::time::sleep(self.settings.settle_delay).await;
        if let Err(e) = self.authorize_initial().await {
            warn!("Continuing without a complete initial authorization: {}", e);
        }
        Ok(())
    }

    /// Launch a worker for every role.
    pub fn launch(&mut self) -> Result<()> {
        for role in WorkerRole::ALL {
            let handle = self.launcher.spawn(role)?;
            let slot = self.slot_mut(role);
            slot.record.pid = handle.pid();
            slot.handle = Some(handle);
        }
        Ok(())
    }

    /// Tell each worker about its sibling. Both handshakes are attempted;
    /// the first failure is returned.
    pub async fn authorize_initial(&mut self) -> Result<()> {
        let mut result = Ok(());
        for role in WorkerRole::ALL {
            let pid = self.record(role).pid;
            if let Err(e) = self.authorize_peer(role.other(), 0, pid).await {
                warn!("Initial authorization failed: {}", e);
                if result.is_ok() {
                    result = Err(e);
                }
            }
        }
        result
    }

    /// Poll both workers forever, sleeping `poll_interval` after each poll.
    pub async fn run(&mut self) {
        info!(
            "Supervising {} and {} every {}",
            self.server.record.address.display(),
            self.proxy.record.address.display(),
            format_duration(&self.settings.poll_interval)
        );
        loop {
            for role in WorkerRole::ALL {
                let outcome = self.poll(role).await;
                debug!("Polled {} worker: {:?}", role, outcome);
                tokio::time::sleep(self.settings.poll_interval).await;
            }
        }
    }

    /// One heartbeat exchange with `role`, recovering it if lag hits the limit.
    pub async fn poll(&mut self, role: WorkerRole) -> PollOutcome {
        let record = self.record(role);
        let (address, pid, seq) = (record.address.clone(), record.pid, record.sequence_number);

        let result = Exchange::new(&mut self.socket)
            .heartbeat(&address, pid, seq)
            .await;

        let outcome = match result {
            Ok(_) => {
                self.slot_mut(role).record.lag = 0;
                PollOutcome::Alive
            }
            Err(e) if e.is_local_fault() => {
                warn!("Heartbeat to {} worker not sent: {}", role, e);
                self.slot_mut(role).record.lag = 0;
                PollOutcome::LocalFault
            }
            Err(e) => {
                let record = &mut self.slot_mut(role).record;
                record.lag = (record.lag + 1).min(record.max_lag);
                warn!(
                    "Heartbeat to {} worker {} failed (lag {}/{}): {}",
                    role, pid, record.lag, record.max_lag, e
                );
                if record.lag < record.max_lag {
                    PollOutcome::Missed { lag: record.lag }
                } else {
                    match self.recover(role).await {
                        Ok(new_pid) => PollOutcome::Recovered {
                            old_pid: pid,
                            new_pid,
                        },
                        Err(e @ DaemonError::Authorize { .. }) => {
                            error!("Recovered {} worker is not confirmed: {}", role, e);
                            PollOutcome::Unconfirmed {
                                old_pid: pid,
                                new_pid: self.record(role).pid,
                            }
                        }
                        Err(e) => {
                            error!("Failed to recover {} worker: {}", role, e);
                            PollOutcome::RecoveryFailed
                        }
                    }
                }
            }
        };

        // A replaced worker starts over at sequence number 0
        if !matches!(
            outcome,
            PollOutcome::Recovered { .. } | PollOutcome::Unconfirmed { .. }
        ) {
            self.slot_mut(role).record.next_sequence_number();
        }
        outcome
    }

    /// Kill, reap and relaunch `role`, then have its sibling authorize the
    /// new pid in place of the old one. Returns the new pid.
    ///
    /// A worker that cannot be signalled is not waited for.
    ///
    /// If the relaunch fails the record keeps its lag, so the next poll of
    /// this role tries again.
    pub async fn recover(&mut self, role: WorkerRole) -> Result<u32> {
        let slot = self.slot_mut(role);
        let old_pid = slot.record.pid;

        if let Some(mut handle) = slot.handle.take() {
            info!("Killing {} worker {}", role, old_pid);
            match handle.terminate() {
                Ok(()) => {
                    info!("Reaping {} worker {}", role, old_pid);
                    handle.await_exit().await;
                }
                // Never signalled, so waiting for it could block forever
                Err(e) => warn!("Abandoning {} worker {}: {}", role, old_pid, e),
            }
        }

        let handle = self.launcher.spawn(role)?;
        let new_pid = handle.pid();

        let slot = self.slot_mut(role);
        slot.handle = Some(handle);
        slot.record.pid = new_pid;
        slot.record.lag = 0;
        slot.record.sequence_number = 0;
        info!("Replaced {} worker {} with {}", role, old_pid, new_pid);

        self.authorize_peer(role.other(), old_pid, new_pid).await?;
        Ok(new_pid)
    }

    /// Ask `peer` to authorize `new_pid`, in place of `old_pid` unless it is 0.
    ///
    /// Uses and advances the peer's sequence number. The reply must come
    /// from the peer's current pid.
    pub async fn authorize_peer(&mut self, peer: WorkerRole, old_pid: u32, new_pid: u32) -> Result<()> {
        let (address, peer_pid, seq) = {
            let record = &mut self.slot_mut(peer).record;
            let seq = record.next_sequence_number();
            (record.address.clone(), record.pid, seq)
        };

        Exchange::new(&mut self.socket)
            .authorize(&address, peer_pid, seq, old_pid, new_pid)
            .await
            .map_err(|source| DaemonError::Authorize {
                peer,
                new_pid,
                source,
            })?;

        info!("{} worker {} authorized {}", peer, peer_pid, new_pid);
        Ok(())
    }

    /// Kill and reap both workers and remove the monitor socket.
    pub async fn shutdown(&mut self) {
        for role in WorkerRole::ALL {
            let slot = self.slot_mut(role);
            if let Some(mut handle) = slot.handle.take() {
                match handle.terminate() {
                    Ok(()) => {
                        handle.await_exit().await;
                        info!("Stopped {} worker {}", role, slot.record.pid);
                    }
                    Err(e) => warn!("Abandoning {} worker {}: {}", role, slot.record.pid, e),
                }
            }
        }
        self.socket.unlink();
    }
}
