//! Supervisor configuration.
//!
//! Every key is optional; an absent file or an empty document yields the
//! defaults below, which match the fixed addresses and timings the worker
//! pair has always been deployed with.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;
use warden_unix::socket::resolve_address;

use crate::errors::{DaemonError, Result};
use crate::worker::WorkerRole;

mod duration;

pub use duration::{format_duration, parse_duration};
use duration::{deserialize_duration, serialize_duration};

pub const DEFAULT_MONITOR_ADDRESS: &str = "/tmp/process_monitor";
pub const DEFAULT_SERVER_ADDRESS: &str = "/tmp/server";
pub const DEFAULT_PROXY_ADDRESS: &str = "/tmp/proxy";
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(2);
pub const DEFAULT_SETTLE_DELAY: Duration = Duration::from_secs(3);
pub const DEFAULT_RECEIVE_TIMEOUT: Duration = Duration::from_millis(100);
pub const DEFAULT_MAX_LAG: u32 = 2;

/// Maximum config file size (1MB)
const MAX_CONFIG_FILE_SIZE: u64 = 1024 * 1024;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DaemonConfig {
    /// Socket the supervisor sends heartbeats from
    pub monitor_address: PathBuf,

    /// Sleep after every heartbeat exchange
    #[serde(
        deserialize_with = "deserialize_duration",
        serialize_with = "serialize_duration"
    )]
    pub poll_interval: Duration,

    /// Wait between launching the workers and the first authorization
    #[serde(
        deserialize_with = "deserialize_duration",
        serialize_with = "serialize_duration"
    )]
    pub settle_delay: Duration,

    /// Bound on every response the supervisor waits for. Deployments that
    /// relied on the old fixed 10us wait can set `receive_timeout: 10us`.
    #[serde(
        deserialize_with = "deserialize_duration",
        serialize_with = "serialize_duration"
    )]
    pub receive_timeout: Duration,

    /// Consecutive failed heartbeats that trigger recovery
    pub max_lag: u32,

    pub server: WorkerConfig,
    pub proxy: WorkerConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WorkerConfig {
    pub address: PathBuf,

    /// Program and arguments. Empty runs the bundled `warden-worker`.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub command: Vec<String>,
}

impl WorkerConfig {
    pub fn new(address: impl Into<PathBuf>) -> Self {
        Self {
            address: address.into(),
            command: Vec::new(),
        }
    }
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            monitor_address: PathBuf::from(DEFAULT_MONITOR_ADDRESS),
            poll_interval: DEFAULT_POLL_INTERVAL,
            settle_delay: DEFAULT_SETTLE_DELAY,
            receive_timeout: DEFAULT_RECEIVE_TIMEOUT,
            max_lag: DEFAULT_MAX_LAG,
            server: WorkerConfig::new(DEFAULT_SERVER_ADDRESS),
            proxy: WorkerConfig::new(DEFAULT_PROXY_ADDRESS),
        }
    }
}

impl DaemonConfig {
    /// Load and validate the config at `path`.
    pub fn load(path: &Path) -> Result<Self> {
        let metadata = std::fs::metadata(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                DaemonError::ConfigNotFound(path.to_path_buf())
            } else {
                DaemonError::ConfigRead {
                    path: path.to_path_buf(),
                    source: e,
                }
            }
        })?;
        if metadata.len() > MAX_CONFIG_FILE_SIZE {
            return Err(DaemonError::Config(format!(
                "Config file '{}' is too large ({} bytes, max {} bytes)",
                path.display(),
                metadata.len(),
                MAX_CONFIG_FILE_SIZE,
            )));
        }

        let contents = std::fs::read_to_string(path).map_err(|e| DaemonError::ConfigRead {
            path: path.to_path_buf(),
            source: e,
        })?;

        let config = Self::parse(&contents, path)?;
        config.validate(path)?;
        debug!("Loaded config from {:?}", path);
        Ok(config)
    }

    /// Load from `path` if given, otherwise use the defaults.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::load(path),
            None => Ok(Self::default()),
        }
    }

    /// Parse YAML without validating. `path` is only used in error messages.
    pub fn parse(contents: &str, path: &Path) -> Result<Self> {
        if contents.trim().is_empty() {
            return Ok(Self::default());
        }

        let de = serde_yaml::Deserializer::from_str(contents);
        serde_path_to_error::deserialize(de).map_err(|e| DaemonError::ConfigParse {
            path: path.to_path_buf(),
            source: e,
        })
    }

    /// Validate the configuration
    pub fn validate(&self, path: &Path) -> Result<()> {
        let mut errors = Vec::new();

        if self.max_lag == 0 {
            errors.push("'max_lag' must be at least 1".to_string());
        }
        if self.poll_interval.is_zero() {
            errors.push("'poll_interval' must be greater than zero".to_string());
        }
        if self.receive_timeout.is_zero() {
            errors.push("'receive_timeout' must be greater than zero".to_string());
        }

        let addresses = [
            ("monitor_address", &self.monitor_address),
            ("server.address", &self.server.address),
            ("proxy.address", &self.proxy.address),
        ];
        for (key, address) in addresses {
            if let Err(e) = resolve_address(address) {
                errors.push(format!("'{}': {}", key, e));
            }
        }
        for (i, (key, address)) in addresses.iter().enumerate() {
            for (other_key, other) in &addresses[i + 1..] {
                if address == other {
                    errors.push(format!(
                        "'{}' and '{}' must differ, both are {:?}",
                        key, other_key, address
                    ));
                }
            }
        }

        if !errors.is_empty() {
            return Err(DaemonError::Config(format!(
                "Configuration errors in {}:\n  - {}",
                path.display(),
                errors.join("\n  - ")
            )));
        }

        Ok(())
    }

    pub fn worker(&self, role: WorkerRole) -> &WorkerConfig {
        match role {
            WorkerRole::Server => &self.server,
            WorkerRole::Proxy => &self.proxy,
        }
    }
}

#[cfg(test)]
mod tests;
