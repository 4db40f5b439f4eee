//! Whitelist of peer PIDs allowed to invoke handlers on an endpoint.
//!
//! Entries are only ever appended or replaced in place, so the position a
//! PID was first authorized at carries over to the process that replaces it.
//! The store is owned by a single dispatcher task and is not synchronized.

use tracing::{debug, info};

use crate::errors::AccessError;

/// Default capacity: the supervisor, the sibling worker, and headroom.
pub const DEFAULT_CAPACITY: usize = 5;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessStore {
    whitelist: Vec<u32>,
    capacity: usize,
}

impl AccessStore {
    pub fn new(capacity: usize) -> Self {
        Self {
            whitelist: Vec::with_capacity(capacity),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.whitelist.len()
    }

    pub fn is_empty(&self) -> bool {
        self.whitelist.is_empty()
    }

    /// Authorized PIDs in the order they were granted.
    pub fn entries(&self) -> &[u32] {
        &self.whitelist
    }

    pub fn is_authorized(&self, pid: u32) -> bool {
        self.whitelist.contains(&pid)
    }

    /// Append `pid` to the whitelist.
    pub fn authorize(&mut self, pid: u32) -> Result<(), AccessError> {
        if self.is_authorized(pid) {
            debug!("Process {} already authorized", pid);
            return Err(AccessError::AlreadyAuthorized(pid));
        }
        if self.whitelist.len() >= self.capacity {
            debug!("Access store at capacity, cannot authorize {}", pid);
            return Err(AccessError::AtCapacity(self.capacity));
        }
        self.whitelist.push(pid);
        info!("Authorized {}", pid);
        Ok(())
    }

    /// Replace the first entry equal to `old_pid` with `new_pid`, keeping its position.
    ///
    /// An absent `old_pid` is `NotFound`. Otherwise fails without touching
    /// the store if `new_pid` is already present under a different entry,
    /// since that would duplicate it.
    pub fn swap(&mut self, old_pid: u32, new_pid: u32) -> Result<(), AccessError> {
        let index = self
            .whitelist
            .iter()
            .position(|&pid| pid == old_pid)
            .ok_or(AccessError::NotFound(old_pid))?;
        if old_pid != new_pid && self.is_authorized(new_pid) {
            return Err(AccessError::AlreadyAuthorized(new_pid));
        }
        self.whitelist[index] = new_pid;
        info!("Authorized {} in place of {}", new_pid, old_pid);
        Ok(())
    }
}

impl Default for AccessStore {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}
