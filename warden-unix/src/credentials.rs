use nix::sys::socket::UnixCredentials;

/// Peer credentials attached by the kernel to a received datagram.
/// Provides the PID, UID and GID of the process that actually sent it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PeerCredentials {
    pub pid: u32,
    pub uid: u32,
    pub gid: u32,
}

impl From<UnixCredentials> for PeerCredentials {
    fn from(creds: UnixCredentials) -> Self {
        Self {
            pid: creds.pid() as u32,
            uid: creds.uid(),
            gid: creds.gid(),
        }
    }
}

impl std::fmt::Display for PeerCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "pid={} uid={} gid={}", self.pid, self.uid, self.gid)
    }
}
