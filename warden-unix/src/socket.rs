//! Authenticated Unix-domain datagram sockets.
//!
//! Every socket bound through [`AuthSocket::bind`] has `SO_PASSCRED` enabled,
//! so the kernel attaches the sender's `{pid, uid, gid}` to each datagram it
//! delivers. Those credentials are filled in by the kernel from the actual
//! sending process and cannot be forged by the peer, which makes them the
//! only trust anchor used by the supervisor and its workers.
//!
//! The socket is connectionless but `connect` is used to pick the implicit
//! peer for the next `send`/`receive`. Only one request/response cycle may
//! be in flight on a socket at a time; callers serialize access by holding
//! a `&mut AuthSocket` for the whole cycle.

use std::io::{IoSlice, IoSliceMut};
use std::os::fd::{AsRawFd, OwnedFd, RawFd};
use std::path::{Path, PathBuf};
use std::time::Duration;

use nix::sys::socket::{
    AddressFamily, ControlMessageOwned, MsgFlags, SockFlag, SockType, UnixCredentials, bind,
    connect, recvmsg, sendmsg, setsockopt, socket, sockopt,
};
use thiserror::Error;
use tokio::io::unix::AsyncFd;
use tracing::{debug, trace};

use crate::credentials::PeerCredentials;

pub use nix::sys::socket::UnixAddr;

/// Largest datagram accepted by [`AuthSocket::receive`]. Longer datagrams are truncated.
pub const MAX_DATAGRAM_SIZE: usize = 1024;

/// Size of `sockaddr_un.sun_path`, including the trailing NUL.
const SUN_PATH_CAPACITY: usize = 108;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("invalid socket address {path:?}: {reason}")]
    Address { path: PathBuf, reason: String },

    #[error("failed to set up socket at {path:?}: {source}")]
    Socket {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("could not connect to {path:?}: {source}")]
    Connect {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to send datagram: {0}")]
    Send(#[source] std::io::Error),

    #[error("failed to receive datagram: {0}")]
    Receive(#[source] std::io::Error),

    #[error("received an empty datagram")]
    EmptyDatagram,

    #[error("no datagram received within {0:?}")]
    Timeout(Duration),
}

pub type Result<T> = std::result::Result<T, TransportError>;

/// One received datagram, owned by the caller for the duration of its handling.
#[derive(Debug, Clone)]
pub struct Datagram {
    pub payload: Vec<u8>,
    /// Address the sender is bound to, if it is bound at all.
    pub sender: Option<UnixAddr>,
    /// `None` when the kernel attached no well-formed credentials.
    pub credentials: Option<PeerCredentials>,
}

/// Resolve a filesystem path into a Unix socket address.
pub fn resolve_address(path: &Path) -> Result<UnixAddr> {
    let len = path.as_os_str().len();
    if len == 0 {
        return Err(TransportError::Address {
            path: path.to_path_buf(),
            reason: "socket path is empty".into(),
        });
    }
    if len >= SUN_PATH_CAPACITY {
        return Err(TransportError::Address {
            path: path.to_path_buf(),
            reason: format!(
                "socket path is {} bytes, limit is {}",
                len,
                SUN_PATH_CAPACITY - 1
            ),
        });
    }
    UnixAddr::new(path).map_err(|e| TransportError::Address {
        path: path.to_path_buf(),
        reason: e.desc().to_string(),
    })
}

/// A bound, credential-receiving datagram socket registered with the tokio reactor.
#[derive(Debug)]
pub struct AuthSocket {
    fd: AsyncFd<OwnedFd>,
    path: PathBuf,
    receive_timeout: Duration,
}

impl AuthSocket {
    /// Create a datagram socket bound to `path` with credential passing enabled.
    ///
    /// A stale socket file at `path` is removed first. `receive_timeout`
    /// bounds every [`receive`](Self::receive) on this socket.
    ///
    /// Must be called from within a tokio runtime.
    pub fn bind(path: &Path, receive_timeout: Duration) -> Result<Self> {
        let addr = resolve_address(path)?;
        let setup_err = |source: std::io::Error| TransportError::Socket {
            path: path.to_path_buf(),
            source,
        };

        let fd = socket(
            AddressFamily::Unix,
            SockType::Datagram,
            SockFlag::SOCK_NONBLOCK | SockFlag::SOCK_CLOEXEC,
            None,
        )
        .map_err(|e| setup_err(e.into()))?;

        // The file may not exist yet
        let _ = std::fs::remove_file(path);

        bind(fd.as_raw_fd(), &addr).map_err(|e| setup_err(e.into()))?;
        setsockopt(&fd, sockopt::PassCred, &true).map_err(|e| setup_err(e.into()))?;

        let fd = AsyncFd::new(fd).map_err(setup_err)?;
        debug!("Bound authenticated socket at {:?}", path);

        Ok(Self {
            fd,
            path: path.to_path_buf(),
            receive_timeout,
        })
    }

    /// Path this socket is bound to.
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn receive_timeout(&self) -> Duration {
        self.receive_timeout
    }

    /// Set the implicit peer for subsequent sends.
    pub fn connect(&self, destination: &UnixAddr) -> Result<()> {
        connect(self.fd.as_raw_fd(), destination).map_err(|e| TransportError::Connect {
            path: destination
                .path()
                .map(Path::to_path_buf)
                .unwrap_or_default(),
            source: e.into(),
        })
    }

    /// Send `payload` to the connected peer, without ancillary data.
    pub async fn send(&self, payload: &[u8]) -> Result<usize> {
        loop {
            let mut guard = self.fd.writable().await.map_err(TransportError::Send)?;
            match guard.try_io(|inner| send_datagram(inner.as_raw_fd(), payload)) {
                Ok(result) => return result.map_err(TransportError::Send),
                Err(_would_block) => continue,
            }
        }
    }

    /// Send `payload` to `destination` without changing the connected peer.
    ///
    /// A connected datagram socket only accepts datagrams from its peer, so
    /// sockets that answer many clients reply with this instead of `connect`.
    pub async fn send_to(&self, payload: &[u8], destination: &UnixAddr) -> Result<usize> {
        loop {
            let mut guard = self.fd.writable().await.map_err(TransportError::Send)?;
            match guard.try_io(|inner| {
                let iov = [IoSlice::new(payload)];
                Ok(sendmsg(
                    inner.as_raw_fd(),
                    &iov,
                    &[],
                    MsgFlags::empty(),
                    Some(destination),
                )?)
            }) {
                Ok(result) => return result.map_err(TransportError::Send),
                Err(_would_block) => continue,
            }
        }
    }

    /// Receive one datagram, waiting at most the socket's receive timeout.
    pub async fn receive(&self) -> Result<Datagram> {
        match tokio::time::timeout(self.receive_timeout, self.receive_next()).await {
            Ok(result) => result,
            Err(_) => Err(TransportError::Timeout(self.receive_timeout)),
        }
    }

    /// Wait until the socket is readable, then receive one datagram.
    pub async fn receive_next(&self) -> Result<Datagram> {
        loop {
            let mut guard = self.fd.readable().await.map_err(TransportError::Receive)?;
            match guard.try_io(|inner| recv_datagram(inner.as_raw_fd(), MsgFlags::empty())) {
                Ok(result) => return into_datagram(result),
                Err(_would_block) => continue,
            }
        }
    }

    /// Discard every datagram already queued on the socket without waiting.
    /// Returns how many were discarded.
    pub fn drain(&self) -> usize {
        let mut discarded = 0;
        while recv_datagram(self.fd.as_raw_fd(), MsgFlags::MSG_DONTWAIT).is_ok() {
            discarded += 1;
        }
        if discarded > 0 {
            trace!("Discarded {} stale datagram(s) on {:?}", discarded, self.path);
        }
        discarded
    }

    /// Remove the socket file from the filesystem.
    pub fn unlink(&self) {
        match std::fs::remove_file(&self.path) {
            Ok(()) => debug!("Removed socket {:?}", self.path),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => debug!("Failed to remove socket {:?}: {}", self.path, e),
        }
    }
}

fn send_datagram(fd: RawFd, payload: &[u8]) -> std::io::Result<usize> {
    let iov = [IoSlice::new(payload)];
    Ok(sendmsg::<UnixAddr>(fd, &iov, &[], MsgFlags::empty(), None)?)
}

type RawDatagram = (Vec<u8>, Option<UnixAddr>, Option<PeerCredentials>);

fn recv_datagram(fd: RawFd, flags: MsgFlags) -> std::io::Result<RawDatagram> {
    let mut buf = [0u8; MAX_DATAGRAM_SIZE];
    let mut cmsg_buffer = nix::cmsg_space!(UnixCredentials);
    let mut iov = [IoSliceMut::new(&mut buf)];

    let msg = recvmsg::<UnixAddr>(fd, &mut iov, Some(&mut cmsg_buffer), flags)?;
    let bytes = msg.bytes;

    // Only the first control message is considered, and only if it is
    // exactly an SCM_CREDENTIALS record. A truncated control buffer makes
    // `cmsgs()` fail, which also yields no credentials.
    let credentials = match msg.cmsgs() {
        Ok(mut cmsgs) => match cmsgs.next() {
            Some(ControlMessageOwned::ScmCredentials(creds)) => Some(PeerCredentials::from(creds)),
            _ => None,
        },
        Err(_) => None,
    };
    let sender = msg.address;

    Ok((buf[..bytes].to_vec(), sender, credentials))
}

fn into_datagram(result: std::io::Result<RawDatagram>) -> Result<Datagram> {
    let (payload, sender, credentials) = result.map_err(TransportError::Receive)?;
    if payload.is_empty() {
        return Err(TransportError::EmptyDatagram);
    }
    Ok(Datagram {
        payload,
        sender,
        credentials,
    })
}
