//! Reactive request dispatcher run by each worker.
//!
//! Each wake-up handles exactly one datagram: receive, authenticate the
//! kernel-attested sender PID against the [`AccessStore`], verify and decode
//! the envelope, route it to a handler, and send the handler's response back
//! to the sender's address. Any failure drops the datagram and the loop
//! goes back to waiting; the socket is never closed because of one message.

use std::future::Future;
use std::path::Path;
use std::time::Duration;

use tracing::{debug, error, info, trace, warn};
use warden_unix::socket::UnixAddr;
use warden_unix::{AuthSocket, Datagram, PeerCredentials, process};

use crate::{
    access::AccessStore,
    errors::{AccessError, ServerError},
    protocol::{Message, Payload, PayloadTag, decode_and_verify, encode_message},
};

pub type Result<T> = std::result::Result<T, ServerError>;

/// Bound for [`AuthSocket::receive`] on the dispatcher's socket. The
/// dispatch loop itself waits for readability without a deadline.
const SOCKET_RECEIVE_TIMEOUT: Duration = Duration::from_secs(1);

/// One authenticated inbound datagram, scoped to a single dispatch.
#[derive(Debug, Clone)]
pub struct ClientMetadata {
    pub sender: Option<UnixAddr>,
    pub credentials: PeerCredentials,
    pub payload: Vec<u8>,
}

impl ClientMetadata {
    /// `None` when the datagram carries no credentials.
    pub fn from_datagram(datagram: Datagram) -> Option<Self> {
        let credentials = datagram.credentials?;
        Some(Self {
            sender: datagram.sender,
            credentials,
            payload: datagram.payload,
        })
    }
}

/// Outcome of one dispatch iteration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Disposition {
    /// A response was sent back to the sender
    Replied {
        tag: PayloadTag,
        sequence_number: u64,
    },
    /// Nothing could be read from the socket
    ReceiveFailed,
    /// No credentials attached
    Unauthenticated,
    /// Sender PID is not in the access store
    Unauthorized { pid: u32 },
    /// Envelope failed verification
    Malformed,
    /// Well-formed, but not a request this dispatcher answers
    Unhandled { tag: PayloadTag },
    /// Authorization request refused by the access store
    Rejected { error: AccessError },
    /// A response was due but could not be delivered
    Undeliverable,
}

pub struct Dispatcher {
    socket: AuthSocket,
    access: AccessStore,
}

impl Dispatcher {
    /// Bind the worker socket at `path` and pre-authorize the parent process,
    /// so the supervisor that spawned us can talk to us immediately.
    pub fn bind(path: &Path, capacity: usize) -> Result<Self> {
        if capacity == 0 {
            return Err(ServerError::ZeroCapacity);
        }

        let socket = AuthSocket::bind(path, SOCKET_RECEIVE_TIMEOUT)?;

        let mut access = AccessStore::new(capacity);
        let parent = process::parent_pid();
        access
            .authorize(parent)
            .map_err(|source| ServerError::AuthorizeParent { pid: parent, source })?;

        Ok(Self::new(socket, access))
    }

    pub fn new(socket: AuthSocket, access: AccessStore) -> Self {
        Self { socket, access }
    }

    pub fn socket(&self) -> &AuthSocket {
        &self.socket
    }

    pub fn access_store(&self) -> &AccessStore {
        &self.access
    }

    pub fn access_store_mut(&mut self) -> &mut AccessStore {
        &mut self.access
    }

    /// Serve until `shutdown` resolves, then remove the socket file.
    pub async fn run<S>(mut self, shutdown: S)
    where
        S: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        info!("Dispatcher listening on {:?}", self.socket.path());

        loop {
            tokio::select! {
                disposition = self.serve_one() => {
                    trace!("Dispatch finished: {:?}", disposition);
                }
                _ = &mut shutdown => {
                    info!("Dispatcher shutting down");
                    break;
                }
            }
        }

        self.socket.unlink();
    }

    /// Wait for one datagram and dispatch it.
    pub async fn serve_one(&mut self) -> Disposition {
        let datagram = match self.socket.receive_next().await {
            Ok(datagram) => datagram,
            Err(e) => {
                warn!("Failed to receive message: {}", e);
                return Disposition::ReceiveFailed;
            }
        };

        let Some(metadata) = ClientMetadata::from_datagram(datagram) else {
            warn!("Dropping message with empty or invalid credentials");
            return Disposition::Unauthenticated;
        };

        match self.handle(&metadata) {
            Ok(response) => self.respond(&metadata, &response).await,
            Err(disposition) => disposition,
        }
    }

    /// Authenticate, verify and route one message.
    ///
    /// Returns the response to send, or why no response is due.
    pub fn handle(&mut self, metadata: &ClientMetadata) -> std::result::Result<Message, Disposition> {
        let pid = metadata.credentials.pid;
        if !self.access.is_authorized(pid) {
            warn!("Access denied for {}", pid);
            return Err(Disposition::Unauthorized { pid });
        }

        let request = decode_and_verify(&metadata.payload).map_err(|e| {
            warn!("Dropping message from {}: {}", pid, e);
            Disposition::Malformed
        })?;

        debug!(
            "Handling request {} ({}) from {}",
            request.sequence_number,
            request.tag(),
            pid
        );

        match request.payload {
            Payload::HeartbeatRequest => Ok(handle_heartbeat(request.sequence_number)),
            Payload::AuthorizeProcessRequest { old_pid, new_pid } => {
                handle_authorize(&mut self.access, request.sequence_number, old_pid, new_pid)
                    .map_err(|error| {
                        warn!("Failed to authorize {} (replacing {}): {}", new_pid, old_pid, error);
                        Disposition::Rejected { error }
                    })
            }
            other => {
                debug!("No handler for {} from {}", other.tag(), pid);
                Err(Disposition::Unhandled { tag: other.tag() })
            }
        }
    }

    async fn respond(&self, metadata: &ClientMetadata, response: &Message) -> Disposition {
        let bytes = match encode_message(response) {
            Ok(bytes) => bytes,
            Err(e) => {
                error!("Failed to encode {} response: {}", response.tag(), e);
                return Disposition::Undeliverable;
            }
        };

        let Some(sender) = metadata.sender.as_ref() else {
            warn!("Sender {} has no address to reply to", metadata.credentials.pid);
            return Disposition::Undeliverable;
        };

        if let Err(e) = self.socket.send_to(&bytes, sender).await {
            warn!("Failed to send response: {}", e);
            return Disposition::Undeliverable;
        }

        Disposition::Replied {
            tag: response.tag(),
            sequence_number: response.sequence_number,
        }
    }
}

/// Answer a heartbeat, echoing its sequence number.
pub fn handle_heartbeat(sequence_number: u64) -> Message {
    Message::new(sequence_number, Payload::HeartbeatResponse)
}

/// Authorize `new_pid`, either as a fresh entry (`old_pid == 0`) or in place of `old_pid`.
pub fn handle_authorize(
    access: &mut AccessStore,
    sequence_number: u64,
    old_pid: u32,
    new_pid: u32,
) -> std::result::Result<Message, AccessError> {
    if old_pid == 0 {
        access.authorize(new_pid)?;
    } else {
        access.swap(old_pid, new_pid)?;
    }
    Ok(Message::new(sequence_number, Payload::AuthorizeProcessResponse))
}

#[cfg(test)]
mod tests;
