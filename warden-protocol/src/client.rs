//! One request/response cycle with a supervised peer.
//!
//! An [`Exchange`] borrows the caller's socket mutably for the whole
//! `connect`, `send`, `receive` cycle, so two cycles can never interleave
//! on the same handle.

use std::path::Path;

use tracing::{debug, trace};
use warden_unix::AuthSocket;
use warden_unix::socket::resolve_address;

use crate::{
    errors::ExchangeError,
    protocol::{Message, Payload, PayloadTag, decode_and_verify, encode_message},
};

pub type Result<T> = std::result::Result<T, ExchangeError>;

pub struct Exchange<'s> {
    socket: &'s mut AuthSocket,
}

impl<'s> Exchange<'s> {
    pub fn new(socket: &'s mut AuthSocket) -> Self {
        Self { socket }
    }

    /// Probe the peer at `destination`, which must answer as `expected_pid`.
    pub async fn heartbeat(
        self,
        destination: &Path,
        expected_pid: u32,
        sequence_number: u64,
    ) -> Result<Message> {
        self.request(
            destination,
            expected_pid,
            Message::new(sequence_number, Payload::HeartbeatRequest),
            PayloadTag::HeartbeatResponse,
        )
        .await
    }

    /// Ask the peer at `destination` to authorize `new_pid`, in place of
    /// `old_pid` unless it is 0.
    pub async fn authorize(
        self,
        destination: &Path,
        expected_pid: u32,
        sequence_number: u64,
        old_pid: u32,
        new_pid: u32,
    ) -> Result<Message> {
        self.request(
            destination,
            expected_pid,
            Message::new(
                sequence_number,
                Payload::AuthorizeProcessRequest { old_pid, new_pid },
            ),
            PayloadTag::AuthorizeProcessResponse,
        )
        .await
    }

    /// Send `request` and wait for one authenticated reply of `expected_tag`.
    ///
    /// The reply must carry kernel credentials whose pid is `expected_pid`.
    /// Datagrams queued before the request was sent are discarded first.
    pub async fn request(
        self,
        destination: &Path,
        expected_pid: u32,
        request: Message,
        expected_tag: PayloadTag,
    ) -> Result<Message> {
        let bytes = encode_message(&request).map_err(ExchangeError::Encode)?;
        let address = resolve_address(destination)?;

        let stale = self.socket.drain();
        if stale > 0 {
            debug!("Dropped {} late response(s) before contacting {:?}", stale, destination);
        }

        self.socket.connect(&address)?;
        self.socket.send(&bytes).await?;
        trace!(
            "Sent {} ({}) to {:?}",
            request.tag(),
            request.sequence_number,
            destination
        );

        let reply = self.socket.receive().await?;
        let credentials = reply.credentials.ok_or(ExchangeError::MissingCredentials)?;
        if credentials.pid != expected_pid {
            return Err(ExchangeError::UnexpectedPeer {
                expected: expected_pid,
                actual: credentials.pid,
            });
        }

        let response = decode_and_verify(&reply.payload).map_err(ExchangeError::Malformed)?;
        if response.tag() != expected_tag {
            return Err(ExchangeError::UnexpectedResponse {
                expected: expected_tag,
                actual: response.tag(),
            });
        }
        if response.sequence_number != request.sequence_number {
            debug!(
                "Response from {} echoed sequence {} for request {}",
                credentials.pid, response.sequence_number, request.sequence_number
            );
        }

        Ok(response)
    }
}
