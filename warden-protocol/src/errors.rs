use thiserror::Error;
use warden_unix::TransportError;

use crate::protocol::PayloadTag;

/// Why a buffer failed structural verification.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MalformedMessage {
    #[error("buffer of {len} bytes is shorter than the {min}-byte envelope")]
    TooShort { len: usize, min: usize },

    #[error("buffer of {len} bytes exceeds the {max}-byte limit")]
    TooLong { len: usize, max: usize },

    #[error("unknown payload tag {0}")]
    UnknownTag(u32),

    #[error("{tag} payload must be {expected} bytes, got {actual}")]
    LengthMismatch {
        tag: PayloadTag,
        expected: usize,
        actual: usize,
    },

    #[error("undecodable envelope: {0}")]
    Decode(String),
}

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("failed to encode message: {0}")]
    Encode(#[source] bincode::Error),

    #[error("malformed message: {0}")]
    Malformed(#[from] MalformedMessage),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AccessError {
    #[error("process {0} is already authorized")]
    AlreadyAuthorized(u32),

    #[error("access store is at capacity ({0} entries)")]
    AtCapacity(usize),

    #[error("process {0} is not authorized")]
    NotFound(u32),
}

/// Failure of one request/response cycle with a peer.
#[derive(Debug, Error)]
pub enum ExchangeError {
    #[error("failed to encode request: {0}")]
    Encode(#[source] ProtocolError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("response carried no peer credentials")]
    MissingCredentials,

    #[error("response came from pid {actual}, expected pid {expected}")]
    UnexpectedPeer { expected: u32, actual: u32 },

    #[error("malformed response: {0}")]
    Malformed(#[source] ProtocolError),

    #[error("expected {expected} response, got {actual}")]
    UnexpectedResponse {
        expected: PayloadTag,
        actual: PayloadTag,
    },
}

impl ExchangeError {
    /// Failures caused by this side rather than by the peer: the request
    /// could not be encoded, or the destination path is not a valid address.
    pub fn is_local_fault(&self) -> bool {
        matches!(
            self,
            ExchangeError::Encode(_) | ExchangeError::Transport(TransportError::Address { .. })
        )
    }
}

#[derive(Debug, Error)]
pub enum ServerError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("failed to authorize parent process {pid}: {source}")]
    AuthorizeParent {
        pid: u32,
        #[source]
        source: AccessError,
    },

    #[error("access store capacity must be at least 1")]
    ZeroCapacity,
}
