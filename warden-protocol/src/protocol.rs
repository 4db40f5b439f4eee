use bincode::Options;
use serde::{Deserialize, Serialize};

use crate::errors::{MalformedMessage, ProtocolError};

/// Maximum message size: one datagram as read by the transport
pub const MAX_MESSAGE_SIZE: usize = warden_unix::socket::MAX_DATAGRAM_SIZE;

/// Envelope header: sequence number (u64 LE) followed by the payload tag (u32 LE)
pub const ENVELOPE_HEADER_SIZE: usize = 12;

const TAG_OFFSET: usize = 8;

/// Wire discriminant of a payload variant.
///
/// Values match the variant order of [`Payload`], which is what bincode
/// writes as the enum index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum PayloadTag {
    HeartbeatRequest = 0,
    HeartbeatResponse = 1,
    AuthorizeProcessRequest = 2,
    AuthorizeProcessResponse = 3,
}

impl PayloadTag {
    pub fn from_u32(value: u32) -> Option<Self> {
        match value {
            0 => Some(Self::HeartbeatRequest),
            1 => Some(Self::HeartbeatResponse),
            2 => Some(Self::AuthorizeProcessRequest),
            3 => Some(Self::AuthorizeProcessResponse),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::HeartbeatRequest => "HeartbeatRequest",
            Self::HeartbeatResponse => "HeartbeatResponse",
            Self::AuthorizeProcessRequest => "AuthorizeProcessRequest",
            Self::AuthorizeProcessResponse => "AuthorizeProcessResponse",
        }
    }

    /// Size of the tag-specific fields that follow the envelope header.
    pub fn body_size(&self) -> usize {
        match self {
            Self::AuthorizeProcessRequest => 8,
            _ => 0,
        }
    }

    pub fn is_request(&self) -> bool {
        matches!(self, Self::HeartbeatRequest | Self::AuthorizeProcessRequest)
    }
}

impl std::fmt::Display for PayloadTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Typed payload carried by every message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Payload {
    /// Liveness probe sent by the supervisor
    HeartbeatRequest,
    /// Answer to a heartbeat, echoing the request's sequence number
    HeartbeatResponse,
    /// Authorize `new_pid`; replaces `old_pid` in place unless it is 0
    AuthorizeProcessRequest { old_pid: u32, new_pid: u32 },
    /// Sent only when an authorization request succeeded
    AuthorizeProcessResponse,
}

impl Payload {
    pub fn tag(&self) -> PayloadTag {
        match self {
            Payload::HeartbeatRequest => PayloadTag::HeartbeatRequest,
            Payload::HeartbeatResponse => PayloadTag::HeartbeatResponse,
            Payload::AuthorizeProcessRequest { .. } => PayloadTag::AuthorizeProcessRequest,
            Payload::AuthorizeProcessResponse => PayloadTag::AuthorizeProcessResponse,
        }
    }
}

/// Envelope shared by every exchange.
///
/// Sequence numbers are advisory: they are echoed back and logged, never
/// used for ordering or replay protection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub sequence_number: u64,
    pub payload: Payload,
}

impl Message {
    pub fn new(sequence_number: u64, payload: Payload) -> Self {
        Self {
            sequence_number,
            payload,
        }
    }

    pub fn tag(&self) -> PayloadTag {
        self.payload.tag()
    }
}

pub type Result<T> = std::result::Result<T, ProtocolError>;

/// Fixed-width little-endian bincode, bounded to one datagram, no trailing bytes.
fn wire_options() -> impl Options {
    bincode::DefaultOptions::new()
        .with_fixint_encoding()
        .with_little_endian()
        .with_limit(MAX_MESSAGE_SIZE as u64)
        .reject_trailing_bytes()
}

/// Encode a sequence number and payload into wire bytes
pub fn encode(sequence_number: u64, payload: Payload) -> Result<Vec<u8>> {
    encode_message(&Message::new(sequence_number, payload))
}

pub fn encode_message(message: &Message) -> Result<Vec<u8>> {
    wire_options()
        .serialize(message)
        .map_err(ProtocolError::Encode)
}

/// Check the structure of an untrusted buffer without decoding any field
/// other than the tag: size bounds, a known tag, and the exact length that
/// tag requires.
pub fn verify(bytes: &[u8]) -> std::result::Result<PayloadTag, MalformedMessage> {
    if bytes.len() < ENVELOPE_HEADER_SIZE {
        return Err(MalformedMessage::TooShort {
            len: bytes.len(),
            min: ENVELOPE_HEADER_SIZE,
        });
    }
    if bytes.len() > MAX_MESSAGE_SIZE {
        return Err(MalformedMessage::TooLong {
            len: bytes.len(),
            max: MAX_MESSAGE_SIZE,
        });
    }

    let mut raw_tag = [0u8; 4];
    raw_tag.copy_from_slice(&bytes[TAG_OFFSET..ENVELOPE_HEADER_SIZE]);
    let raw_tag = u32::from_le_bytes(raw_tag);
    let tag = PayloadTag::from_u32(raw_tag).ok_or(MalformedMessage::UnknownTag(raw_tag))?;

    let expected = ENVELOPE_HEADER_SIZE + tag.body_size();
    if bytes.len() != expected {
        return Err(MalformedMessage::LengthMismatch {
            tag,
            expected,
            actual: bytes.len(),
        });
    }

    Ok(tag)
}

/// Verify an untrusted buffer, then decode it into a [`Message`].
pub fn decode_and_verify(bytes: &[u8]) -> Result<Message> {
    let tag = verify(bytes)?;

    let message: Message = wire_options()
        .deserialize(bytes)
        .map_err(|e| MalformedMessage::Decode(e.to_string()))?;

    debug_assert_eq!(message.tag(), tag);
    Ok(message)
}
