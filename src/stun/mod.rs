// STUN (RFC 5389) framing used as cover traffic
//
// Serializes and parses just enough of the protocol to make an obfuscated
// WireGuard flow look like NAT traversal: Data Indications carry the payload,
// Binding Requests serve as keepalives, and Binding Responses answer probes.
// Interoperating with real STUN servers beyond superficial validation is not
// a goal.

pub mod masker;
pub mod packet;

pub use masker::StunMasker;
pub use packet::{StunAttribute, StunMessageType, StunPacket};

use thiserror::Error;

/// Errors raised while constructing or parsing STUN messages.
#[derive(Error, Debug)]
pub enum StunError {
    /// Buffer smaller than the header or declared length requires.
    #[error("STUN packet too short: expected at least {expected} bytes, got {got}")]
    PacketTooShort { expected: usize, got: usize },
    /// Bytes 4..8 are not the RFC 5389 magic cookie.
    #[error("invalid STUN magic cookie")]
    InvalidMagicCookie,
    /// Transaction IDs are exactly 12 bytes.
    #[error("invalid STUN transaction ID length: {0}")]
    InvalidTransactionId(usize),
    /// The type field does not decode to a recognized message.
    #[error("unknown STUN message type: 0x{0:04x}")]
    UnknownMessageType(u16),
    /// An attribute's declared bounds exceed the buffer.
    #[error("malformed STUN attribute")]
    MalformedAttribute,
}
