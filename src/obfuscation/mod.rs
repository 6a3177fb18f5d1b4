// Obfuscation layer for WireGuard datagrams
//
// Hides the WireGuard protocol fingerprint from on-path inspectors with a
// length-keyed XOR keystream, header scrambling and random-length padding.
// This is DPI resistance, not encryption: WireGuard itself provides the
// cryptographic layer underneath.

pub mod codec;
pub mod engine;

pub use codec::PacketCodec;
pub use engine::ObfuscationEngine;

use thiserror::Error;

/// Errors raised by the obfuscation engine and packet codec.
#[derive(Error, Debug)]
pub enum ObfuscationError {
    /// Key must be at least one byte.
    #[error("obfuscation key is empty")]
    KeyTooShort,
    /// Key must fit in the single-byte length fold.
    #[error("obfuscation key exceeds 255 bytes")]
    KeyTooLong,
    /// Buffer smaller than the operation requires.
    #[error("packet too short: expected at least {expected} bytes, got {got}")]
    PacketTooShort { expected: usize, got: usize },
    /// Decoded framing fields are inconsistent with the buffer.
    #[error("decoding failed: {0}")]
    DecodingFailed(String),
    /// Post-decode type field is not a WireGuard message type.
    #[error("decoded packet is not a valid WireGuard message")]
    InvalidWireGuardPacket,
}
