//! WireGuard datagram recognition
//!
//! A plaintext WireGuard datagram starts with its message type encoded as a
//! little-endian u32 in bytes 0..4; the three reserved bytes 1..4 are always
//! zero. That structure doubles as the plaintext-recognition oracle used by
//! the codec: anything whose leading u32 does not decode to a known type is
//! treated as obfuscated (or foreign) traffic.

use anyhow::anyhow;

use crate::constants::MIN_PACKET_SIZE;

/// WireGuard message types (little-endian u32 in bytes 0..4)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum MessageType {
    /// First handshake message (initiator -> responder)
    HandshakeInitiation = 1,
    /// Second handshake message (responder -> initiator)
    HandshakeResponse = 2,
    /// Cookie reply under load
    Cookie = 3,
    /// Transport data
    Data = 4,
}

impl TryFrom<u32> for MessageType {
    type Error = anyhow::Error;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(MessageType::HandshakeInitiation),
            2 => Ok(MessageType::HandshakeResponse),
            3 => Ok(MessageType::Cookie),
            4 => Ok(MessageType::Data),
            _ => Err(anyhow!("Unknown WireGuard message type: {}", value)),
        }
    }
}

impl MessageType {
    /// Handshake packets get the larger padding cap in the codec.
    pub fn is_handshake(self) -> bool {
        matches!(
            self,
            MessageType::HandshakeInitiation | MessageType::HandshakeResponse
        )
    }
}

/// Read the message type from the first four bytes, if they decode to one.
pub fn detect_type(buf: &[u8]) -> Option<MessageType> {
    if buf.len() < MIN_PACKET_SIZE {
        return None;
    }
    let value = u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]);
    MessageType::try_from(value).ok()
}

/// True when the buffer does not look like a plaintext WireGuard datagram.
pub fn is_obfuscated(buf: &[u8]) -> bool {
    detect_type(buf).is_none()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detect_known_types() {
        for (value, expected) in [
            (1u32, MessageType::HandshakeInitiation),
            (2, MessageType::HandshakeResponse),
            (3, MessageType::Cookie),
            (4, MessageType::Data),
        ] {
            let mut buf = vec![0u8; 16];
            buf[..4].copy_from_slice(&value.to_le_bytes());
            assert_eq!(detect_type(&buf), Some(expected));
            assert!(!is_obfuscated(&buf));
        }
    }

    #[test]
    fn test_unknown_type_is_obfuscated() {
        let mut buf = vec![0u8; 16];
        buf[..4].copy_from_slice(&5u32.to_le_bytes());
        assert_eq!(detect_type(&buf), None);
        assert!(is_obfuscated(&buf));
    }

    #[test]
    fn test_nonzero_reserved_bytes_are_obfuscated() {
        // Type byte is valid but a reserved byte is set, so the u32 is not 1..=4
        let buf = [0x01, 0x7A, 0x00, 0x00, 0xDE, 0xAD];
        assert!(is_obfuscated(&buf));
    }

    #[test]
    fn test_short_buffer_is_obfuscated() {
        assert!(is_obfuscated(&[0x01, 0x00, 0x00]));
        assert!(is_obfuscated(&[]));
        assert_eq!(detect_type(&[0x01]), None);
    }

    #[test]
    fn test_handshake_classification() {
        assert!(MessageType::HandshakeInitiation.is_handshake());
        assert!(MessageType::HandshakeResponse.is_handshake());
        assert!(!MessageType::Cookie.is_handshake());
        assert!(!MessageType::Data.is_handshake());
    }
}
