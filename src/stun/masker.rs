//! Disguises obfuscated payloads as STUN traffic
//!
//! Every outbound datagram travels inside a Data Indication; Binding
//! Requests double as keepalives so the flow keeps the cadence of real NAT
//! traversal, and inbound Binding Requests are answered to survive
//! superficial probing.

use crc::{Crc, CRC_32_ISO_HDLC};

use crate::constants::{STUN_FINGERPRINT_XOR, STUN_HEADER_SIZE};
use crate::stun::packet::{attr, StunAttribute, StunMessageType, StunPacket};
use crate::stun::StunError;

/// Standard CRC-32 used by the FINGERPRINT attribute
const CRC32: Crc<u32> = Crc::<u32>::new(&CRC_32_ISO_HDLC);

/// Smallest wire size `unwrap` will consider: header plus one attribute TLV
const MIN_WRAPPED_SIZE: usize = STUN_HEADER_SIZE + 4;

/// Wraps and unwraps payloads in synthetic STUN messages.
///
/// Stateless and shareable across threads; transaction IDs are drawn fresh
/// per message and never interpreted.
#[derive(Debug, Clone, Copy, Default)]
pub struct StunMasker;

impl StunMasker {
    pub fn new() -> Self {
        Self
    }

    /// Wrap a non-empty payload in a Data Indication.
    pub fn wrap(&self, payload: &[u8]) -> Result<Vec<u8>, StunError> {
        if payload.is_empty() {
            return Err(StunError::PacketTooShort {
                expected: 1,
                got: 0,
            });
        }
        let mut packet = StunPacket::with_random_transaction_id(StunMessageType::DataIndication);
        packet.add_attribute(StunAttribute::new(attr::DATA, payload.to_vec()));
        Ok(packet.serialize())
    }

    /// Extract the payload from a Data Indication.
    ///
    /// Returns `None` for anything that is not a Data Indication (too short,
    /// missing cookie, other message type) so the caller can drop foreign
    /// traffic without treating it as an error.
    pub fn unwrap(&self, data: &[u8]) -> Result<Option<Vec<u8>>, StunError> {
        if data.len() < MIN_WRAPPED_SIZE || !StunPacket::has_magic_cookie(data) {
            return Ok(None);
        }
        match StunPacket::peek_type(data) {
            Ok(StunMessageType::DataIndication) => {}
            _ => return Ok(None),
        }

        // Fast path: a DATA attribute leading the body can be sliced without
        // a full parse.
        if data[STUN_HEADER_SIZE] == 0x00 && data[STUN_HEADER_SIZE + 1] == 0x13 {
            let len = usize::from(u16::from_be_bytes([
                data[STUN_HEADER_SIZE + 2],
                data[STUN_HEADER_SIZE + 3],
            ]));
            let start = MIN_WRAPPED_SIZE;
            if start + len <= data.len() {
                return Ok(Some(data[start..start + len].to_vec()));
            }
        }

        let packet = StunPacket::parse(data)?;
        packet
            .find_attribute(attr::DATA)
            .map(|a| Some(a.value.clone()))
            .ok_or(StunError::MalformedAttribute)
    }

    /// Build a Binding Request keepalive carrying a FINGERPRINT attribute.
    ///
    /// The CRC-32 covers the serialization before the attribute is appended,
    /// matching the peer's verification rather than RFC 5389's
    /// length-adjusted form.
    pub fn generate_keepalive(&self) -> Option<Vec<u8>> {
        let mut packet = StunPacket::with_random_transaction_id(StunMessageType::BindingRequest);
        let bare = packet.serialize();
        let fingerprint = CRC32.checksum(&bare) ^ STUN_FINGERPRINT_XOR;
        packet.add_attribute(StunAttribute::new(
            attr::FINGERPRINT,
            fingerprint.to_be_bytes().to_vec(),
        ));
        Some(packet.serialize())
    }

    /// Answer a Binding Request with an attribute-free Binding Response
    /// echoing its transaction ID. Returns `None` for any other input.
    pub fn handle_binding_request(&self, request: &[u8]) -> Option<Vec<u8>> {
        let parsed = StunPacket::parse(request).ok()?;
        if parsed.message_type != StunMessageType::BindingRequest {
            return None;
        }
        let response =
            StunPacket::new(StunMessageType::BindingResponse, &parsed.transaction_id).ok()?;
        Some(response.serialize())
    }
}
