// WireGuard packet obfuscation codec
//
// Wire layout after encode (before the outer keystream pass):
//
//   byte 0       original[0] XOR r
//   byte 1       r, drawn from [1, 255]
//   bytes 2..4   dummy length, little-endian u16
//   bytes 4..N   original[4..] unchanged
//   bytes N..N+d 0xFF filler
//
// The rotation byte r makes byte 0 of the ciphertext uniformly random and
// hides the type field under the same keystream that covers r itself; the
// random filler frustrates packet-length fingerprinting. After decode the
// reserved bytes 1..4 must be zero again, which is the receiver's integrity
// signal against wrong-key traffic.

use byteorder::{ByteOrder, LittleEndian};
use rand::Rng;

use crate::constants::{
    DEFAULT_MAX_DUMMY_DATA, DUMMY_FILL_BYTE, MAX_HANDSHAKE_DUMMY, MAX_TOTAL_PACKET_SIZE,
    MIN_PACKET_SIZE,
};
use crate::obfuscation::{ObfuscationEngine, ObfuscationError};
use crate::wireguard::{self, MessageType};

/// Obfuscates and restores WireGuard datagrams.
///
/// Value-like: constructed once from a key, shared for the lifetime of a
/// relay session, never mutated.
#[derive(Debug, Clone)]
pub struct PacketCodec {
    engine: ObfuscationEngine,
    max_dummy_data: u16,
}

impl PacketCodec {
    /// Build a codec with the default data-packet padding cap.
    pub fn new(key: &[u8]) -> Result<Self, ObfuscationError> {
        Self::with_max_dummy_data(key, DEFAULT_MAX_DUMMY_DATA)
    }

    /// Build a codec with an explicit data-packet padding cap.
    pub fn with_max_dummy_data(key: &[u8], max_dummy_data: u16) -> Result<Self, ObfuscationError> {
        Ok(Self {
            engine: ObfuscationEngine::new(key)?,
            max_dummy_data,
        })
    }

    /// Obfuscate a plaintext WireGuard packet.
    pub fn encode(
        &self,
        packet: &[u8],
        msg_type: MessageType,
    ) -> Result<Vec<u8>, ObfuscationError> {
        if packet.len() < MIN_PACKET_SIZE {
            return Err(ObfuscationError::PacketTooShort {
                expected: MIN_PACKET_SIZE,
                got: packet.len(),
            });
        }

        let mut rng = rand::thread_rng();
        let rotation: u8 = rng.gen_range(1..=255);
        let dummy_len = self.draw_dummy_len(&mut rng, packet.len(), msg_type);

        let mut buf = Vec::with_capacity(packet.len() + dummy_len);
        buf.push(packet[0] ^ rotation);
        buf.push(rotation);
        buf.extend_from_slice(&[0u8; 2]);
        buf.extend_from_slice(&packet[MIN_PACKET_SIZE..]);
        LittleEndian::write_u16(&mut buf[2..4], dummy_len as u16);
        buf.resize(packet.len() + dummy_len, DUMMY_FILL_BYTE);

        self.engine.xor(&mut buf);
        Ok(buf)
    }

    /// Restore a plaintext WireGuard packet from an obfuscated one.
    ///
    /// Input that turns into a valid WireGuard packet after the keystream
    /// pass alone is legacy traffic from a peer without header scrambling;
    /// it is returned untouched.
    pub fn decode(&self, packet: &[u8]) -> Result<Vec<u8>, ObfuscationError> {
        if packet.len() < MIN_PACKET_SIZE {
            return Err(ObfuscationError::PacketTooShort {
                expected: MIN_PACKET_SIZE,
                got: packet.len(),
            });
        }

        let mut buf = packet.to_vec();
        self.engine.xor(&mut buf);

        if !wireguard::is_obfuscated(&buf) {
            return Ok(packet.to_vec());
        }

        buf[0] ^= buf[1];

        let dummy_len = usize::from(LittleEndian::read_u16(&buf[2..4]));
        if dummy_len > buf.len() - MIN_PACKET_SIZE {
            return Err(ObfuscationError::DecodingFailed(format!(
                "dummy length {} exceeds payload of {} bytes",
                dummy_len,
                buf.len() - MIN_PACKET_SIZE
            )));
        }
        buf.truncate(buf.len() - dummy_len);

        buf[1] = 0;
        buf[2] = 0;
        buf[3] = 0;

        if wireguard::detect_type(&buf).is_none() {
            return Err(ObfuscationError::InvalidWireGuardPacket);
        }
        Ok(buf)
    }

    fn draw_dummy_len(
        &self,
        rng: &mut impl Rng,
        packet_len: usize,
        msg_type: MessageType,
    ) -> usize {
        if packet_len >= MAX_TOTAL_PACKET_SIZE {
            return 0;
        }
        let room = MAX_TOTAL_PACKET_SIZE - packet_len;
        let cap = if msg_type.is_handshake() {
            MAX_HANDSHAKE_DUMMY
        } else {
            usize::from(self.max_dummy_data)
        };
        let cap = cap.min(room);
        if cap == 0 {
            return 0;
        }
        rng.gen_range(0..=cap)
    }
}
