//! STUN message serializer and parser
//!
//! Bit-exact RFC 5389 framing: a 20-byte big-endian header (type, length,
//! magic cookie, 12-byte transaction ID) followed by TLV attributes padded to
//! 4-byte boundaries. The header length field counts attribute bytes
//! including their headers and padding.

use byteorder::{BigEndian, ByteOrder, WriteBytesExt};
use rand::RngCore;

use crate::constants::{STUN_HEADER_SIZE, STUN_MAGIC_COOKIE, TRANSACTION_ID_SIZE};
use crate::stun::StunError;

/// Recognized STUN attribute type codes.
pub mod attr {
    /// DATA (RFC 5766) - carries the wrapped payload
    pub const DATA: u16 = 0x0013;
    /// XOR-MAPPED-ADDRESS
    pub const XOR_MAPPED_ADDRESS: u16 = 0x0020;
    /// SOFTWARE
    pub const SOFTWARE: u16 = 0x8022;
    /// FINGERPRINT - CRC-32 of the message XORed with "STUN"
    pub const FINGERPRINT: u16 = 0x8028;
}

/// Recognized STUN message types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum StunMessageType {
    /// Binding Request (0x0001)
    BindingRequest = 0x0001,
    /// Binding Success Response (0x0101)
    BindingResponse = 0x0101,
    /// Data Indication (0x0115)
    DataIndication = 0x0115,
}

impl TryFrom<u16> for StunMessageType {
    type Error = StunError;

    fn try_from(value: u16) -> Result<Self, Self::Error> {
        match value {
            0x0001 => Ok(StunMessageType::BindingRequest),
            0x0101 => Ok(StunMessageType::BindingResponse),
            0x0115 => Ok(StunMessageType::DataIndication),
            other => Err(StunError::UnknownMessageType(other)),
        }
    }
}

/// A raw STUN attribute: type code plus unpadded value bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StunAttribute {
    pub attr_type: u16,
    pub value: Vec<u8>,
}

impl StunAttribute {
    pub fn new(attr_type: u16, value: Vec<u8>) -> Self {
        Self { attr_type, value }
    }

    /// Bytes this attribute occupies on the wire, padding included.
    fn wire_len(&self) -> usize {
        4 + self.value.len() + pad_to_4(self.value.len())
    }
}

/// A STUN message: type, transaction ID and attribute sequence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StunPacket {
    pub message_type: StunMessageType,
    pub transaction_id: [u8; TRANSACTION_ID_SIZE],
    pub attributes: Vec<StunAttribute>,
}

impl StunPacket {
    /// Build a packet with an explicit transaction ID (must be 12 bytes).
    pub fn new(message_type: StunMessageType, transaction_id: &[u8]) -> Result<Self, StunError> {
        let transaction_id: [u8; TRANSACTION_ID_SIZE] = transaction_id
            .try_into()
            .map_err(|_| StunError::InvalidTransactionId(transaction_id.len()))?;
        Ok(Self {
            message_type,
            transaction_id,
            attributes: Vec::new(),
        })
    }

    /// Build a packet with a fresh random transaction ID.
    pub fn with_random_transaction_id(message_type: StunMessageType) -> Self {
        let mut transaction_id = [0u8; TRANSACTION_ID_SIZE];
        rand::thread_rng().fill_bytes(&mut transaction_id);
        Self {
            message_type,
            transaction_id,
            attributes: Vec::new(),
        }
    }

    pub fn add_attribute(&mut self, attribute: StunAttribute) {
        self.attributes.push(attribute);
    }

    /// First attribute with the given type code, if present.
    pub fn find_attribute(&self, attr_type: u16) -> Option<&StunAttribute> {
        self.attributes.iter().find(|a| a.attr_type == attr_type)
    }

    /// Serialize to wire format. Output is always at least 20 bytes.
    pub fn serialize(&self) -> Vec<u8> {
        let attrs_len: usize = self.attributes.iter().map(StunAttribute::wire_len).sum();
        let mut buf = Vec::with_capacity(STUN_HEADER_SIZE + attrs_len);

        // Infallible: Vec<u8> as io::Write cannot error
        let _ = buf.write_u16::<BigEndian>(self.message_type as u16);
        let _ = buf.write_u16::<BigEndian>(attrs_len as u16);
        let _ = buf.write_u32::<BigEndian>(STUN_MAGIC_COOKIE);
        buf.extend_from_slice(&self.transaction_id);

        for attribute in &self.attributes {
            let _ = buf.write_u16::<BigEndian>(attribute.attr_type);
            let _ = buf.write_u16::<BigEndian>(attribute.value.len() as u16);
            buf.extend_from_slice(&attribute.value);
            buf.resize(buf.len() + pad_to_4(attribute.value.len()), 0);
        }

        buf
    }

    /// Parse wire format, validating header fields and attribute bounds.
    pub fn parse(data: &[u8]) -> Result<Self, StunError> {
        if data.len() < STUN_HEADER_SIZE {
            return Err(StunError::PacketTooShort {
                expected: STUN_HEADER_SIZE,
                got: data.len(),
            });
        }

        let message_type = StunMessageType::try_from(BigEndian::read_u16(&data[0..2]))?;
        let message_len = usize::from(BigEndian::read_u16(&data[2..4]));
        if data.len() < STUN_HEADER_SIZE + message_len {
            return Err(StunError::PacketTooShort {
                expected: STUN_HEADER_SIZE + message_len,
                got: data.len(),
            });
        }
        if BigEndian::read_u32(&data[4..8]) != STUN_MAGIC_COOKIE {
            return Err(StunError::InvalidMagicCookie);
        }

        let mut transaction_id = [0u8; TRANSACTION_ID_SIZE];
        transaction_id.copy_from_slice(&data[8..STUN_HEADER_SIZE]);

        let mut attributes = Vec::new();
        let mut offset = STUN_HEADER_SIZE;
        let end = STUN_HEADER_SIZE + message_len;
        while offset < end {
            if offset + 4 > data.len() {
                return Err(StunError::MalformedAttribute);
            }
            let attr_type = BigEndian::read_u16(&data[offset..offset + 2]);
            let attr_len = usize::from(BigEndian::read_u16(&data[offset + 2..offset + 4]));
            if offset + 4 + attr_len > data.len() {
                return Err(StunError::MalformedAttribute);
            }
            attributes.push(StunAttribute::new(
                attr_type,
                data[offset + 4..offset + 4 + attr_len].to_vec(),
            ));
            offset += 4 + attr_len + pad_to_4(attr_len);
        }

        Ok(Self {
            message_type,
            transaction_id,
            attributes,
        })
    }

    /// Whether bytes 4..8 carry the magic cookie (requires 8 bytes).
    pub fn has_magic_cookie(data: &[u8]) -> bool {
        data.len() >= 8 && BigEndian::read_u32(&data[4..8]) == STUN_MAGIC_COOKIE
    }

    /// Read the message type from bytes 0..2 without parsing the rest.
    pub fn peek_type(data: &[u8]) -> Result<StunMessageType, StunError> {
        if data.len() < 2 {
            return Err(StunError::PacketTooShort {
                expected: 2,
                got: data.len(),
            });
        }
        StunMessageType::try_from(BigEndian::read_u16(&data[0..2]))
    }
}

fn pad_to_4(len: usize) -> usize {
    (4 - len % 4) % 4
}
