//! Global constants for the obfuscation codec, STUN framing and relay

// ============================================================================
// PACKET SIZE BOUNDS
// ============================================================================

/// Shortest buffer the codec will touch (the WireGuard type field)
pub const MIN_PACKET_SIZE: usize = 4;

/// Packets at or above this size receive no dummy padding
pub const MAX_TOTAL_PACKET_SIZE: usize = 1024;

/// Padding cap for handshake packets (their fixed sizes are the strongest fingerprint)
pub const MAX_HANDSHAKE_DUMMY: usize = 512;

/// Default padding cap for data packets
pub const DEFAULT_MAX_DUMMY_DATA: u16 = 4;

/// Filler byte appended as dummy padding
pub const DUMMY_FILL_BYTE: u8 = 0xFF;

// ============================================================================
// STUN (RFC 5389)
// ============================================================================

/// Fixed STUN header size
pub const STUN_HEADER_SIZE: usize = 20;

/// STUN transaction ID size
pub const TRANSACTION_ID_SIZE: usize = 12;

/// Magic cookie identifying a STUN message
pub const STUN_MAGIC_COOKIE: u32 = 0x2112_A442;

/// XOR constant applied to the CRC-32 in the FINGERPRINT attribute ("STUN" in ASCII)
pub const STUN_FINGERPRINT_XOR: u32 = 0x5354_554E;

// ============================================================================
// RELAY
// ============================================================================

/// Receive buffer size for both relay sockets
pub const RECV_BUFFER_SIZE: usize = 4096;

/// Keepalive cadence when STUN masking is active
pub const KEEPALIVE_INTERVAL_SECS: u64 = 10;
