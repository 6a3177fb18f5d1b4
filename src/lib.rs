//! WGVEIL WireGuard Obfuscation Relay Library
//!
//! This library provides the core functionality for the WGVEIL relay: a
//! bidirectional UDP pump that obfuscates WireGuard datagrams against deep
//! packet inspection and can disguise the flow as STUN NAT-traversal
//! traffic.

pub mod config;
pub mod constants;
pub mod logging;
pub mod obfuscation;
pub mod relay;
pub mod stun;
pub mod wireguard;

pub use obfuscation::{ObfuscationError, PacketCodec};
pub use relay::{MaskingMode, RelayError, RelaySettings, UdpRelay};
pub use stun::{StunError, StunMasker};
