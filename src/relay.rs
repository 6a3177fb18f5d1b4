//! Loopback UDP relay between a WireGuard client and a remote peer
//!
//! Binds a listener on loopback, keeps a connected socket to the remote
//! endpoint, and pumps datagrams through the obfuscation codec (and the STUN
//! masker when enabled) in both directions. Exactly one local peer is active
//! at a time; a new local sender displaces the previous one.
//!
//! Per-datagram failures are logged and swallowed: a corrupted packet must
//! never tear down the tunnel. Only socket receive and send suspend; every
//! transformation is synchronous and `O(n)` in the packet length.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::net::UdpSocket;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use crate::constants::{KEEPALIVE_INTERVAL_SECS, RECV_BUFFER_SIZE};
use crate::obfuscation::{ObfuscationError, PacketCodec};
use crate::stun::StunMasker;
use crate::wireguard;

/// Outer framing applied after obfuscation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MaskingMode {
    /// Obfuscated bytes travel bare.
    #[default]
    None,
    /// Obfuscated bytes travel inside STUN Data Indications.
    Stun,
}

/// Errors raised by the relay lifecycle.
#[derive(Error, Debug)]
pub enum RelayError {
    /// The loopback listener could not be bound or its port read back.
    #[error("failed to bind UDP port {port}: {source}")]
    FailedToBindPort {
        port: u16,
        source: std::io::Error,
    },
    /// The remote endpoint could not be resolved or connected.
    #[error("failed to connect to remote endpoint {endpoint}: {source}")]
    RemoteUnreachable {
        endpoint: String,
        source: std::io::Error,
    },
}

/// Relay parameters supplied by the embedder.
#[derive(Debug, Clone)]
pub struct RelaySettings {
    /// Loopback port to listen on; 0 requests an ephemeral port.
    pub listen_port: u16,
    /// Remote endpoint as `host:port`.
    pub remote: String,
    /// Obfuscation key shared with the remote relay.
    pub key: Vec<u8>,
    /// Outer framing mode.
    pub masking: MaskingMode,
    /// Padding cap for data packets.
    pub max_dummy_data: u16,
    /// Keepalive cadence when masking; zero disables the timer.
    pub keepalive_interval: Duration,
}

impl RelaySettings {
    pub fn new(listen_port: u16, remote: impl Into<String>, key: &[u8]) -> Self {
        Self {
            listen_port,
            remote: remote.into(),
            key: key.to_vec(),
            masking: MaskingMode::None,
            max_dummy_data: crate::constants::DEFAULT_MAX_DUMMY_DATA,
            keepalive_interval: Duration::from_secs(KEEPALIVE_INTERVAL_SECS),
        }
    }

    pub fn with_masking(mut self, masking: MaskingMode) -> Self {
        self.masking = masking;
        self
    }
}

/// Bidirectional UDP relay.
///
/// `start` binds the sockets and spawns the receive loops; `stop` tears them
/// down. The codec and masker are shared immutably with the workers; the
/// only mutable relay state is the current local peer, published through a
/// watch channel so the inbound loop reads a snapshot without locking.
pub struct UdpRelay {
    settings: RelaySettings,
    codec: Arc<PacketCodec>,
    masker: Option<Arc<StunMasker>>,
    local_port: Option<u16>,
    workers: Vec<JoinHandle<()>>,
}

impl UdpRelay {
    /// Validate the key and build an idle relay.
    pub fn new(settings: RelaySettings) -> Result<Self, ObfuscationError> {
        let codec = Arc::new(PacketCodec::with_max_dummy_data(
            &settings.key,
            settings.max_dummy_data,
        )?);
        let masker = match settings.masking {
            MaskingMode::Stun => Some(Arc::new(StunMasker::new())),
            MaskingMode::None => None,
        };
        Ok(Self {
            settings,
            codec,
            masker,
            local_port: None,
            workers: Vec::new(),
        })
    }

    /// Bind the sockets, spawn the workers, and return the bound port.
    pub async fn start(&mut self) -> Result<u16, RelayError> {
        let listen_port = self.settings.listen_port;
        let listener = UdpSocket::bind(("127.0.0.1", listen_port))
            .await
            .map_err(|source| RelayError::FailedToBindPort {
                port: listen_port,
                source,
            })?;
        let local_port = listener
            .local_addr()
            .map_err(|source| RelayError::FailedToBindPort {
                port: listen_port,
                source,
            })?
            .port();

        let remote = UdpSocket::bind(("0.0.0.0", 0))
            .await
            .map_err(|source| RelayError::FailedToBindPort { port: 0, source })?;
        remote
            .connect(&self.settings.remote)
            .await
            .map_err(|source| RelayError::RemoteUnreachable {
                endpoint: self.settings.remote.clone(),
                source,
            })?;

        let listener = Arc::new(listener);
        let remote = Arc::new(remote);
        let (peer_tx, peer_rx) = watch::channel(None::<SocketAddr>);
        let outbound_count = Arc::new(AtomicU64::new(0));

        self.workers.push(tokio::spawn(outbound_loop(
            listener.clone(),
            remote.clone(),
            self.codec.clone(),
            self.masker.clone(),
            peer_tx,
            outbound_count.clone(),
        )));
        self.workers.push(tokio::spawn(inbound_loop(
            remote.clone(),
            listener.clone(),
            self.codec.clone(),
            self.masker.clone(),
            peer_rx,
        )));
        if let Some(masker) = &self.masker {
            if !self.settings.keepalive_interval.is_zero() {
                self.workers.push(tokio::spawn(keepalive_loop(
                    remote,
                    masker.clone(),
                    outbound_count,
                    self.settings.keepalive_interval,
                )));
            }
        }

        info!(
            port = local_port,
            remote = %self.settings.remote,
            masking = ?self.settings.masking,
            "relay started"
        );
        self.local_port = Some(local_port);
        Ok(local_port)
    }

    /// Abort the workers and drop the sockets.
    pub fn stop(&mut self) {
        for worker in self.workers.drain(..) {
            worker.abort();
        }
        if self.local_port.take().is_some() {
            info!("relay stopped");
        }
    }

    /// Bound loopback port, if the relay is running.
    pub fn listening_port(&self) -> Option<u16> {
        self.local_port
    }
}

impl Drop for UdpRelay {
    fn drop(&mut self) {
        self.stop();
    }
}

/// local socket -> codec.encode -> masker.wrap -> remote socket
async fn outbound_loop(
    listener: Arc<UdpSocket>,
    remote: Arc<UdpSocket>,
    codec: Arc<PacketCodec>,
    masker: Option<Arc<StunMasker>>,
    peer_tx: watch::Sender<Option<SocketAddr>>,
    outbound_count: Arc<AtomicU64>,
) {
    let mut buf = vec![0u8; RECV_BUFFER_SIZE];
    loop {
        let (len, from) = match listener.recv_from(&mut buf).await {
            Ok(received) => received,
            Err(err) => {
                debug!(%err, "local receive failed, outbound worker exiting");
                break;
            }
        };
        if len == 0 {
            continue;
        }
        let datagram = &buf[..len];

        if *peer_tx.borrow() != Some(from) {
            info!(peer = %from, "local peer registered");
            let _ = peer_tx.send(Some(from));
        }

        let Some(msg_type) = wireguard::detect_type(datagram) else {
            trace!(len, "dropping non-WireGuard datagram from local peer");
            continue;
        };

        let encoded = match codec.encode(datagram, msg_type) {
            Ok(encoded) => encoded,
            Err(err) => {
                warn!(%err, "encode failed, dropping datagram");
                continue;
            }
        };
        let outgoing = match &masker {
            Some(masker) => match masker.wrap(&encoded) {
                Ok(wrapped) => wrapped,
                Err(err) => {
                    warn!(%err, "STUN wrap failed, dropping datagram");
                    continue;
                }
            },
            None => encoded,
        };

        if let Err(err) = remote.send(&outgoing).await {
            warn!(%err, "send to remote failed, dropping datagram");
            continue;
        }
        outbound_count.fetch_add(1, Ordering::Relaxed);
    }
}

/// remote socket -> masker.unwrap -> codec.decode -> local socket
async fn inbound_loop(
    remote: Arc<UdpSocket>,
    listener: Arc<UdpSocket>,
    codec: Arc<PacketCodec>,
    masker: Option<Arc<StunMasker>>,
    peer_rx: watch::Receiver<Option<SocketAddr>>,
) {
    let mut buf = vec![0u8; RECV_BUFFER_SIZE];
    loop {
        let len = match remote.recv(&mut buf).await {
            Ok(len) => len,
            Err(err) => {
                debug!(%err, "remote receive failed, inbound worker exiting");
                break;
            }
        };
        if len == 0 {
            continue;
        }
        let datagram = &buf[..len];

        let obfuscated = match &masker {
            Some(masker) => match masker.unwrap(datagram) {
                Ok(Some(payload)) => payload,
                Ok(None) => {
                    // Probes still expect an answer; everything else is noise
                    if let Some(response) = masker.handle_binding_request(datagram) {
                        debug!("answering STUN binding request from remote");
                        if let Err(err) = remote.send(&response).await {
                            warn!(%err, "failed to send binding response");
                        }
                    } else {
                        trace!(len, "dropping non-STUN datagram from remote");
                    }
                    continue;
                }
                Err(err) => {
                    warn!(%err, "STUN unwrap failed, dropping datagram");
                    continue;
                }
            },
            None => datagram.to_vec(),
        };

        let plain = match codec.decode(&obfuscated) {
            Ok(plain) => plain,
            Err(err) => {
                warn!(%err, "decode failed, dropping datagram");
                continue;
            }
        };

        let Some(peer) = *peer_rx.borrow() else {
            trace!("no local peer registered, dropping inbound datagram");
            continue;
        };
        if let Err(err) = listener.send_to(&plain, peer).await {
            warn!(%err, peer = %peer, "send to local peer failed");
        }
    }
}

/// Emits a Binding Request whenever a full interval passes without outbound
/// traffic, so the masked flow keeps a NAT-traversal cadence at rest.
async fn keepalive_loop(
    remote: Arc<UdpSocket>,
    masker: Arc<StunMasker>,
    outbound_count: Arc<AtomicU64>,
    interval: Duration,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    ticker.tick().await;
    let mut last_seen = outbound_count.load(Ordering::Relaxed);
    loop {
        ticker.tick().await;
        let seen = outbound_count.load(Ordering::Relaxed);
        if seen != last_seen {
            last_seen = seen;
            continue;
        }
        let Some(keepalive) = masker.generate_keepalive() else {
            continue;
        };
        match remote.send(&keepalive).await {
            Ok(_) => trace!("sent STUN keepalive"),
            Err(err) => warn!(%err, "failed to send STUN keepalive"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stun::packet::{StunMessageType, StunPacket};
    use crate::wireguard::MessageType;
    use byteorder::{ByteOrder, LittleEndian};
    use tokio::time::timeout;

    const TEST_KEY: &[u8] = b"relay-test-key";
    const RECV_TIMEOUT: Duration = Duration::from_secs(2);

    fn make_wg_packet(msg_type: MessageType, total_len: usize) -> Vec<u8> {
        let mut packet = vec![0u8; total_len];
        LittleEndian::write_u32(&mut packet[..4], msg_type as u32);
        for byte in packet[4..].iter_mut() {
            *byte = 0x37;
        }
        packet
    }

    async fn recv_datagram(socket: &UdpSocket) -> (Vec<u8>, SocketAddr) {
        let mut buf = vec![0u8; RECV_BUFFER_SIZE];
        let (len, from) = timeout(RECV_TIMEOUT, socket.recv_from(&mut buf))
            .await
            .expect("timed out waiting for datagram")
            .expect("receive failed");
        buf.truncate(len);
        (buf, from)
    }

    #[tokio::test]
    async fn test_start_resolves_ephemeral_port() {
        let fake_remote = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let settings = RelaySettings::new(0, fake_remote.local_addr().unwrap().to_string(), TEST_KEY);
        let mut relay = UdpRelay::new(settings).unwrap();

        assert_eq!(relay.listening_port(), None);
        let port = relay.start().await.unwrap();
        assert_ne!(port, 0);
        assert_eq!(relay.listening_port(), Some(port));

        relay.stop();
        assert_eq!(relay.listening_port(), None);
    }

    #[tokio::test]
    async fn test_bare_mode_roundtrip() {
        let fake_remote = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let settings = RelaySettings::new(0, fake_remote.local_addr().unwrap().to_string(), TEST_KEY);
        let mut relay = UdpRelay::new(settings).unwrap();
        let port = relay.start().await.unwrap();

        let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let packet = make_wg_packet(MessageType::Data, 307);
        client
            .send_to(&packet, ("127.0.0.1", port))
            .await
            .unwrap();

        // Outbound: the wire carries obfuscated bytes the codec can restore
        let (wire, relay_addr) = recv_datagram(&fake_remote).await;
        assert!(wireguard::is_obfuscated(&wire));
        let codec = PacketCodec::new(TEST_KEY).unwrap();
        assert_eq!(codec.decode(&wire).unwrap(), packet);

        // Inbound: an encoded reply comes back as plaintext
        let reply = make_wg_packet(MessageType::Data, 180);
        let encoded_reply = codec.encode(&reply, MessageType::Data).unwrap();
        fake_remote.send_to(&encoded_reply, relay_addr).await.unwrap();

        let (delivered, _) = recv_datagram(&client).await;
        assert_eq!(delivered, reply);

        relay.stop();
    }

    #[tokio::test]
    async fn test_stun_mode_roundtrip() {
        let fake_remote = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let settings = RelaySettings::new(0, fake_remote.local_addr().unwrap().to_string(), TEST_KEY)
            .with_masking(MaskingMode::Stun);
        let mut relay = UdpRelay::new(settings).unwrap();
        let port = relay.start().await.unwrap();

        let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let packet = make_wg_packet(MessageType::HandshakeInitiation, 148);
        client
            .send_to(&packet, ("127.0.0.1", port))
            .await
            .unwrap();

        // The wire carries a STUN Data Indication hiding the codec output
        let (wire, relay_addr) = recv_datagram(&fake_remote).await;
        assert!(StunPacket::has_magic_cookie(&wire));
        let masker = StunMasker::new();
        let codec = PacketCodec::new(TEST_KEY).unwrap();
        let inner = masker.unwrap(&wire).unwrap().unwrap();
        assert_eq!(codec.decode(&inner).unwrap(), packet);

        // Wrapped reply is unwrapped, decoded and delivered
        let reply = make_wg_packet(MessageType::HandshakeResponse, 92);
        let encoded = codec.encode(&reply, MessageType::HandshakeResponse).unwrap();
        let wrapped = masker.wrap(&encoded).unwrap();
        fake_remote.send_to(&wrapped, relay_addr).await.unwrap();

        let (delivered, _) = recv_datagram(&client).await;
        assert_eq!(delivered, reply);

        relay.stop();
    }

    #[tokio::test]
    async fn test_non_wireguard_local_traffic_dropped() {
        let fake_remote = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let settings = RelaySettings::new(0, fake_remote.local_addr().unwrap().to_string(), TEST_KEY);
        let mut relay = UdpRelay::new(settings).unwrap();
        let port = relay.start().await.unwrap();

        let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        client
            .send_to(b"\xFF\xFF\xFF\xFFnot wireguard", ("127.0.0.1", port))
            .await
            .unwrap();
        // A valid packet sent afterwards must be the first to arrive
        let packet = make_wg_packet(MessageType::Cookie, 64);
        client.send_to(&packet, ("127.0.0.1", port)).await.unwrap();

        let (wire, _) = recv_datagram(&fake_remote).await;
        let codec = PacketCodec::new(TEST_KEY).unwrap();
        assert_eq!(codec.decode(&wire).unwrap(), packet);

        relay.stop();
    }

    #[tokio::test]
    async fn test_second_local_peer_displaces_first() {
        let fake_remote = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let settings = RelaySettings::new(0, fake_remote.local_addr().unwrap().to_string(), TEST_KEY);
        let mut relay = UdpRelay::new(settings).unwrap();
        let port = relay.start().await.unwrap();

        let codec = PacketCodec::new(TEST_KEY).unwrap();
        let first = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let second = UdpSocket::bind("127.0.0.1:0").await.unwrap();

        let packet = make_wg_packet(MessageType::Data, 100);
        first.send_to(&packet, ("127.0.0.1", port)).await.unwrap();
        let (_, relay_addr) = recv_datagram(&fake_remote).await;
        second.send_to(&packet, ("127.0.0.1", port)).await.unwrap();
        let _ = recv_datagram(&fake_remote).await;

        // The reply lands on the most recent sender
        let reply = make_wg_packet(MessageType::Data, 140);
        let encoded = codec.encode(&reply, MessageType::Data).unwrap();
        fake_remote.send_to(&encoded, relay_addr).await.unwrap();

        let (delivered, _) = recv_datagram(&second).await;
        assert_eq!(delivered, reply);

        relay.stop();
    }

    #[tokio::test]
    async fn test_keepalive_emitted_when_idle() {
        let fake_remote = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let mut settings =
            RelaySettings::new(0, fake_remote.local_addr().unwrap().to_string(), TEST_KEY)
                .with_masking(MaskingMode::Stun);
        settings.keepalive_interval = Duration::from_millis(50);
        let mut relay = UdpRelay::new(settings).unwrap();
        relay.start().await.unwrap();

        let (wire, _) = recv_datagram(&fake_remote).await;
        let parsed = StunPacket::parse(&wire).unwrap();
        assert_eq!(parsed.message_type, StunMessageType::BindingRequest);

        relay.stop();
    }

    #[tokio::test]
    async fn test_binding_request_from_remote_is_answered() {
        let fake_remote = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let settings = RelaySettings::new(0, fake_remote.local_addr().unwrap().to_string(), TEST_KEY)
            .with_masking(MaskingMode::Stun);
        let mut relay = UdpRelay::new(settings).unwrap();
        let port = relay.start().await.unwrap();

        // Learn the relay's remote-facing address through a first datagram
        let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let packet = make_wg_packet(MessageType::Data, 80);
        client.send_to(&packet, ("127.0.0.1", port)).await.unwrap();
        let (_, relay_addr) = recv_datagram(&fake_remote).await;

        let probe = StunPacket::new(StunMessageType::BindingRequest, &[0x11; 12])
            .unwrap()
            .serialize();
        fake_remote.send_to(&probe, relay_addr).await.unwrap();

        let (response, _) = recv_datagram(&fake_remote).await;
        let parsed = StunPacket::parse(&response).unwrap();
        assert_eq!(parsed.message_type, StunMessageType::BindingResponse);
        assert_eq!(parsed.transaction_id, [0x11; 12]);

        relay.stop();
    }

    #[tokio::test]
    async fn test_malformed_inbound_does_not_kill_relay() {
        let fake_remote = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let settings = RelaySettings::new(0, fake_remote.local_addr().unwrap().to_string(), TEST_KEY);
        let mut relay = UdpRelay::new(settings).unwrap();
        let port = relay.start().await.unwrap();

        let codec = PacketCodec::new(TEST_KEY).unwrap();
        let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let packet = make_wg_packet(MessageType::Data, 120);
        client.send_to(&packet, ("127.0.0.1", port)).await.unwrap();
        let (_, relay_addr) = recv_datagram(&fake_remote).await;

        // Garbage that fails decode, then a valid datagram that must survive
        fake_remote.send_to(&[0xFFu8; 40], relay_addr).await.unwrap();
        let reply = make_wg_packet(MessageType::Data, 90);
        let encoded = codec.encode(&reply, MessageType::Data).unwrap();
        fake_remote.send_to(&encoded, relay_addr).await.unwrap();

        let (delivered, _) = recv_datagram(&client).await;
        assert_eq!(delivered, reply);

        relay.stop();
    }
}
