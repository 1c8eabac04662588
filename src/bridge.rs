//! The PE side of a session: a RakNet open-connection handshake with the
//! target server over a private UDP socket.
//!
//! [`PeBridge`] is the state machine. It performs no I/O; datagrams to send
//! and events for the Java session are queued and drained by the task
//! started with [`spawn`].

use crate::{
    player::Player,
    protocol::{
        packet::raknet::{
            self, generate_client_guid, id, Magic, OpenConnectionReply1, OpenConnectionReply2,
            OpenConnectionRequest1, OpenConnectionRequest2, PeAddress, Request,
        },
        Decode, DecodeError, Decoder, Encode, EncodeError,
    },
};
use bytes::Bytes;
use std::{
    collections::VecDeque,
    io,
    net::{Ipv4Addr, Ipv6Addr, SocketAddr},
    time::Duration,
};
use tokio::{net::UdpSocket, sync::watch, time::Instant};
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

/// Largest datagram we expect during the handshake.
const MAX_DATAGRAM_SIZE: usize = 2048;

/// Bytes of an unknown datagram included in the trace log.
const DUMP_LIMIT: usize = 32;

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, strum::Display)]
pub enum PeConnectionState {
    #[strum(serialize = "DISCONNECTED")]
    Disconnected,
    #[strum(serialize = "CONNECTING_1_SENT")]
    Connecting1Sent,
    #[strum(serialize = "CONNECTING_2_SENT")]
    Connecting2Sent,
    #[strum(serialize = "RAKNET_CONNECTED")]
    RakNetConnected,
    #[strum(serialize = "LOGGING_IN")]
    LoggingIn,
    #[strum(serialize = "CONNECTED")]
    Connected,
}

impl PeConnectionState {
    /// The only state each state may advance to.
    fn successor(self) -> Option<Self> {
        match self {
            Self::Disconnected => Some(Self::Connecting1Sent),
            Self::Connecting1Sent => Some(Self::Connecting2Sent),
            Self::Connecting2Sent => Some(Self::RakNetConnected),
            Self::RakNetConnected => Some(Self::LoggingIn),
            Self::LoggingIn => Some(Self::Connected),
            Self::Connected => None,
        }
    }

    /// Whether the RakNet open-connection handshake has completed.
    pub fn is_raknet_connected(self) -> bool {
        matches!(
            self,
            Self::RakNetConnected | Self::LoggingIn | Self::Connected
        )
    }
}

#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    #[error("transport error: {0}")]
    Transport(#[from] io::Error),
    #[error("could not resolve target server {0}")]
    UnresolvedTarget(String),
    #[error("handshake did not complete within {0:?}")]
    TimedOut(Duration),
    #[error("handshake reply carried an invalid magic")]
    HandshakeMagicMismatch,
    #[error("target server uses an incompatible RakNet protocol version")]
    IncompatibleRakNetVersion,
    #[error("malformed handshake reply: {0}")]
    MalformedReply(DecodeError),
    #[error("failed to encode handshake request: {0}")]
    Encode(#[from] EncodeError),
    #[error("illegal bridge transition from {from} to {to}")]
    IllegalTransition {
        from: PeConnectionState,
        to: PeConnectionState,
    },
}

impl BridgeError {
    /// Message shown to the Java client when the bridge fails.
    pub fn disconnect_reason(&self) -> &'static str {
        match self {
            Self::Transport(_) | Self::UnresolvedTarget(_) | Self::TimedOut(_) => {
                "Failed to connect to target PE server."
            }
            Self::IncompatibleRakNetVersion => {
                "Target PE server has incompatible RakNet protocol version."
            }
            Self::HandshakeMagicMismatch | Self::MalformedReply(_) => {
                "Target PE server sent an invalid handshake reply."
            }
            Self::Encode(_) | Self::IllegalTransition { .. } => {
                "Failed to connect to target PE server."
            }
        }
    }
}

fn reply_error(error: DecodeError) -> BridgeError {
    match error {
        DecodeError::InvalidMagic => BridgeError::HandshakeMagicMismatch,
        other => BridgeError::MalformedReply(other),
    }
}

/// Notifications from a bridge to its Java session.
#[derive(Debug)]
pub enum BridgeEvent {
    /// Open Connection Request #1 has been sent.
    HandshakeStarted,
    /// Open Connection Reply #2 has been accepted.
    RakNetConnected,
    /// The bridge has shut down. No further events follow.
    Failed(BridgeError),
}

/// RakNet handshake state for one bridge.
#[derive(Debug)]
pub struct PeBridge {
    state: PeConnectionState,
    client_guid: u64,
    server_guid: Option<u64>,
    mtu: u16,
    /// Our address as seen from the target, once it has told us.
    external_address: Option<SocketAddr>,
    local_address: SocketAddr,
    transmit: VecDeque<Bytes>,
    events: VecDeque<BridgeEvent>,
}

impl PeBridge {
    /// `local_address` is reported to the server in Open Connection Request #2.
    pub fn new(client_guid: u64, local_address: SocketAddr) -> Self {
        Self {
            state: PeConnectionState::Disconnected,
            client_guid,
            server_guid: None,
            mtu: raknet::DEFAULT_MTU,
            external_address: None,
            local_address,
            transmit: VecDeque::new(),
            events: VecDeque::new(),
        }
    }

    pub fn state(&self) -> PeConnectionState {
        self.state
    }

    pub fn client_guid(&self) -> u64 {
        self.client_guid
    }

    pub fn server_guid(&self) -> Option<u64> {
        self.server_guid
    }

    pub fn mtu(&self) -> u16 {
        self.mtu
    }

    pub fn external_address(&self) -> Option<SocketAddr> {
        self.external_address
    }

    /// Next datagram to send to the server.
    pub fn poll_transmit(&mut self) -> Option<Bytes> {
        self.transmit.pop_front()
    }

    pub fn poll_event(&mut self) -> Option<BridgeEvent> {
        self.events.pop_front()
    }

    /// Starts the handshake by queueing Open Connection Request #1.
    pub fn connect(&mut self) -> Result<(), BridgeError> {
        let request = Request::OpenConnectionRequest1(OpenConnectionRequest1 {
            magic: Magic,
            protocol_version: raknet::RAKNET_PROTOCOL_VERSION,
            client_guid: self.client_guid,
            mtu: self.mtu,
        });
        self.advance(PeConnectionState::Connecting1Sent)?;
        self.send(&request)?;
        self.events.push_back(BridgeEvent::HandshakeStarted);
        Ok(())
    }

    /// Processes one datagram from the server.
    ///
    /// Replies that do not match the current state are stale or duplicated
    /// and are ignored. An error means the bridge must shut down.
    pub fn handle_datagram(&mut self, datagram: &[u8]) -> Result<(), BridgeError> {
        let Some(&packet_id) = datagram.first() else {
            tracing::trace!("Ignoring empty datagram");
            return Ok(());
        };

        let expected_state = match packet_id {
            id::OPEN_CONNECTION_REPLY_1 => PeConnectionState::Connecting1Sent,
            id::OPEN_CONNECTION_REPLY_2 => PeConnectionState::Connecting2Sent,
            id::INCOMPATIBLE_PROTOCOL_VERSION => {
                tracing::warn!("Target server rejected RakNet protocol version");
                return Err(BridgeError::IncompatibleRakNetVersion);
            }
            _ => {
                let dump = &datagram[..datagram.len().min(DUMP_LIMIT)];
                tracing::debug!(
                    "Discarding unknown datagram 0x{packet_id:02X} in {}",
                    self.state
                );
                tracing::trace!("Raw bytes ({}): {}", dump.len(), hex(dump));
                return Ok(());
            }
        };

        if self.state != expected_state {
            tracing::debug!(
                "Ignoring datagram 0x{packet_id:02X} received in {}",
                self.state
            );
            return Ok(());
        }

        // Trailing bytes are tolerated; some servers pad their replies.
        let mut body = Decoder::new(&datagram[1..]);
        if packet_id == id::OPEN_CONNECTION_REPLY_1 {
            let reply = OpenConnectionReply1::decode(&mut body).map_err(reply_error)?;
            self.handle_reply_1(reply)
        } else {
            let reply = OpenConnectionReply2::decode(&mut body).map_err(reply_error)?;
            self.handle_reply_2(reply)
        }
    }

    fn handle_reply_1(&mut self, reply: OpenConnectionReply1) -> Result<(), BridgeError> {
        tracing::debug!(
            "Open Connection Reply #1: server GUID {}, security {}, MTU {}",
            reply.server_guid,
            reply.security,
            reply.mtu
        );
        self.server_guid = Some(reply.server_guid);
        self.mtu = reply.mtu;

        let request = Request::OpenConnectionRequest2(OpenConnectionRequest2 {
            magic: Magic,
            server_guid: reply.server_guid,
            client_address: PeAddress::try_from(self.local_address)?,
            mtu: self.mtu,
            client_guid: self.client_guid,
        });
        self.send(&request)?;
        self.advance(PeConnectionState::Connecting2Sent)
    }

    fn handle_reply_2(&mut self, reply: OpenConnectionReply2) -> Result<(), BridgeError> {
        let external_address = SocketAddr::from(reply.client_address);
        tracing::debug!(
            "Open Connection Reply #2: server GUID {}, our address {external_address}, MTU {}, security {}",
            reply.server_guid,
            reply.mtu,
            reply.security
        );
        self.external_address = Some(external_address);
        self.mtu = reply.mtu;

        self.advance(PeConnectionState::RakNetConnected)?;
        tracing::info!("RakNet connection established");
        self.events.push_back(BridgeEvent::RakNetConnected);

        self.begin_login()
    }

    /// PE login is not performed yet; only the state is advanced.
    /// A reliable session layer has to exist before a login packet can
    /// be sent.
    fn begin_login(&mut self) -> Result<(), BridgeError> {
        tracing::debug!("PE login not implemented, staying in LOGGING_IN");
        self.advance(PeConnectionState::LoggingIn)
    }

    /// Marks the PE login as complete.
    pub fn finish_login(&mut self) -> Result<(), BridgeError> {
        self.advance(PeConnectionState::Connected)
    }

    fn send(&mut self, request: &Request) -> Result<(), BridgeError> {
        tracing::trace!("Sending {}", request.as_ref());
        self.transmit.push_back(Bytes::from(request.to_bytes()?));
        Ok(())
    }

    fn advance(&mut self, next: PeConnectionState) -> Result<(), BridgeError> {
        if self.state.successor() != Some(next) {
            return Err(BridgeError::IllegalTransition {
                from: self.state,
                to: next,
            });
        }
        tracing::debug!("PE state {} -> {next}", self.state);
        self.state = next;
        Ok(())
    }
}

fn hex(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|b| format!("{b:02X}"))
        .collect::<Vec<_>>()
        .join(" ")
}

/// The Java session's end of a running bridge.
///
/// Dropping the handle shuts the bridge down and closes its socket.
#[derive(Debug)]
pub struct BridgeHandle {
    events: flume::Receiver<BridgeEvent>,
    state: watch::Receiver<PeConnectionState>,
    shutdown: CancellationToken,
}

impl BridgeHandle {
    /// Waits for the next event. Returns `None` once the bridge task
    /// has exited and all events have been received.
    pub async fn recv_event(&self) -> Option<BridgeEvent> {
        self.events.recv_async().await.ok()
    }

    pub fn state(&self) -> PeConnectionState {
        *self.state.borrow()
    }

    /// A receiver that observes every state change of the bridge.
    pub fn watch_state(&self) -> watch::Receiver<PeConnectionState> {
        self.state.clone()
    }

    pub fn close(&self) {
        self.shutdown.cancel();
    }
}

impl Drop for BridgeHandle {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

/// Starts a bridge task for `player` connecting to `target` (`host:port`).
/// The task fails with [`BridgeError::TimedOut`] if the RakNet handshake
/// has not completed within `handshake_timeout`.
///
/// Must be called within a tokio runtime.
pub fn spawn(target: String, handshake_timeout: Duration, player: &Player) -> BridgeHandle {
    let (events_tx, events_rx) = flume::unbounded();
    let (state_tx, state_rx) = watch::channel(PeConnectionState::Disconnected);
    let shutdown = CancellationToken::new();

    let span = tracing::info_span!("bridge", player = %player.name(), server = %target);
    let task_shutdown = shutdown.clone();
    tokio::spawn(
        async move {
            match run(&target, handshake_timeout, &events_tx, &state_tx, task_shutdown).await {
                Ok(()) => tracing::debug!("Bridge closed"),
                Err(e) => {
                    tracing::warn!("Bridge failed: {e}");
                    events_tx.send(BridgeEvent::Failed(e)).ok();
                }
            }
        }
        .instrument(span),
    );

    BridgeHandle {
        events: events_rx,
        state: state_rx,
        shutdown,
    }
}

async fn run(
    target: &str,
    handshake_timeout: Duration,
    events: &flume::Sender<BridgeEvent>,
    state: &watch::Sender<PeConnectionState>,
    shutdown: CancellationToken,
) -> Result<(), BridgeError> {
    let socket = connect_socket(target).await?;
    let local_address = socket.local_addr()?;
    tracing::debug!("Bound {local_address} for {}", socket.peer_addr()?);

    let mut bridge = PeBridge::new(generate_client_guid(), local_address);
    bridge.connect()?;

    // Lost datagrams are not retransmitted; the deadline covers them.
    let deadline = Instant::now() + handshake_timeout;
    let mut buffer = vec![0u8; MAX_DATAGRAM_SIZE];
    loop {
        while let Some(datagram) = bridge.poll_transmit() {
            socket.send(&datagram).await?;
        }
        state.send_replace(bridge.state());
        while let Some(event) = bridge.poll_event() {
            if events.send(event).is_err() {
                // session is gone
                return Ok(());
            }
        }

        tokio::select! {
            _ = shutdown.cancelled() => return Ok(()),
            _ = tokio::time::sleep_until(deadline), if !bridge.state().is_raknet_connected() => {
                return Err(BridgeError::TimedOut(handshake_timeout));
            }
            received = socket.recv(&mut buffer) => {
                let length = received?;
                bridge.handle_datagram(&buffer[..length])?;
            }
        }
    }
}

/// Binds a fresh UDP socket and connects it to the resolved target, so only
/// the target's datagrams are received.
async fn connect_socket(target: &str) -> Result<UdpSocket, BridgeError> {
    let addresses: Vec<SocketAddr> = tokio::net::lookup_host(target).await?.collect();
    let address = addresses
        .iter()
        .find(|address| address.is_ipv4())
        .or_else(|| addresses.first())
        .copied()
        .ok_or_else(|| BridgeError::UnresolvedTarget(target.to_owned()))?;

    let bind_address = match address {
        SocketAddr::V4(_) => SocketAddr::from((Ipv4Addr::UNSPECIFIED, 0)),
        SocketAddr::V6(_) => SocketAddr::from((Ipv6Addr::UNSPECIFIED, 0)),
    };
    let socket = UdpSocket::bind(bind_address).await?;
    socket.connect(address).await?;
    Ok(socket)
}
