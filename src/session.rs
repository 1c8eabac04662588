//! The Java side of a connection.
//!
//! [`JavaSession`] consumes decoded frames and bridge events and produces
//! [`SessionAction`]s for the connection task to carry out. It never touches
//! a socket itself, so every transition can be driven from tests.

use crate::{
    bridge::{BridgeError, BridgeEvent},
    config::{GatewayConfig, LoginGate},
    player::Player,
    protocol::{
        packet::{
            client::{self, handshake::NextState},
            server::{self, status::Status},
            ChatMessage,
        },
        ConnectionState, Decode, DecodeError, Decoder, Encode, EncodeError, PROTOCOL_VERSION,
        VERSION_NAME,
    },
    translation::{HandlerContext, HandlerTable, TranslationError},
};
use bytes::Bytes;
use std::{collections::VecDeque, sync::Arc, time::Duration};

/// Something the connection task must do on behalf of the session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionAction {
    /// Write one packet payload (id + body) as a frame.
    Send(Bytes),
    /// Start a PE bridge for this player.
    ConnectBridge(Player),
    /// Close the connection now.
    Close,
    /// Close the connection after the given delay, letting pending
    /// writes reach the client.
    CloseAfter(Duration),
}

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("unsupported protocol version {received}, expected {}", PROTOCOL_VERSION)]
    ProtocolVersionMismatch { received: i32 },
    #[error("invalid next state {0} in handshake")]
    InvalidNextState(i32),
    #[error("unexpected packet 0x{packet_id:02X} in state {state}")]
    UnexpectedPacketForState {
        state: ConnectionState,
        packet_id: i32,
    },
    #[error("malformed packet: {0}")]
    Decode(#[from] DecodeError),
    #[error(transparent)]
    Encode(#[from] EncodeError),
    #[error("failed to serialize status: {0}")]
    Json(#[from] serde_json::Error),
    #[error("play packet handler failed: {0}")]
    Translation(#[from] TranslationError),
    #[error("PE bridge failed: {0}")]
    Bridge(#[from] BridgeError),
    #[error("illegal session transition from {from} to {to}")]
    IllegalTransition {
        from: ConnectionState,
        to: ConnectionState,
    },
}

pub struct JavaSession {
    state: ConnectionState,
    config: Arc<GatewayConfig>,
    handlers: Arc<HandlerTable>,
    player: Option<Player>,
    /// Set while in LOGIN after Login Start, until the gate opens.
    awaiting_bridge: bool,
    closing: bool,
    actions: VecDeque<SessionAction>,
}

impl JavaSession {
    pub fn new(config: Arc<GatewayConfig>, handlers: Arc<HandlerTable>) -> Self {
        Self {
            state: ConnectionState::Handshaking,
            config,
            handlers,
            player: None,
            awaiting_bridge: false,
            closing: false,
            actions: VecDeque::new(),
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn player(&self) -> Option<&Player> {
        self.player.as_ref()
    }

    /// Whether a close has been requested. No further input is processed.
    pub fn is_closing(&self) -> bool {
        self.closing
    }

    pub fn poll_action(&mut self) -> Option<SessionAction> {
        self.actions.pop_front()
    }

    /// Processes one frame payload from the client.
    ///
    /// On error the session has already queued its close; the error is
    /// returned for logging.
    pub fn handle_frame(&mut self, frame: &[u8]) -> Result<(), SessionError> {
        if self.closing {
            return Ok(());
        }
        let result = self.process_frame(frame);
        if let Err(e) = &result {
            self.fail(e);
        }
        result
    }

    /// Processes a notification from this session's bridge.
    pub fn handle_bridge_event(&mut self, event: BridgeEvent) -> Result<(), SessionError> {
        if self.closing {
            return Ok(());
        }
        let result = self.process_bridge_event(event);
        if let Err(e) = &result {
            self.fail(e);
        }
        result
    }

    fn process_bridge_event(&mut self, event: BridgeEvent) -> Result<(), SessionError> {
        match event {
            BridgeEvent::HandshakeStarted => {
                if self.config.login_gate == LoginGate::HandshakeStarted {
                    self.complete_login()?;
                }
            }
            BridgeEvent::RakNetConnected => {
                if self.config.login_gate == LoginGate::RaknetConnected {
                    self.complete_login()?;
                }
            }
            BridgeEvent::Failed(error) => return Err(SessionError::Bridge(error)),
        }
        Ok(())
    }

    fn process_frame(&mut self, frame: &[u8]) -> Result<(), SessionError> {
        let packet_id = Decoder::new(frame).read_var_int()?;
        tracing::trace!(
            "Packet 0x{packet_id:02X} in {} ({} bytes)",
            self.state,
            frame.len()
        );

        match self.state {
            ConnectionState::Handshaking => {
                let client::handshake::Packet::Handshake(handshake) =
                    self.decode_packet::<client::handshake::Packet>(frame, packet_id)?;
                tracing::debug!(
                    "Handshake: protocol {}, address {}:{}, next state {}",
                    handshake.protocol_version,
                    handshake.server_address,
                    handshake.server_port,
                    handshake.next_state
                );
                if handshake.protocol_version != PROTOCOL_VERSION {
                    return Err(SessionError::ProtocolVersionMismatch {
                        received: handshake.protocol_version,
                    });
                }
                match NextState::try_from(handshake.next_state) {
                    Ok(NextState::Status) => self.transition(ConnectionState::Status),
                    Ok(NextState::Login) => self.transition(ConnectionState::Login),
                    Err(value) => Err(SessionError::InvalidNextState(value)),
                }
            }
            ConnectionState::Status => {
                // Status Request has no body and shares id 0x00 with Login Start.
                let packet = if packet_id == 0x00 {
                    self.decode_whole_packet::<client::status::Packet>(frame, packet_id)?
                } else {
                    self.decode_packet::<client::status::Packet>(frame, packet_id)?
                };
                self.handle_status(packet)
            }
            ConnectionState::Login => {
                if self.awaiting_bridge {
                    return Err(SessionError::UnexpectedPacketForState {
                        state: self.state,
                        packet_id,
                    });
                }
                let client::login::Packet::LoginStart(login_start) =
                    self.decode_packet::<client::login::Packet>(frame, packet_id)?;
                let player = Player::from_login_name(&login_start.name);
                tracing::info!(
                    "Login Start from {:?}, playing as {player}",
                    login_start.name
                );
                self.player = Some(player.clone());
                self.awaiting_bridge = true;
                self.actions.push_back(SessionAction::ConnectBridge(player));
                Ok(())
            }
            ConnectionState::Play => self.handle_play(frame),
        }
    }

    /// Decodes one of the packets valid in the current state. Bytes after
    /// the packet's fields are ignored.
    fn decode_packet<P: Decode>(&self, frame: &[u8], packet_id: i32) -> Result<P, SessionError> {
        P::decode(&mut Decoder::new(frame)).map_err(|e| self.decode_error(e, packet_id))
    }

    /// Like [`Self::decode_packet`], but the packet must fill the frame.
    fn decode_whole_packet<P: Decode>(
        &self,
        frame: &[u8],
        packet_id: i32,
    ) -> Result<P, SessionError> {
        P::decode_exact(frame).map_err(|e| self.decode_error(e, packet_id))
    }

    fn decode_error(&self, error: DecodeError, packet_id: i32) -> SessionError {
        match error {
            DecodeError::UnknownDiscriminant(_) | DecodeError::TrailingBytes(_) => {
                SessionError::UnexpectedPacketForState {
                    state: self.state,
                    packet_id,
                }
            }
            other => SessionError::Decode(other),
        }
    }

    fn handle_status(&mut self, packet: client::status::Packet) -> Result<(), SessionError> {
        match packet {
            client::status::Packet::StatusRequest(_) => self.send_status(),
            client::status::Packet::PingRequest(ping) => {
                self.send(&server::status::Packet::PingResponse(
                    server::status::PingResponse {
                        payload: ping.payload,
                    },
                ))
            }
        }
    }

    fn handle_play(&mut self, frame: &[u8]) -> Result<(), SessionError> {
        let Some(player) = &self.player else {
            return Ok(());
        };
        let mut decoder = Decoder::new(frame);
        let packet_id = decoder.read_var_int()?;
        let body = decoder.consume_slice(decoder.remaining())?;

        let mut to_client = Vec::new();
        let mut context = HandlerContext::new(player, &mut to_client);
        self.handlers
            .dispatch(self.state, packet_id, &mut context, body)?;
        self.actions
            .extend(to_client.into_iter().map(SessionAction::Send));
        Ok(())
    }

    fn send_status(&mut self) -> Result<(), SessionError> {
        let status = Status {
            version: server::status::StatusVersion {
                name: VERSION_NAME.to_owned(),
                protocol: PROTOCOL_VERSION,
            },
            players: server::status::StatusPlayers {
                max: self.config.max_players,
                online: 0,
            },
            description: ChatMessage::new(self.config.motd.clone()),
        };
        let json = serde_json::to_string(&status)?;
        self.send(&server::status::Packet::StatusResponse(
            server::status::StatusResponse { json },
        ))
    }

    /// Sends Login Success and enters PLAY.
    fn complete_login(&mut self) -> Result<(), SessionError> {
        if !self.awaiting_bridge || self.state != ConnectionState::Login {
            return Ok(());
        }
        let Some(player) = &self.player else {
            return Ok(());
        };
        let packet = server::login::Packet::LoginSuccess(server::login::LoginSuccess {
            uuid: player.id().hyphenated().to_string(),
            username: player.name().to_owned(),
        });
        self.send(&packet)?;
        self.awaiting_bridge = false;
        self.transition(ConnectionState::Play)?;
        tracing::info!("Logged in, now in PLAY");
        Ok(())
    }

    fn send(&mut self, packet: &impl Encode) -> Result<(), SessionError> {
        self.actions
            .push_back(SessionAction::Send(Bytes::from(packet.to_bytes()?)));
        Ok(())
    }

    /// Queues a disconnect packet valid for the current state.
    fn send_disconnect(&mut self, reason: &str) -> Result<(), SessionError> {
        let reason = ChatMessage::new(reason).to_json();
        let disconnect = server::login::Disconnect { reason };
        match self.state {
            ConnectionState::Play => {
                self.send(&server::play::Packet::Disconnect(disconnect))
            }
            _ => self.send(&server::login::Packet::Disconnect(disconnect)),
        }
    }

    /// Closes the session in response to `error`.
    fn fail(&mut self, error: &SessionError) {
        let reason = match error {
            SessionError::ProtocolVersionMismatch { received } => Some(format!(
                "Unsupported protocol version! Expected {VERSION_NAME} ({PROTOCOL_VERSION}). Received {received}"
            )),
            SessionError::Bridge(error) => Some(error.disconnect_reason().to_owned()),
            // after login the client is owed an explanation
            other if self.state == ConnectionState::Play => Some(other.to_string()),
            _ => None,
        };

        let sent_disconnect = match reason {
            Some(reason) => self.send_disconnect(&reason).is_ok(),
            None => false,
        };
        self.closing = true;
        self.actions.push_back(if sent_disconnect {
            SessionAction::CloseAfter(self.config.disconnect_flush_delay)
        } else {
            SessionAction::Close
        });
    }

    fn transition(&mut self, next: ConnectionState) -> Result<(), SessionError> {
        use ConnectionState::*;
        let valid = matches!(
            (self.state, next),
            (Handshaking, Status) | (Handshaking, Login) | (Login, Play)
        );
        if !valid {
            return Err(SessionError::IllegalTransition {
                from: self.state,
                to: next,
            });
        }
        tracing::debug!("Java state {} -> {next}", self.state);
        self.state = next;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::DISCONNECT_FLUSH_DELAY,
        protocol::{
            packet::client::{
                handshake::Handshake,
                login::LoginStart,
                status::{PingRequest, StatusRequest},
            },
            Encoder,
        },
    };

    fn session(login_gate: LoginGate) -> JavaSession {
        let config = GatewayConfig {
            login_gate,
            ..GatewayConfig::default()
        };
        JavaSession::new(Arc::new(config), Arc::new(HandlerTable::new()))
    }

    fn handshake(protocol_version: i32, next_state: i32) -> Vec<u8> {
        client::handshake::Packet::Handshake(Handshake {
            protocol_version,
            server_address: "localhost".to_owned(),
            server_port: 25565,
            next_state,
        })
        .to_bytes()
        .unwrap()
    }

    fn login_start(name: &str) -> Vec<u8> {
        client::login::Packet::LoginStart(LoginStart {
            name: name.to_owned(),
        })
        .to_bytes()
        .unwrap()
    }

    fn actions(session: &mut JavaSession) -> Vec<SessionAction> {
        std::iter::from_fn(|| session.poll_action()).collect()
    }

    fn sent(action: &SessionAction) -> &[u8] {
        match action {
            SessionAction::Send(bytes) => bytes,
            other => panic!("expected Send, got {other:?}"),
        }
    }

    /// Handshake + Login Start; returns the player queued for the bridge.
    fn start_login(session: &mut JavaSession, name: &str) -> Player {
        session.handle_frame(&handshake(47, 2)).unwrap();
        assert_eq!(session.state(), ConnectionState::Login);
        session.handle_frame(&login_start(name)).unwrap();
        match &actions(session)[..] {
            [SessionAction::ConnectBridge(player)] => player.clone(),
            other => panic!("unexpected actions {other:?}"),
        }
    }

    #[test]
    fn handshake_moves_to_status_or_login() {
        let mut s = session(LoginGate::default());
        s.handle_frame(&handshake(47, 1)).unwrap();
        assert_eq!(s.state(), ConnectionState::Status);

        let mut s = session(LoginGate::default());
        s.handle_frame(&handshake(47, 2)).unwrap();
        assert_eq!(s.state(), ConnectionState::Login);
        assert!(actions(&mut s).is_empty());
    }

    #[test]
    fn wrong_protocol_version_disconnects_then_closes() {
        let mut s = session(LoginGate::default());
        let error = s.handle_frame(&handshake(1, 2)).unwrap_err();
        assert!(matches!(
            error,
            SessionError::ProtocolVersionMismatch { received: 1 }
        ));

        let actions = actions(&mut s);
        assert_eq!(actions.len(), 2);
        let disconnect = sent(&actions[0]);
        assert_eq!(disconnect[0], 0x00);
        let reason = Decoder::new(&disconnect[1..]).read_string().unwrap();
        assert!(reason.contains("Unsupported protocol version"));
        assert!(reason.contains("Received 1"));
        assert_eq!(actions[1], SessionAction::CloseAfter(DISCONNECT_FLUSH_DELAY));
        assert!(s.is_closing());
    }

    #[test]
    fn invalid_next_state_closes_immediately() {
        let mut s = session(LoginGate::default());
        assert!(matches!(
            s.handle_frame(&handshake(47, 3)),
            Err(SessionError::InvalidNextState(3))
        ));
        assert_eq!(actions(&mut s), vec![SessionAction::Close]);
    }

    #[test]
    fn input_after_close_is_ignored() {
        let mut s = session(LoginGate::default());
        s.handle_frame(&handshake(47, 3)).unwrap_err();
        actions(&mut s);
        s.handle_frame(&handshake(47, 2)).unwrap();
        assert_eq!(s.state(), ConnectionState::Handshaking);
        assert!(actions(&mut s).is_empty());
    }

    #[test]
    fn status_request_and_ping() {
        let mut s = session(LoginGate::default());
        s.handle_frame(&handshake(47, 1)).unwrap();

        s.handle_frame(
            &client::status::Packet::StatusRequest(StatusRequest)
                .to_bytes()
                .unwrap(),
        )
        .unwrap();
        s.handle_frame(
            &client::status::Packet::PingRequest(PingRequest { payload: -5 })
                .to_bytes()
                .unwrap(),
        )
        .unwrap();

        let actions = actions(&mut s);
        assert_eq!(actions.len(), 2);
        let status = sent(&actions[0]);
        assert_eq!(status[0], 0x00);
        let json = Decoder::new(&status[1..]).read_string().unwrap();
        let value: serde_json::Value = serde_json::from_str(json).unwrap();
        assert_eq!(value["version"]["protocol"], 47);
        assert_eq!(value["version"]["name"], "1.8.9");

        let pong = sent(&actions[1]);
        assert_eq!(pong[0], 0x01);
        assert_eq!(&pong[1..], &(-5i64).to_be_bytes());
        assert_eq!(s.state(), ConnectionState::Status);
    }

    #[test]
    fn short_ping_closes() {
        let mut s = session(LoginGate::default());
        s.handle_frame(&handshake(47, 1)).unwrap();
        assert!(matches!(
            s.handle_frame(&[0x01, 0, 0, 0, 0]),
            Err(SessionError::Decode(DecodeError::BufferUnderrun { .. }))
        ));
        assert_eq!(actions(&mut s), vec![SessionAction::Close]);
    }

    #[test]
    fn ping_with_extra_bytes_is_answered() {
        let mut s = session(LoginGate::default());
        s.handle_frame(&handshake(47, 1)).unwrap();
        s.handle_frame(&[0x01, 0, 0, 0, 0, 0, 0, 0, 7, 0xAA]).unwrap();

        let actions = actions(&mut s);
        assert_eq!(actions.len(), 1);
        let pong = sent(&actions[0]);
        assert_eq!(pong[0], 0x01);
        assert_eq!(&pong[1..], &7i64.to_be_bytes());
        assert!(!s.is_closing());
    }

    #[test]
    fn handshake_with_extra_bytes_is_accepted() {
        let mut s = session(LoginGate::default());
        let mut frame = handshake(47, 2);
        frame.extend_from_slice(&[0xDE, 0xAD]);
        s.handle_frame(&frame).unwrap();
        assert_eq!(s.state(), ConnectionState::Login);
        assert!(actions(&mut s).is_empty());
    }

    #[test]
    fn status_json_describes_the_gateway() {
        let config = GatewayConfig {
            motd: String::from("A \"quoted\" motd"),
            max_players: 7,
            ..GatewayConfig::default()
        };
        let mut s = JavaSession::new(Arc::new(config), Arc::new(HandlerTable::new()));
        s.handle_frame(&handshake(47, 1)).unwrap();
        s.handle_frame(&[0x00]).unwrap();

        let actions = actions(&mut s);
        let status = sent(&actions[0]);
        let json = Decoder::new(&status[1..]).read_string().unwrap();
        assert!(!json.is_empty());
        let value: serde_json::Value = serde_json::from_str(json).unwrap();
        assert_eq!(value["description"]["text"], "A \"quoted\" motd");
        assert_eq!(value["players"]["max"], 7);
        assert_eq!(value["players"]["online"], 0);
    }

    #[test]
    fn login_start_in_status_is_rejected() {
        let mut s = session(LoginGate::default());
        s.handle_frame(&handshake(47, 1)).unwrap();
        assert!(matches!(
            s.handle_frame(&login_start("Notch")),
            Err(SessionError::UnexpectedPacketForState {
                state: ConnectionState::Status,
                packet_id: 0
            })
        ));
        assert_eq!(actions(&mut s), vec![SessionAction::Close]);
        assert!(s.player().is_none());
    }

    #[test]
    fn unknown_packet_in_handshaking_is_rejected() {
        let mut s = session(LoginGate::default());
        assert!(matches!(
            s.handle_frame(&[0x05]),
            Err(SessionError::UnexpectedPacketForState {
                state: ConnectionState::Handshaking,
                packet_id: 5
            })
        ));
    }

    #[test]
    fn login_waits_for_raknet_connection() {
        let mut s = session(LoginGate::RaknetConnected);
        let player = start_login(&mut s, "Notch_123");
        assert_eq!(player.name(), "Notch123");

        s.handle_bridge_event(BridgeEvent::HandshakeStarted).unwrap();
        assert_eq!(s.state(), ConnectionState::Login);
        assert!(actions(&mut s).is_empty());

        s.handle_bridge_event(BridgeEvent::RakNetConnected).unwrap();
        assert_eq!(s.state(), ConnectionState::Play);
        let actions = actions(&mut s);
        assert_eq!(actions.len(), 1);

        let success = sent(&actions[0]);
        assert_eq!(success[0], 0x02);
        let mut decoder = Decoder::new(&success[1..]);
        assert_eq!(
            decoder.read_string().unwrap(),
            player.id().hyphenated().to_string()
        );
        assert_eq!(decoder.read_string().unwrap(), "Notch123");
        assert!(decoder.is_finished());
    }

    #[test]
    fn eager_gate_logs_in_when_handshake_starts() {
        let mut s = session(LoginGate::HandshakeStarted);
        start_login(&mut s, "Steve");
        s.handle_bridge_event(BridgeEvent::HandshakeStarted).unwrap();
        assert_eq!(s.state(), ConnectionState::Play);
        assert_eq!(sent(&actions(&mut s)[0])[0], 0x02);

        // later events change nothing
        s.handle_bridge_event(BridgeEvent::RakNetConnected).unwrap();
        assert!(actions(&mut s).is_empty());
    }

    #[test]
    fn second_login_start_is_rejected() {
        let mut s = session(LoginGate::RaknetConnected);
        start_login(&mut s, "Steve");
        assert!(matches!(
            s.handle_frame(&login_start("Steve")),
            Err(SessionError::UnexpectedPacketForState {
                state: ConnectionState::Login,
                ..
            })
        ));
    }

    #[test]
    fn bridge_failure_disconnects_with_reason() {
        let mut s = session(LoginGate::RaknetConnected);
        start_login(&mut s, "Steve");
        s.handle_bridge_event(BridgeEvent::Failed(BridgeError::IncompatibleRakNetVersion))
            .unwrap_err();

        let actions = actions(&mut s);
        let disconnect = sent(&actions[0]);
        assert_eq!(disconnect[0], 0x00);
        let reason = Decoder::new(&disconnect[1..]).read_string().unwrap();
        assert_eq!(
            reason,
            r#"{"text":"Target PE server has incompatible RakNet protocol version."}"#
        );
        assert!(matches!(actions[1], SessionAction::CloseAfter(_)));
    }

    #[test]
    fn bridge_failure_in_play_uses_play_disconnect() {
        let mut s = session(LoginGate::HandshakeStarted);
        start_login(&mut s, "Steve");
        s.handle_bridge_event(BridgeEvent::HandshakeStarted).unwrap();
        actions(&mut s);

        s.handle_bridge_event(BridgeEvent::Failed(BridgeError::HandshakeMagicMismatch))
            .unwrap_err();
        let actions = actions(&mut s);
        assert_eq!(sent(&actions[0])[0], 0x40);
    }

    fn kick_with_message(
        context: &mut HandlerContext,
        body: &[u8],
    ) -> Result<(), TranslationError> {
        let message = Decoder::new(body).read_string()?.to_owned();
        let reason = ChatMessage::new(format!("{}: {message}", context.player().name()));
        context.send_to_client(&server::play::Packet::Disconnect(
            server::login::Disconnect {
                reason: reason.to_json(),
            },
        ))?;
        Ok(())
    }

    #[test]
    fn play_packets_go_through_handler_table() {
        let mut handlers = HandlerTable::new();
        handlers.register(ConnectionState::Play, 0x01, kick_with_message);
        let config = GatewayConfig {
            login_gate: LoginGate::HandshakeStarted,
            ..GatewayConfig::default()
        };
        let mut s = JavaSession::new(Arc::new(config), Arc::new(handlers));
        start_login(&mut s, "Steve");
        s.handle_bridge_event(BridgeEvent::HandshakeStarted).unwrap();
        actions(&mut s);

        // unhandled
        s.handle_frame(&[0x00, 0x2A]).unwrap();
        assert!(actions(&mut s).is_empty());

        let mut chat = vec![0x01];
        Encoder::new(&mut chat).write_string("hi").unwrap();
        s.handle_frame(&chat).unwrap();
        let actions = actions(&mut s);
        assert_eq!(actions.len(), 1);
        assert_eq!(sent(&actions[0])[0], 0x40);
        assert_eq!(s.state(), ConnectionState::Play);
    }
}
