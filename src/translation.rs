use crate::{
    player::Player,
    protocol::{ConnectionState, DecodeError, Encode, EncodeError},
};
use ahash::AHashMap;
use bytes::Bytes;
use std::sync::Arc;

/// Error produced by a packet handler.
#[derive(Debug, thiserror::Error)]
pub enum TranslationError {
    #[error("failed to decode packet body: {0}")]
    Decode(#[from] DecodeError),
    #[error("failed to encode translated packet: {0}")]
    Encode(#[from] EncodeError),
}

/// What a handler has access to while translating one packet.
pub struct HandlerContext<'a> {
    player: &'a Player,
    to_client: &'a mut Vec<Bytes>,
}

impl<'a> HandlerContext<'a> {
    pub fn new(player: &'a Player, to_client: &'a mut Vec<Bytes>) -> Self {
        Self { player, to_client }
    }

    pub fn player(&self) -> &Player {
        self.player
    }

    /// Queues a Java packet (including its id) for the client.
    pub fn send_to_client(&mut self, packet: &impl Encode) -> Result<(), EncodeError> {
        self.to_client.push(Bytes::from(packet.to_bytes()?));
        Ok(())
    }
}

/// Translates one serverbound Java packet.
///
/// `body` is the frame payload after the packet id.
pub trait PacketHandler: Send + Sync {
    fn handle(&self, context: &mut HandlerContext, body: &[u8]) -> Result<(), TranslationError>;
}

impl<F> PacketHandler for F
where
    F: Fn(&mut HandlerContext, &[u8]) -> Result<(), TranslationError> + Send + Sync,
{
    fn handle(&self, context: &mut HandlerContext, body: &[u8]) -> Result<(), TranslationError> {
        self(context, body)
    }
}

/// Whether a packet found a handler.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Dispatch {
    Handled,
    Unhandled,
}

/// Handlers keyed by connection state and packet id.
///
/// This is where Java <-> PE packet translation plugs into a session
/// without touching its state machine. Packets with no handler are
/// dropped.
#[derive(Default, Clone)]
pub struct HandlerTable {
    handlers: AHashMap<(ConnectionState, i32), Arc<dyn PacketHandler>>,
}

impl HandlerTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `handler`, replacing any previous handler for the same key.
    pub fn register(
        &mut self,
        state: ConnectionState,
        packet_id: i32,
        handler: impl PacketHandler + 'static,
    ) -> &mut Self {
        self.handlers.insert((state, packet_id), Arc::new(handler));
        self
    }

    pub fn contains(&self, state: ConnectionState, packet_id: i32) -> bool {
        self.handlers.contains_key(&(state, packet_id))
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    pub fn dispatch(
        &self,
        state: ConnectionState,
        packet_id: i32,
        context: &mut HandlerContext,
        body: &[u8],
    ) -> Result<Dispatch, TranslationError> {
        match self.handlers.get(&(state, packet_id)) {
            Some(handler) => {
                handler.handle(context, body)?;
                Ok(Dispatch::Handled)
            }
            None => {
                tracing::trace!(
                    "No handler for packet 0x{packet_id:02X} in {state}, {} bytes dropped",
                    body.len()
                );
                Ok(Dispatch::Unhandled)
            }
        }
    }
}

impl std::fmt::Debug for HandlerTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_set().entries(self.handlers.keys()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{
        packet::server::status::{Packet, PingResponse},
        Decoder,
    };

    fn echo_long(context: &mut HandlerContext, body: &[u8]) -> Result<(), TranslationError> {
        let payload = Decoder::new(body).read_i64()?;
        context.send_to_client(&Packet::PingResponse(PingResponse { payload }))?;
        Ok(())
    }

    #[test]
    fn registered_handler_runs() {
        let mut table = HandlerTable::new();
        table.register(ConnectionState::Play, 0x00, echo_long);
        assert!(table.contains(ConnectionState::Play, 0x00));
        assert!(!table.contains(ConnectionState::Login, 0x00));

        let player = Player::from_login_name("Steve");
        let mut out = Vec::new();
        let mut context = HandlerContext::new(&player, &mut out);
        let dispatch = table
            .dispatch(ConnectionState::Play, 0x00, &mut context, &42i64.to_be_bytes())
            .unwrap();

        assert_eq!(dispatch, Dispatch::Handled);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0][0], 0x01);
        assert_eq!(&out[0][1..], &42i64.to_be_bytes());
    }

    #[test]
    fn missing_handler_is_unhandled() {
        let table = HandlerTable::new();
        let player = Player::from_login_name("Steve");
        let mut out = Vec::new();
        let mut context = HandlerContext::new(&player, &mut out);
        assert_eq!(
            table
                .dispatch(ConnectionState::Play, 0x17, &mut context, &[1, 2, 3])
                .unwrap(),
            Dispatch::Unhandled
        );
        assert!(out.is_empty());
    }

    #[test]
    fn handler_errors_propagate() {
        let mut table = HandlerTable::new();
        table.register(ConnectionState::Play, 0x00, echo_long);
        let player = Player::from_login_name("Steve");
        let mut out = Vec::new();
        let mut context = HandlerContext::new(&player, &mut out);
        assert!(matches!(
            table.dispatch(ConnectionState::Play, 0x00, &mut context, &[1, 2]),
            Err(TranslationError::Decode(DecodeError::BufferUnderrun { .. }))
        ));
    }
}
