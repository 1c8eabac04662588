use minecraft_pe_bridge_macros::{Decode, Encode};

/// Clientbound play packets the gateway emits itself. Everything else in
/// the play state goes through [`crate::translation::HandlerTable`].
#[derive(Debug, Clone, Encode, Decode, strum::AsRefStr)]
#[encoding(discriminant = "varint")]
pub enum Packet {
    #[encoding(id = 0x40)]
    Disconnect(super::login::Disconnect),
}
