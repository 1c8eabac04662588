use minecraft_pe_bridge_macros::{Decode, Encode};

#[derive(Debug, Clone, Encode, Decode, strum::AsRefStr)]
#[encoding(discriminant = "varint")]
pub enum Packet {
    #[encoding(id = 0x00)]
    Handshake(Handshake),
}

#[derive(Debug, Clone, Encode, Decode)]
pub struct Handshake {
    #[encoding(varint)]
    pub protocol_version: i32,
    pub server_address: String,
    pub server_port: u16,
    /// Kept raw so an out-of-range value can be reported as such
    /// rather than as an unknown packet.
    #[encoding(varint)]
    pub next_state: i32,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum NextState {
    Status,
    Login,
}

impl TryFrom<i32> for NextState {
    type Error = i32;

    fn try_from(value: i32) -> Result<Self, i32> {
        match value {
            1 => Ok(Self::Status),
            2 => Ok(Self::Login),
            other => Err(other),
        }
    }
}
