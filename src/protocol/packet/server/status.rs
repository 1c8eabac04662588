use minecraft_pe_bridge_macros::{Decode, Encode};
use serde::Serialize;

#[derive(Debug, Clone, Encode, Decode, strum::AsRefStr)]
#[encoding(discriminant = "varint")]
pub enum Packet {
    #[encoding(id = 0x00)]
    StatusResponse(StatusResponse),
    #[encoding(id = 0x01)]
    PingResponse(PingResponse),
}

#[derive(Debug, Clone, Encode, Decode)]
pub struct StatusResponse {
    /// Serialized [`Status`].
    pub json: String,
}

#[derive(Debug, Clone, Encode, Decode)]
pub struct PingResponse {
    pub payload: i64,
}

/// Server list ping response body.
#[derive(Debug, Clone, Serialize)]
pub struct Status {
    pub version: StatusVersion,
    pub players: StatusPlayers,
    pub description: crate::protocol::packet::ChatMessage,
}

#[derive(Debug, Clone, Serialize)]
pub struct StatusVersion {
    pub name: String,
    pub protocol: i32,
}

#[derive(Debug, Clone, Serialize)]
pub struct StatusPlayers {
    pub max: u32,
    pub online: u32,
}
