use minecraft_pe_bridge_macros::{Decode, Encode};

#[derive(Debug, Clone, Encode, Decode, strum::AsRefStr)]
#[encoding(discriminant = "varint")]
pub enum Packet {
    #[encoding(id = 0x00)]
    Disconnect(Disconnect),
    #[encoding(id = 0x02)]
    LoginSuccess(LoginSuccess),
}

#[derive(Debug, Clone, Encode, Decode)]
pub struct Disconnect {
    /// JSON chat component.
    pub reason: String,
}

#[derive(Debug, Clone, Encode, Decode)]
pub struct LoginSuccess {
    /// Hyphenated UUID text.
    pub uuid: String,
    pub username: String,
}
