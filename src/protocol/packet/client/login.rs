use minecraft_pe_bridge_macros::{Decode, Encode};

#[derive(Debug, Clone, Encode, Decode, strum::AsRefStr)]
#[encoding(discriminant = "varint")]
pub enum Packet {
    #[encoding(id = 0x00)]
    LoginStart(LoginStart),
}

#[derive(Debug, Clone, Encode, Decode)]
pub struct LoginStart {
    pub name: String,
}
