//! RakNet offline messages used by the open-connection handshake.
//!
//! Multi-byte integers are little-endian, except for the port inside
//! [`PeAddress`] which RakNet keeps big-endian.

use crate::protocol::{Decode, DecodeError, Decoder, Encode, EncodeError, Encoder};
use minecraft_pe_bridge_macros::{Decode, Encode};
use std::net::{SocketAddr, SocketAddrV4};

/// Prefix carried by every offline message.
pub const MAGIC: [u8; 16] = [
    0x00, 0xFF, 0xFF, 0x00, 0xFE, 0xFE, 0xFE, 0xFE, 0xFD, 0xFD, 0xFD, 0xFD, 0x12, 0x34, 0x56, 0x78,
];

pub const RAKNET_PROTOCOL_VERSION: u8 = 0x05;

/// MTU requested in Open Connection Request #1.
pub const DEFAULT_MTU: u16 = 1492;

/// Message ids.
pub mod id {
    pub const OPEN_CONNECTION_REQUEST_1: u8 = 0x05;
    pub const OPEN_CONNECTION_REPLY_1: u8 = 0x06;
    pub const OPEN_CONNECTION_REQUEST_2: u8 = 0x07;
    pub const OPEN_CONNECTION_REPLY_2: u8 = 0x08;
    pub const INCOMPATIBLE_PROTOCOL_VERSION: u8 = 0x1A;
}

/// A random GUID identifying this end of one bridge.
pub fn generate_client_guid() -> u64 {
    rand::random()
}

/// The offline magic. Decoding fails with [`DecodeError::InvalidMagic`]
/// unless all 16 bytes match.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub struct Magic;

impl Encode for Magic {
    fn encode(&self, encoder: &mut Encoder) -> Result<(), EncodeError> {
        encoder.write_slice(&MAGIC);
        Ok(())
    }
}

impl Decode for Magic {
    fn decode(decoder: &mut Decoder) -> Result<Self, DecodeError> {
        if decoder.consume::<16>()? == MAGIC {
            Ok(Magic)
        } else {
            Err(DecodeError::InvalidMagic)
        }
    }
}

/// An IPv4 endpoint in RakNet wire form.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct PeAddress(pub SocketAddrV4);

impl TryFrom<SocketAddr> for PeAddress {
    type Error = EncodeError;

    fn try_from(address: SocketAddr) -> Result<Self, EncodeError> {
        match address {
            SocketAddr::V4(v4) => Ok(Self(v4)),
            SocketAddr::V6(_) => Err(EncodeError::UnsupportedAddressFamily(address)),
        }
    }
}

impl From<PeAddress> for SocketAddr {
    fn from(address: PeAddress) -> Self {
        SocketAddr::V4(address.0)
    }
}

impl Encode for PeAddress {
    fn encode(&self, encoder: &mut Encoder) -> Result<(), EncodeError> {
        encoder.write_pe_address(SocketAddr::V4(self.0))
    }
}

impl Decode for PeAddress {
    fn decode(decoder: &mut Decoder) -> Result<Self, DecodeError> {
        decoder.read_pe_address().map(Self)
    }
}

/// Messages sent by the bridge to the PE server.
#[derive(Debug, Clone, Encode, Decode, strum::AsRefStr)]
#[encoding(discriminant = "byte")]
pub enum Request {
    #[encoding(id = 0x05)]
    OpenConnectionRequest1(OpenConnectionRequest1),
    #[encoding(id = 0x07)]
    OpenConnectionRequest2(OpenConnectionRequest2),
}

/// Messages sent by the PE server during the handshake.
#[derive(Debug, Clone, Encode, Decode, strum::AsRefStr)]
#[encoding(discriminant = "byte")]
pub enum Reply {
    #[encoding(id = 0x06)]
    OpenConnectionReply1(OpenConnectionReply1),
    #[encoding(id = 0x08)]
    OpenConnectionReply2(OpenConnectionReply2),
    #[encoding(id = 0x1A)]
    IncompatibleProtocolVersion(IncompatibleProtocolVersion),
}

#[derive(Debug, Clone, Encode, Decode)]
pub struct OpenConnectionRequest1 {
    pub magic: Magic,
    pub protocol_version: u8,
    #[encoding(le)]
    pub client_guid: u64,
    #[encoding(le)]
    pub mtu: u16,
}

#[derive(Debug, Clone, Encode, Decode)]
pub struct OpenConnectionReply1 {
    pub magic: Magic,
    #[encoding(le)]
    pub server_guid: u64,
    pub security: u8,
    #[encoding(le)]
    pub mtu: u16,
}

#[derive(Debug, Clone, Encode, Decode)]
pub struct OpenConnectionRequest2 {
    pub magic: Magic,
    #[encoding(le)]
    pub server_guid: u64,
    pub client_address: PeAddress,
    #[encoding(le)]
    pub mtu: u16,
    #[encoding(le)]
    pub client_guid: u64,
}

#[derive(Debug, Clone, Encode, Decode)]
pub struct OpenConnectionReply2 {
    pub magic: Magic,
    #[encoding(le)]
    pub server_guid: u64,
    pub client_address: PeAddress,
    #[encoding(le)]
    pub mtu: u16,
    pub security: u8,
}

/// Body is not interpreted.
#[derive(Debug, Clone, Encode, Decode)]
pub struct IncompatibleProtocolVersion {
    #[encoding(length_prefix = "inferred")]
    pub body: Vec<u8>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_1_layout() {
        let bytes = Request::OpenConnectionRequest1(OpenConnectionRequest1 {
            magic: Magic,
            protocol_version: RAKNET_PROTOCOL_VERSION,
            client_guid: 0x1122_3344_5566_7788,
            mtu: DEFAULT_MTU,
        })
        .to_bytes()
        .unwrap();

        assert_eq!(bytes.len(), 1 + 16 + 1 + 8 + 2);
        assert_eq!(bytes[0], id::OPEN_CONNECTION_REQUEST_1);
        assert_eq!(&bytes[1..17], &MAGIC);
        assert_eq!(bytes[17], 0x05);
        assert_eq!(&bytes[18..26], &0x1122_3344_5566_7788u64.to_le_bytes());
        assert_eq!(&bytes[26..], &[0xD4, 0x05]);
    }

    #[test]
    fn request_2_carries_address_and_guids() {
        let address: SocketAddr = "10.0.0.2:50000".parse().unwrap();
        let bytes = Request::OpenConnectionRequest2(OpenConnectionRequest2 {
            magic: Magic,
            server_guid: 7,
            client_address: PeAddress::try_from(address).unwrap(),
            mtu: 1400,
            client_guid: 9,
        })
        .to_bytes()
        .unwrap();

        assert_eq!(bytes[0], id::OPEN_CONNECTION_REQUEST_2);
        assert_eq!(&bytes[17..25], &7u64.to_le_bytes());
        assert_eq!(&bytes[25..32], &[4, 10, 0, 0, 2, 0xC3, 0x50]);
        assert_eq!(&bytes[32..34], &1400u16.to_le_bytes());
        assert_eq!(&bytes[34..], &9u64.to_le_bytes());
    }

    #[test]
    fn reply_with_bad_magic_is_rejected() {
        let mut bytes = Reply::OpenConnectionReply1(OpenConnectionReply1 {
            magic: Magic,
            server_guid: 1,
            security: 0,
            mtu: 1492,
        })
        .to_bytes()
        .unwrap();
        bytes[5] ^= 0xFF;

        assert!(matches!(
            Reply::decode_exact(&bytes),
            Err(DecodeError::InvalidMagic)
        ));
    }

    #[test]
    fn unknown_reply_id_is_reported() {
        assert!(matches!(
            Reply::decode_exact(&[0x1C, 0, 0]),
            Err(DecodeError::UnknownDiscriminant(0x1C))
        ));
    }

    #[test]
    fn ipv6_cannot_become_pe_address() {
        let address: SocketAddr = "[::1]:19132".parse().unwrap();
        assert!(PeAddress::try_from(address).is_err());
    }

    #[test]
    fn guids_differ() {
        assert_ne!(generate_client_guid(), generate_client_guid());
    }
}
