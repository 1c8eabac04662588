//! Binary codec shared by the Java and PE sides of the bridge.

/// Java Edition protocol version accepted from clients (1.8.9).
pub const PROTOCOL_VERSION: i32 = 47;
pub const VERSION_NAME: &str = "1.8.9";

mod decoder;
mod encoder;
pub mod frame_codec;
pub mod packet;

pub use decoder::{Decode, DecodeError, Decoder};
pub use encoder::{var_int_size, Encode, EncodeError, Encoder};
pub use frame_codec::{FrameCodec, FrameError};

/// Limit to avoid out-of-memory DOS.
const BUFFER_LIMIT: usize = 2 * 1024 * 1024; // 2 MiB

const MAX_VAR_INT_SIZE: usize = 5;
const MAX_STRING_LENGTH: usize = i16::MAX as usize;
const PE_ADDRESS_VERSION_V4: u8 = 4;

/// State of the Java-side connection. Starts in `Handshaking`;
/// nothing leaves `Play`.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, strum::Display)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum ConnectionState {
    Handshaking,
    Status,
    Login,
    Play,
}

/// Fixed-width integers that RakNet writes in little-endian order.
/// Used by the `#[encoding(le)]` field attribute.
pub trait LittleEndian: Sized {
    fn write_le(self, encoder: &mut Encoder);
    fn read_le(decoder: &mut Decoder) -> Result<Self, DecodeError>;
}

macro_rules! impl_little_endian {
    ($($ty:ty => $write:ident, $read:ident;)*) => {
        $(
            impl LittleEndian for $ty {
                fn write_le(self, encoder: &mut Encoder) {
                    encoder.$write(self);
                }

                fn read_le(decoder: &mut Decoder) -> Result<Self, DecodeError> {
                    decoder.$read()
                }
            }
        )*
    };
}

impl_little_endian! {
    u16 => write_u16_le, read_u16_le;
    i16 => write_i16_le, read_i16_le;
    u32 => write_u32_le, read_u32_le;
    i32 => write_i32_le, read_i32_le;
    u64 => write_u64_le, read_u64_le;
    i64 => write_i64_le, read_i64_le;
}
