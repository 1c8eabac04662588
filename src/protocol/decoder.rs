use std::{
    convert::Infallible,
    net::{Ipv4Addr, SocketAddrV4},
    num::TryFromIntError,
    str::Utf8Error,
};

use super::{MAX_STRING_LENGTH, MAX_VAR_INT_SIZE, PE_ADDRESS_VERSION_V4};

/// An error while decoding packets.
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("need {needed} bytes but only {remaining} remain")]
    BufferUnderrun { needed: usize, remaining: usize },
    #[error("varint is longer than 5 bytes")]
    MalformedVarInt,
    #[error("string of length {0} exceeds max allowed length or available data")]
    StringTooLong(i64),
    #[error("unsupported address version {0} - only IPv4 (4) is supported")]
    UnsupportedAddressVersion(u8),
    #[error("offline message magic does not match")]
    InvalidMagic,
    #[error("invalid discriminant '{0}'")]
    UnknownDiscriminant(i64),
    #[error("{0} unread bytes left after packet")]
    TrailingBytes(usize),
    #[error(transparent)]
    Utf8(#[from] Utf8Error),
    #[error(transparent)]
    IntConversion(#[from] TryFromIntError),
    /// Special variant for derive macro integer conversions to work.
    /// Cannot occur.
    #[error(transparent)]
    Infallible(#[from] Infallible),
}

pub type Result<T, E = DecodeError> = std::result::Result<T, E>;

/// A raw decoder over a byte slice. Reads advance the cursor;
/// a failed read leaves the decoder at an unspecified position.
#[derive(Debug)]
pub struct Decoder<'a> {
    buffer: &'a [u8],
}

impl<'a> Decoder<'a> {
    /// Creates a decoder from the buffer it will read from.
    pub fn new(buffer: &'a [u8]) -> Self {
        Self { buffer }
    }

    /// Number of unread bytes.
    pub fn remaining(&self) -> usize {
        self.buffer.len()
    }

    /// Returns if there is no data left in the buffer.
    pub fn is_finished(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Fails with [`DecodeError::TrailingBytes`] if anything is left unread.
    pub fn finish(&self) -> Result<()> {
        if self.is_finished() {
            Ok(())
        } else {
            Err(DecodeError::TrailingBytes(self.remaining()))
        }
    }

    /// Consumes `n` bytes from the buffer, returning them as a slice.
    pub fn consume_slice(&mut self, n: usize) -> Result<&'a [u8]> {
        if n <= self.buffer.len() {
            let (data, buffer) = self.buffer.split_at(n);
            self.buffer = buffer;
            Ok(data)
        } else {
            Err(DecodeError::BufferUnderrun {
                needed: n,
                remaining: self.buffer.len(),
            })
        }
    }

    /// Consumes `N` bytes into an array.
    pub fn consume<const N: usize>(&mut self) -> Result<[u8; N]> {
        let mut array = [0u8; N];
        array.copy_from_slice(self.consume_slice(N)?);
        Ok(array)
    }

    /// Reads an unsigned byte from the stream.
    pub fn read_u8(&mut self) -> Result<u8> {
        self.consume::<1>().map(|[x]| x)
    }

    /// Reads a big-endian unsigned short from the stream.
    pub fn read_u16(&mut self) -> Result<u16> {
        self.consume().map(u16::from_be_bytes)
    }

    /// Reads a big-endian signed short from the stream.
    pub fn read_i16(&mut self) -> Result<i16> {
        self.consume().map(i16::from_be_bytes)
    }

    /// Reads a big-endian unsigned int from the stream.
    pub fn read_u32(&mut self) -> Result<u32> {
        self.consume().map(u32::from_be_bytes)
    }

    /// Reads a big-endian signed int from the stream.
    pub fn read_i32(&mut self) -> Result<i32> {
        self.consume().map(i32::from_be_bytes)
    }

    /// Reads a big-endian unsigned long from the stream.
    pub fn read_u64(&mut self) -> Result<u64> {
        self.consume().map(u64::from_be_bytes)
    }

    /// Reads a big-endian signed long from the stream.
    pub fn read_i64(&mut self) -> Result<i64> {
        self.consume().map(i64::from_be_bytes)
    }

    pub fn read_u16_le(&mut self) -> Result<u16> {
        self.consume().map(u16::from_le_bytes)
    }

    pub fn read_i16_le(&mut self) -> Result<i16> {
        self.consume().map(i16::from_le_bytes)
    }

    pub fn read_u32_le(&mut self) -> Result<u32> {
        self.consume().map(u32::from_le_bytes)
    }

    pub fn read_i32_le(&mut self) -> Result<i32> {
        self.consume().map(i32::from_le_bytes)
    }

    pub fn read_u64_le(&mut self) -> Result<u64> {
        self.consume().map(u64::from_le_bytes)
    }

    pub fn read_i64_le(&mut self) -> Result<i64> {
        self.consume().map(i64::from_le_bytes)
    }

    /// Reads a VarInt from the stream.
    pub fn read_var_int(&mut self) -> Result<i32> {
        self.read_var_int_with_size().map(|(x, _)| x)
    }

    /// Reads a VarInt from the stream, additionally
    /// returning the number of bytes read.
    ///
    /// A fifth byte that still carries the continuation bit is
    /// rejected without waiting for the sixth.
    pub fn read_var_int_with_size(&mut self) -> Result<(i32, usize)> {
        let mut num_read = 0;
        let mut result = 0;

        loop {
            let read = self.read_u8()?;
            let value = i32::from(read & 0b0111_1111);
            result |= value.overflowing_shl(7 * num_read).0;

            num_read += 1;

            if read & 0b1000_0000 == 0 {
                break;
            }
            if num_read as usize >= MAX_VAR_INT_SIZE {
                return Err(DecodeError::MalformedVarInt);
            }
        }
        Ok((result, num_read as usize))
    }

    /// Reads a VarInt-prefixed UTF-8 string from the stream.
    pub fn read_string(&mut self) -> Result<&'a str> {
        let length = self.read_var_int()?;
        let too_long = || DecodeError::StringTooLong(i64::from(length));

        let length = usize::try_from(length).map_err(|_| too_long())?;
        if length > MAX_STRING_LENGTH || length > self.remaining() {
            return Err(too_long());
        }

        let bytes = std::str::from_utf8(self.consume_slice(length)?)?;
        Ok(bytes)
    }

    /// Reads a PE string: UTF-8 prefixed by an unsigned 16-bit
    /// little-endian length.
    pub fn read_pe_string(&mut self) -> Result<&'a str> {
        let length = usize::from(self.read_u16_le()?);
        let bytes = std::str::from_utf8(self.consume_slice(length)?)?;
        Ok(bytes)
    }

    /// Reads a RakNet network address: version byte, four raw IPv4
    /// bytes and a big-endian port.
    pub fn read_pe_address(&mut self) -> Result<SocketAddrV4> {
        let version = self.read_u8()?;
        if version != PE_ADDRESS_VERSION_V4 {
            return Err(DecodeError::UnsupportedAddressVersion(version));
        }
        let ip = Ipv4Addr::from(self.consume::<4>()?);
        let port = self.read_u16()?;
        Ok(SocketAddrV4::new(ip, port))
    }
}

/// A type that can be read from a [`Decoder`].
pub trait Decode: Sized {
    fn decode(decoder: &mut Decoder) -> Result<Self>;

    /// Decodes `Self` from a complete buffer, rejecting trailing bytes.
    fn decode_exact(buffer: &[u8]) -> Result<Self> {
        let mut decoder = Decoder::new(buffer);
        let value = Self::decode(&mut decoder)?;
        decoder.finish()?;
        Ok(value)
    }
}

impl Decode for u8 {
    fn decode(decoder: &mut Decoder) -> Result<Self> {
        decoder.read_u8()
    }
}

impl Decode for u16 {
    fn decode(decoder: &mut Decoder) -> Result<Self> {
        decoder.read_u16()
    }
}

impl Decode for i16 {
    fn decode(decoder: &mut Decoder) -> Result<Self> {
        decoder.read_i16()
    }
}

impl Decode for u32 {
    fn decode(decoder: &mut Decoder) -> Result<Self> {
        decoder.read_u32()
    }
}

impl Decode for i32 {
    fn decode(decoder: &mut Decoder) -> Result<Self> {
        decoder.read_i32()
    }
}

impl Decode for u64 {
    fn decode(decoder: &mut Decoder) -> Result<Self> {
        decoder.read_u64()
    }
}

impl Decode for i64 {
    fn decode(decoder: &mut Decoder) -> Result<Self> {
        decoder.read_i64()
    }
}

impl Decode for String {
    fn decode(decoder: &mut Decoder) -> Result<Self> {
        decoder.read_string().map(str::to_owned)
    }
}

impl Decode for () {
    fn decode(_decoder: &mut Decoder) -> Result<Self> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn var_int_rejects_fifth_continuation_byte() {
        let bytes = [0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0x01];
        assert!(matches!(
            Decoder::new(&bytes).read_var_int(),
            Err(DecodeError::MalformedVarInt)
        ));
    }

    #[test]
    fn var_int_incomplete_is_underrun() {
        let bytes = [0x80, 0x80];
        assert!(matches!(
            Decoder::new(&bytes).read_var_int(),
            Err(DecodeError::BufferUnderrun { .. })
        ));
    }

    #[test]
    fn string_longer_than_buffer_is_rejected() {
        // declares 10 bytes, provides 3
        let bytes = [10, b'a', b'b', b'c'];
        assert!(matches!(
            Decoder::new(&bytes).read_string(),
            Err(DecodeError::StringTooLong(10))
        ));
    }

    #[test]
    fn string_length_above_limit_is_rejected() {
        let mut bytes = vec![0x80, 0x80, 0x02]; // 32768
        bytes.extend(std::iter::repeat(b'a').take(32768));
        assert!(matches!(
            Decoder::new(&bytes).read_string(),
            Err(DecodeError::StringTooLong(32768))
        ));
    }

    #[test]
    fn fixed_width_reads_fail_on_short_buffer() {
        let bytes = [0x01, 0x02, 0x03];
        let mut decoder = Decoder::new(&bytes);
        assert!(matches!(
            decoder.read_u32_le(),
            Err(DecodeError::BufferUnderrun {
                needed: 4,
                remaining: 3
            })
        ));
        assert!(matches!(
            Decoder::new(&bytes).read_i64(),
            Err(DecodeError::BufferUnderrun { .. })
        ));
    }

    #[test]
    fn endianness_is_respected() {
        let bytes = [0x01, 0x02];
        assert_eq!(Decoder::new(&bytes).read_u16().unwrap(), 0x0102);
        assert_eq!(Decoder::new(&bytes).read_u16_le().unwrap(), 0x0201);
    }

    #[test]
    fn pe_string_uses_little_endian_length() {
        let bytes = [0x02, 0x00, b'h', b'i'];
        let mut decoder = Decoder::new(&bytes);
        assert_eq!(decoder.read_pe_string().unwrap(), "hi");
        assert!(decoder.is_finished());
    }

    #[test]
    fn pe_address_rejects_ipv6_version() {
        let bytes = [6, 0, 0, 0, 0, 0, 0];
        assert!(matches!(
            Decoder::new(&bytes).read_pe_address(),
            Err(DecodeError::UnsupportedAddressVersion(6))
        ));
    }

    #[test]
    fn decode_exact_rejects_trailing_bytes() {
        let bytes = [0x00, 0x01, 0xFF];
        assert!(matches!(
            u16::decode_exact(&bytes),
            Err(DecodeError::TrailingBytes(1))
        ));
    }
}
