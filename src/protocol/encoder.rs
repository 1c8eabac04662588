use std::net::SocketAddr;

use super::{MAX_STRING_LENGTH, PE_ADDRESS_VERSION_V4};

/// An error while encoding packets.
#[derive(Debug, thiserror::Error)]
pub enum EncodeError {
    #[error("string of {0} bytes exceeds max allowed length")]
    StringTooLong(usize),
    #[error("PE string of {0} bytes does not fit a 16-bit length")]
    PeStringTooLong(usize),
    #[error("address {0} is not IPv4 - only IPv4 addresses can be encoded")]
    UnsupportedAddressFamily(SocketAddr),
}

/// A raw encoder for a protocol bitstream.
#[derive(Debug)]
pub struct Encoder<'a> {
    buffer: &'a mut Vec<u8>,
}

impl<'a> Encoder<'a> {
    /// Creates an encoder that will append to the provided
    /// byte buffer.
    ///
    /// Any existing contents of `buffer` are left untouched.
    pub fn new(buffer: &'a mut Vec<u8>) -> Self {
        Self { buffer }
    }

    /// Writes an unsigned byte to the stream.
    pub fn write_u8(&mut self, x: u8) {
        self.buffer.push(x);
    }

    /// Writes a big-endian unsigned short to the stream.
    pub fn write_u16(&mut self, x: u16) {
        self.buffer.extend(x.to_be_bytes());
    }

    /// Writes a big-endian signed short to the stream.
    pub fn write_i16(&mut self, x: i16) {
        self.buffer.extend(x.to_be_bytes());
    }

    /// Writes a big-endian unsigned int to the stream.
    pub fn write_u32(&mut self, x: u32) {
        self.buffer.extend(x.to_be_bytes());
    }

    /// Writes a big-endian signed int to the stream.
    pub fn write_i32(&mut self, x: i32) {
        self.buffer.extend(x.to_be_bytes());
    }

    /// Writes a big-endian unsigned long to the stream.
    pub fn write_u64(&mut self, x: u64) {
        self.buffer.extend(x.to_be_bytes());
    }

    /// Writes a big-endian signed long to the stream.
    pub fn write_i64(&mut self, x: i64) {
        self.buffer.extend(x.to_be_bytes());
    }

    pub fn write_u16_le(&mut self, x: u16) {
        self.buffer.extend(x.to_le_bytes());
    }

    pub fn write_i16_le(&mut self, x: i16) {
        self.buffer.extend(x.to_le_bytes());
    }

    pub fn write_u32_le(&mut self, x: u32) {
        self.buffer.extend(x.to_le_bytes());
    }

    pub fn write_i32_le(&mut self, x: i32) {
        self.buffer.extend(x.to_le_bytes());
    }

    pub fn write_u64_le(&mut self, x: u64) {
        self.buffer.extend(x.to_le_bytes());
    }

    pub fn write_i64_le(&mut self, x: i64) {
        self.buffer.extend(x.to_le_bytes());
    }

    /// Writes a series of bytes to the stream. Does not write
    /// any sort of length prefix.
    pub fn write_slice(&mut self, slice: &[u8]) {
        self.buffer.extend_from_slice(slice);
    }

    /// Writes a VarInt to the stream. Returns the number of bytes written.
    ///
    /// Negative values are written as their unsigned 32-bit
    /// interpretation and therefore always take 5 bytes.
    pub fn write_var_int(&mut self, x: i32) -> usize {
        let mut x: u32 = bytemuck::cast(x);
        let mut bytes_written = 0;
        loop {
            let mut temp = (x & 0b0111_1111) as u8;
            x >>= 7;
            if x != 0 {
                temp |= 0b1000_0000;
            }

            self.buffer.push(temp);
            bytes_written += 1;

            if x == 0 {
                break bytes_written;
            }
        }
    }

    /// Writes a varint-prefixed string to the stream.
    pub fn write_string(&mut self, x: &str) -> Result<(), EncodeError> {
        if x.len() > MAX_STRING_LENGTH {
            return Err(EncodeError::StringTooLong(x.len()));
        }
        // bounded by MAX_STRING_LENGTH above
        self.write_var_int(x.len() as i32);
        self.buffer.extend_from_slice(x.as_bytes());
        Ok(())
    }

    /// Writes a PE string: an unsigned 16-bit little-endian length
    /// followed by the UTF-8 bytes.
    pub fn write_pe_string(&mut self, x: &str) -> Result<(), EncodeError> {
        let length = u16::try_from(x.len()).map_err(|_| EncodeError::PeStringTooLong(x.len()))?;
        self.write_u16_le(length);
        self.buffer.extend_from_slice(x.as_bytes());
        Ok(())
    }

    /// Writes a RakNet network address. Only IPv4 is representable.
    pub fn write_pe_address(&mut self, address: SocketAddr) -> Result<(), EncodeError> {
        let SocketAddr::V4(v4) = address else {
            return Err(EncodeError::UnsupportedAddressFamily(address));
        };
        self.write_u8(PE_ADDRESS_VERSION_V4);
        self.write_slice(&v4.ip().octets());
        self.write_u16(v4.port());
        Ok(())
    }
}

/// Number of bytes [`Encoder::write_var_int`] emits for `x`.
pub fn var_int_size(x: i32) -> usize {
    let mut x: u32 = bytemuck::cast(x);
    let mut size = 1;
    while x >= 0x80 {
        x >>= 7;
        size += 1;
    }
    size
}

/// A type that can be written to an [`Encoder`].
pub trait Encode {
    fn encode(&self, encoder: &mut Encoder) -> Result<(), EncodeError>;

    /// Encodes `self` into a fresh buffer.
    fn to_bytes(&self) -> Result<Vec<u8>, EncodeError> {
        let mut buf = Vec::new();
        self.encode(&mut Encoder::new(&mut buf))?;
        Ok(buf)
    }
}

impl Encode for u8 {
    fn encode(&self, encoder: &mut Encoder) -> Result<(), EncodeError> {
        encoder.write_u8(*self);
        Ok(())
    }
}

impl Encode for u16 {
    fn encode(&self, encoder: &mut Encoder) -> Result<(), EncodeError> {
        encoder.write_u16(*self);
        Ok(())
    }
}

impl Encode for i16 {
    fn encode(&self, encoder: &mut Encoder) -> Result<(), EncodeError> {
        encoder.write_i16(*self);
        Ok(())
    }
}

impl Encode for u32 {
    fn encode(&self, encoder: &mut Encoder) -> Result<(), EncodeError> {
        encoder.write_u32(*self);
        Ok(())
    }
}

impl Encode for i32 {
    fn encode(&self, encoder: &mut Encoder) -> Result<(), EncodeError> {
        encoder.write_i32(*self);
        Ok(())
    }
}

impl Encode for u64 {
    fn encode(&self, encoder: &mut Encoder) -> Result<(), EncodeError> {
        encoder.write_u64(*self);
        Ok(())
    }
}

impl Encode for i64 {
    fn encode(&self, encoder: &mut Encoder) -> Result<(), EncodeError> {
        encoder.write_i64(*self);
        Ok(())
    }
}

impl Encode for String {
    fn encode(&self, encoder: &mut Encoder) -> Result<(), EncodeError> {
        encoder.write_string(self)
    }
}

impl Encode for () {
    fn encode(&self, _encoder: &mut Encoder) -> Result<(), EncodeError> {
        Ok(())
    }
}
