//! Framing for the Java TCP stream.
//!
//! Each frame is a VarInt length followed by that many bytes of payload.
//! The payload starts with the VarInt packet id. Compression and encryption
//! are never enabled by this gateway, so the payload is plain.

use super::{DecodeError, Decoder, Encoder, BUFFER_LIMIT};
use bytes::{Bytes, BytesMut};
use tokio_util::codec;

/// An error while splitting the stream into frames.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("corrupted frame: {0}")]
    CorruptedFrame(&'static str),
    /// An outgoing payload does not fit in one frame.
    #[error("frame length of {0} exceeds maximum allowed")]
    TooLarge(usize),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Codec state.
///
/// Decoding never consumes bytes from the read buffer until a whole
/// frame is available, so it can be retried after every read.
#[derive(Debug, Default)]
pub struct FrameCodec {
    _private: (),
}

impl FrameCodec {
    pub fn new() -> Self {
        Self::default()
    }
}

impl codec::Decoder for FrameCodec {
    type Item = BytesMut;
    type Error = FrameError;

    /// * If not enough data is available, returns `Ok(None)`.
    /// * If a frame was read, returns `Ok(Some(frame))`. More frames may be available.
    /// * If an error occurs, returns `Err(e)`, invalidating the stream.
    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<BytesMut>, FrameError> {
        let mut decoder = Decoder::new(&src[..]);
        let (length, header_size) = match decoder.read_var_int_with_size() {
            Ok(x) => x,
            Err(DecodeError::BufferUnderrun { .. }) => return Ok(None),
            Err(DecodeError::MalformedVarInt) => {
                return Err(FrameError::CorruptedFrame("length varint too long"))
            }
            Err(_) => return Err(FrameError::CorruptedFrame("invalid length")),
        };

        let length = usize::try_from(length)
            .map_err(|_| FrameError::CorruptedFrame("negative length"))?;
        if length == 0 {
            return Err(FrameError::CorruptedFrame("empty frame"));
        }
        if length > BUFFER_LIMIT {
            return Err(FrameError::CorruptedFrame("frame too large"));
        }

        let total_bytes = header_size + length;
        if src.len() < total_bytes {
            src.reserve(total_bytes - src.len());
            return Ok(None);
        }

        let mut frame = src.split_to(total_bytes);
        let payload = frame.split_off(header_size);
        Ok(Some(payload))
    }
}

impl codec::Encoder<Bytes> for FrameCodec {
    type Error = FrameError;

    fn encode(&mut self, payload: Bytes, dst: &mut BytesMut) -> Result<(), FrameError> {
        if payload.len() > BUFFER_LIMIT {
            return Err(FrameError::TooLarge(payload.len()));
        }
        let mut header = Vec::with_capacity(5);
        // bounded by BUFFER_LIMIT above
        Encoder::new(&mut header).write_var_int(payload.len() as i32);

        dst.reserve(header.len() + payload.len());
        dst.extend_from_slice(&header);
        dst.extend_from_slice(&payload);
        Ok(())
    }
}
