use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use super::LENGTH_PREFIX_SIZE;
use crate::error::FrameError;

/// Tokio codec for `[u32 BE length][payload]` frames.
#[derive(Debug)]
pub struct FrameCodec {
    /// Length from a prefix already consumed while waiting for the payload.
    current_len: Option<usize>,
    /// Configured maximum payload size (enforced on both encode and decode).
    max_payload_size: u32,
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameCodec {
    pub fn new() -> Self {
        Self::with_max_payload_size(super::MAX_PAYLOAD_SIZE)
    }

    /// Create a codec with a custom maximum payload size.
    pub fn with_max_payload_size(max_payload_size: u32) -> Self {
        Self {
            current_len: None,
            max_payload_size,
        }
    }

    /// True once a length prefix has been consumed but its payload has not.
    pub fn is_mid_frame(&self) -> bool {
        self.current_len.is_some()
    }

    /// Build the error for a stream that ended with `buffered` bytes pending.
    pub fn truncation(&self, buffered: usize) -> FrameError {
        FrameError::Truncated {
            expected: self.current_len.unwrap_or(LENGTH_PREFIX_SIZE),
            actual: buffered,
        }
    }

    fn check_len(&self, len: usize) -> Result<(), FrameError> {
        if len > self.max_payload_size as usize {
            return Err(FrameError::PayloadTooLarge {
                size: u32::try_from(len).unwrap_or(u32::MAX),
                max: self.max_payload_size,
            });
        }
        Ok(())
    }
}

impl Decoder for FrameCodec {
    type Item = Bytes;
    type Error = FrameError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        let len = match self.current_len.take() {
            Some(len) => len,
            None => {
                if src.len() < LENGTH_PREFIX_SIZE {
                    return Ok(None);
                }
                let len = src.get_u32() as usize;
                self.check_len(len)?;
                len
            }
        };

        if src.len() < len {
            src.reserve(len - src.len());
            self.current_len = Some(len);
            return Ok(None);
        }

        Ok(Some(src.split_to(len).freeze()))
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        match self.decode(src)? {
            Some(frame) => Ok(Some(frame)),
            None if src.is_empty() && !self.is_mid_frame() => Ok(None),
            None => Err(self.truncation(src.len())),
        }
    }
}

impl Encoder<Bytes> for FrameCodec {
    type Error = FrameError;

    fn encode(&mut self, payload: Bytes, dst: &mut BytesMut) -> Result<(), Self::Error> {
        self.check_len(payload.len())?;
        dst.reserve(LENGTH_PREFIX_SIZE + payload.len());
        dst.put_u32(payload.len() as u32);
        dst.extend_from_slice(&payload);
        Ok(())
    }
}
