//! Length-prefixed framing shared by the relay and the client.
//!
//! Every message in either direction is `[u32 big-endian length][payload]`.
//! There is no tag byte: the first frame from the host is the attestation
//! record, every later frame is an opaque mail ciphertext.

pub mod codec;

use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio_util::codec::{Decoder, Encoder};

use crate::error::{Error, SessionError};
use codec::FrameCodec;

/// Size of the length prefix in bytes.
pub const LENGTH_PREFIX_SIZE: usize = 4;

/// Maximum payload size: 32 MiB.
pub const MAX_PAYLOAD_SIZE: u32 = 32 * 1024 * 1024;

/// Reads complete frames off a byte stream.
///
/// A close exactly on a frame boundary is reported as [`SessionError::Closed`];
/// a close inside the length prefix or payload is a framing error.
#[derive(Debug)]
pub struct FrameReader<R> {
    inner: R,
    buf: BytesMut,
    codec: FrameCodec,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    pub fn new(inner: R) -> Self {
        Self::with_codec(inner, FrameCodec::new())
    }

    pub fn with_codec(inner: R, codec: FrameCodec) -> Self {
        Self {
            inner,
            buf: BytesMut::with_capacity(4096),
            codec,
        }
    }

    /// Block until one complete frame is available and return its payload.
    pub async fn read_frame(&mut self) -> Result<Bytes, Error> {
        loop {
            if let Some(payload) = self.codec.decode(&mut self.buf)? {
                return Ok(payload);
            }
            let n = self.inner.read_buf(&mut self.buf).await?;
            if n == 0 {
                if self.buf.is_empty() && !self.codec.is_mid_frame() {
                    return Err(SessionError::Closed.into());
                }
                return Err(self.codec.truncation(self.buf.len()).into());
            }
        }
    }

    /// The underlying stream, for writing on a full-duplex transport.
    pub fn get_mut(&mut self) -> &mut R {
        &mut self.inner
    }

    pub fn into_inner(self) -> R {
        self.inner
    }
}

/// Write one length-prefixed frame and flush.
///
/// Callers sharing a transport must serialize calls; an interleaved partial
/// write corrupts every following frame.
pub async fn write_frame<W: AsyncWrite + Unpin>(
    writer: &mut W,
    codec: &mut FrameCodec,
    payload: Bytes,
) -> Result<(), Error> {
    let mut buf = BytesMut::with_capacity(LENGTH_PREFIX_SIZE + payload.len());
    codec.encode(payload, &mut buf)?;
    writer.write_all(&buf).await?;
    writer.flush().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FrameError;

    #[tokio::test]
    async fn reads_frames_in_order() {
        let (mut client, server) = tokio::io::duplex(1024);
        let mut codec = FrameCodec::new();
        write_frame(&mut client, &mut codec, Bytes::from_static(b"first"))
            .await
            .unwrap();
        write_frame(&mut client, &mut codec, Bytes::from_static(b"second"))
            .await
            .unwrap();
        drop(client);

        let mut reader = FrameReader::new(server);
        assert_eq!(&reader.read_frame().await.unwrap()[..], b"first");
        assert_eq!(&reader.read_frame().await.unwrap()[..], b"second");
        assert!(matches!(
            reader.read_frame().await,
            Err(Error::Session(SessionError::Closed))
        ));
    }

    #[tokio::test]
    async fn truncated_length_prefix() {
        let (mut client, server) = tokio::io::duplex(1024);
        client.write_all(&[0, 0]).await.unwrap();
        drop(client);

        let mut reader = FrameReader::new(server);
        let err = reader.read_frame().await.unwrap_err();
        assert!(matches!(
            err,
            Error::Frame(FrameError::Truncated {
                expected: 4,
                actual: 2
            })
        ));
    }

    #[tokio::test]
    async fn premature_close_mid_payload() {
        let (mut client, server) = tokio::io::duplex(1024);
        client.write_all(&[0, 0, 0, 10]).await.unwrap();
        client.write_all(b"abc").await.unwrap();
        drop(client);

        let mut reader = FrameReader::new(server);
        let err = reader.read_frame().await.unwrap_err();
        assert!(matches!(
            err,
            Error::Frame(FrameError::Truncated {
                expected: 10,
                actual: 3
            })
        ));
    }
}
