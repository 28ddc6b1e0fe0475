use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, ReadHalf};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use super::{RoutingEnvelope, RoutingTable};
use crate::error::{Error, SessionError};
use crate::frame::codec::FrameCodec;
use crate::frame::{write_frame, FrameReader};

struct Outgoing {
    payload: Bytes,
    written: Option<oneshot::Sender<Result<(), Error>>>,
}

/// Handle on a connection's outbound queue.
///
/// Every frame for a connection goes through its single writer task, so
/// frames from different producers never interleave on the wire.
#[derive(Clone)]
pub struct ConnectionSender {
    tx: mpsc::Sender<Outgoing>,
}

impl ConnectionSender {
    /// Queue a frame. Returns once queued, not once written.
    pub async fn send(&self, payload: Bytes) -> Result<(), Error> {
        self.tx
            .send(Outgoing {
                payload,
                written: None,
            })
            .await
            .map_err(|_| Error::Session(SessionError::Closed))
    }

    /// Queue a frame without waiting for room.
    ///
    /// Fails with [`SessionError::QueueFull`] when the peer is not reading fast
    /// enough, and [`SessionError::Closed`] when the writer is gone.
    pub fn try_send(&self, payload: Bytes) -> Result<(), Error> {
        self.tx
            .try_send(Outgoing {
                payload,
                written: None,
            })
            .map_err(|e| match e {
                mpsc::error::TrySendError::Full(_) => Error::Session(SessionError::QueueFull),
                mpsc::error::TrySendError::Closed(_) => Error::Session(SessionError::Closed),
            })
    }

    /// Queue a frame and wait until it has been written and flushed.
    pub async fn send_and_flush(&self, payload: Bytes) -> Result<(), Error> {
        let (written, done) = oneshot::channel();
        self.tx
            .send(Outgoing {
                payload,
                written: Some(written),
            })
            .await
            .map_err(|_| Error::Session(SessionError::Closed))?;
        done.await
            .map_err(|_| Error::Session(SessionError::Closed))?
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

impl std::fmt::Debug for ConnectionSender {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionSender")
            .field("closed", &self.tx.is_closed())
            .finish()
    }
}

/// One client transport as seen by the relay.
///
/// Registered in the routing table for as long as it is alive. Dropping it
/// unregisters the hint; frames already queued are still written before the
/// write half is shut down.
pub struct Connection<T> {
    routing_hint: String,
    reader: FrameReader<ReadHalf<T>>,
    sender: ConnectionSender,
    table: RoutingTable,
    writer: JoinHandle<()>,
}

impl<T> Connection<T>
where
    T: AsyncRead + AsyncWrite + Send + 'static,
{
    /// Take ownership of an accepted transport under a fresh routing hint.
    pub fn accept(
        transport: T,
        table: &RoutingTable,
        max_payload_size: u32,
        queue_depth: usize,
    ) -> Self {
        let routing_hint = uuid::Uuid::new_v4().to_string();
        let (read_half, write_half) = tokio::io::split(transport);
        let (tx, rx) = mpsc::channel(queue_depth.max(1));

        let writer = tokio::spawn(run_writer(
            write_half,
            rx,
            FrameCodec::with_max_payload_size(max_payload_size),
            routing_hint.clone(),
        ));

        let sender = ConnectionSender { tx };
        table.insert(routing_hint.clone(), sender.clone());
        tracing::debug!(%routing_hint, "connection registered");

        Self {
            routing_hint,
            reader: FrameReader::with_codec(
                read_half,
                FrameCodec::with_max_payload_size(max_payload_size),
            ),
            sender,
            table: table.clone(),
            writer,
        }
    }

    pub fn routing_hint(&self) -> &str {
        &self.routing_hint
    }

    pub fn sender(&self) -> ConnectionSender {
        self.sender.clone()
    }

    /// Write the node's attestation record. Must precede any mail.
    pub async fn send_attestation(&self, attestation: Bytes) -> Result<(), Error> {
        self.sender.send_and_flush(attestation).await
    }

    /// Read the next inbound frame, tagged with this connection's hint.
    pub async fn receive(&mut self) -> Result<RoutingEnvelope, Error> {
        let payload = self.reader.read_frame().await?;
        Ok(RoutingEnvelope {
            routing_hint: self.routing_hint.clone(),
            payload,
        })
    }

    pub fn is_writer_finished(&self) -> bool {
        self.writer.is_finished()
    }
}

impl<T> Drop for Connection<T> {
    fn drop(&mut self) {
        self.table.remove(&self.routing_hint);
        tracing::debug!(routing_hint = %self.routing_hint, "connection unregistered");
    }
}

async fn run_writer<W: AsyncWrite + Unpin>(
    mut writer: W,
    mut queue: mpsc::Receiver<Outgoing>,
    mut codec: FrameCodec,
    routing_hint: String,
) {
    while let Some(Outgoing { payload, written }) = queue.recv().await {
        let len = payload.len();
        let result = write_frame(&mut writer, &mut codec, payload).await;
        let failed = result.is_err();
        match (written, result) {
            (Some(written), result) => {
                let _ = written.send(result);
            }
            (None, Err(e)) => {
                tracing::warn!(%routing_hint, len, error = %e, "frame write failed");
            }
            (None, Ok(())) => {}
        }
        if failed {
            break;
        }
    }
    let _ = writer.shutdown().await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FrameError;
    use crate::frame::MAX_PAYLOAD_SIZE;

    #[tokio::test]
    async fn attestation_then_queued_frames_in_order() {
        let table = RoutingTable::new();
        let (client, server) = tokio::io::duplex(4096);
        let conn = Connection::accept(server, &table, MAX_PAYLOAD_SIZE, 4);

        conn.send_attestation(Bytes::from_static(b"record")).await.unwrap();
        let sender = conn.sender();
        for body in [&b"one"[..], b"two", b"three"] {
            sender.send(Bytes::copy_from_slice(body)).await.unwrap();
        }

        let mut reader = FrameReader::new(client);
        assert_eq!(&reader.read_frame().await.unwrap()[..], b"record");
        assert_eq!(&reader.read_frame().await.unwrap()[..], b"one");
        assert_eq!(&reader.read_frame().await.unwrap()[..], b"two");
        assert_eq!(&reader.read_frame().await.unwrap()[..], b"three");
    }

    #[tokio::test]
    async fn receive_tags_frames_with_hint() {
        let table = RoutingTable::new();
        let (mut client, server) = tokio::io::duplex(1024);
        let mut conn = Connection::accept(server, &table, MAX_PAYLOAD_SIZE, 4);

        let mut codec = FrameCodec::new();
        write_frame(&mut client, &mut codec, Bytes::from_static(b"mail"))
            .await
            .unwrap();

        let envelope = conn.receive().await.unwrap();
        assert_eq!(envelope.routing_hint, conn.routing_hint());
        assert_eq!(&envelope.payload[..], b"mail");
    }

    #[tokio::test]
    async fn clean_close_and_truncation_are_distinguished() {
        let table = RoutingTable::new();

        let (client, server) = tokio::io::duplex(64);
        let mut conn = Connection::accept(server, &table, MAX_PAYLOAD_SIZE, 4);
        drop(client);
        assert!(matches!(
            conn.receive().await,
            Err(Error::Session(SessionError::Closed))
        ));

        let (mut client, server) = tokio::io::duplex(64);
        let mut conn = Connection::accept(server, &table, MAX_PAYLOAD_SIZE, 4);
        client.write_all(&[0, 0, 0, 9, 1, 2]).await.unwrap();
        drop(client);
        assert!(matches!(
            conn.receive().await,
            Err(Error::Frame(FrameError::Truncated { .. }))
        ));
    }

    #[tokio::test]
    async fn oversized_attestation_reports_write_failure() {
        let table = RoutingTable::new();
        let (_client, server) = tokio::io::duplex(64);
        let conn = Connection::accept(server, &table, 8, 4);

        let err = conn
            .send_attestation(Bytes::from(vec![0u8; 9]))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Frame(FrameError::PayloadTooLarge { size: 9, max: 8 })
        ));
    }
}
