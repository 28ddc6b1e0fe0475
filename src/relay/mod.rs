//! Untrusted host relay: moves opaque frames between clients and the node.
//!
//! Nothing in this module can decrypt mail. The relay's only job is to get
//! the attestation record to each client first, hand inbound frames to the
//! node in order, and route the node's replies back to the connection they
//! belong to.

/// One accepted client transport.
pub mod connection;
/// Listener, reply dispatcher, and host command handle.
pub mod server;

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use bytes::Bytes;

use crate::error::{Error, SessionError};
use connection::ConnectionSender;

/// An opaque payload plus the relay-local token naming its connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoutingEnvelope {
    pub routing_hint: String,
    pub payload: Bytes,
}

/// Live connections by routing hint.
///
/// Lock sections are short map operations and never span an await.
#[derive(Debug, Clone, Default)]
pub struct RoutingTable {
    inner: Arc<RwLock<HashMap<String, ConnectionSender>>>,
}

impl RoutingTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, routing_hint: String, sender: ConnectionSender) {
        self.inner
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(routing_hint, sender);
    }

    pub fn lookup(&self, routing_hint: &str) -> Option<ConnectionSender> {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(routing_hint)
            .cloned()
    }

    pub fn remove(&self, routing_hint: &str) -> Option<ConnectionSender> {
        self.inner
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(routing_hint)
    }

    pub fn len(&self) -> usize {
        self.inner.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Queue `envelope.payload` on the connection named by its routing hint.
///
/// Never waits: one connection with a full write queue must not hold up
/// replies for the others. The hint never reaches the wire. Fails with
/// [`SessionError::Closed`] when that connection is gone and
/// [`SessionError::QueueFull`] when its queue has no room.
pub fn forward(table: &RoutingTable, envelope: RoutingEnvelope) -> Result<(), Error> {
    let RoutingEnvelope {
        routing_hint,
        payload,
    } = envelope;
    let sender = table
        .lookup(&routing_hint)
        .ok_or(Error::Session(SessionError::Closed))?;
    sender.try_send(payload)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::FrameReader;
    use crate::relay::connection::Connection;

    #[tokio::test]
    async fn forward_writes_only_the_payload() {
        let table = RoutingTable::new();
        let (client, server) = tokio::io::duplex(1024);
        let conn = Connection::accept(server, &table, crate::frame::MAX_PAYLOAD_SIZE, 8);

        forward(
            &table,
            RoutingEnvelope {
                routing_hint: conn.routing_hint().to_owned(),
                payload: Bytes::from_static(b"sealed"),
            },
        )
        .unwrap();

        let mut reader = FrameReader::new(client);
        assert_eq!(&reader.read_frame().await.unwrap()[..], b"sealed");
    }

    #[tokio::test]
    async fn forward_to_unknown_hint_fails_closed() {
        let table = RoutingTable::new();
        let err = forward(
            &table,
            RoutingEnvelope {
                routing_hint: "nobody".into(),
                payload: Bytes::from_static(b"x"),
            },
        )
        .unwrap_err();
        assert!(matches!(err, Error::Session(SessionError::Closed)));
    }

    #[tokio::test]
    async fn forward_to_full_queue_fails_without_waiting() {
        let table = RoutingTable::new();
        // Nobody reads the client end and the pipe holds a single byte, so the
        // writer task stalls on its first frame and the queue fills behind it.
        let (_client, server) = tokio::io::duplex(1);
        let conn = Connection::accept(server, &table, crate::frame::MAX_PAYLOAD_SIZE, 1);
        let hint = conn.routing_hint().to_owned();
        let envelope = |payload: &'static [u8]| RoutingEnvelope {
            routing_hint: hint.clone(),
            payload: Bytes::from_static(payload),
        };

        let mut full = None;
        for _ in 0..8 {
            if let Err(e) = forward(&table, envelope(b"reply")) {
                full = Some(e);
                break;
            }
            tokio::task::yield_now().await;
        }
        assert!(matches!(full, Some(Error::Session(SessionError::QueueFull))));
    }

    #[tokio::test]
    async fn dropped_connection_leaves_table() {
        let table = RoutingTable::new();
        let (_client, server) = tokio::io::duplex(64);
        let conn = Connection::accept(server, &table, crate::frame::MAX_PAYLOAD_SIZE, 8);
        let hint = conn.routing_hint().to_owned();
        assert!(table.lookup(&hint).is_some());

        drop(conn);
        assert!(table.lookup(&hint).is_none());
        assert!(table.is_empty());
    }
}
