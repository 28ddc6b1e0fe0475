use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{mpsc, watch};

use super::connection::Connection;
use super::{forward, RoutingEnvelope, RoutingTable};
use crate::error::{Error, SessionError};
use crate::frame::MAX_PAYLOAD_SIZE;
use crate::node::{IsolatedNode, Outbox};

/// Configuration for the host relay.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Address to listen on for client connections.
    pub listen_addr: SocketAddr,
    /// Largest frame accepted from or written to a client.
    pub max_payload_size: u32,
    /// Capacity of the node's reply queue and of each connection's write queue.
    pub reply_queue_depth: usize,
    /// Maximum concurrent client connections (0 = unlimited).
    pub max_connections: usize,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from(([127, 0, 0, 1], 9999)),
            max_payload_size: MAX_PAYLOAD_SIZE,
            reply_queue_depth: 64,
            max_connections: 0,
        }
    }
}

struct RelayCore {
    config: RelayConfig,
    node: Arc<dyn IsolatedNode>,
    table: RoutingTable,
    outbox_tx: mpsc::Sender<RoutingEnvelope>,
    delivered: watch::Sender<u64>,
}

/// The host side of the mail protocol.
///
/// Cheap to clone; clones share the node, the routing table and the reply
/// dispatcher.
#[derive(Clone)]
pub struct Relay {
    core: Arc<RelayCore>,
}

impl Relay {
    /// Create the relay and spawn its reply dispatcher.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn new(config: RelayConfig, node: Arc<dyn IsolatedNode>) -> Self {
        let (outbox_tx, outbox_rx) = mpsc::channel(config.reply_queue_depth.max(1));
        let table = RoutingTable::new();
        tokio::spawn(dispatch_replies(outbox_rx, table.clone()));

        Self {
            core: Arc::new(RelayCore {
                config,
                node,
                table,
                outbox_tx,
                delivered: watch::channel(0).0,
            }),
        }
    }

    pub fn handle(&self) -> RelayHandle {
        RelayHandle {
            core: Arc::clone(&self.core),
        }
    }

    /// Serve one client transport until it closes.
    ///
    /// Sends the attestation record first, then hands each inbound frame to
    /// the node in the order it was read. A client closing on a frame
    /// boundary is a normal end; anything else is returned as an error.
    pub async fn serve<T>(&self, transport: T) -> Result<(), Error>
    where
        T: AsyncRead + AsyncWrite + Send + 'static,
    {
        let core = &self.core;
        let mut conn = Connection::accept(
            transport,
            &core.table,
            core.config.max_payload_size,
            core.config.reply_queue_depth,
        );
        let routing_hint = conn.routing_hint().to_owned();

        let attestation = core.node.produce_attestation().await?;
        conn.send_attestation(attestation).await?;
        tracing::debug!(%routing_hint, "attestation sent");

        let outbox = Outbox::new(core.outbox_tx.clone(), routing_hint.as_str());
        loop {
            let envelope = match conn.receive().await {
                Ok(envelope) => envelope,
                Err(Error::Session(SessionError::Closed)) => {
                    tracing::debug!(%routing_hint, "client closed connection");
                    return Ok(());
                }
                Err(e) => return Err(e),
            };

            let len = envelope.payload.len();
            tracing::debug!(%routing_hint, len, "delivering mail to node");
            if let Err(e) = core.node.deliver_mail(envelope.payload, outbox.clone()).await {
                tracing::warn!(%routing_hint, len, error = %e, "node rejected mail");
            }
            core.delivered.send_modify(|n| *n += 1);
        }
    }

    /// Accept clients from `listener` forever, one task per connection.
    #[cfg(feature = "tcp")]
    pub async fn run(self, listener: tokio::net::TcpListener) -> Result<(), Error> {
        let addr = listener.local_addr()?;
        tracing::info!(%addr, "relay listening");

        let limit = (self.core.config.max_connections > 0)
            .then(|| Arc::new(tokio::sync::Semaphore::new(self.core.config.max_connections)));

        loop {
            let permit = match &limit {
                Some(semaphore) => Some(
                    Arc::clone(semaphore)
                        .acquire_owned()
                        .await
                        .map_err(|_| SessionError::Closed)?,
                ),
                None => None,
            };
            let (stream, peer_addr) = crate::transport::tcp::accept(&listener).await?;

            let relay = self.clone();
            tokio::spawn(async move {
                let _permit = permit;
                tracing::debug!(%peer_addr, "accepted connection");
                if let Err(e) = relay.serve(stream).await {
                    tracing::warn!(%peer_addr, error = %e, "connection handler error");
                }
            });
        }
    }
}

/// Bind `config.listen_addr` and run a relay in front of `node`.
#[cfg(feature = "tcp")]
pub async fn run_relay(config: RelayConfig, node: Arc<dyn IsolatedNode>) -> Result<(), Error> {
    let listener = crate::transport::tcp::listen(config.listen_addr).await?;
    Relay::new(config, node).run(listener).await
}

/// Host-side controls for a running relay.
#[derive(Clone)]
pub struct RelayHandle {
    core: Arc<RelayCore>,
}

impl RelayHandle {
    /// Call the node directly, bypassing mail.
    ///
    /// Neither the command nor the response is authenticated or encrypted;
    /// the host sees and can forge both. Only suitable for demo control
    /// messages such as `DECLARE`.
    pub async fn invoke_command(&self, command: &[u8]) -> Result<Bytes, Error> {
        tracing::info!(
            command = %String::from_utf8_lossy(command),
            "invoking unauthenticated node command"
        );
        Ok(self.core.node.invoke_command(command).await?)
    }

    pub fn connection_count(&self) -> usize {
        self.core.table.len()
    }

    /// Inbound mails handed to the node so far, across all connections.
    pub fn mails_delivered(&self) -> u64 {
        *self.core.delivered.borrow()
    }

    /// Wait until at least `count` mails have been handed to the node.
    pub async fn wait_for_deliveries(&self, count: u64) -> Result<(), Error> {
        let mut delivered = self.core.delivered.subscribe();
        delivered
            .wait_for(|n| *n >= count)
            .await
            .map_err(|_| SessionError::Closed)?;
        Ok(())
    }
}

/// Route node replies to their connections.
///
/// A reply for a connection whose write queue is full is dropped rather than
/// waited on, so a client that stops reading only loses its own replies.
async fn dispatch_replies(mut outbox: mpsc::Receiver<RoutingEnvelope>, table: RoutingTable) {
    while let Some(envelope) = outbox.recv().await {
        let routing_hint = envelope.routing_hint.clone();
        let len = envelope.payload.len();
        match forward(&table, envelope) {
            Ok(()) => {}
            Err(Error::Session(SessionError::QueueFull)) => {
                tracing::warn!(%routing_hint, len, "client not reading; dropping reply");
            }
            Err(e) => {
                tracing::debug!(
                    %routing_hint,
                    len,
                    error = %e,
                    "dropping reply for closed connection"
                );
            }
        }
    }
}
