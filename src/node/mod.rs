//! Boundary to the isolated compute node.
//!
//! The node only ever sees opaque ciphertext in and opaque ciphertext out.
//! Replies are posted through an [`Outbox`], a bounded channel back to the
//! relay; the routing hint that says which connection a reply belongs to lives
//! inside the outbox and is never exposed to the node.

#[cfg(feature = "simulation")]
pub mod lottery;

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;

use crate::attestation::AttestationProvider;
use crate::error::NodeError;
use crate::mail::EncryptedMail;
use crate::relay::RoutingEnvelope;

/// Reply path from the node to one relay connection.
#[derive(Clone)]
pub struct Outbox {
    tx: mpsc::Sender<RoutingEnvelope>,
    routing_hint: Arc<str>,
}

impl Outbox {
    pub fn new(tx: mpsc::Sender<RoutingEnvelope>, routing_hint: impl Into<Arc<str>>) -> Self {
        Self {
            tx,
            routing_hint: routing_hint.into(),
        }
    }

    /// Queue an encrypted reply. Waits while the relay's reply queue is full.
    pub async fn post(&self, mail: EncryptedMail) -> Result<(), NodeError> {
        self.tx
            .send(RoutingEnvelope {
                routing_hint: self.routing_hint.to_string(),
                payload: mail.into_bytes(),
            })
            .await
            .map_err(|_| NodeError::OutboxClosed)
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

impl std::fmt::Debug for Outbox {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Outbox").finish_non_exhaustive()
    }
}

/// An isolated compute node as seen from the host.
#[async_trait]
pub trait IsolatedNode: AttestationProvider {
    /// Deliver one opaque mail ciphertext. Any replies are posted to `reply_to`,
    /// now or later.
    async fn deliver_mail(&self, mail: Bytes, reply_to: Outbox) -> Result<(), NodeError>;

    /// Direct, unauthenticated host call. The response travels in the clear.
    async fn invoke_command(&self, command: &[u8]) -> Result<Bytes, NodeError>;
}
