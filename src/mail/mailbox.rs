use std::collections::HashMap;

use crate::crypto::hpke::KeyPair;
use crate::crypto::PublicKey;
use crate::error::CryptoError;

use super::{open_envelope, PlaintextEnvelope};

/// Recipient-side mail state: the private key plus replay windows keyed by
/// sender key and topic.
///
/// Topics are chosen by senders, so two senders on the same topic never share
/// a window.
///
/// A rejected envelope never advances any state, so a tampered or replayed
/// message is discarded without affecting the messages that follow it.
#[derive(Debug)]
pub struct Mailbox {
    keypair: KeyPair,
    peer_public_key: Option<PublicKey>,
    expected_topic: Option<String>,
    /// Last accepted sequence per (sender, topic). Next accepted must be > this.
    last_accepted: HashMap<(PublicKey, String), u64>,
}

impl Mailbox {
    pub fn new(keypair: KeyPair) -> Self {
        Self {
            keypair,
            peer_public_key: None,
            expected_topic: None,
            last_accepted: HashMap::new(),
        }
    }

    /// Pin the peer's key: replies without a sender key are opened against it
    /// and mail embedding a different key is rejected.
    pub fn with_peer(mut self, peer_public_key: PublicKey) -> Self {
        self.pin_peer(peer_public_key);
        self
    }

    pub fn pin_peer(&mut self, peer_public_key: PublicKey) {
        self.peer_public_key = Some(peer_public_key);
    }

    /// Reject mail on any topic other than `topic`.
    pub fn expect_topic(mut self, topic: impl Into<String>) -> Self {
        self.expected_topic = Some(topic.into());
        self
    }

    pub fn keypair(&self) -> &KeyPair {
        &self.keypair
    }

    pub fn public_key(&self) -> PublicKey {
        self.keypair.public_bytes()
    }

    pub fn last_accepted(&self, sender: &PublicKey, topic: &str) -> Option<u64> {
        self.last_accepted.get(&(*sender, topic.to_owned())).copied()
    }

    /// Authenticate, decrypt, and replay-check one envelope.
    pub fn decrypt(&mut self, ciphertext: &[u8]) -> Result<PlaintextEnvelope, CryptoError> {
        let envelope = open_envelope(ciphertext, &self.keypair, self.peer_public_key.as_ref())
            .map_err(|e| {
                tracing::warn!(len = ciphertext.len(), error = %e, "rejected mail envelope");
                e
            })?;

        if let Some(expected) = &self.expected_topic {
            if &envelope.topic != expected {
                return Err(CryptoError::TopicMismatch {
                    expected: expected.clone(),
                    actual: envelope.topic,
                });
            }
        }

        // open_envelope only succeeds with an embedded or pinned sender key.
        let Some(sender) = envelope.sender_public_key.or(self.peer_public_key) else {
            return Err(CryptoError::AuthenticationFailure);
        };
        let window = (sender, envelope.topic.clone());

        if let Some(&last) = self.last_accepted.get(&window) {
            if envelope.sequence <= last {
                tracing::warn!(
                    topic = %envelope.topic,
                    sequence = envelope.sequence,
                    last_accepted = last,
                    "mail replay detected"
                );
                return Err(CryptoError::ReplayDetected {
                    topic: envelope.topic,
                    received: envelope.sequence,
                    last,
                });
            }
        }

        self.last_accepted.insert(window, envelope.sequence);
        Ok(envelope)
    }
}
