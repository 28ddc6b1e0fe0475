//! End-to-end encrypted mail envelopes.
//!
//! Wire layout (big-endian):
//!
//! ```text
//! version u8 | flags u8 | topic_len u16 | topic | sequence u64
//!   | [sender_pk 32, if FLAG_SENDER_KEY] | nonce 12 | ciphertext || tag 16
//! ```
//!
//! Everything before the ciphertext is the AEAD associated data, so topic,
//! sequence and sender key cannot be altered or spliced into another session
//! without the tag failing.

pub mod mailbox;

use std::collections::HashMap;

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::crypto::hpke::{derive_message_key, KeyPair};
use crate::crypto::transcript::compute_mail_context;
use crate::crypto::{seal, Nonce, PublicKey, MAIL_SUITE};
use crate::error::CryptoError;

pub use mailbox::Mailbox;

/// Current envelope format version.
pub const MAIL_VERSION: u8 = 1;

/// Longest topic accepted, in bytes.
pub const MAX_TOPIC_LEN: usize = 1024;

/// Header carries the sender's public key.
pub const FLAG_SENDER_KEY: u8 = 0x01;

const FIXED_HEADER_LEN: usize = 1 + 1 + 2 + 8;

/// Smallest structurally valid envelope: empty topic field, no sender key, empty body.
pub const MIN_ENVELOPE_LEN: usize = FIXED_HEADER_LEN + 12 + 16;

/// The plaintext view of a mail message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlaintextEnvelope {
    pub topic: String,
    pub sequence: u64,
    /// Present on first-contact mail so the recipient can reply; absent on replies.
    pub sender_public_key: Option<PublicKey>,
    pub body: Bytes,
}

/// A plaintext envelope bound to its recipient and sender key, ready to encrypt.
///
/// Consumed by [`OutboundMail::encrypt`]; there is no way back.
pub struct OutboundMail<'k> {
    envelope: PlaintextEnvelope,
    recipient_public_key: PublicKey,
    sender: &'k KeyPair,
}

impl<'k> OutboundMail<'k> {
    /// New mail that carries the sender's public key.
    pub fn create(
        body: impl Into<Bytes>,
        topic: impl Into<String>,
        sequence: u64,
        recipient_public_key: PublicKey,
        sender: &'k KeyPair,
    ) -> Self {
        Self {
            envelope: PlaintextEnvelope {
                topic: topic.into(),
                sequence,
                sender_public_key: Some(sender.public_bytes()),
                body: body.into(),
            },
            recipient_public_key,
            sender,
        }
    }

    /// A reply: the recipient already knows our key, so it is left off the wire.
    pub fn reply(
        body: impl Into<Bytes>,
        topic: impl Into<String>,
        sequence: u64,
        recipient_public_key: PublicKey,
        sender: &'k KeyPair,
    ) -> Self {
        let mut mail = Self::create(body, topic, sequence, recipient_public_key, sender);
        mail.envelope.sender_public_key = None;
        mail
    }

    pub fn envelope(&self) -> &PlaintextEnvelope {
        &self.envelope
    }

    pub fn recipient_public_key(&self) -> &PublicKey {
        &self.recipient_public_key
    }

    /// Encrypt to the recipient.
    ///
    /// Only malformed inputs fail: an empty or over-long topic, or a recipient
    /// key that yields a non-contributory shared secret.
    pub fn encrypt(self) -> Result<EncryptedMail, CryptoError> {
        let envelope = &self.envelope;
        if envelope.topic.is_empty() {
            return Err(CryptoError::EncryptionFailed("empty topic".into()));
        }
        if envelope.topic.len() > MAX_TOPIC_LEN {
            return Err(CryptoError::EncryptionFailed(format!(
                "topic is {} bytes (max {MAX_TOPIC_LEN})",
                envelope.topic.len()
            )));
        }

        let sender_pk = self.sender.public_bytes();
        let nonce = seal::random_nonce();
        let header = encode_header(
            &envelope.topic,
            envelope.sequence,
            envelope.sender_public_key.as_ref(),
            &nonce,
        );

        let context = compute_mail_context(
            &envelope.topic,
            envelope.sequence,
            &sender_pk,
            &self.recipient_public_key,
        );
        let recipient = x25519_dalek::PublicKey::from(self.recipient_public_key);
        let key = derive_message_key(&self.sender.secret, &recipient, &context).map_err(|e| {
            CryptoError::EncryptionFailed(format!("malformed recipient key: {e}"))
        })?;

        let ciphertext = seal::seal(&key, &nonce, &header, &envelope.body)?;

        let mut buf = BytesMut::with_capacity(header.len() + ciphertext.len());
        buf.put_slice(&header);
        buf.put_slice(&ciphertext);
        Ok(EncryptedMail(buf.freeze()))
    }
}

/// Opaque encrypted mail as it travels through the relay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncryptedMail(Bytes);

impl EncryptedMail {
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn into_bytes(self) -> Bytes {
        self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<Bytes> for EncryptedMail {
    fn from(bytes: Bytes) -> Self {
        Self(bytes)
    }
}

impl From<EncryptedMail> for Bytes {
    fn from(mail: EncryptedMail) -> Self {
        mail.0
    }
}

/// Decrypt one envelope without any topic or replay bookkeeping.
///
/// `known_sender` is required for replies that omit the sender key; without it
/// such an envelope cannot be authenticated. When both are present they must
/// agree, otherwise a third party could address mail to us under its own key
/// and pass it off as coming from the peer.
pub fn open_envelope(
    ciphertext: &[u8],
    recipient: &KeyPair,
    known_sender: Option<&PublicKey>,
) -> Result<PlaintextEnvelope, CryptoError> {
    let header = parse_header(ciphertext)?;

    let sender_pk = match (header.sender, known_sender) {
        (Some(embedded), Some(known)) if &embedded != known => {
            return Err(CryptoError::AuthenticationFailure);
        }
        (Some(embedded), _) => embedded,
        (None, Some(known)) => *known,
        (None, None) => {
            tracing::debug!("envelope has no sender key and no peer key is known");
            return Err(CryptoError::AuthenticationFailure);
        }
    };

    let context = compute_mail_context(
        header.topic,
        header.sequence,
        &sender_pk,
        &recipient.public_bytes(),
    );
    let sender = x25519_dalek::PublicKey::from(sender_pk);
    let key = derive_message_key(&recipient.secret, &sender, &context)
        .map_err(|_| CryptoError::AuthenticationFailure)?;

    let (aad, sealed) = ciphertext.split_at(header.len);
    let body = seal::open(&key, &header.nonce, aad, sealed)?;

    Ok(PlaintextEnvelope {
        topic: header.topic.to_owned(),
        sequence: header.sequence,
        sender_public_key: header.sender,
        body: Bytes::from(body),
    })
}

/// Per-topic outbound sequence numbers.
#[derive(Debug, Default, Clone)]
pub struct TopicSequencer {
    next: HashMap<String, u64>,
}

impl TopicSequencer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim the next sequence number for `topic`, starting at 0.
    pub fn next(&mut self, topic: &str) -> Result<u64, CryptoError> {
        let slot = self.next.entry(topic.to_owned()).or_insert(0);
        let seq = *slot;
        *slot = seq
            .checked_add(1)
            .ok_or_else(|| CryptoError::SequenceExhausted(topic.to_owned()))?;
        Ok(seq)
    }

    /// The number the next call to [`TopicSequencer::next`] will return.
    pub fn peek(&self, topic: &str) -> u64 {
        self.next.get(topic).copied().unwrap_or(0)
    }
}

fn encode_header(
    topic: &str,
    sequence: u64,
    sender_pk: Option<&PublicKey>,
    nonce: &Nonce,
) -> BytesMut {
    let mut buf = BytesMut::with_capacity(FIXED_HEADER_LEN + topic.len() + 32 + 12);
    buf.put_u8(MAIL_VERSION);
    buf.put_u8(if sender_pk.is_some() { FLAG_SENDER_KEY } else { 0 });
    buf.put_u16(topic.len() as u16);
    buf.put_slice(topic.as_bytes());
    buf.put_u64(sequence);
    if let Some(pk) = sender_pk {
        buf.put_slice(pk);
    }
    buf.put_slice(nonce);
    buf
}

struct ParsedHeader<'a> {
    topic: &'a str,
    sequence: u64,
    sender: Option<PublicKey>,
    nonce: Nonce,
    /// Header length; the ciphertext starts here.
    len: usize,
}

/// Every structural problem reads as an authentication failure: the header is
/// associated data, so a damaged header is a tampered envelope.
fn parse_header(bytes: &[u8]) -> Result<ParsedHeader<'_>, CryptoError> {
    let fail = || CryptoError::AuthenticationFailure;
    if bytes.len() < MIN_ENVELOPE_LEN {
        return Err(fail());
    }

    let mut cursor = bytes;
    if cursor.get_u8() != MAIL_VERSION {
        return Err(fail());
    }
    let flags = cursor.get_u8();
    if flags & !FLAG_SENDER_KEY != 0 {
        return Err(fail());
    }
    let topic_len = cursor.get_u16() as usize;
    if topic_len == 0 || topic_len > MAX_TOPIC_LEN {
        return Err(fail());
    }

    let sender_len = if flags & FLAG_SENDER_KEY != 0 { 32 } else { 0 };
    let header_len = FIXED_HEADER_LEN + topic_len + sender_len + MAIL_SUITE.nonce_len();
    if bytes.len() < header_len + MAIL_SUITE.tag_len() {
        return Err(fail());
    }

    let topic = std::str::from_utf8(&cursor[..topic_len]).map_err(|_| fail())?;
    cursor.advance(topic_len);
    let sequence = cursor.get_u64();

    let sender = if sender_len > 0 {
        let mut pk = [0u8; 32];
        cursor.copy_to_slice(&mut pk);
        Some(pk)
    } else {
        None
    };

    let mut nonce = [0u8; 12];
    cursor.copy_to_slice(&mut nonce);

    Ok(ParsedHeader {
        topic,
        sequence,
        sender,
        nonce,
        len: header_len,
    })
}
